//! Retention sweeper over a real scratch directory

use crate::harness::TestEnv;
use extractor_mgmt::sweeper::{RetentionSweeper, SweepReport};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

const HOUR: Duration = Duration::from_secs(3600);

fn write_aged(path: &Path, age: Duration) {
    std::fs::write(path, b"host;code\n").unwrap();
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - age).unwrap();
}

fn sweeper(env: &TestEnv) -> RetentionSweeper {
    RetentionSweeper::new(env.scratch().to_path_buf(), HOUR, Duration::from_millis(20))
}

#[tokio::test]
async fn test_only_files_past_max_age_are_deleted() {
    let env = TestEnv::new();
    write_aged(&env.scratch().join("old.csv"), 2 * HOUR);
    write_aged(&env.scratch().join("new.csv"), Duration::from_secs(60));

    let report = sweeper(&env).sweep().await.unwrap();

    assert_eq!(report, SweepReport { scanned: 2, deleted: 1, failed: 0 });
    assert!(!env.scratch().join("old.csv").exists());
    assert!(env.scratch().join("new.csv").exists());
}

#[tokio::test]
async fn test_failed_delete_does_not_stop_the_pass() {
    let env = TestEnv::new();
    std::fs::create_dir(env.scratch().join("nested")).unwrap();
    std::fs::write(env.scratch().join("a.csv"), b"a\n").unwrap();
    std::fs::write(env.scratch().join("b.json"), b"{}\n").unwrap();

    let later = SystemTime::now() + 3 * HOUR;
    let report = sweeper(&env).sweep_at(later).await.unwrap();

    assert_eq!(report, SweepReport { scanned: 3, deleted: 2, failed: 1 });
    assert!(env.scratch().join("nested").is_dir());
    assert!(!env.scratch().join("a.csv").exists());
    assert!(!env.scratch().join("b.json").exists());
}

#[tokio::test]
async fn test_background_loop_sweeps_then_stops() {
    let env = TestEnv::new();
    write_aged(&env.scratch().join("stale.csv"), 5 * HOUR);

    let cancel = CancellationToken::new();
    let sweeper = sweeper(&env);
    let task = {
        let cancel = cancel.clone();
        async move { sweeper.run(cancel).await }
    };
    let stopper = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
    };

    tokio::time::timeout(Duration::from_secs(5), async { tokio::join!(task, stopper) })
        .await
        .unwrap();
    assert!(!env.scratch().join("stale.csv").exists());
}
