//! Extractor test infrastructure
//!
//! A scripted in-memory cluster backend, scratch-directory setup, and the
//! integration and property tests that drive the management crate through it.

pub mod harness;
pub mod proptest_planner;

#[cfg(test)]
mod api_integration;
#[cfg(test)]
mod catalog_integration;
#[cfg(test)]
mod restore_integration;
#[cfg(test)]
mod sweeper_integration;

pub use harness::{MockCluster, MockReply, RecordedCall, TestEnv};
pub use proptest_planner::{arb_free, arb_meta, arb_requested};
