//! Core pipeline orchestration for dealscout.
//!
//! This crate ties together discovery sources, the dedup engine, the
//! enrichment lifecycle, the manual review queue, and the run ledger into
//! end-to-end discovery runs.

pub mod ledger;
pub mod lifecycle;
pub mod review;
pub mod runner;

pub use ledger::RunLedger;
pub use lifecycle::Lifecycle;
pub use review::ReviewQueue;
pub use runner::{DiscoveryPipeline, RunSummary};
