//! End-to-end discovery run orchestration: source → rate limit → validate →
//! resolve → lifecycle → ledger.
//!
//! Each source runs as its own unit of work. A failing source closes its own
//! run segment as failed and leaves every other source untouched; a
//! malformed candidate is rejected before the matching pipeline and counted
//! in no ledger bucket; a transient write conflict skips the candidate for
//! this run only (it is reattempted on the next scheduled run).

use std::sync::Arc;

use dealscout_match::DedupEngine;
use dealscout_shared::{
    AppConfig, DealscoutError, MatchOutcome, Result, RunCounter, RunStatus,
};
use dealscout_sources::{DiscoverySource, RateLimiter, limiter_from_entries};
use dealscout_storage::Storage;
use tokio::sync::watch;
use tracing::{info, instrument, warn};

use crate::ledger::RunLedger;
use crate::lifecycle::Lifecycle;

/// Outcome of one source's discovery run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub source_name: String,
    /// Candidates successfully resolved to a terminal outcome.
    pub discovered: u64,
    pub created_new: u64,
    pub merged: u64,
    pub queued_for_review: u64,
    /// Malformed or transiently failed candidates, not counted above.
    pub skipped: u64,
    pub status: RunStatus,
}

impl RunSummary {
    fn empty(run_id: String, source_name: String, status: RunStatus) -> Self {
        Self {
            run_id,
            source_name,
            discovered: 0,
            created_new: 0,
            merged: 0,
            queued_for_review: 0,
            skipped: 0,
            status,
        }
    }
}

/// Orchestrates discovery runs over the shared storage handle.
pub struct DiscoveryPipeline {
    engine: Arc<DedupEngine>,
    limiter: Arc<RateLimiter>,
    ledger: RunLedger,
    lifecycle: Lifecycle,
    run_limit: u32,
}

impl DiscoveryPipeline {
    pub fn new(storage: Arc<Storage>, config: &AppConfig) -> Self {
        Self {
            engine: Arc::new(DedupEngine::new(storage.clone(), config.matching.clone())),
            limiter: Arc::new(limiter_from_entries(&config.sources)),
            ledger: RunLedger::new(storage.clone()),
            lifecycle: Lifecycle::new(storage),
            run_limit: config.defaults.run_limit,
        }
    }

    pub fn engine(&self) -> &Arc<DedupEngine> {
        &self.engine
    }

    pub fn ledger(&self) -> &RunLedger {
        &self.ledger
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Run one source to completion (or cancellation).
    ///
    /// Cancellation is cooperative: it is checked between candidates, so an
    /// in-flight candidate always reaches its terminal outcome rather than
    /// leaving a partial write.
    #[instrument(skip_all, fields(source = %source.config().name))]
    pub async fn run_source(
        &self,
        source: &dyn DiscoverySource,
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Result<RunSummary> {
        let source_name = source.config().name.clone();

        let run_id = self.ledger.start_run(&source_name).await?;

        if !source.is_available().await {
            warn!("source unavailable, marking run failed");
            self.ledger
                .finish_run(&run_id, RunStatus::Failed, Some("source unavailable"))
                .await?;
            return Ok(RunSummary::empty(run_id, source_name, RunStatus::Failed));
        }

        self.limiter.acquire(&source_name).await;
        let candidates = match source.discover(Some(self.run_limit)).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "source failed during discovery");
                self.ledger
                    .finish_run(&run_id, RunStatus::Failed, Some(&e.to_string()))
                    .await?;
                return Ok(RunSummary::empty(run_id, source_name, RunStatus::Failed));
            }
        };

        let mut summary =
            RunSummary::empty(run_id.clone(), source_name.clone(), RunStatus::Running);
        let mut cancelled = false;

        for candidate in &candidates {
            if cancel.is_some_and(|c| *c.borrow()) {
                info!("run cancelled, stopping before next candidate");
                cancelled = true;
                break;
            }

            if let Err(e) = candidate.validate() {
                warn!(name = %candidate.name, error = %e, "rejected malformed candidate");
                summary.skipped += 1;
                continue;
            }

            match self.engine.resolve(candidate).await {
                Ok(outcome) => {
                    // Counters reflect first successful resolution only;
                    // retried candidates are never double-counted.
                    self.ledger.record(&run_id, RunCounter::Discovered).await?;
                    summary.discovered += 1;

                    match outcome {
                        MatchOutcome::CreatedNew(id) => {
                            self.ledger.record(&run_id, RunCounter::CreatedNew).await?;
                            summary.created_new += 1;
                            self.lifecycle.initialize_after_discovery(&id).await?;
                        }
                        MatchOutcome::MergedInto(id) => {
                            self.ledger.record(&run_id, RunCounter::Merged).await?;
                            summary.merged += 1;
                            self.lifecycle.initialize_after_discovery(&id).await?;
                        }
                        MatchOutcome::QueuedForReview(_) => {
                            self.ledger
                                .record(&run_id, RunCounter::QueuedForReview)
                                .await?;
                            summary.queued_for_review += 1;
                        }
                    }
                }
                Err(DealscoutError::Conflict { message }) => {
                    warn!(name = %candidate.name, %message, "transient conflict, candidate deferred to next run");
                    summary.skipped += 1;
                }
                Err(DealscoutError::Validation { message }) => {
                    warn!(name = %candidate.name, %message, "rejected candidate");
                    summary.skipped += 1;
                }
                Err(e) => {
                    // Infrastructure failure: close the run segment and
                    // surface the error to the caller.
                    let _ = self
                        .ledger
                        .finish_run(&run_id, RunStatus::Failed, Some(&e.to_string()))
                        .await;
                    return Err(e);
                }
            }
        }

        let status = if cancelled {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.ledger
            .finish_run(&run_id, status, cancelled.then_some("cancelled"))
            .await?;
        summary.status = status;

        info!(
            run_id = %summary.run_id,
            discovered = summary.discovered,
            created_new = summary.created_new,
            merged = summary.merged,
            queued_for_review = summary.queued_for_review,
            skipped = summary.skipped,
            status = status.as_str(),
            "discovery run complete"
        );
        Ok(summary)
    }

    /// Run every source concurrently. Sources never block each other: each
    /// has its own rate-limiter key and its own run segment, and a failure
    /// is isolated to the source that raised it.
    pub async fn run_all(
        &self,
        sources: &[Arc<dyn DiscoverySource>],
        cancel: Option<&watch::Receiver<bool>>,
    ) -> Vec<Result<RunSummary>> {
        futures::future::join_all(
            sources
                .iter()
                .map(|source| self.run_source(source.as_ref(), cancel)),
        )
        .await
    }
}
