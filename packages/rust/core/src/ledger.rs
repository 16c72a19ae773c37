//! Discovery-run audit ledger.
//!
//! One row per source per run, with monotonic counters for ingestion-health
//! monitoring. Counters are frozen the moment a run is finished; nothing
//! else in the system reads the ledger.

use std::sync::Arc;

use dealscout_shared::{DiscoveryRun, Result, RunCounter, RunStatus};
use dealscout_storage::Storage;
use tracing::info;

pub struct RunLedger {
    storage: Arc<Storage>,
}

impl RunLedger {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Open a run for a source. Returns the run id.
    pub async fn start_run(&self, source_name: &str) -> Result<String> {
        let run_id = self.storage.insert_run(source_name).await?;
        info!(%run_id, source_name, "discovery run started");
        Ok(run_id)
    }

    /// Bump one counter on a running run.
    pub async fn record(&self, run_id: &str, counter: RunCounter) -> Result<()> {
        self.storage.increment_run_counter(run_id, counter).await
    }

    /// Close a run. Its counters are read-only from here on.
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.storage.finish_run(run_id, status, error_message).await?;
        info!(run_id, status = status.as_str(), error_message, "discovery run finished");
        Ok(())
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<DiscoveryRun>> {
        self.storage.get_run(run_id).await
    }

    /// Most recent runs first.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<DiscoveryRun>> {
        self.storage.list_runs(limit).await
    }
}
