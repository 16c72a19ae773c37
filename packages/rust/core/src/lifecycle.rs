//! Enrichment lifecycle state machine.
//!
//! Tracks where each company sits in the pipeline:
//!
//! ```text
//! Discovered → WebsitePending → WebsiteFound → Enriched → Scored
//!                     └────────→ WebsiteBlocked ──┘ (via review)
//! ```
//!
//! Blockers are a cross-cutting flag, not a state: a company accumulates
//! structured reasons without regressing. The machine exposes lifecycle
//! operations only — it never inspects business content.

use std::sync::Arc;

use chrono::Utc;
use dealscout_shared::{
    Blocker, BlockerReason, CompanyId, DealscoutError, EnrichmentState, Result, TaskContext,
    TaskType,
};
use dealscout_storage::Storage;
use tracing::{debug, info};

use crate::review::ReviewQueue;

/// Priority for a `find_website` task when the company passed the external
/// relevance filter.
const WEBSITE_TASK_PRIORITY_RELEVANT: u8 = 8;

/// Priority for a `find_website` task otherwise.
const WEBSITE_TASK_PRIORITY_DEFAULT: u8 = 3;

/// Whether `from → to` is a legal lifecycle transition.
fn is_valid_transition(from: EnrichmentState, to: EnrichmentState) -> bool {
    use EnrichmentState::*;
    // Self-transitions carry blocker-list updates; state never regresses.
    from == to
        || matches!(
            (from, to),
            (Discovered, WebsitePending)
                | (Discovered, WebsiteFound)
                | (WebsitePending, WebsiteFound)
                | (WebsitePending, WebsiteBlocked)
                | (WebsiteBlocked, WebsiteFound)
                | (WebsiteFound, Enriched)
                | (Enriched, Scored)
        )
}

/// State machine over the persisted `enrichment_state` column.
pub struct Lifecycle {
    storage: Arc<Storage>,
    queue: ReviewQueue,
}

impl Lifecycle {
    pub fn new(storage: Arc<Storage>) -> Self {
        let queue = ReviewQueue::new(storage.clone());
        Self { storage, queue }
    }

    /// Advance a company to `new_state`. Illegal transitions are validation
    /// errors; collaborators report progress, they do not rewrite history.
    pub async fn advance(&self, company_id: &CompanyId, new_state: EnrichmentState) -> Result<()> {
        let mut company = self.storage.get_company(company_id).await?.ok_or_else(|| {
            DealscoutError::validation(format!("company {company_id} not found"))
        })?;

        let from = company.enrichment_state;
        if !is_valid_transition(from, new_state) {
            return Err(DealscoutError::validation(format!(
                "illegal enrichment transition {} -> {}",
                from.as_str(),
                new_state.as_str()
            )));
        }
        if from == new_state {
            return Ok(());
        }

        company.enrichment_state = new_state;
        if new_state == EnrichmentState::Enriched {
            company.last_enrichment_attempt = Some(Utc::now());
        }
        company.updated_at = Utc::now();
        self.storage.update_company(&company).await?;

        info!(
            %company_id,
            from = from.as_str(),
            to = new_state.as_str(),
            "enrichment state advanced"
        );
        Ok(())
    }

    /// Record a structured blocker against a company. State is untouched;
    /// identical reasons are not duplicated.
    pub async fn record_blocker(
        &self,
        company_id: &CompanyId,
        reason: BlockerReason,
    ) -> Result<()> {
        let mut company = self.storage.get_company(company_id).await?.ok_or_else(|| {
            DealscoutError::validation(format!("company {company_id} not found"))
        })?;

        if company
            .enrichment_blockers
            .iter()
            .any(|b| b.reason == reason)
        {
            debug!(%company_id, ?reason, "blocker already recorded");
            return Ok(());
        }

        company.enrichment_blockers.push(Blocker {
            reason: reason.clone(),
            detail: None,
            recorded_at: Utc::now(),
        });
        company.updated_at = Utc::now();
        self.storage.update_company(&company).await?;

        info!(%company_id, ?reason, "recorded enrichment blocker");
        Ok(())
    }

    /// Put a freshly created or merged company onto the website-discovery
    /// track: straight to `WebsiteFound` when the candidate already carried a
    /// website, otherwise `WebsitePending`.
    pub async fn initialize_after_discovery(&self, company_id: &CompanyId) -> Result<()> {
        let company = self.storage.get_company(company_id).await?.ok_or_else(|| {
            DealscoutError::validation(format!("company {company_id} not found"))
        })?;

        if company.enrichment_state != EnrichmentState::Discovered {
            return Ok(());
        }
        let next = if company.domain.is_some() {
            EnrichmentState::WebsiteFound
        } else {
            EnrichmentState::WebsitePending
        };
        self.advance(company_id, next).await
    }

    /// Website discovery exhausted its methods: block the company, record
    /// the blocker, and queue a `find_website` review task — elevated
    /// priority when the company passed the external relevance filter.
    pub async fn mark_website_blocked(
        &self,
        company_id: &CompanyId,
        relevant: bool,
        attempted: Vec<String>,
    ) -> Result<String> {
        self.advance(company_id, EnrichmentState::WebsiteBlocked)
            .await?;
        self.record_blocker(company_id, BlockerReason::WebsiteNotFound)
            .await?;

        let priority = if relevant {
            WEBSITE_TASK_PRIORITY_RELEVANT
        } else {
            WEBSITE_TASK_PRIORITY_DEFAULT
        };
        self.queue
            .enqueue(
                company_id,
                TaskType::FindWebsite,
                priority,
                TaskContext::FindWebsite { attempted },
            )
            .await
    }
}
