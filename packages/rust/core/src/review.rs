//! Manual review queue.
//!
//! Reviewers interact with the pipeline only through this queue: ambiguous
//! merges, missing critical data, and low-confidence classifications all
//! land here as [`ReviewTask`]s. Completing a task with field updates is a
//! single atomic operation — the status flip and the company writes commit
//! together or not at all.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dealscout_match::{FIELD_REGISTRY, apply_field_update};
use dealscout_shared::{
    CompanyId, DealscoutError, EnrichmentState, Result, ReviewTask, TaskContext, TaskStatus,
    TaskType,
};
use dealscout_storage::Storage;
use tracing::{debug, info};
use uuid::Uuid;

/// Queue facade over the persisted `manual_review_queue` table.
pub struct ReviewQueue {
    storage: Arc<Storage>,
}

impl ReviewQueue {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }

    /// Enqueue a task for a company. Idempotent per (company, task type):
    /// while a pending task of the same type exists, its id is returned and
    /// no duplicate is created.
    pub async fn enqueue(
        &self,
        company_id: &CompanyId,
        task_type: TaskType,
        priority: u8,
        context: TaskContext,
    ) -> Result<String> {
        if !(1..=10).contains(&priority) {
            return Err(DealscoutError::validation(format!(
                "priority must be 1-10, got {priority}"
            )));
        }

        if let Some(existing) = self.storage.find_pending_task(company_id, task_type).await? {
            debug!(
                task_id = %existing,
                %company_id,
                task_type = task_type.as_str(),
                "pending task of this type already queued"
            );
            return Ok(existing);
        }

        let task = ReviewTask {
            id: Uuid::now_v7().to_string(),
            company_id: company_id.clone(),
            task_type,
            priority,
            context,
            status: TaskStatus::Pending,
            assigned_to: None,
            resolution: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.storage.insert_task(&task).await?;

        info!(
            task_id = %task.id,
            %company_id,
            task_type = task_type.as_str(),
            priority,
            "queued review task"
        );
        Ok(task.id)
    }

    /// Pending tasks ordered by priority desc, then age asc (FIFO within a
    /// priority tier).
    pub async fn list_pending(
        &self,
        task_type: Option<TaskType>,
        limit: u32,
    ) -> Result<Vec<ReviewTask>> {
        self.storage.list_pending_tasks(task_type, limit).await
    }

    /// Number of pending tasks, for queue-health dashboards.
    pub async fn pending_count(&self, task_type: Option<TaskType>) -> Result<u64> {
        self.storage.count_pending_tasks(task_type).await
    }

    /// Assign a pending task to a reviewer.
    pub async fn claim(&self, task_id: &str, assignee: &str) -> Result<()> {
        self.storage.claim_task(task_id, assignee).await
    }

    /// Complete a task, optionally applying reviewer-entered field updates
    /// to the target company in the same transaction.
    pub async fn complete(
        &self,
        task_id: &str,
        resolution: &str,
        field_updates: Option<&HashMap<String, String>>,
    ) -> Result<()> {
        let task = self.storage.get_task(task_id).await?.ok_or_else(|| {
            DealscoutError::validation(format!("task {task_id} not found"))
        })?;

        let updated_company = match field_updates {
            Some(updates) if !updates.is_empty() => {
                let mut company = self
                    .storage
                    .get_company(&task.company_id)
                    .await?
                    .ok_or_else(|| {
                        DealscoutError::validation(format!(
                            "company {} not found",
                            task.company_id
                        ))
                    })?;

                let reviewer = task.assigned_to.as_deref().unwrap_or("reviewer");
                for (field, value) in updates {
                    if !FIELD_REGISTRY.iter().any(|f| f.name == field) {
                        return Err(DealscoutError::validation(format!(
                            "unknown field in task resolution: {field}"
                        )));
                    }
                    apply_field_update(&mut company, field, value, reviewer);
                }

                // A reviewer supplying the website resolves the blocked
                // website-discovery step.
                if updates.contains_key("website")
                    && company.domain.is_some()
                    && matches!(
                        company.enrichment_state,
                        EnrichmentState::WebsitePending | EnrichmentState::WebsiteBlocked
                    )
                {
                    company.enrichment_state = EnrichmentState::WebsiteFound;
                }

                Some(company)
            }
            _ => None,
        };

        self.storage
            .complete_task(task_id, resolution, updated_company.as_ref())
            .await?;

        info!(task_id, resolution, "completed review task");
        Ok(())
    }

    /// Terminal skip: no field updates, no re-queue.
    pub async fn skip(&self, task_id: &str, reason: &str) -> Result<()> {
        self.storage.skip_task(task_id, reason).await?;
        info!(task_id, reason, "skipped review task");
        Ok(())
    }
}
