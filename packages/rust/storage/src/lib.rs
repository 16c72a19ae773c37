//! libSQL storage layer for the dealscout company index.
//!
//! The [`Storage`] struct wraps a libSQL database holding canonical company
//! records, the manual review queue, merge candidates, and discovery-run
//! audit counters.
//!
//! **Access rules:**
//! - Discovery/dedup pipeline: read-write (sole writer) via [`Storage::open`]
//! - Dashboards and reporting: read-only via [`Storage::open_readonly`]

mod migrations;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use dealscout_shared::{
    Blocker, CanonicalCompany, CompanyId, DealscoutError, DiscoveryRun, FieldProvenance,
    MergeCandidate, MergeStatus, MergeSubject, Result, ReviewTask, RunCounter, RunStatus,
    TaskType,
};
use libsql::{Connection, Database, params};

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

/// Map a libSQL error, surfacing unique-index violations as [`DealscoutError::Conflict`]
/// so the dedup engine can re-read and retry instead of failing the candidate.
fn db_err(e: impl std::fmt::Display) -> DealscoutError {
    let msg = e.to_string();
    if msg.contains("UNIQUE constraint failed") {
        DealscoutError::Conflict { message: msg }
    } else {
        DealscoutError::Storage(msg)
    }
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DealscoutError::Storage(format!("invalid timestamp {s:?}: {e}")))
}

fn parse_opt_ts(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.map(|s| parse_ts(&s)).transpose()
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| DealscoutError::Storage(format!("{}: {e}", parent.display())))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;
        conn.execute("PRAGMA foreign_keys = ON", params![])
            .await
            .map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open a database at `path` in read-only mode (for dashboard parity).
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    DealscoutError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(DealscoutError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Company operations
    // -----------------------------------------------------------------------

    /// Insert a new canonical company record.
    ///
    /// A unique-index violation on `lei` or `(vat_id, country)` surfaces as
    /// [`DealscoutError::Conflict`].
    pub async fn insert_company(&self, company: &CanonicalCompany) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO companies (id, name, country, normalized_name, lei, vat_id, domain,
                   sector, description, moat_signals, certifications, data_sources,
                   enrichment_state, enrichment_blockers, input_quality,
                   last_enrichment_attempt, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                company_params(company)?,
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Overwrite a canonical company's mutable fields.
    pub async fn update_company(&self, company: &CanonicalCompany) -> Result<()> {
        self.check_writable()?;
        let n = update_company_on(&self.conn, company).await?;
        if n == 0 {
            return Err(DealscoutError::Storage(format!(
                "company {} not found for update",
                company.id
            )));
        }
        Ok(())
    }

    /// Get a company by ID.
    pub async fn get_company(&self, id: &CompanyId) -> Result<Option<CanonicalCompany>> {
        self.query_one_company("SELECT * FROM companies WHERE id = ?1", params![id.to_string()])
            .await
    }

    /// Look up the unique holder of a LEI, if any.
    pub async fn find_by_lei(&self, lei: &str) -> Result<Option<CanonicalCompany>> {
        self.query_one_company("SELECT * FROM companies WHERE lei = ?1", params![lei])
            .await
    }

    /// Look up the unique holder of a (VAT, country) pair, if any.
    pub async fn find_by_vat(&self, vat_id: &str, country: &str) -> Result<Option<CanonicalCompany>> {
        self.query_one_company(
            "SELECT * FROM companies WHERE vat_id = ?1 AND country = ?2",
            params![vat_id, country],
        )
        .await
    }

    /// Remove a canonical record (used when a reviewer-confirmed merge
    /// absorbs one record into another). Open tasks and merge candidates
    /// referencing it are cascaded away.
    pub async fn delete_company(&self, id: &CompanyId) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "DELETE FROM companies WHERE id = ?1",
                params![id.to_string()],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Companies sharing a (normalized_name, country) soft key. Names collide
    /// legitimately, so this returns all holders.
    pub async fn find_by_name_key(
        &self,
        normalized_name: &str,
        country: &str,
    ) -> Result<Vec<CanonicalCompany>> {
        self.query_companies(
            "SELECT * FROM companies WHERE normalized_name = ?1 AND country = ?2
             ORDER BY created_at ASC",
            params![normalized_name, country],
        )
        .await
    }

    /// Companies holding a website domain.
    pub async fn find_by_domain(&self, domain: &str) -> Result<Vec<CanonicalCompany>> {
        self.query_companies(
            "SELECT * FROM companies WHERE domain = ?1 ORDER BY created_at ASC",
            params![domain],
        )
        .await
    }

    /// All companies in a country, for the fuzzy-name stage.
    pub async fn list_by_country(&self, country: &str) -> Result<Vec<CanonicalCompany>> {
        self.query_companies(
            "SELECT * FROM companies WHERE country = ?1 ORDER BY created_at ASC",
            params![country],
        )
        .await
    }

    async fn query_one_company(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Option<CanonicalCompany>> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_company(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn query_companies(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<CanonicalCompany>> {
        let mut rows = self.conn.query(sql, params).await.map_err(db_err)?;
        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_company(&row)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Review queue operations
    // -----------------------------------------------------------------------

    /// ID of the pending task of `task_type` for `company_id`, if one exists.
    pub async fn find_pending_task(
        &self,
        company_id: &CompanyId,
        task_type: TaskType,
    ) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id FROM manual_review_queue
                 WHERE company_id = ?1 AND task_type = ?2 AND status = 'pending'",
                params![company_id.to_string(), task_type.as_str()],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row.get::<String>(0).map_err(db_err)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Insert a review task row.
    pub async fn insert_task(&self, task: &ReviewTask) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO manual_review_queue
                   (id, company_id, task_type, priority, context, status, assigned_to,
                    created_at, completed_at, resolution)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    task.id.as_str(),
                    task.company_id.to_string(),
                    task.task_type.as_str(),
                    i64::from(task.priority),
                    serde_json::to_string(&task.context)
                        .map_err(|e| DealscoutError::Storage(e.to_string()))?,
                    task.status.as_str(),
                    task.assigned_to.as_deref(),
                    task.created_at.to_rfc3339(),
                    task.completed_at.map(|t| t.to_rfc3339()),
                    task.resolution.as_deref(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a review task by ID.
    pub async fn get_task(&self, task_id: &str) -> Result<Option<ReviewTask>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, task_type, priority, context, status, assigned_to,
                        created_at, completed_at, resolution
                 FROM manual_review_queue WHERE id = ?1",
                params![task_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_task(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Pending tasks, highest priority first, oldest first within a tier.
    pub async fn list_pending_tasks(
        &self,
        task_type: Option<TaskType>,
        limit: u32,
    ) -> Result<Vec<ReviewTask>> {
        let mut rows = match task_type {
            Some(t) => self
                .conn
                .query(
                    "SELECT id, company_id, task_type, priority, context, status, assigned_to,
                            created_at, completed_at, resolution
                     FROM manual_review_queue
                     WHERE status = 'pending' AND task_type = ?1
                     ORDER BY priority DESC, created_at ASC
                     LIMIT ?2",
                    params![t.as_str(), limit],
                )
                .await
                .map_err(db_err)?,
            None => self
                .conn
                .query(
                    "SELECT id, company_id, task_type, priority, context, status, assigned_to,
                            created_at, completed_at, resolution
                     FROM manual_review_queue
                     WHERE status = 'pending'
                     ORDER BY priority DESC, created_at ASC
                     LIMIT ?1",
                    params![limit],
                )
                .await
                .map_err(db_err)?,
        };

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_task(&row)?);
        }
        Ok(results)
    }

    /// Number of pending tasks, optionally restricted to one type.
    pub async fn count_pending_tasks(&self, task_type: Option<TaskType>) -> Result<u64> {
        let mut rows = match task_type {
            Some(t) => self
                .conn
                .query(
                    "SELECT COUNT(*) FROM manual_review_queue
                     WHERE status = 'pending' AND task_type = ?1",
                    params![t.as_str()],
                )
                .await
                .map_err(db_err)?,
            None => self
                .conn
                .query(
                    "SELECT COUNT(*) FROM manual_review_queue WHERE status = 'pending'",
                    params![],
                )
                .await
                .map_err(db_err)?,
        };

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)? as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Assign a pending task to a reviewer and mark it in progress.
    pub async fn claim_task(&self, task_id: &str, assignee: &str) -> Result<()> {
        self.check_writable()?;
        let n = self
            .conn
            .execute(
                "UPDATE manual_review_queue SET status = 'in_progress', assigned_to = ?1
                 WHERE id = ?2 AND status = 'pending'",
                params![assignee, task_id],
            )
            .await
            .map_err(db_err)?;
        if n == 0 {
            return Err(DealscoutError::validation(format!(
                "task {task_id} is not pending"
            )));
        }
        Ok(())
    }

    /// Mark a task completed and, when `updated_company` is given, write the
    /// updated company row in the same transaction. All-or-nothing: a failure
    /// on either statement leaves both rows untouched.
    pub async fn complete_task(
        &self,
        task_id: &str,
        resolution: &str,
        updated_company: Option<&CanonicalCompany>,
    ) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        let now = Utc::now().to_rfc3339();

        let n = tx
            .execute(
                "UPDATE manual_review_queue
                 SET status = 'completed', completed_at = ?1, resolution = ?2
                 WHERE id = ?3 AND status IN ('pending', 'in_progress')",
                params![now.as_str(), resolution, task_id],
            )
            .await
            .map_err(db_err)?;
        if n == 0 {
            // Dropping the transaction rolls it back.
            return Err(DealscoutError::validation(format!(
                "task {task_id} is not open"
            )));
        }

        if let Some(company) = updated_company {
            let n = update_company_on(&tx, company).await?;
            if n == 0 {
                return Err(DealscoutError::Storage(format!(
                    "company {} not found for task field updates",
                    company.id
                )));
            }
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    /// Terminal skip: no field updates, no re-queue.
    pub async fn skip_task(&self, task_id: &str, reason: &str) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .execute(
                "UPDATE manual_review_queue
                 SET status = 'skipped', completed_at = ?1, resolution = ?2
                 WHERE id = ?3 AND status IN ('pending', 'in_progress')",
                params![now.as_str(), reason, task_id],
            )
            .await
            .map_err(db_err)?;
        if n == 0 {
            return Err(DealscoutError::validation(format!(
                "task {task_id} is not open"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Merge candidate operations
    // -----------------------------------------------------------------------

    /// Insert a merge candidate row.
    pub async fn insert_merge_candidate(&self, mc: &MergeCandidate) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO merge_candidates
                   (id, company_id, subject, pair_key, match_method, confidence, status,
                    created_at, reviewed_at, reviewed_by)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    mc.id.as_str(),
                    mc.company_id.to_string(),
                    serde_json::to_string(&mc.subject)
                        .map_err(|e| DealscoutError::Storage(e.to_string()))?,
                    mc.pair_key.as_str(),
                    mc.match_method.as_str(),
                    mc.confidence,
                    mc.status.as_str(),
                    mc.created_at.to_rfc3339(),
                    mc.reviewed_at.map(|t| t.to_rfc3339()),
                    mc.reviewed_by.as_deref(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a merge candidate by ID.
    pub async fn get_merge_candidate(&self, id: &str) -> Result<Option<MergeCandidate>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, subject, pair_key, match_method, confidence, status,
                        created_at, reviewed_at, reviewed_by
                 FROM merge_candidates WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_merge_candidate(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// The pending merge candidate for a pair key, if one exists.
    pub async fn find_pending_merge_candidate(
        &self,
        pair_key: &str,
    ) -> Result<Option<MergeCandidate>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, company_id, subject, pair_key, match_method, confidence, status,
                        created_at, reviewed_at, reviewed_by
                 FROM merge_candidates WHERE pair_key = ?1 AND status = 'pending'",
                params![pair_key],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_merge_candidate(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Whether a reviewer already marked this pair distinct.
    pub async fn pair_rejected(&self, pair_key: &str) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM merge_candidates WHERE pair_key = ?1 AND status = 'rejected' LIMIT 1",
                params![pair_key],
            )
            .await
            .map_err(db_err)?;
        Ok(matches!(rows.next().await, Ok(Some(_))))
    }

    /// Resolve a pending merge candidate to confirmed or rejected.
    pub async fn update_merge_status(
        &self,
        id: &str,
        status: MergeStatus,
        reviewed_by: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .execute(
                "UPDATE merge_candidates
                 SET status = ?1, reviewed_at = ?2, reviewed_by = ?3
                 WHERE id = ?4 AND status = 'pending'",
                params![status.as_str(), now.as_str(), reviewed_by, id],
            )
            .await
            .map_err(db_err)?;
        if n == 0 {
            return Err(DealscoutError::validation(format!(
                "merge candidate {id} is not pending"
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Discovery run operations
    // -----------------------------------------------------------------------

    /// Open a new discovery run for a source. Returns the run ID.
    pub async fn insert_run(&self, source_name: &str) -> Result<String> {
        self.check_writable()?;
        let id = uuid::Uuid::now_v7().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO discovery_runs (id, source_name, started_at, status)
                 VALUES (?1, ?2, ?3, 'running')",
                params![id.as_str(), source_name, now.as_str()],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Bump one counter on a running run. Counters are frozen once the run
    /// has finished; incrementing a closed run is an error.
    pub async fn increment_run_counter(&self, run_id: &str, counter: RunCounter) -> Result<()> {
        self.check_writable()?;
        let column = match counter {
            RunCounter::Discovered => "discovered_count",
            RunCounter::CreatedNew => "new_count",
            RunCounter::Merged => "merged_count",
            RunCounter::QueuedForReview => "queued_count",
        };
        let sql = format!(
            "UPDATE discovery_runs SET {column} = {column} + 1
             WHERE id = ?1 AND status = 'running'"
        );
        let n = self
            .conn
            .execute(&sql, params![run_id])
            .await
            .map_err(db_err)?;
        if n == 0 {
            return Err(DealscoutError::validation(format!(
                "run {run_id} is not running"
            )));
        }
        Ok(())
    }

    /// Close a run with its terminal status.
    pub async fn finish_run(
        &self,
        run_id: &str,
        status: RunStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let now = Utc::now().to_rfc3339();
        let n = self
            .conn
            .execute(
                "UPDATE discovery_runs
                 SET status = ?1, completed_at = ?2, error_message = ?3
                 WHERE id = ?4 AND status = 'running'",
                params![status.as_str(), now.as_str(), error_message, run_id],
            )
            .await
            .map_err(db_err)?;
        if n == 0 {
            return Err(DealscoutError::validation(format!(
                "run {run_id} is not running"
            )));
        }
        Ok(())
    }

    /// Get a run by ID.
    pub async fn get_run(&self, run_id: &str) -> Result<Option<DiscoveryRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_name, started_at, completed_at, discovered_count, new_count,
                        merged_count, queued_count, status, error_message
                 FROM discovery_runs WHERE id = ?1",
                params![run_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Most recent runs first, for ingestion-health dashboards.
    pub async fn list_runs(&self, limit: u32) -> Result<Vec<DiscoveryRun>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, source_name, started_at, completed_at, discovered_count, new_count,
                        merged_count, queued_count, status, error_message
                 FROM discovery_runs ORDER BY started_at DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_run(&row)?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row conversions
// ---------------------------------------------------------------------------

fn company_params(company: &CanonicalCompany) -> Result<impl libsql::params::IntoParams> {
    Ok(params![
        company.id.to_string(),
        company.name.as_str(),
        company.country.as_str(),
        company.normalized_name.as_str(),
        company.lei.as_deref(),
        company.vat_id.as_deref(),
        company.domain.as_deref(),
        company.sector.as_deref(),
        company.description.as_deref(),
        serde_json::to_string(&company.moat_signals)
            .map_err(|e| DealscoutError::Storage(e.to_string()))?,
        serde_json::to_string(&company.certifications)
            .map_err(|e| DealscoutError::Storage(e.to_string()))?,
        serde_json::to_string(&company.data_sources)
            .map_err(|e| DealscoutError::Storage(e.to_string()))?,
        company.enrichment_state.as_str(),
        serde_json::to_string(&company.enrichment_blockers)
            .map_err(|e| DealscoutError::Storage(e.to_string()))?,
        company.input_quality,
        company.last_enrichment_attempt.map(|t| t.to_rfc3339()),
        company.created_at.to_rfc3339(),
        company.updated_at.to_rfc3339(),
    ])
}

/// Company UPDATE shared by [`Storage::update_company`] and the transactional
/// task-completion path (a `Transaction` derefs to `Connection`).
async fn update_company_on(conn: &Connection, company: &CanonicalCompany) -> Result<u64> {
    conn.execute(
        "UPDATE companies SET
           name = ?2, country = ?3, normalized_name = ?4, lei = ?5, vat_id = ?6, domain = ?7,
           sector = ?8, description = ?9, moat_signals = ?10, certifications = ?11,
           data_sources = ?12, enrichment_state = ?13, enrichment_blockers = ?14,
           input_quality = ?15, last_enrichment_attempt = ?16, created_at = ?17, updated_at = ?18
         WHERE id = ?1",
        company_params(company)?,
    )
    .await
    .map_err(db_err)
}

fn row_to_company(row: &libsql::Row) -> Result<CanonicalCompany> {
    let get_str = |i: i32| row.get::<String>(i).map_err(db_err);
    let get_opt = |i: i32| row.get::<String>(i).ok();

    let data_sources: HashMap<String, FieldProvenance> = serde_json::from_str(&get_str(11)?)
        .map_err(|e| DealscoutError::Storage(format!("invalid data_sources: {e}")))?;
    let blockers: Vec<Blocker> = serde_json::from_str(&get_str(13)?)
        .map_err(|e| DealscoutError::Storage(format!("invalid enrichment_blockers: {e}")))?;

    Ok(CanonicalCompany {
        id: get_str(0)?
            .parse()
            .map_err(|e| DealscoutError::Storage(format!("invalid company id: {e}")))?,
        name: get_str(1)?,
        country: get_str(2)?,
        normalized_name: get_str(3)?,
        lei: get_opt(4),
        vat_id: get_opt(5),
        domain: get_opt(6),
        sector: get_opt(7),
        description: get_opt(8),
        moat_signals: serde_json::from_str(&get_str(9)?)
            .map_err(|e| DealscoutError::Storage(format!("invalid moat_signals: {e}")))?,
        certifications: serde_json::from_str(&get_str(10)?)
            .map_err(|e| DealscoutError::Storage(format!("invalid certifications: {e}")))?,
        data_sources,
        enrichment_state: get_str(12)?.parse()?,
        enrichment_blockers: blockers,
        input_quality: row.get::<f64>(14).map_err(db_err)?,
        last_enrichment_attempt: parse_opt_ts(get_opt(15))?,
        created_at: parse_ts(&get_str(16)?)?,
        updated_at: parse_ts(&get_str(17)?)?,
    })
}

fn row_to_task(row: &libsql::Row) -> Result<ReviewTask> {
    let get_str = |i: i32| row.get::<String>(i).map_err(db_err);
    let get_opt = |i: i32| row.get::<String>(i).ok();

    Ok(ReviewTask {
        id: get_str(0)?,
        company_id: get_str(1)?
            .parse()
            .map_err(|e| DealscoutError::Storage(format!("invalid company id: {e}")))?,
        task_type: get_str(2)?.parse()?,
        priority: row.get::<i64>(3).map_err(db_err)? as u8,
        context: serde_json::from_str(&get_str(4)?)
            .map_err(|e| DealscoutError::Storage(format!("invalid task context: {e}")))?,
        status: get_str(5)?.parse()?,
        assigned_to: get_opt(6),
        created_at: parse_ts(&get_str(7)?)?,
        completed_at: parse_opt_ts(get_opt(8))?,
        resolution: get_opt(9),
    })
}

fn row_to_merge_candidate(row: &libsql::Row) -> Result<MergeCandidate> {
    let get_str = |i: i32| row.get::<String>(i).map_err(db_err);
    let get_opt = |i: i32| row.get::<String>(i).ok();

    let subject: MergeSubject = serde_json::from_str(&get_str(2)?)
        .map_err(|e| DealscoutError::Storage(format!("invalid merge subject: {e}")))?;

    Ok(MergeCandidate {
        id: get_str(0)?,
        company_id: get_str(1)?
            .parse()
            .map_err(|e| DealscoutError::Storage(format!("invalid company id: {e}")))?,
        subject,
        pair_key: get_str(3)?,
        match_method: get_str(4)?.parse()?,
        confidence: row.get::<f64>(5).map_err(db_err)?,
        status: get_str(6)?.parse()?,
        created_at: parse_ts(&get_str(7)?)?,
        reviewed_at: parse_opt_ts(get_opt(8))?,
        reviewed_by: get_opt(9),
    })
}

fn row_to_run(row: &libsql::Row) -> Result<DiscoveryRun> {
    let get_str = |i: i32| row.get::<String>(i).map_err(db_err);
    let get_opt = |i: i32| row.get::<String>(i).ok();
    let get_count = |i: i32| row.get::<i64>(i).map_err(db_err).map(|v| v as u64);

    Ok(DiscoveryRun {
        id: get_str(0)?,
        source_name: get_str(1)?,
        started_at: parse_ts(&get_str(2)?)?,
        completed_at: parse_opt_ts(get_opt(3))?,
        discovered: get_count(4)?,
        created_new: get_count(5)?,
        merged: get_count(6)?,
        queued_for_review: get_count(7)?,
        status: get_str(8)?.parse()?,
        error_message: get_opt(9),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealscout_shared::{
        DiscoveredCompany, EnrichmentState, MatchMethod, SourceType, TaskContext, TaskStatus,
    };
    use uuid::Uuid;

    /// Create a temp file storage for testing.
    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("ds_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn test_company(name: &str, country: &str) -> CanonicalCompany {
        let now = Utc::now();
        CanonicalCompany {
            id: CompanyId::new(),
            name: name.into(),
            country: country.into(),
            normalized_name: name.to_lowercase(),
            lei: None,
            vat_id: None,
            domain: None,
            sector: None,
            description: None,
            moat_signals: vec![],
            certifications: vec![],
            data_sources: HashMap::new(),
            enrichment_state: EnrichmentState::Discovered,
            enrichment_blockers: vec![],
            input_quality: 0.0,
            last_enrichment_attempt: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn test_task(company_id: &CompanyId, task_type: TaskType, priority: u8) -> ReviewTask {
        ReviewTask {
            id: Uuid::now_v7().to_string(),
            company_id: company_id.clone(),
            task_type,
            priority,
            context: TaskContext::FindWebsite { attempted: vec![] },
            status: TaskStatus::Pending,
            assigned_to: None,
            resolution: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        let version = storage.get_schema_version().await;
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("ds_test_{}.db", Uuid::now_v7()));
        let s1 = Storage::open(&tmp).await.expect("first open");
        drop(s1);
        let s2 = Storage::open(&tmp).await.expect("second open");
        assert_eq!(s2.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn company_roundtrip() {
        let storage = test_storage().await;
        let mut company = test_company("Acme Ltd", "GB");
        company.lei = Some("529900T8BM49AURSDO55".into());
        company.moat_signals = vec!["patents".into()];
        company.data_sources.insert(
            "name".into(),
            FieldProvenance {
                value: "Acme Ltd".into(),
                source: "gleif".into(),
                source_type: SourceType::Registry,
                confidence: 1.0,
                observed_at: Utc::now(),
            },
        );

        storage.insert_company(&company).await.expect("insert");

        let found = storage
            .get_company(&company.id)
            .await
            .expect("get")
            .expect("present");
        assert_eq!(found.name, "Acme Ltd");
        assert_eq!(found.lei.as_deref(), Some("529900T8BM49AURSDO55"));
        assert_eq!(found.moat_signals, vec!["patents".to_string()]);
        assert_eq!(found.data_sources["name"].source, "gleif");
        assert_eq!(found.enrichment_state, EnrichmentState::Discovered);
    }

    #[tokio::test]
    async fn duplicate_lei_is_conflict() {
        let storage = test_storage().await;
        let mut a = test_company("Acme Ltd", "GB");
        a.lei = Some("LEI123".into());
        storage.insert_company(&a).await.expect("insert first");

        let mut b = test_company("Acme Limited", "GB");
        b.lei = Some("LEI123".into());
        let err = storage.insert_company(&b).await.expect_err("second insert");
        assert!(matches!(err, DealscoutError::Conflict { .. }));
    }

    #[tokio::test]
    async fn duplicate_vat_same_country_is_conflict() {
        let storage = test_storage().await;
        let mut a = test_company("Acme Ltd", "GB");
        a.vat_id = Some("GB123456789".into());
        storage.insert_company(&a).await.expect("insert first");

        // Same VAT in a different country is allowed.
        let mut b = test_company("Acme SARL", "FR");
        b.vat_id = Some("GB123456789".into());
        storage.insert_company(&b).await.expect("other country ok");

        let mut c = test_company("Acme Limited", "GB");
        c.vat_id = Some("GB123456789".into());
        let err = storage.insert_company(&c).await.expect_err("same country");
        assert!(matches!(err, DealscoutError::Conflict { .. }));
    }

    #[tokio::test]
    async fn name_key_lookup_returns_all_holders() {
        let storage = test_storage().await;
        let mut a = test_company("Acme", "GB");
        a.normalized_name = "acme".into();
        let mut b = test_company("ACME", "GB");
        b.normalized_name = "acme".into();
        let mut c = test_company("Acme", "DE");
        c.normalized_name = "acme".into();
        for company in [&a, &b, &c] {
            storage.insert_company(company).await.expect("insert");
        }

        let hits = storage.find_by_name_key("acme", "GB").await.expect("find");
        assert_eq!(hits.len(), 2);
        let hits = storage.find_by_name_key("acme", "DE").await.expect("find");
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn pending_tasks_ordering() {
        let storage = test_storage().await;
        let company = test_company("Acme", "GB");
        storage.insert_company(&company).await.unwrap();

        let mut low = test_task(&company.id, TaskType::FindWebsite, 3);
        low.created_at = Utc::now() - chrono::Duration::minutes(10);
        let mut high_old = test_task(&company.id, TaskType::ValidateSector, 8);
        high_old.created_at = Utc::now() - chrono::Duration::minutes(5);
        let high_new = test_task(&company.id, TaskType::ValidateData, 8);

        for task in [&low, &high_old, &high_new] {
            storage.insert_task(task).await.expect("insert task");
        }

        let pending = storage.list_pending_tasks(None, 10).await.expect("list");
        assert_eq!(pending.len(), 3);
        // Priority desc, then FIFO within a tier.
        assert_eq!(pending[0].id, high_old.id);
        assert_eq!(pending[1].id, high_new.id);
        assert_eq!(pending[2].id, low.id);

        let only_websites = storage
            .list_pending_tasks(Some(TaskType::FindWebsite), 10)
            .await
            .expect("list filtered");
        assert_eq!(only_websites.len(), 1);
        assert_eq!(only_websites[0].id, low.id);
    }

    #[tokio::test]
    async fn complete_task_applies_field_updates_atomically() {
        let storage = test_storage().await;
        let company = test_company("Acme", "GB");
        storage.insert_company(&company).await.unwrap();
        let task = test_task(&company.id, TaskType::FindWebsite, 5);
        storage.insert_task(&task).await.unwrap();

        let mut updated = company.clone();
        updated.domain = Some("acme.example".into());
        storage
            .complete_task(&task.id, "found via search", Some(&updated))
            .await
            .expect("complete");

        let task = storage.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.resolution.as_deref(), Some("found via search"));
        assert!(task.completed_at.is_some());

        let company = storage.get_company(&company.id).await.unwrap().unwrap();
        assert_eq!(company.domain.as_deref(), Some("acme.example"));
    }

    #[tokio::test]
    async fn failed_field_update_rolls_back_completion() {
        let storage = test_storage().await;
        let company = test_company("Acme", "GB");
        storage.insert_company(&company).await.unwrap();
        let task = test_task(&company.id, TaskType::ValidateData, 5);
        storage.insert_task(&task).await.unwrap();

        // Updates target a company row that does not exist: the whole
        // transaction must roll back, leaving the task open.
        let mut ghost = test_company("Ghost", "GB");
        ghost.id = CompanyId::new();
        let err = storage
            .complete_task(&task.id, "done", Some(&ghost))
            .await
            .expect_err("must fail");
        assert!(matches!(err, DealscoutError::Storage(_)));

        let task = storage.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.completed_at.is_none());
    }

    #[tokio::test]
    async fn skip_is_terminal() {
        let storage = test_storage().await;
        let company = test_company("Acme", "GB");
        storage.insert_company(&company).await.unwrap();
        let task = test_task(&company.id, TaskType::FindWebsite, 5);
        storage.insert_task(&task).await.unwrap();

        storage.skip_task(&task.id, "not relevant").await.expect("skip");
        let found = storage.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(found.status, TaskStatus::Skipped);

        // Neither completing nor re-skipping an already-skipped task works.
        assert!(storage.complete_task(&task.id, "x", None).await.is_err());
        assert!(storage.skip_task(&task.id, "y").await.is_err());
    }

    #[tokio::test]
    async fn merge_candidate_pair_tracking() {
        let storage = test_storage().await;
        let company = test_company("Acme", "GB");
        storage.insert_company(&company).await.unwrap();

        let candidate = DiscoveredCompany {
            name: "Acme Solutions".into(),
            country: "GB".into(),
            source: "vc-portfolio".into(),
            source_type: SourceType::Scrape,
            source_url: None,
            lei: None,
            vat_id: None,
            website: None,
            sector: None,
            description: None,
            moat_signals: vec![],
            certifications: vec![],
        };
        let mc = MergeCandidate {
            id: Uuid::now_v7().to_string(),
            company_id: company.id.clone(),
            subject: MergeSubject::Discovered {
                candidate: candidate.clone(),
            },
            pair_key: format!("{}|name:acme solutions|GB", company.id),
            match_method: MatchMethod::NameFuzzy,
            confidence: 0.82,
            status: MergeStatus::Pending,
            created_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
        };
        storage.insert_merge_candidate(&mc).await.expect("insert");

        let pending = storage
            .find_pending_merge_candidate(&mc.pair_key)
            .await
            .expect("find")
            .expect("present");
        assert_eq!(pending.id, mc.id);
        assert!(!storage.pair_rejected(&mc.pair_key).await.unwrap());

        storage
            .update_merge_status(&mc.id, MergeStatus::Rejected, "reviewer-1")
            .await
            .expect("reject");
        assert!(storage.pair_rejected(&mc.pair_key).await.unwrap());
        assert!(
            storage
                .find_pending_merge_candidate(&mc.pair_key)
                .await
                .unwrap()
                .is_none()
        );

        // A resolved candidate cannot be re-resolved.
        assert!(
            storage
                .update_merge_status(&mc.id, MergeStatus::Confirmed, "reviewer-2")
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn run_counters_freeze_after_finish() {
        let storage = test_storage().await;
        let run_id = storage.insert_run("b-corp-directory").await.expect("start");

        storage
            .increment_run_counter(&run_id, RunCounter::Discovered)
            .await
            .expect("count discovered");
        storage
            .increment_run_counter(&run_id, RunCounter::CreatedNew)
            .await
            .expect("count new");
        storage
            .increment_run_counter(&run_id, RunCounter::Discovered)
            .await
            .expect("count discovered again");

        storage
            .finish_run(&run_id, RunStatus::Completed, None)
            .await
            .expect("finish");

        let run = storage.get_run(&run_id).await.unwrap().unwrap();
        assert_eq!(run.discovered, 2);
        assert_eq!(run.created_new, 1);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.completed_at.is_some());

        // Counters are read-only once the run is closed.
        assert!(
            storage
                .increment_run_counter(&run_id, RunCounter::Merged)
                .await
                .is_err()
        );
        assert!(
            storage
                .finish_run(&run_id, RunStatus::Failed, Some("late"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("ds_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        rw.insert_company(&test_company("Acme", "GB")).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        let result = ro.insert_company(&test_company("Beta", "DE")).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }
}
