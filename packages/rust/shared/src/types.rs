//! Core domain types for the dealscout company index.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DealscoutError, Result};

/// Current schema version for the persisted database.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// CompanyId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for canonical company identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyId(pub Uuid);

impl CompanyId {
    /// Generate a new time-sortable company identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CompanyId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CompanyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for CompanyId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// SourceType
// ---------------------------------------------------------------------------

/// The kind of collaborator a candidate record arrived from.
///
/// Ordering of the variants is the trust ranking used by the provenance
/// registry: manual entry beats a regulatory registry, which beats
/// LLM-extracted values, which beat a generic scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Hand-entered by an analyst (CSV import, review-task resolution).
    Manual,
    /// Accreditation or regulatory registry with verifiable identifiers.
    Registry,
    /// Extracted by an LLM from unstructured text.
    LlmExtracted,
    /// Generic web scrape (portfolio pages, website guessing).
    Scrape,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Registry => "registry",
            Self::LlmExtracted => "llm_extracted",
            Self::Scrape => "scrape",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "manual" => Ok(Self::Manual),
            "registry" => Ok(Self::Registry),
            "llm_extracted" => Ok(Self::LlmExtracted),
            "scrape" => Ok(Self::Scrape),
            other => Err(DealscoutError::validation(format!(
                "unknown source type: {other}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// DiscoveredCompany
// ---------------------------------------------------------------------------

/// A raw per-source observation of a company, ephemeral until it is consumed
/// by the dedup engine (merged, created, or parked for review).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredCompany {
    /// Company name as reported by the source.
    pub name: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    /// Identifier of the source that yielded this record.
    pub source: String,
    /// Kind of source, used for provenance trust ranking.
    pub source_type: SourceType,
    /// URL the record was observed at, when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// Legal Entity Identifier, the strongest dedup key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lei: Option<String>,
    /// VAT identifier, unique together with `country`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_id: Option<String>,
    /// Company website as reported by the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Moat-signal tags reported by the source (consumed downstream).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moat_signals: Vec<String>,
    /// Certification strings (e.g. accreditation labels).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certifications: Vec<String>,
}

impl DiscoveredCompany {
    /// Reject malformed candidates before they enter the matching pipeline.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DealscoutError::validation("candidate has an empty name"));
        }
        if !is_valid_country(&self.country) {
            return Err(DealscoutError::validation(format!(
                "invalid country code: {:?}",
                self.country
            )));
        }
        Ok(())
    }
}

/// Check a string is a plausible ISO 3166-1 alpha-2 code.
pub fn is_valid_country(code: &str) -> bool {
    code.len() == 2 && code.bytes().all(|b| b.is_ascii_uppercase())
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// The recorded origin of a single field's current value on a canonical
/// record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldProvenance {
    pub value: String,
    /// Source identifier the value came from.
    pub source: String,
    pub source_type: SourceType,
    /// Confidence the writer attached to the value, in [0,1].
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Enrichment lifecycle
// ---------------------------------------------------------------------------

/// Per-company lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    Discovered,
    WebsitePending,
    WebsiteFound,
    WebsiteBlocked,
    Enriched,
    Scored,
}

impl EnrichmentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::WebsitePending => "website_pending",
            Self::WebsiteFound => "website_found",
            Self::WebsiteBlocked => "website_blocked",
            Self::Enriched => "enriched",
            Self::Scored => "scored",
        }
    }
}

impl std::str::FromStr for EnrichmentState {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovered" => Ok(Self::Discovered),
            "website_pending" => Ok(Self::WebsitePending),
            "website_found" => Ok(Self::WebsiteFound),
            "website_blocked" => Ok(Self::WebsiteBlocked),
            "enriched" => Ok(Self::Enriched),
            "scored" => Ok(Self::Scored),
            other => Err(DealscoutError::validation(format!(
                "unknown enrichment state: {other}"
            ))),
        }
    }
}

/// Structured reason enrichment cannot currently progress for a company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockerReason {
    /// Website discovery exhausted its methods.
    WebsiteNotFound,
    /// A field the enrichment pipeline needs is missing.
    MissingCriticalField { field: String },
    /// Sector classification came back below the confidence bar.
    LowConfidenceSector,
    /// The source that should supply the data is unreachable.
    SourceUnreachable { source: String },
}

/// A blocker recorded against a company, with bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Blocker {
    pub reason: BlockerReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// CanonicalCompany
// ---------------------------------------------------------------------------

/// The single persisted, authoritative record for one real-world company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalCompany {
    pub id: CompanyId,
    pub name: String,
    /// ISO 3166-1 alpha-2 country code.
    pub country: String,
    /// Lowercased, suffix-stripped name used as a soft lookup key.
    pub normalized_name: String,
    /// At most one canonical record may hold a given non-null LEI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lei: Option<String>,
    /// At most one canonical record may hold a given (vat_id, country) pair.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vat_id: Option<String>,
    /// Website domain with scheme/path stripped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub moat_signals: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub certifications: Vec<String>,
    /// Per-field provenance map; the key is the field name.
    #[serde(default)]
    pub data_sources: HashMap<String, FieldProvenance>,
    pub enrichment_state: EnrichmentState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enrichment_blockers: Vec<Blocker>,
    /// Completeness heuristic of the best observation seen so far.
    pub input_quality: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_enrichment_attempt: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

/// Which match stage produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    Lei,
    VatCountry,
    NameExact,
    NameFuzzy,
    Domain,
    /// Name/domain signals pointed at a record whose legal identifiers
    /// contradict the candidate's. Never auto-resolved.
    IdentifierConflict,
}

impl MatchMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lei => "lei",
            Self::VatCountry => "vat_country",
            Self::NameExact => "name_exact",
            Self::NameFuzzy => "name_fuzzy",
            Self::Domain => "domain",
            Self::IdentifierConflict => "identifier_conflict",
        }
    }
}

impl std::str::FromStr for MatchMethod {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lei" => Ok(Self::Lei),
            "vat_country" => Ok(Self::VatCountry),
            "name_exact" => Ok(Self::NameExact),
            "name_fuzzy" => Ok(Self::NameFuzzy),
            "domain" => Ok(Self::Domain),
            "identifier_conflict" => Ok(Self::IdentifierConflict),
            other => Err(DealscoutError::validation(format!(
                "unknown match method: {other}"
            ))),
        }
    }
}

/// Terminal outcome of resolving one discovered candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MatchOutcome {
    /// The candidate was folded into an existing canonical record.
    MergedInto(CompanyId),
    /// A new canonical record was created, seeded from the candidate.
    CreatedNew(CompanyId),
    /// Confidence fell in the ambiguous band; a merge candidate was queued.
    QueuedForReview(String),
}

// ---------------------------------------------------------------------------
// MergeCandidate
// ---------------------------------------------------------------------------

/// The other half of an unresolved pairing: either a raw observation or a
/// second canonical record suspected to be the same company.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MergeSubject {
    Discovered { candidate: DiscoveredCompany },
    Canonical { company_id: CompanyId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Pending,
    Confirmed,
    Rejected,
}

impl MergeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Rejected => "rejected",
        }
    }
}

impl std::str::FromStr for MergeStatus {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            "rejected" => Ok(Self::Rejected),
            other => Err(DealscoutError::validation(format!(
                "unknown merge status: {other}"
            ))),
        }
    }
}

/// A detected possible duplicate awaiting human confirmation.
///
/// Created when dedup confidence falls in the ambiguous band. Only a reviewer
/// resolves it: confirm triggers a real merge, reject marks the pair distinct
/// permanently (the same pair is never re-queued).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeCandidate {
    pub id: String,
    /// The existing canonical record the subject may duplicate.
    pub company_id: CompanyId,
    pub subject: MergeSubject,
    /// Stable key identifying the pair, used to suppress re-queueing.
    pub pair_key: String,
    pub match_method: MatchMethod,
    /// Confidence in [0,1] from the match stage that fired.
    pub confidence: f64,
    pub status: MergeStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed_by: Option<String>,
}

// ---------------------------------------------------------------------------
// ReviewTask
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    FindWebsite,
    ConfirmMerge,
    ValidateSector,
    ValidateData,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FindWebsite => "find_website",
            Self::ConfirmMerge => "confirm_merge",
            Self::ValidateSector => "validate_sector",
            Self::ValidateData => "validate_data",
        }
    }
}

impl std::str::FromStr for TaskType {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "find_website" => Ok(Self::FindWebsite),
            "confirm_merge" => Ok(Self::ConfirmMerge),
            "validate_sector" => Ok(Self::ValidateSector),
            "validate_data" => Ok(Self::ValidateData),
            other => Err(DealscoutError::validation(format!(
                "unknown task type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Skipped,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "skipped" => Ok(Self::Skipped),
            other => Err(DealscoutError::validation(format!(
                "unknown task status: {other}"
            ))),
        }
    }
}

/// Typed context attached to a review task, one variant per task type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskContext {
    FindWebsite {
        /// Discovery methods already exhausted for this company.
        #[serde(default)]
        attempted: Vec<String>,
    },
    ConfirmMerge {
        merge_candidate_id: String,
    },
    ValidateSector {
        proposed: Option<String>,
        confidence: f64,
    },
    ValidateData {
        fields: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

/// A unit of human escalation against one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewTask {
    pub id: String,
    pub company_id: CompanyId,
    pub task_type: TaskType,
    /// 1 (lowest) to 10 (highest).
    pub priority: u8,
    pub context: TaskContext,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// DiscoveryRun
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = DealscoutError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DealscoutError::validation(format!(
                "unknown run status: {other}"
            ))),
        }
    }
}

/// Which per-run counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCounter {
    Discovered,
    CreatedNew,
    Merged,
    QueuedForReview,
}

/// Audit record for one discovery run of one source. Counters are frozen
/// once the run is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryRun {
    pub id: String,
    pub source_name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub discovered: u64,
    pub created_new: u64,
    pub merged: u64,
    pub queued_for_review: u64,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
