//! Multi-stage identity matching against the canonical company index.
//!
//! [`DedupEngine::resolve`] takes one raw observation and lands it in exactly
//! one place: folded into an existing canonical record, a brand-new record,
//! or a merge candidate parked for human review. Stages run in identifier
//! order (LEI, VAT+country, exact name, fuzzy name, domain); the first hit
//! wins, and a hit whose legal identifiers contradict the candidate's is
//! never auto-resolved.
//!
//! The decide-and-write step holds a per-identity async lock and retries from
//! a freshly re-read index on unique-key conflicts, so two racing candidates
//! for the same company converge on a single canonical record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dealscout_shared::{
    CanonicalCompany, CompanyId, DealscoutError, DiscoveredCompany, EnrichmentState,
    FieldProvenance, MatchMethod, MatchOutcome, MatchingConfig, MergeCandidate, MergeStatus,
    MergeSubject, Result,
};
use dealscout_storage::Storage;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::normalize::{name_similarity, normalize_name, website_domain};
use crate::provenance::{compute_input_quality, resolve_field_conflict, source_priority};

/// Confidence reported by the exact normalized-name stage.
const NAME_EXACT_CONFIDENCE: f64 = 0.9;

/// Confidence reported by the website-domain stage.
const DOMAIN_CONFIDENCE: f64 = 0.85;

// ---------------------------------------------------------------------------
// Keyed locks
// ---------------------------------------------------------------------------

/// Short-lived async locks keyed by match identity, serializing the
/// decide-and-write step for candidates that could race on one company.
#[derive(Default)]
struct KeyedLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    async fn acquire(&self, key: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

// ---------------------------------------------------------------------------
// Stage evaluation
// ---------------------------------------------------------------------------

struct StageMatch {
    company: CanonicalCompany,
    method: MatchMethod,
    confidence: f64,
}

enum StageOutcome {
    /// A stage matched and the identifiers do not contradict each other.
    Match(StageMatch),
    /// A name/domain stage matched, but legal identifiers disagree.
    IdentifierConflict(StageMatch),
    NoMatch,
}

/// Where a confidence lands relative to the configured thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Band {
    AutoMerge,
    Review,
    CreateNew,
}

pub(crate) fn decision_band(confidence: f64, config: &MatchingConfig) -> Band {
    if confidence >= config.auto_merge_threshold {
        Band::AutoMerge
    } else if confidence >= config.review_floor {
        Band::Review
    } else {
        Band::CreateNew
    }
}

/// True when both sides carry a legal identifier and they disagree.
fn identifiers_conflict(candidate: &DiscoveredCompany, company: &CanonicalCompany) -> bool {
    let lei_conflict =
        matches!((&candidate.lei, &company.lei), (Some(a), Some(b)) if a != b);
    let vat_conflict = candidate.country == company.country
        && matches!((&candidate.vat_id, &company.vat_id), (Some(a), Some(b)) if a != b);
    lei_conflict || vat_conflict
}

/// The candidate's strongest identity, used for lock and pair keys.
fn identity_key(candidate: &DiscoveredCompany, normalized: &str) -> String {
    if let Some(lei) = &candidate.lei {
        format!("lei:{lei}")
    } else if let Some(vat) = &candidate.vat_id {
        format!("vat:{vat}:{}", candidate.country)
    } else {
        format!("name:{normalized}:{}", candidate.country)
    }
}

// ---------------------------------------------------------------------------
// DedupEngine
// ---------------------------------------------------------------------------

/// The central matching engine. One instance per pipeline, sharing the
/// storage handle with the rest of the system.
pub struct DedupEngine {
    storage: Arc<Storage>,
    config: MatchingConfig,
    locks: KeyedLocks,
}

impl DedupEngine {
    pub fn new(storage: Arc<Storage>, config: MatchingConfig) -> Self {
        Self {
            storage,
            config,
            locks: KeyedLocks::default(),
        }
    }

    /// Resolve one candidate to its terminal outcome.
    ///
    /// Holds a lock on the candidate's identity key for the duration of the
    /// decide-and-write step; on a unique-key conflict the index is re-read
    /// and the decision retried (bounded by `max_write_retries`).
    #[instrument(skip_all, fields(name = %candidate.name, country = %candidate.country, source = %candidate.source))]
    pub async fn resolve(&self, candidate: &DiscoveredCompany) -> Result<MatchOutcome> {
        candidate.validate()?;
        let normalized = normalize_name(&candidate.name);
        if normalized.is_empty() {
            return Err(DealscoutError::validation(format!(
                "candidate name {:?} normalizes to nothing",
                candidate.name
            )));
        }

        let _guard = self.locks.acquire(&identity_key(candidate, &normalized)).await;

        let mut last_conflict = String::new();
        for attempt in 0..self.config.max_write_retries.max(1) {
            match self.decide_and_write(candidate, &normalized).await {
                Ok(outcome) => return Ok(outcome),
                Err(DealscoutError::Conflict { message }) => {
                    debug!(attempt, %message, "write conflict, re-reading index");
                    last_conflict = message;
                }
                Err(e) => return Err(e),
            }
        }

        Err(DealscoutError::conflict(format!(
            "candidate {:?} gave up after {} attempts: {last_conflict}",
            candidate.name, self.config.max_write_retries
        )))
    }

    async fn decide_and_write(
        &self,
        candidate: &DiscoveredCompany,
        normalized: &str,
    ) -> Result<MatchOutcome> {
        match self.evaluate_stages(candidate, normalized).await? {
            StageOutcome::Match(m) => {
                // Identifier and exact-name stages are confident hits that
                // merge directly; fuzzy and domain scores go through the
                // configured bands.
                let exact = matches!(
                    m.method,
                    MatchMethod::Lei | MatchMethod::VatCountry | MatchMethod::NameExact
                );
                if exact || decision_band(m.confidence, &self.config) == Band::AutoMerge {
                    self.merge_into(m.company, candidate, m.confidence).await
                } else if decision_band(m.confidence, &self.config) == Band::Review {
                    match self
                        .queue_for_review(&m.company, candidate, normalized, m.method, m.confidence)
                        .await?
                    {
                        Some(outcome) => Ok(outcome),
                        // Reviewer already marked the pair distinct.
                        None => self.create_new(candidate, normalized).await,
                    }
                } else {
                    self.create_new(candidate, normalized).await
                }
            }
            StageOutcome::IdentifierConflict(m) => {
                warn!(
                    company_id = %m.company.id,
                    method = m.method.as_str(),
                    confidence = m.confidence,
                    "legal identifiers contradict a name/domain match, forcing review"
                );
                match self
                    .queue_for_review(
                        &m.company,
                        candidate,
                        normalized,
                        MatchMethod::IdentifierConflict,
                        m.confidence,
                    )
                    .await?
                {
                    Some(outcome) => Ok(outcome),
                    None => self.create_new(candidate, normalized).await,
                }
            }
            StageOutcome::NoMatch => self.create_new(candidate, normalized).await,
        }
    }

    /// Run the ordered match stages against a fresh read of the index.
    async fn evaluate_stages(
        &self,
        candidate: &DiscoveredCompany,
        normalized: &str,
    ) -> Result<StageOutcome> {
        // Stage 1: exact LEI.
        if let Some(lei) = &candidate.lei {
            if let Some(company) = self.storage.find_by_lei(lei).await? {
                return Ok(StageOutcome::Match(StageMatch {
                    company,
                    method: MatchMethod::Lei,
                    confidence: 1.0,
                }));
            }
        }

        // Stage 2: exact VAT + country.
        if let Some(vat) = &candidate.vat_id {
            if let Some(company) = self.storage.find_by_vat(vat, &candidate.country).await? {
                return Ok(StageOutcome::Match(StageMatch {
                    company,
                    method: MatchMethod::VatCountry,
                    confidence: 1.0,
                }));
            }
        }

        // Stage 3: normalized name + country. The soft key may have several
        // holders; prefer one whose identifiers do not contradict the
        // candidate's.
        let name_hits = self
            .storage
            .find_by_name_key(normalized, &candidate.country)
            .await?;
        let mut conflicting: Option<CanonicalCompany> = None;
        for company in name_hits {
            if !identifiers_conflict(candidate, &company) {
                return Ok(StageOutcome::Match(StageMatch {
                    company,
                    method: MatchMethod::NameExact,
                    confidence: NAME_EXACT_CONFIDENCE,
                }));
            }
            if conflicting.is_none() {
                conflicting = Some(company);
            }
        }
        if let Some(company) = conflicting {
            return Ok(StageOutcome::IdentifierConflict(StageMatch {
                company,
                method: MatchMethod::NameExact,
                confidence: NAME_EXACT_CONFIDENCE,
            }));
        }

        // Stage 4: fuzzy name within the candidate's country. Confidence is
        // the similarity itself, accepted at or above the configured floor.
        let peers = self.storage.list_by_country(&candidate.country).await?;
        let mut best: Option<(f64, CanonicalCompany)> = None;
        for company in peers {
            let sim = name_similarity(normalized, &company.normalized_name);
            if sim >= self.config.fuzzy_floor
                && best.as_ref().is_none_or(|(s, _)| sim > *s)
            {
                best = Some((sim, company));
            }
        }
        if let Some((sim, company)) = best {
            if identifiers_conflict(candidate, &company) {
                return Ok(StageOutcome::IdentifierConflict(StageMatch {
                    company,
                    method: MatchMethod::NameFuzzy,
                    confidence: sim,
                }));
            }
            return Ok(StageOutcome::Match(StageMatch {
                company,
                method: MatchMethod::NameFuzzy,
                confidence: sim,
            }));
        }

        // Stage 5: website domain.
        if let Some(domain) = candidate.website.as_deref().and_then(website_domain) {
            if let Some(company) = self.storage.find_by_domain(&domain).await?.into_iter().next() {
                if identifiers_conflict(candidate, &company) {
                    return Ok(StageOutcome::IdentifierConflict(StageMatch {
                        company,
                        method: MatchMethod::Domain,
                        confidence: DOMAIN_CONFIDENCE,
                    }));
                }
                return Ok(StageOutcome::Match(StageMatch {
                    company,
                    method: MatchMethod::Domain,
                    confidence: DOMAIN_CONFIDENCE,
                }));
            }
        }

        Ok(StageOutcome::NoMatch)
    }

    // -----------------------------------------------------------------------
    // Outcome writers
    // -----------------------------------------------------------------------

    async fn merge_into(
        &self,
        mut company: CanonicalCompany,
        candidate: &DiscoveredCompany,
        confidence: f64,
    ) -> Result<MatchOutcome> {
        let had_domain = company.domain.is_some();
        apply_candidate_fields(&mut company, candidate, confidence);

        // New data can unblock the website step of the lifecycle.
        if !had_domain
            && company.domain.is_some()
            && matches!(
                company.enrichment_state,
                EnrichmentState::Discovered | EnrichmentState::WebsitePending
            )
        {
            company.enrichment_state = EnrichmentState::WebsiteFound;
        }

        company.updated_at = Utc::now();
        self.storage.update_company(&company).await?;

        info!(company_id = %company.id, confidence, "merged candidate into existing record");
        Ok(MatchOutcome::MergedInto(company.id))
    }

    async fn create_new(
        &self,
        candidate: &DiscoveredCompany,
        normalized: &str,
    ) -> Result<MatchOutcome> {
        let company = seed_company(candidate, normalized);
        // A racing insert on the same identifier surfaces as a conflict and
        // sends the caller back around the retry loop.
        self.storage.insert_company(&company).await?;

        info!(company_id = %company.id, "created new canonical record");
        Ok(MatchOutcome::CreatedNew(company.id))
    }

    /// Park the pairing for review without writing any candidate fields.
    ///
    /// Idempotent per pair: an existing pending candidate is returned as-is,
    /// and a pair a reviewer rejected is never re-queued (`None`).
    async fn queue_for_review(
        &self,
        company: &CanonicalCompany,
        candidate: &DiscoveredCompany,
        normalized: &str,
        method: MatchMethod,
        confidence: f64,
    ) -> Result<Option<MatchOutcome>> {
        let pair_key = format!("{}|{}", company.id, identity_key(candidate, normalized));

        if self.storage.pair_rejected(&pair_key).await? {
            debug!(%pair_key, "pair previously marked distinct, not re-queueing");
            return Ok(None);
        }
        if let Some(existing) = self.storage.find_pending_merge_candidate(&pair_key).await? {
            return Ok(Some(MatchOutcome::QueuedForReview(existing.id)));
        }

        let mc = MergeCandidate {
            id: Uuid::now_v7().to_string(),
            company_id: company.id.clone(),
            subject: MergeSubject::Discovered {
                candidate: candidate.clone(),
            },
            pair_key,
            match_method: method,
            confidence,
            status: MergeStatus::Pending,
            created_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
        };
        self.storage.insert_merge_candidate(&mc).await?;

        info!(
            merge_candidate_id = %mc.id,
            company_id = %company.id,
            method = method.as_str(),
            confidence,
            "queued ambiguous match for review"
        );
        Ok(Some(MatchOutcome::QueuedForReview(mc.id)))
    }

    // -----------------------------------------------------------------------
    // Reviewer resolutions
    // -----------------------------------------------------------------------

    /// Reviewer confirmed the pairing: execute the real merge.
    pub async fn confirm_merge(
        &self,
        merge_candidate_id: &str,
        reviewed_by: &str,
    ) -> Result<CompanyId> {
        let mc = self
            .storage
            .get_merge_candidate(merge_candidate_id)
            .await?
            .ok_or_else(|| {
                DealscoutError::validation(format!(
                    "merge candidate {merge_candidate_id} not found"
                ))
            })?;
        let company = self
            .storage
            .get_company(&mc.company_id)
            .await?
            .ok_or_else(|| {
                DealscoutError::validation(format!("company {} not found", mc.company_id))
            })?;

        match &mc.subject {
            MergeSubject::Discovered { candidate } => {
                self.merge_into(company, candidate, mc.confidence).await?;
            }
            MergeSubject::Canonical { company_id } => {
                self.absorb_company(company, company_id).await?;
            }
        }

        self.storage
            .update_merge_status(merge_candidate_id, MergeStatus::Confirmed, reviewed_by)
            .await?;
        Ok(mc.company_id)
    }

    /// Reviewer rejected the pairing: the pair is distinct, permanently.
    pub async fn reject_merge(&self, merge_candidate_id: &str, reviewed_by: &str) -> Result<()> {
        self.storage
            .update_merge_status(merge_candidate_id, MergeStatus::Rejected, reviewed_by)
            .await
    }

    /// Fold a second canonical record into `target` and remove it.
    async fn absorb_company(
        &self,
        mut target: CanonicalCompany,
        source_id: &CompanyId,
    ) -> Result<()> {
        let source = self.storage.get_company(source_id).await?.ok_or_else(|| {
            DealscoutError::validation(format!("company {source_id} not found"))
        })?;

        // Identifiers only ever fill gaps; an identifier disagreement should
        // have blocked this pairing from auto-resolution long before here.
        if target.lei.is_none() {
            target.lei = source.lei.clone();
        }
        if target.vat_id.is_none() {
            target.vat_id = source.vat_id.clone();
        }

        for (field, prov) in &source.data_sources {
            let take = match target.data_sources.get(field) {
                None => true,
                Some(held) => source_priority(prov.source_type) < source_priority(held.source_type),
            };
            if take {
                set_field(&mut target, field, &prov.value);
                target.data_sources.insert(field.clone(), prov.clone());
            }
        }

        extend_unique(&mut target.moat_signals, &source.moat_signals);
        extend_unique(&mut target.certifications, &source.certifications);
        target.input_quality = target.input_quality.max(source.input_quality);
        target.updated_at = Utc::now();

        self.storage.update_company(&target).await?;
        self.storage.delete_company(source_id).await?;

        info!(target = %target.id, absorbed = %source_id, "absorbed duplicate canonical record");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Field application
// ---------------------------------------------------------------------------

/// The candidate's populated trackable fields as (field, value) pairs.
fn candidate_fields(candidate: &DiscoveredCompany) -> Vec<(&'static str, &str)> {
    let mut fields = vec![("name", candidate.name.as_str())];
    for (name, value) in [
        ("lei", &candidate.lei),
        ("vat_id", &candidate.vat_id),
        ("website", &candidate.website),
        ("sector", &candidate.sector),
        ("description", &candidate.description),
    ] {
        if let Some(v) = value {
            fields.push((name, v.as_str()));
        }
    }
    fields
}

fn set_field(company: &mut CanonicalCompany, field: &str, value: &str) {
    match field {
        "name" => {
            company.name = value.to_string();
            company.normalized_name = normalize_name(value);
        }
        "lei" => company.lei = Some(value.to_string()),
        "vat_id" => company.vat_id = Some(value.to_string()),
        "website" => company.domain = website_domain(value),
        "sector" => company.sector = Some(value.to_string()),
        "description" => company.description = Some(value.to_string()),
        _ => {}
    }
}

/// Run every populated candidate field through conflict resolution, writing
/// winners and their provenance onto `company`. Returns whether anything
/// changed.
fn apply_candidate_fields(
    company: &mut CanonicalCompany,
    candidate: &DiscoveredCompany,
    write_confidence: f64,
) -> bool {
    let now = Utc::now();
    let mut any_changed = false;

    for (field, value) in candidate_fields(candidate) {
        let changed = resolve_field_conflict(
            field,
            company.data_sources.get(field),
            value,
            candidate,
            company.input_quality,
        )
        .changed;

        if changed {
            set_field(company, field, value);
            company.data_sources.insert(
                field.to_string(),
                FieldProvenance {
                    value: value.to_string(),
                    source: candidate.source.clone(),
                    source_type: candidate.source_type,
                    confidence: write_confidence,
                    observed_at: now,
                },
            );
            any_changed = true;
        }
    }

    extend_unique(&mut company.moat_signals, &candidate.moat_signals);
    extend_unique(&mut company.certifications, &candidate.certifications);
    company.input_quality = company.input_quality.max(compute_input_quality(candidate));

    any_changed
}

fn extend_unique(dst: &mut Vec<String>, src: &[String]) {
    for v in src {
        if !dst.iter().any(|held| held == v) {
            dst.push(v.clone());
        }
    }
}

/// Apply one reviewer-entered field value with manual provenance.
///
/// Reviewer resolutions are authoritative: they bypass conflict resolution,
/// since manual entry is the top of the trust ranking by definition.
pub fn apply_field_update(
    company: &mut CanonicalCompany,
    field: &str,
    value: &str,
    reviewer: &str,
) {
    let now = Utc::now();
    set_field(company, field, value);
    company.data_sources.insert(
        field.to_string(),
        FieldProvenance {
            value: value.to_string(),
            source: reviewer.to_string(),
            source_type: dealscout_shared::SourceType::Manual,
            confidence: 1.0,
            observed_at: now,
        },
    );
    company.updated_at = now;
}

/// Build a fresh canonical record from a candidate, with provenance for
/// every field the candidate's source is allowed to write.
fn seed_company(candidate: &DiscoveredCompany, normalized: &str) -> CanonicalCompany {
    let now = Utc::now();
    let mut company = CanonicalCompany {
        id: CompanyId::new(),
        name: candidate.name.clone(),
        country: candidate.country.clone(),
        normalized_name: normalized.to_string(),
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
    };

    apply_candidate_fields(&mut company, candidate, 1.0);
    company
}

#[cfg(test)]
mod tests {
    use super::*;
    use dealscout_shared::SourceType;

    async fn test_engine() -> (Arc<DedupEngine>, Arc<Storage>) {
        let tmp = std::env::temp_dir().join(format!("ds_engine_{}.db", Uuid::now_v7()));
        let storage = Arc::new(Storage::open(&tmp).await.expect("open test db"));
        let engine = Arc::new(DedupEngine::new(storage.clone(), MatchingConfig::default()));
        (engine, storage)
    }

    fn candidate(name: &str, country: &str) -> DiscoveredCompany {
        DiscoveredCompany {
            name: name.into(),
            country: country.into(),
            source: "test-registry".into(),
            source_type: SourceType::Registry,
            source_url: None,
            lei: None,
            vat_id: None,
            website: None,
            sector: None,
            description: None,
            moat_signals: vec![],
            certifications: vec![],
        }
    }

    fn created_id(outcome: &MatchOutcome) -> CompanyId {
        match outcome {
            MatchOutcome::CreatedNew(id) => id.clone(),
            other => panic!("expected CreatedNew, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn lei_match_merges_into_existing() {
        let (engine, storage) = test_engine().await;

        let mut first = candidate("Acme Ltd", "GB");
        first.lei = Some("ABC123".into());
        let existing_id = created_id(&engine.resolve(&first).await.expect("create"));

        // Same LEI under a very different name still merges.
        let mut second = candidate("Acme Industrial Holdings", "GB");
        second.lei = Some("ABC123".into());
        second.sector = Some("manufacturing".into());
        let outcome = engine.resolve(&second).await.expect("resolve");
        assert_eq!(outcome, MatchOutcome::MergedInto(existing_id.clone()));

        // No new record, no duplicate LEI.
        let gb = storage.list_by_country("GB").await.unwrap();
        assert_eq!(gb.len(), 1);
        let merged = storage.get_company(&existing_id).await.unwrap().unwrap();
        assert_eq!(merged.sector.as_deref(), Some("manufacturing"));
    }

    #[tokio::test]
    async fn vat_country_match_merges() {
        let (engine, _storage) = test_engine().await;

        let mut first = candidate("Acme GmbH", "DE");
        first.vat_id = Some("DE999999999".into());
        let existing_id = created_id(&engine.resolve(&first).await.expect("create"));

        let mut second = candidate("ACME Deutschland", "DE");
        second.vat_id = Some("DE999999999".into());
        let outcome = engine.resolve(&second).await.expect("resolve");
        assert_eq!(outcome, MatchOutcome::MergedInto(existing_id));
    }

    #[tokio::test]
    async fn normalized_name_match_auto_merges() {
        let (engine, _storage) = test_engine().await;

        let existing_id = created_id(&engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap());

        // Suffix-stripped names are the same key: merges without review.
        let outcome = engine
            .resolve(&candidate("Acme Limited", "GB"))
            .await
            .expect("resolve");
        assert_eq!(outcome, MatchOutcome::MergedInto(existing_id));
    }

    #[tokio::test]
    async fn same_name_other_country_is_distinct() {
        let (engine, _storage) = test_engine().await;

        let gb = created_id(&engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap());
        let outcome = engine.resolve(&candidate("Acme Ltd", "DE")).await.unwrap();
        assert_ne!(outcome, MatchOutcome::MergedInto(gb));
        assert!(matches!(outcome, MatchOutcome::CreatedNew(_)));
    }

    #[tokio::test]
    async fn fuzzy_match_queues_for_review() {
        let (engine, storage) = test_engine().await;

        engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap();

        let outcome = engine
            .resolve(&candidate("Acme Solutions", "GB"))
            .await
            .expect("resolve");
        let MatchOutcome::QueuedForReview(mc_id) = outcome else {
            panic!("expected QueuedForReview, got {outcome:?}");
        };

        let mc = storage.get_merge_candidate(&mc_id).await.unwrap().unwrap();
        assert_eq!(mc.match_method, MatchMethod::NameFuzzy);
        assert!(mc.confidence >= 0.75 && mc.confidence < 0.95);
        assert_eq!(mc.status, MergeStatus::Pending);

        // No fields were written to the existing record.
        let existing = storage.get_company(&mc.company_id).await.unwrap().unwrap();
        assert_eq!(existing.name, "Acme Ltd");
    }

    #[tokio::test]
    async fn unmatched_candidate_creates_new() {
        let (engine, _storage) = test_engine().await;

        engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap();
        let outcome = engine.resolve(&candidate("Beta Corp", "DE")).await.unwrap();
        assert!(matches!(outcome, MatchOutcome::CreatedNew(_)));
    }

    #[tokio::test]
    async fn racing_candidates_converge_on_one_record() {
        let (engine, storage) = test_engine().await;

        let a = candidate("Gamma Robotics", "FR");
        let b = candidate("Gamma Robotics", "FR");
        let (ra, rb) = tokio::join!(
            {
                let engine = engine.clone();
                async move { engine.resolve(&a).await }
            },
            {
                let engine = engine.clone();
                async move { engine.resolve(&b).await }
            }
        );
        let (ra, rb) = (ra.expect("a"), rb.expect("b"));

        let mut created = 0;
        let mut merged = 0;
        for outcome in [&ra, &rb] {
            match outcome {
                MatchOutcome::CreatedNew(_) => created += 1,
                MatchOutcome::MergedInto(_) => merged += 1,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!((created, merged), (1, 1));
        assert_eq!(storage.list_by_country("FR").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn review_queueing_is_idempotent() {
        let (engine, _storage) = test_engine().await;

        engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap();

        let fuzzy = candidate("Acme Solutions", "GB");
        let MatchOutcome::QueuedForReview(first) = engine.resolve(&fuzzy).await.unwrap() else {
            panic!("expected review");
        };
        // A retry of the same candidate converges on the same pending
        // candidate instead of queueing a second one.
        let MatchOutcome::QueuedForReview(second) = engine.resolve(&fuzzy).await.unwrap() else {
            panic!("expected review");
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn rejected_pair_becomes_distinct_permanently() {
        let (engine, storage) = test_engine().await;

        engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap();

        let fuzzy = candidate("Acme Solutions", "GB");
        let MatchOutcome::QueuedForReview(mc_id) = engine.resolve(&fuzzy).await.unwrap() else {
            panic!("expected review");
        };
        engine.reject_merge(&mc_id, "reviewer-1").await.expect("reject");

        // Re-resolution never re-queues the rejected pair: the candidate is
        // a distinct company now.
        let outcome = engine.resolve(&fuzzy).await.expect("resolve");
        let new_id = created_id(&outcome);

        // And a further retry converges on the new record by exact name.
        let outcome = engine.resolve(&fuzzy).await.expect("resolve again");
        assert_eq!(outcome, MatchOutcome::MergedInto(new_id));

        assert_eq!(storage.list_by_country("GB").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn conflicting_identifiers_force_review() {
        let (engine, storage) = test_engine().await;

        let mut first = candidate("Acme Ltd", "GB");
        first.lei = Some("LEI-AAA".into());
        engine.resolve(&first).await.unwrap();

        // Same name, different LEI: legally distinct, never auto-resolved.
        let mut second = candidate("Acme Ltd", "GB");
        second.lei = Some("LEI-BBB".into());
        let outcome = engine.resolve(&second).await.expect("resolve");
        let MatchOutcome::QueuedForReview(mc_id) = outcome else {
            panic!("expected QueuedForReview, got {outcome:?}");
        };

        let mc = storage.get_merge_candidate(&mc_id).await.unwrap().unwrap();
        assert_eq!(mc.match_method, MatchMethod::IdentifierConflict);
    }

    #[tokio::test]
    async fn domain_match_lands_in_review_band() {
        let (engine, storage) = test_engine().await;

        let mut first = candidate("Initech", "US");
        first.website = Some("https://www.initech.example".into());
        engine.resolve(&first).await.unwrap();

        let mut second = candidate("Zeta Widgets", "US");
        second.website = Some("initech.example".into());
        let outcome = engine.resolve(&second).await.expect("resolve");
        let MatchOutcome::QueuedForReview(mc_id) = outcome else {
            panic!("expected QueuedForReview, got {outcome:?}");
        };

        let mc = storage.get_merge_candidate(&mc_id).await.unwrap().unwrap();
        assert_eq!(mc.match_method, MatchMethod::Domain);
        assert_eq!(mc.confidence, DOMAIN_CONFIDENCE);
    }

    #[tokio::test]
    async fn provenance_priority_is_monotonic_across_merges() {
        let (engine, storage) = test_engine().await;

        let mut registry = candidate("Acme Ltd", "GB");
        registry.lei = Some("ABC123".into());
        registry.sector = Some("fintech".into());
        let id = created_id(&engine.resolve(&registry).await.unwrap());

        // Manual entry outranks the registry and overwrites.
        let mut manual = candidate("Acme Ltd", "GB");
        manual.lei = Some("ABC123".into());
        manual.sector = Some("banking".into());
        manual.source = "analyst-csv".into();
        manual.source_type = SourceType::Manual;
        engine.resolve(&manual).await.unwrap();

        // A later scrape never dislodges the manual value.
        let mut scrape = candidate("Acme Ltd", "GB");
        scrape.lei = Some("ABC123".into());
        scrape.sector = Some("agriculture".into());
        scrape.source = "vc-portfolio".into();
        scrape.source_type = SourceType::Scrape;
        engine.resolve(&scrape).await.unwrap();

        let company = storage.get_company(&id).await.unwrap().unwrap();
        assert_eq!(company.sector.as_deref(), Some("banking"));
        assert_eq!(company.data_sources["sector"].source, "analyst-csv");
        assert_eq!(
            company.data_sources["sector"].source_type,
            SourceType::Manual
        );
    }

    #[tokio::test]
    async fn merge_unblocks_website_pending_lifecycle() {
        let (engine, storage) = test_engine().await;

        let mut first = candidate("Acme Ltd", "GB");
        first.lei = Some("ABC123".into());
        let id = created_id(&engine.resolve(&first).await.unwrap());

        let mut company = storage.get_company(&id).await.unwrap().unwrap();
        company.enrichment_state = EnrichmentState::WebsitePending;
        storage.update_company(&company).await.unwrap();

        let mut second = candidate("Acme Ltd", "GB");
        second.lei = Some("ABC123".into());
        second.website = Some("https://acme.example".into());
        engine.resolve(&second).await.unwrap();

        let company = storage.get_company(&id).await.unwrap().unwrap();
        assert_eq!(company.domain.as_deref(), Some("acme.example"));
        assert_eq!(company.enrichment_state, EnrichmentState::WebsiteFound);
    }

    #[tokio::test]
    async fn confirm_merge_applies_candidate_fields() {
        let (engine, storage) = test_engine().await;

        engine.resolve(&candidate("Acme Ltd", "GB")).await.unwrap();

        let mut fuzzy = candidate("Acme Solutions", "GB");
        fuzzy.sector = Some("logistics".into());
        let MatchOutcome::QueuedForReview(mc_id) = engine.resolve(&fuzzy).await.unwrap() else {
            panic!("expected review");
        };

        let target = engine.confirm_merge(&mc_id, "reviewer-1").await.expect("confirm");

        let company = storage.get_company(&target).await.unwrap().unwrap();
        assert_eq!(company.sector.as_deref(), Some("logistics"));
        let mc = storage.get_merge_candidate(&mc_id).await.unwrap().unwrap();
        assert_eq!(mc.status, MergeStatus::Confirmed);
        assert_eq!(mc.reviewed_by.as_deref(), Some("reviewer-1"));
    }

    #[tokio::test]
    async fn malformed_candidate_is_rejected_up_front() {
        let (engine, storage) = test_engine().await;

        let bad = candidate("", "GB");
        assert!(matches!(
            engine.resolve(&bad).await,
            Err(DealscoutError::Validation { .. })
        ));
        let bad = candidate("Acme Ltd", "Britain");
        assert!(matches!(
            engine.resolve(&bad).await,
            Err(DealscoutError::Validation { .. })
        ));
        assert!(storage.list_by_country("GB").await.unwrap().is_empty());
    }

    #[test]
    fn banding_is_exact_at_the_boundaries() {
        let config = MatchingConfig::default();

        // Exactly at the auto-merge threshold merges; a hair below reviews.
        assert_eq!(decision_band(0.95, &config), Band::AutoMerge);
        assert_eq!(decision_band(0.95 - 1e-9, &config), Band::Review);

        // Exactly at the review floor reviews; a hair below creates new.
        assert_eq!(decision_band(0.75, &config), Band::Review);
        assert_eq!(decision_band(0.75 - 1e-9, &config), Band::CreateNew);
    }
}
