//! Field-level provenance and conflict resolution.
//!
//! When sources disagree about a field, the winner is decided here and only
//! here. [`resolve_field_conflict`] is a pure decision function: it never
//! mutates state, callers write the winning value and append to the
//! provenance map themselves.

use dealscout_shared::{DiscoveredCompany, FieldProvenance, SourceType};

// ---------------------------------------------------------------------------
// Field registry
// ---------------------------------------------------------------------------

/// A trackable field with the source types allowed to write it.
#[derive(Debug, Clone, Copy)]
pub struct TrackedField {
    pub name: &'static str,
    pub eligible: &'static [SourceType],
}

const ALL_SOURCES: &[SourceType] = &[
    SourceType::Manual,
    SourceType::Registry,
    SourceType::LlmExtracted,
    SourceType::Scrape,
];

/// Legal identifiers only come from hand entry or a registry; a scrape or an
/// LLM guessing an LEI is exactly the failure mode this table exists to stop.
const IDENTIFIER_SOURCES: &[SourceType] = &[SourceType::Manual, SourceType::Registry];

/// Every field the provenance map tracks, with its eligible source types.
pub const FIELD_REGISTRY: &[TrackedField] = &[
    TrackedField {
        name: "name",
        eligible: ALL_SOURCES,
    },
    TrackedField {
        name: "lei",
        eligible: IDENTIFIER_SOURCES,
    },
    TrackedField {
        name: "vat_id",
        eligible: IDENTIFIER_SOURCES,
    },
    TrackedField {
        name: "website",
        eligible: ALL_SOURCES,
    },
    TrackedField {
        name: "sector",
        eligible: ALL_SOURCES,
    },
    TrackedField {
        name: "description",
        eligible: ALL_SOURCES,
    },
];

/// Whether `source_type` may write `field` at all.
pub fn is_eligible(field: &str, source_type: SourceType) -> bool {
    FIELD_REGISTRY
        .iter()
        .find(|f| f.name == field)
        .is_some_and(|f| f.eligible.contains(&source_type))
}

/// Trust rank of a source type. Lower outranks higher.
pub fn source_priority(source_type: SourceType) -> u8 {
    match source_type {
        SourceType::Manual => 0,
        SourceType::Registry => 1,
        SourceType::LlmExtracted => 2,
        SourceType::Scrape => 3,
    }
}

// ---------------------------------------------------------------------------
// Input quality
// ---------------------------------------------------------------------------

/// Completeness heuristic for a candidate record, in [0,1].
///
/// Used to break ties between equally-ranked sources: a record carrying a
/// verifiable identifier and most optional fields beats a bare name.
pub fn compute_input_quality(candidate: &DiscoveredCompany) -> f64 {
    let populated = [
        candidate.website.is_some(),
        candidate.sector.is_some(),
        candidate.description.is_some(),
        candidate.source_url.is_some(),
        !candidate.moat_signals.is_empty(),
        !candidate.certifications.is_empty(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();

    let completeness = populated as f64 / 6.0 * 0.6;
    let identifier = if candidate.lei.is_some() {
        0.4
    } else if candidate.vat_id.is_some() {
        0.25
    } else {
        0.0
    };

    (completeness + identifier).min(1.0)
}

// ---------------------------------------------------------------------------
// Conflict resolution
// ---------------------------------------------------------------------------

/// Outcome of a field conflict: the winning value and whether it differs
/// from what the canonical record already holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDecision<'a> {
    pub value: &'a str,
    pub changed: bool,
}

/// Decide which value wins for one field.
///
/// Rules, in order:
/// 1. An ineligible source never writes the field.
/// 2. A null field accepts any eligible candidate (any source beats no data).
/// 3. A higher-ranked existing source keeps its value.
/// 4. A higher-ranked candidate source overwrites.
/// 5. Equal ranks fall back to input quality; exact ties keep the existing
///    value (stability over churn).
pub fn resolve_field_conflict<'a>(
    field: &str,
    existing: Option<&'a FieldProvenance>,
    candidate_value: &'a str,
    candidate: &DiscoveredCompany,
    existing_quality: f64,
) -> FieldDecision<'a> {
    let keep = |p: &'a FieldProvenance| FieldDecision {
        value: &p.value,
        changed: false,
    };
    let overwrite = FieldDecision {
        value: candidate_value,
        changed: true,
    };

    if !is_eligible(field, candidate.source_type) {
        return match existing {
            Some(p) => keep(p),
            None => FieldDecision {
                value: candidate_value,
                changed: false,
            },
        };
    }

    let Some(existing) = existing else {
        return overwrite;
    };

    let existing_rank = source_priority(existing.source_type);
    let candidate_rank = source_priority(candidate.source_type);

    if candidate_rank < existing_rank {
        overwrite
    } else if candidate_rank > existing_rank {
        keep(existing)
    } else if compute_input_quality(candidate) > existing_quality {
        overwrite
    } else {
        keep(existing)
    }
}
