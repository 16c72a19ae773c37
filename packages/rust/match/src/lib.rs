//! Identity matching, field provenance, and merge execution.
//!
//! This crate owns the answer to "is this observation a company we already
//! know?": name/website normalization, the trust-ranked field provenance
//! registry, and the multi-stage [`DedupEngine`].

pub mod engine;
pub mod normalize;
pub mod provenance;

pub use engine::{DedupEngine, apply_field_update};
pub use normalize::{name_similarity, normalize_name, website_domain};
pub use provenance::{
    FIELD_REGISTRY, FieldDecision, TrackedField, compute_input_quality, is_eligible,
    resolve_field_conflict, source_priority,
};
