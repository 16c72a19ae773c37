//! Discovery source contract and per-source throttling.
//!
//! Concrete sources (accreditation registries, VC portfolio pages, CSV
//! import, website guessing) are implemented outside this core; everything
//! here is the seam they plug into. A source advertises its configuration,
//! answers a health probe before a run starts, and yields a finite batch of
//! raw [`DiscoveredCompany`] candidates per call. Streams are restartable on
//! the next scheduled run, not resumable mid-stream.

mod ratelimit;

use async_trait::async_trait;
use dealscout_shared::{DiscoveredCompany, Result, SourceEntry, SourceType};

pub use ratelimit::{RateLimit, RateLimiter};

// ---------------------------------------------------------------------------
// SourceConfig
// ---------------------------------------------------------------------------

/// Runtime configuration common to every discovery source.
///
/// Composition over a shared struct: heterogeneous scraping backends differ
/// in how they fetch, not in what the pipeline needs to know about them.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Source identifier; also the rate-limiter key and ledger source name.
    pub name: String,
    /// Trust class of the records this source yields.
    pub source_type: SourceType,
    /// Countries this source covers (empty = all).
    pub countries: Vec<String>,
}

impl From<&SourceEntry> for SourceConfig {
    fn from(entry: &SourceEntry) -> Self {
        Self {
            name: entry.name.clone(),
            source_type: entry.source_type,
            countries: entry.countries.clone(),
        }
    }
}

/// Build a [`RateLimiter`] keyed by the configured sources.
pub fn limiter_from_entries(entries: &[SourceEntry]) -> RateLimiter {
    let mut limiter = RateLimiter::new();
    for entry in entries {
        limiter.set_limit(
            entry.name.clone(),
            RateLimit {
                min_interval: std::time::Duration::from_millis(entry.min_interval_ms),
                burst: entry.burst.max(1),
            },
        );
    }
    limiter
}

// ---------------------------------------------------------------------------
// DiscoverySource
// ---------------------------------------------------------------------------

/// A collaborator that yields raw company observations.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    /// Shared configuration for this source.
    fn config(&self) -> &SourceConfig;

    /// Health probe, checked before a run starts.
    async fn is_available(&self) -> bool;

    /// Yield up to `limit` candidates. Finite per call; the next scheduled
    /// run starts a fresh batch.
    async fn discover(&self, limit: Option<u32>) -> Result<Vec<DiscoveredCompany>>;
}
