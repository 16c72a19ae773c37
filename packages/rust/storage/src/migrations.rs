//! SQL migration definitions for the dealscout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a set of SQL statements executed within a transaction.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: companies, manual_review_queue, merge_candidates, discovery_runs",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Canonical company records (system of record)
CREATE TABLE IF NOT EXISTS companies (
    id                      TEXT PRIMARY KEY,
    name                    TEXT NOT NULL,
    country                 TEXT NOT NULL,
    normalized_name         TEXT NOT NULL,
    lei                     TEXT,
    vat_id                  TEXT,
    domain                  TEXT,
    sector                  TEXT,
    description             TEXT,
    moat_signals            TEXT NOT NULL DEFAULT '[]',
    certifications          TEXT NOT NULL DEFAULT '[]',
    data_sources            TEXT NOT NULL DEFAULT '{}',
    enrichment_state        TEXT NOT NULL DEFAULT 'discovered',
    enrichment_blockers     TEXT NOT NULL DEFAULT '[]',
    input_quality           REAL NOT NULL DEFAULT 0,
    last_enrichment_attempt TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);

-- Identifier invariants: at most one record per LEI, one per (VAT, country).
CREATE UNIQUE INDEX IF NOT EXISTS idx_companies_lei
    ON companies(lei) WHERE lei IS NOT NULL;
CREATE UNIQUE INDEX IF NOT EXISTS idx_companies_vat
    ON companies(vat_id, country) WHERE vat_id IS NOT NULL;

-- Soft lookup keys (never unique: names collide legitimately).
CREATE INDEX IF NOT EXISTS idx_companies_name_key
    ON companies(normalized_name, country);
CREATE INDEX IF NOT EXISTS idx_companies_domain
    ON companies(domain) WHERE domain IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_companies_country ON companies(country);

-- Human-review escalation queue
CREATE TABLE IF NOT EXISTS manual_review_queue (
    id           TEXT PRIMARY KEY,
    company_id   TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    task_type    TEXT NOT NULL,
    priority     INTEGER NOT NULL,
    context      TEXT NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    assigned_to  TEXT,
    created_at   TEXT NOT NULL,
    completed_at TEXT,
    resolution   TEXT
);

CREATE INDEX IF NOT EXISTS idx_review_queue_pending
    ON manual_review_queue(status, priority DESC, created_at ASC);
CREATE INDEX IF NOT EXISTS idx_review_queue_company
    ON manual_review_queue(company_id, task_type, status);

-- Ambiguous merge pairings awaiting a reviewer
CREATE TABLE IF NOT EXISTS merge_candidates (
    id           TEXT PRIMARY KEY,
    company_id   TEXT NOT NULL REFERENCES companies(id) ON DELETE CASCADE,
    subject      TEXT NOT NULL,
    pair_key     TEXT NOT NULL,
    match_method TEXT NOT NULL,
    confidence   REAL NOT NULL,
    status       TEXT NOT NULL DEFAULT 'pending',
    created_at   TEXT NOT NULL,
    reviewed_at  TEXT,
    reviewed_by  TEXT
);

CREATE INDEX IF NOT EXISTS idx_merge_candidates_pair
    ON merge_candidates(pair_key, status);
CREATE INDEX IF NOT EXISTS idx_merge_candidates_status
    ON merge_candidates(status, created_at ASC);

-- Per-source-run audit counters
CREATE TABLE IF NOT EXISTS discovery_runs (
    id               TEXT PRIMARY KEY,
    source_name      TEXT NOT NULL,
    started_at       TEXT NOT NULL,
    completed_at     TEXT,
    discovered_count INTEGER NOT NULL DEFAULT 0,
    new_count        INTEGER NOT NULL DEFAULT 0,
    merged_count     INTEGER NOT NULL DEFAULT 0,
    queued_count     INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL DEFAULT 'running',
    error_message    TEXT
);

CREATE INDEX IF NOT EXISTS idx_discovery_runs_source
    ON discovery_runs(source_name, started_at DESC);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
