//! SQL migration definitions for the Quarry database.
//!
//! Migrations are applied in order on database open. Each migration records
//! its own version in `schema_migrations`.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: jobs, reports, citations, conflicts",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS jobs (
    id           TEXT PRIMARY KEY,
    query        TEXT NOT NULL,
    context_json TEXT NOT NULL DEFAULT '[]',
    stage        TEXT NOT NULL,
    error        TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_created_at ON jobs(created_at);

CREATE TABLE IF NOT EXISTS reports (
    id         TEXT PRIMARY KEY,
    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    document   TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_reports_job_id ON reports(job_id);

CREATE TABLE IF NOT EXISTS citations (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    report_id      TEXT NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
    position       INTEGER NOT NULL,
    claim          TEXT NOT NULL,
    llm_source     TEXT NOT NULL,
    underlying_url TEXT,
    confidence     REAL NOT NULL,
    UNIQUE(report_id, position)
);

CREATE TABLE IF NOT EXISTS conflicts (
    id         TEXT PRIMARY KEY,
    report_id  TEXT NOT NULL REFERENCES reports(id) ON DELETE CASCADE,
    position   INTEGER NOT NULL,
    topic      TEXT NOT NULL,
    resolution TEXT,
    UNIQUE(report_id, position)
);

CREATE TABLE IF NOT EXISTS conflict_positions (
    conflict_id TEXT NOT NULL REFERENCES conflicts(id) ON DELETE CASCADE,
    position    INTEGER NOT NULL,
    claim       TEXT NOT NULL,
    llm_source  TEXT NOT NULL,
    PRIMARY KEY (conflict_id, position)
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Keep citation URLs, confidence and context links on conflict positions",
            sql: r#"
ALTER TABLE citations ADD COLUMN underlying_doc TEXT;
ALTER TABLE conflict_positions ADD COLUMN underlying_url TEXT;
ALTER TABLE conflict_positions ADD COLUMN confidence REAL NOT NULL DEFAULT 1.0;

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}

/// Latest schema version known to this build.
pub(crate) fn latest_version() -> u32 {
    all_migrations().last().map(|m| m.version).unwrap_or(0)
}
