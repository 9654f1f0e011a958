//! SQL migration definitions for the TrendScout database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

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
            description: "Initial schema: candidates, summaries",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Listing observations; one row per identity, range and day
CREATE TABLE IF NOT EXISTS candidates (
    id            TEXT PRIMARY KEY,
    identity      TEXT NOT NULL,
    time_range    TEXT NOT NULL,
    observed_date TEXT NOT NULL,
    url           TEXT NOT NULL,
    description   TEXT NOT NULL DEFAULT '',
    language      TEXT NOT NULL DEFAULT '',
    stars         INTEGER NOT NULL,
    forks         INTEGER NOT NULL DEFAULT 0,
    period_stars  INTEGER NOT NULL DEFAULT 0,
    observed_at   TEXT NOT NULL,
    UNIQUE(identity, time_range, observed_date)
);

CREATE INDEX IF NOT EXISTS idx_candidates_range ON candidates(time_range, identity);
CREATE INDEX IF NOT EXISTS idx_candidates_identity ON candidates(identity, observed_at);

-- Generated summaries; the newest row per identity is the cache entry
CREATE TABLE IF NOT EXISTS summaries (
    id                 TEXT PRIMARY KEY,
    identity           TEXT NOT NULL,
    text               TEXT NOT NULL,
    model              TEXT NOT NULL,
    created_at         TEXT NOT NULL,
    source_description TEXT NOT NULL DEFAULT '',
    source_stars       INTEGER
);

CREATE INDEX IF NOT EXISTS idx_summaries_identity ON summaries(identity, created_at);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS runs (
    id          TEXT PRIMARY KEY,
    time_range  TEXT NOT NULL,
    started_at  TEXT NOT NULL,
    success     INTEGER NOT NULL,
    stats_json  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_started ON runs(started_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
