//! libSQL storage layer (embedded, local file).
//!
//! The [`Storage`] struct wraps a libSQL database holding:
//! - the candidate history, from which per-range seen-sets and star counts are derived
//! - generated summaries, whose newest row per identity acts as the summary cache
//! - run history

mod migrations;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, Row, params};
use tracing::debug;
use trendscout_shared::{Candidate, Result, SummaryCacheEntry, TimeRange, TrendScoutError};
use uuid::Uuid;

/// One recorded pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: String,
    pub range: TimeRange,
    pub started_at: DateTime<Utc>,
    pub success: bool,
    pub stats_json: String,
}

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

fn db_err(e: libsql::Error) -> TrendScoutError {
    TrendScoutError::Storage(e.to_string())
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TrendScoutError::Storage(format!("bad timestamp '{raw}': {e}")))
}

fn to_sql_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_sql_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl Storage {
    /// Open or create a database at `path`, applying pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrendScoutError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        let storage = Self { db, conn };
        storage.run_migrations().await?;
        Ok(storage)
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
                    TrendScoutError::Storage(format!("migration v{} failed: {e}", migration.version))
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

    // -----------------------------------------------------------------------
    // Candidate history
    // -----------------------------------------------------------------------

    /// Identities ever observed for `range`.
    pub async fn get_seen_identities(&self, range: TimeRange) -> Result<HashSet<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT DISTINCT identity FROM candidates WHERE time_range = ?1",
                params![range.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut seen = HashSet::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            seen.insert(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(seen)
    }

    /// Upsert observations keyed by identity, range and the UTC date of `observed_at`.
    /// Returns the number of rows written.
    pub async fn save_candidates(
        &self,
        candidates: &[Candidate],
        range: TimeRange,
        observed_at: DateTime<Utc>,
    ) -> Result<usize> {
        if candidates.is_empty() {
            return Ok(0);
        }
        let observed_date = observed_at.format("%Y-%m-%d").to_string();
        let observed_at = timestamp(observed_at);

        let tx = self.conn.transaction().await.map_err(db_err)?;
        let mut written = 0usize;
        for c in candidates {
            let id = Uuid::now_v7().to_string();
            written += tx
                .execute(
                    "INSERT INTO candidates
                       (id, identity, time_range, observed_date, url, description, language,
                        stars, forks, period_stars, observed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                     ON CONFLICT(identity, time_range, observed_date) DO UPDATE SET
                       url = excluded.url,
                       description = excluded.description,
                       language = excluded.language,
                       stars = excluded.stars,
                       forks = excluded.forks,
                       period_stars = excluded.period_stars,
                       observed_at = excluded.observed_at",
                    params![
                        id.as_str(),
                        c.identity.as_str(),
                        range.as_str(),
                        observed_date.as_str(),
                        c.url.as_str(),
                        c.description.as_str(),
                        c.language.as_str(),
                        to_sql_int(c.stars),
                        to_sql_int(c.forks),
                        to_sql_int(c.period_stars),
                        observed_at.as_str()
                    ],
                )
                .await
                .map_err(db_err)? as usize;
        }
        tx.commit().await.map_err(db_err)?;

        debug!(%range, written, "saved candidates");
        Ok(written)
    }

    /// Star count from the most recent observation of `identity`, in any range.
    pub async fn get_latest_star_count(&self, identity: &str) -> Result<Option<u64>> {
        let mut rows = self
            .conn
            .query(
                "SELECT stars FROM candidates WHERE identity = ?1
                 ORDER BY observed_at DESC LIMIT 1",
                params![identity],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(from_sql_int(row.get::<i64>(0).map_err(db_err)?))),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Summary cache
    // -----------------------------------------------------------------------

    /// Newest summary for `identity`.
    pub async fn get_cached_summary(&self, identity: &str) -> Result<Option<SummaryCacheEntry>> {
        let mut rows = self
            .conn
            .query(
                "SELECT identity, text, model, created_at, source_description, source_stars
                 FROM summaries WHERE identity = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![identity],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_summary(&row)?)),
            None => Ok(None),
        }
    }

    /// Store a summary, capturing the description and stars of the latest
    /// observation as its source. Returns whether a row was written.
    pub async fn save_summary(&self, identity: &str, text: &str, model: &str) -> Result<bool> {
        let id = Uuid::now_v7().to_string();
        let now = timestamp(Utc::now());
        let written = self
            .conn
            .execute(
                "INSERT INTO summaries
                   (id, identity, text, model, created_at, source_description, source_stars)
                 VALUES (?1, ?2, ?3, ?4, ?5,
                   COALESCE((SELECT description FROM candidates WHERE identity = ?2
                             ORDER BY observed_at DESC LIMIT 1), ''),
                   (SELECT stars FROM candidates WHERE identity = ?2
                    ORDER BY observed_at DESC LIMIT 1))",
                params![id.as_str(), identity, text, model, now.as_str()],
            )
            .await
            .map_err(db_err)?;

        debug!(%identity, %model, "saved summary");
        Ok(written > 0)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Record a finished run with its serialized stats.
    pub async fn record_run(
        &self,
        range: TimeRange,
        started_at: DateTime<Utc>,
        success: bool,
        stats_json: &str,
    ) -> Result<String> {
        let id = Uuid::now_v7().to_string();
        self.conn
            .execute(
                "INSERT INTO runs (id, time_range, started_at, success, stats_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    range.as_str(),
                    timestamp(started_at).as_str(),
                    i64::from(success),
                    stats_json
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(id)
    }

    /// Most recent runs, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<RunRecord>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, time_range, started_at, success, stats_json
                 FROM runs ORDER BY started_at DESC LIMIT ?1",
                params![i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let range: String = row.get(1).map_err(db_err)?;
            let started_at: String = row.get(2).map_err(db_err)?;
            runs.push(RunRecord {
                id: row.get(0).map_err(db_err)?,
                range: range.parse()?,
                started_at: parse_timestamp(&started_at)?,
                success: row.get::<i64>(3).map_err(db_err)? != 0,
                stats_json: row.get(4).map_err(db_err)?,
            });
        }
        Ok(runs)
    }
}

fn row_to_summary(row: &Row) -> Result<SummaryCacheEntry> {
    let created_at: String = row.get(3).map_err(db_err)?;
    Ok(SummaryCacheEntry {
        identity: row.get(0).map_err(db_err)?,
        text: row.get(1).map_err(db_err)?,
        model: row.get(2).map_err(db_err)?,
        created_at: parse_timestamp(&created_at)?,
        source_description: row.get(4).map_err(db_err)?,
        source_star_count: row.get::<Option<i64>>(5).map_err(db_err)?.map(from_sql_int),
    })
}
