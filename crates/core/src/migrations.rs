//! Database schema migrations.
//!
//! Uses a simple version table approach to track applied migrations.
//! Each migration is a SQL batch that transforms the schema. The Local Store
//! and the cache tier database carry separate migration lists.

use std::num::ParseIntError;

use crate::Error;
use tokio_rusqlite::{Connection, params};

/// A migration list: (version, SQL).
pub type Migrations = &'static [(&'static str, &'static str)];

/// Local Store schema: documents, queue, assets, reference caches.
pub const STORE_MIGRATIONS: Migrations = &[
    ("1", include_str!("../migrations/store/001_documents.sql")),
    ("2", include_str!("../migrations/store/002_queue_assets.sql")),
    ("3", include_str!("../migrations/store/003_reference_meta.sql")),
];

/// Cache tier schema.
pub const CACHE_MIGRATIONS: Migrations = &[("1", include_str!("../migrations/cache/001_cache_entries.sql"))];

/// Run any pending migrations from `migrations`.
///
/// This creates the _migrations table if it doesn't exist, checks the
/// current version, and applies any migrations that haven't been run yet.
/// All migrations are idempotent using CREATE IF NOT EXISTS.
///
/// # Errors
///
/// Returns an error if a migration SQL fails to execute.
pub async fn run(conn: &Connection, migrations: Migrations) -> Result<(), Error> {
    conn.call(move |conn| -> Result<(), Error> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(Error::from)?;

        let current: i64 = conn
            .query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
            .map_err(Error::from)?;

        for (version, sql) in migrations {
            let version_num: i64 = version
                .parse()
                .map_err(|e: ParseIntError| Error::MigrationFailed(e.to_string()))?;
            if version_num > current {
                tracing::debug!(version = version_num, "applying migration");
                conn.execute_batch(sql)
                    .map_err(|e| Error::MigrationFailed(format!("version {version_num}: {e}")))?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                    params![version_num, chrono::Utc::now().to_rfc3339()],
                )
                .map_err(Error::from)?;
            }
        }

        Ok(())
    })
    .await
    .map_err(Error::from)
}
