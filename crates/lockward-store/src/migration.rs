//! Schema migration system.
//!
//! Migrations are stored as static SQL strings keyed by version number.
//! The current version is tracked in a `_migrations` table so migrations
//! are idempotent and only run once.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order.  Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "account lock state",
        sql: r#"
            CREATE TABLE account_state (
                account_id              TEXT PRIMARY KEY,
                label                   TEXT,
                authenticated           BOOLEAN NOT NULL DEFAULT 0,
                last_active_ms          INTEGER,
                vault_timeout           INTEGER,
                vault_timeout_action    TEXT CHECK(vault_timeout_action IN ('lock','logOut')),
                ever_been_unlocked      BOOLEAN NOT NULL DEFAULT 0,
                biometric_locked        BOOLEAN NOT NULL DEFAULT 1,
                biometric_unlock        BOOLEAN NOT NULL DEFAULT 0,
                protected_pin           TEXT,
                encrypted_pin_protected TEXT,
                convert_to_key_connector BOOLEAN NOT NULL DEFAULT 0,
                created_at              INTEGER NOT NULL,
                updated_at              INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 2,
        description: "persisted key slots",
        sql: r#"
            CREATE TABLE persisted_keys (
                account_id TEXT NOT NULL,
                slot       TEXT NOT NULL,
                material   BLOB NOT NULL,
                stored_at  INTEGER NOT NULL,
                PRIMARY KEY (account_id, slot)
            );
        "#,
    },
    Migration {
        version: 3,
        description: "organization policies",
        sql: r#"
            CREATE TABLE org_policies (
                account_id TEXT NOT NULL,
                kind       TEXT NOT NULL,
                enabled    BOOLEAN NOT NULL DEFAULT 1,
                data       TEXT,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (account_id, kind)
            );
        "#,
    },
    Migration {
        version: 4,
        description: "persisted session tokens",
        sql: r#"
            CREATE TABLE session_tokens (
                account_id    TEXT PRIMARY KEY,
                access_token  TEXT NOT NULL,
                refresh_token TEXT,
                stored_at     INTEGER NOT NULL
            );
        "#,
    },
    Migration {
        version: 5,
        description: "process-wide app state",
        sql: r#"
            CREATE TABLE app_state (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
        "#,
    },
];

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function; call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "running pending migrations"
    );

    for migration in pending {
        apply(conn, migration)?;
    }
    Ok(())
}

/// Latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to read current version: {e}"),
    })
}

/// Version the schema reaches once every migration has run.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

// ── internals ────────────────────────────────────────────────────────

fn ensure_migrations_table(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )
    .map_err(|e| StoreError::Migration {
        version: 0,
        message: format!("failed to create _migrations table: {e}"),
    })
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StoreResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    let fail = |message: String| StoreError::Migration {
        version: migration.version,
        message,
    };

    conn.execute_batch("BEGIN IMMEDIATE;")
        .map_err(|e| fail(format!("failed to begin transaction: {e}")))?;

    let result = (|| -> StoreResult<()> {
        conn.execute_batch(migration.sql)
            .map_err(|e| fail(format!("SQL execution failed: {e}")))?;
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![
                migration.version,
                migration.description,
                chrono::Utc::now().timestamp()
            ],
        )
        .map_err(|e| fail(format!("failed to record migration: {e}")))?;
        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")
                .map_err(|e| fail(format!("failed to commit: {e}")))?;
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────
