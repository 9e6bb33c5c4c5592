//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL UNIQUE
            );

            CREATE TABLE IF NOT EXISTS members (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                nickname TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sender_member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
                receiver_member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
                title TEXT NOT NULL,
                body TEXT NOT NULL,
                message_code TEXT NOT NULL,
                inbox INTEGER NOT NULL DEFAULT 0,
                outbox INTEGER NOT NULL DEFAULT 0,
                internal INTEGER NOT NULL DEFAULT 0,
                sent_email INTEGER NOT NULL DEFAULT 0,
                sent_sms INTEGER NOT NULL DEFAULT 0,
                sent_whatsapp INTEGER NOT NULL DEFAULT 1,
                message_type TEXT NOT NULL DEFAULT '0',
                message_type_id INTEGER,
                created_by INTEGER REFERENCES users(id) ON DELETE SET NULL,
                created TEXT NOT NULL,
                modified TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender_member_id);
            CREATE INDEX IF NOT EXISTS idx_messages_receiver ON messages(receiver_member_id);
            CREATE INDEX IF NOT EXISTS idx_messages_code ON messages(message_code);

            CREATE TABLE IF NOT EXISTS communication_channels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
                channel TEXT NOT NULL DEFAULT '0',
                identification TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_channels_member ON communication_channels(member_id);
            CREATE INDEX IF NOT EXISTS idx_channels_identification
                ON communication_channels(identification);

            CREATE TABLE IF NOT EXISTS borrow_request_recipients (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                member_id INTEGER NOT NULL REFERENCES members(id) ON DELETE CASCADE,
                borrowing_request_id INTEGER NOT NULL,
                message_id INTEGER UNIQUE REFERENCES messages(id) ON DELETE CASCADE,
                UNIQUE (member_id, borrowing_request_id)
            );
            CREATE INDEX IF NOT EXISTS idx_brr_member ON borrow_request_recipients(member_id);

            CREATE TABLE IF NOT EXISTS app_settings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                building_id INTEGER NOT NULL,
                key TEXT NOT NULL,
                value TEXT NOT NULL,
                modified TEXT NOT NULL DEFAULT (datetime('now')),
                UNIQUE (building_id, key)
            );
        "#,
    },
    Migration {
        version: 2,
        name: "mailbox_store",
        sql: r#"
            CREATE TABLE IF NOT EXISTS mailboxes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                uri TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS inbound_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                subject TEXT NOT NULL DEFAULT '',
                from_header TEXT NOT NULL DEFAULT '',
                body TEXT NOT NULL,
                outgoing INTEGER NOT NULL DEFAULT 0,
                processed TEXT NOT NULL
            );
        "#,
    },
    Migration {
        version: 3,
        name: "schedules",
        sql: r#"
            CREATE TABLE IF NOT EXISTS schedules (
                name TEXT PRIMARY KEY,
                func TEXT NOT NULL,
                interval_minutes INTEGER NOT NULL,
                repeats INTEGER NOT NULL DEFAULT -1,
                last_run_at TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    tracing::info!(
        "Database migrations complete (at V{})",
        get_current_version(conn).await?
    );

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
