//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 2;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: recipients, groups, threads
    r#"
    -- Recipients: contact and group addresses with their settings
    CREATE TABLE IF NOT EXISTS recipients (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        address          TEXT NOT NULL UNIQUE,
        display_name     TEXT,
        kind             TEXT NOT NULL,      -- 'individual', 'group'
        muted            INTEGER NOT NULL DEFAULT 0,
        blocked          INTEGER NOT NULL DEFAULT 0
    );

    -- Groups (fences) and their lifecycle state
    CREATE TABLE IF NOT EXISTS groups (
        fid              INTEGER PRIMARY KEY,
        cname            TEXT NOT NULL UNIQUE,
        recipient_id     INTEGER REFERENCES recipients(id),
        title            TEXT,
        mode             INTEGER NOT NULL,   -- GroupMode code
        group_type       INTEGER NOT NULL DEFAULT 0,
        privacy_mode     INTEGER NOT NULL DEFAULT 0,
        delivery_mode    INTEGER NOT NULL DEFAULT 0,
        join_mode        INTEGER NOT NULL DEFAULT 0,
        max_members      INTEGER NOT NULL DEFAULT 0,
        owner_user_id    INTEGER,
        members          JSON NOT NULL DEFAULT '[]',
        invited          JSON NOT NULL DEFAULT '[]',
        blocked          JSON NOT NULL DEFAULT '[]',
        updated_at       DATETIME NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_groups_mode ON groups(mode);
    CREATE INDEX IF NOT EXISTS idx_groups_type ON groups(group_type);

    -- Thread summaries. `pinned` is a rank (0 = not pinned, 1 = top).
    CREATE TABLE IF NOT EXISTS threads (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        recipient_id      INTEGER NOT NULL REFERENCES recipients(id),
        snippet           TEXT,
        snippet_kind      TEXT NOT NULL DEFAULT 'message',
        last_message_at   DATETIME NOT NULL,
        unread_count      INTEGER NOT NULL DEFAULT 0,
        archived          INTEGER NOT NULL DEFAULT 0,
        pinned            INTEGER NOT NULL DEFAULT 0,
        distribution_type INTEGER NOT NULL DEFAULT 2,
        group_fid         INTEGER REFERENCES groups(fid),
        group_eid         INTEGER,
        last_event        JSON
    );

    CREATE UNIQUE INDEX IF NOT EXISTS idx_threads_recipient ON threads(recipient_id);
    CREATE INDEX IF NOT EXISTS idx_threads_group ON threads(group_fid);
    CREATE INDEX IF NOT EXISTS idx_threads_archived ON threads(archived);
    CREATE INDEX IF NOT EXISTS idx_threads_pinned ON threads(pinned);
    CREATE INDEX IF NOT EXISTS idx_threads_last_message ON threads(last_message_at DESC);
    "#,
    // Version 2: composite index serving the windowed list queries
    r#"
    CREATE INDEX IF NOT EXISTS idx_threads_list
        ON threads(archived, pinned, last_message_at DESC, id DESC);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    // Each version commits together with its user_version bump
    for (version, migration) in (1..).zip(MIGRATIONS.iter()) {
        if version <= current_version {
            continue;
        }
        tracing::info!(version, "Running migration");
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["recipients", "groups", "threads"] {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_foreign_keys() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("PRAGMA foreign_keys = ON", []).unwrap();
        run_migrations(&conn).unwrap();

        let fk_list: Vec<String> = conn
            .prepare("PRAGMA foreign_key_list(threads)")
            .unwrap()
            .query_map([], |row| row.get::<_, String>(2))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(fk_list.iter().any(|t| t == "recipients"));
        assert!(fk_list.iter().any(|t| t == "groups"));
    }
}
