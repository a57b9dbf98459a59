//! Database repository layer
//!
//! Provides insert, update and lookup operations for recipients, groups and
//! threads. Every write that can change a partition's membership or ordering
//! bumps the change generation published by [`Database::subscribe_changes`].

use crate::error::{Error, Result};
use crate::partition::{GroupMode, LifecycleEvent};
use crate::types::*;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

/// Thread columns, aliased so they can be mixed with joined tables.
pub(crate) const THREAD_COLUMNS: &str = "
    t.id AS t_id, t.recipient_id AS t_recipient_id, t.snippet AS t_snippet,
    t.snippet_kind AS t_snippet_kind, t.last_message_at AS t_last_message_at,
    t.unread_count AS t_unread_count, t.archived AS t_archived,
    t.distribution_type AS t_distribution_type, t.group_fid AS t_group_fid,
    t.group_eid AS t_group_eid, t.last_event AS t_last_event";

pub(crate) const RECIPIENT_COLUMNS: &str = "
    r.id AS r_id, r.address AS r_address, r.display_name AS r_display_name,
    r.kind AS r_kind, r.muted AS r_muted, r.blocked AS r_blocked";

pub(crate) const GROUP_COLUMNS: &str = "
    g.fid AS g_fid, g.cname AS g_cname, g.recipient_id AS g_recipient_id,
    g.title AS g_title, g.mode AS g_mode, g.group_type AS g_group_type,
    g.privacy_mode AS g_privacy_mode, g.delivery_mode AS g_delivery_mode,
    g.join_mode AS g_join_mode, g.max_members AS g_max_members,
    g.owner_user_id AS g_owner_user_id, g.members AS g_members,
    g.invited AS g_invited, g.blocked AS g_blocked, g.updated_at AS g_updated_at";

/// Fixed-width RFC 3339 so that stored timestamps sort lexicographically.
pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn decode_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn decode_ids(s: &str) -> Vec<RecipientId> {
    serde_json::from_str(s).unwrap_or_default()
}

/// Database handle (single connection) plus the change-notification channel.
pub struct Database {
    conn: Mutex<Connection>,
    changes: watch::Sender<u64>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -16000;  -- 16MB cache
            ",
        )?;

        Ok(Self::with_connection(conn))
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self::with_connection(conn))
    }

    fn with_connection(conn: Connection) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            conn: Mutex::new(conn),
            changes,
        }
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn()?;
        super::schema::run_migrations(&conn)
    }

    /// Lock the connection. A poisoned lock means a writer panicked
    /// mid-statement, so the store is reported unavailable.
    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::StoreUnavailable("connection lock poisoned".to_string()))
    }

    // ============================================
    // Change notification
    // ============================================

    /// Subscribe to the change generation.
    ///
    /// The value increases on every write that affects list membership or
    /// ordering. Consumers re-run `count()` and `fetch(0, ..)` when it moves.
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Current change generation
    pub fn change_generation(&self) -> u64 {
        *self.changes.borrow()
    }

    fn notify_change(&self) {
        self.changes.send_modify(|generation| *generation += 1);
        tracing::trace!(generation = self.change_generation(), "Store changed");
    }

    // ============================================
    // Recipient operations
    // ============================================

    /// Insert a recipient or update its display name and kind.
    ///
    /// Returns the id of the existing or new row.
    pub fn upsert_recipient(
        &self,
        address: &str,
        display_name: Option<&str>,
        kind: RecipientKind,
    ) -> Result<RecipientId> {
        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            r#"
            INSERT INTO recipients (address, display_name, kind)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(address) DO UPDATE SET
                display_name = COALESCE(excluded.display_name, recipients.display_name),
                kind = excluded.kind
            RETURNING id
            "#,
            params![address, display_name, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(RecipientId(id))
    }

    /// Update mute/block settings of a recipient
    pub fn set_recipient_flags(&self, id: RecipientId, muted: bool, blocked: bool) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE recipients SET muted = ?1, blocked = ?2 WHERE id = ?3",
            params![muted, blocked, id.0],
        )?;
        Ok(())
    }

    /// Get a recipient by id
    pub fn get_recipient(&self, id: RecipientId) -> Result<Option<Recipient>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {RECIPIENT_COLUMNS} FROM recipients r WHERE r.id = ?"),
            [id.0],
            Self::row_to_recipient,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get every recipient in `ids` that exists, in one query.
    pub fn get_recipients(&self, ids: &[RecipientId]) -> Result<Vec<Recipient>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let conn = self.conn()?;
        let placeholders = vec!["?"; ids.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECIPIENT_COLUMNS} FROM recipients r WHERE r.id IN ({placeholders}) ORDER BY r.id"
        ))?;

        let recipients = stmt
            .query_map(params_from_iter(ids.iter().map(|id| id.0)), Self::row_to_recipient)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(recipients)
    }

    pub(crate) fn row_to_recipient(row: &Row) -> rusqlite::Result<Recipient> {
        let kind_str: String = row.get("r_kind")?;

        Ok(Recipient {
            id: RecipientId(row.get("r_id")?),
            address: row.get("r_address")?,
            display_name: row.get("r_display_name")?,
            kind: kind_str.parse().unwrap_or(RecipientKind::Individual),
            muted: row.get("r_muted")?,
            blocked: row.get("r_blocked")?,
        })
    }

    // ============================================
    // Group operations
    // ============================================

    /// Insert a group, or update its attributes if the fid exists.
    ///
    /// The mode of an existing group is left untouched: modes only change
    /// through [`Database::apply_lifecycle_event`] (or the repair path
    /// [`Database::mark_group_mode`]).
    pub fn upsert_group(&self, group: &GroupRecord) -> Result<()> {
        let members = serde_json::to_string(&group.members)?;
        let invited = serde_json::to_string(&group.invited)?;
        let blocked = serde_json::to_string(&group.blocked)?;

        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT INTO groups (fid, cname, recipient_id, title, mode, group_type, privacy_mode,
                                delivery_mode, join_mode, max_members, owner_user_id,
                                members, invited, blocked, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(fid) DO UPDATE SET
                cname = excluded.cname,
                recipient_id = COALESCE(excluded.recipient_id, groups.recipient_id),
                title = excluded.title,
                group_type = excluded.group_type,
                privacy_mode = excluded.privacy_mode,
                delivery_mode = excluded.delivery_mode,
                join_mode = excluded.join_mode,
                max_members = excluded.max_members,
                owner_user_id = excluded.owner_user_id,
                members = excluded.members,
                invited = excluded.invited,
                blocked = excluded.blocked,
                updated_at = excluded.updated_at
            "#,
            params![
                group.fid,
                group.cname,
                group.recipient_id.map(|id| id.0),
                group.title,
                group.mode.code(),
                group.group_type.code(),
                group.privacy_mode.code(),
                group.delivery_mode.code(),
                group.join_mode.code(),
                group.max_members,
                group.owner_user_id,
                members,
                invited,
                blocked,
                encode_ts(&group.updated_at),
            ],
        )?;
        drop(conn);

        self.notify_change();
        Ok(())
    }

    /// Get a group by fence id
    pub fn get_group_by_fid(&self, fid: i64) -> Result<Option<GroupRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.fid = ?"),
            [fid],
            Self::row_to_group,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get a group by its unique alias
    pub fn get_group_by_cname(&self, cname: &str) -> Result<Option<GroupRecord>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {GROUP_COLUMNS} FROM groups g WHERE g.cname = ?"),
            [cname],
            Self::row_to_group,
        )
        .optional()
        .map_err(Error::from)
    }

    /// List all groups ordered by fid
    pub fn list_groups(&self) -> Result<Vec<GroupRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {GROUP_COLUMNS} FROM groups g ORDER BY g.fid ASC"
        ))?;

        let groups = stmt
            .query_map([], Self::row_to_group)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(groups)
    }

    /// Apply a server-confirmed lifecycle event to a group.
    ///
    /// The read and the write run in one transaction; an invalid transition
    /// leaves the record untouched. Returns the resulting mode.
    pub fn apply_lifecycle_event(&self, fid: i64, event: LifecycleEvent) -> Result<GroupMode> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let code: i64 = tx
            .query_row("SELECT mode FROM groups WHERE fid = ?", [fid], |row| {
                row.get(0)
            })
            .optional()?
            .ok_or_else(|| Error::GroupNotFound(fid.to_string()))?;

        let current = GroupMode::from_code(code)?;
        let next = current.apply(event)?;

        if next != current {
            tx.execute(
                "UPDATE groups SET mode = ?1, updated_at = ?2 WHERE fid = ?3",
                params![next.code(), encode_ts(&Utc::now()), fid],
            )?;
        }
        tx.commit()?;
        drop(conn);

        tracing::debug!(
            fid,
            event = event.as_str(),
            from = %current,
            to = %next,
            "Applied lifecycle event"
        );

        if next != current {
            self.notify_change();
        }
        Ok(next)
    }

    /// Force a group's mode without validating the transition.
    ///
    /// Data-integrity repair only.
    pub fn mark_group_mode(&self, fid: i64, mode: GroupMode) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE groups SET mode = ?1, updated_at = ?2 WHERE fid = ?3",
            params![mode.code(), encode_ts(&Utc::now()), fid],
        )?;
        drop(conn);

        if updated == 0 {
            return Err(Error::GroupNotFound(fid.to_string()));
        }

        tracing::warn!(fid, mode = %mode, "Group mode overwritten by repair");
        self.notify_change();
        Ok(())
    }

    /// Delete a group record. Threads keep their rows but lose the fence link.
    ///
    /// Data-integrity repair only.
    pub fn delete_group(&self, fid: i64) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE threads SET group_fid = NULL WHERE group_fid = ?",
            [fid],
        )?;
        let deleted = tx.execute("DELETE FROM groups WHERE fid = ?", [fid])?;
        tx.commit()?;
        drop(conn);

        if deleted == 0 {
            return Err(Error::GroupNotFound(fid.to_string()));
        }

        tracing::warn!(fid, "Group record deleted by repair");
        self.notify_change();
        Ok(())
    }

    pub(crate) fn row_to_group(row: &Row) -> rusqlite::Result<GroupRecord> {
        let mode_code: i64 = row.get("g_mode")?;
        let type_code: i64 = row.get("g_group_type")?;
        let privacy_code: i64 = row.get("g_privacy_mode")?;
        let delivery_code: i64 = row.get("g_delivery_mode")?;
        let join_code: i64 = row.get("g_join_mode")?;
        let members_str: String = row.get("g_members")?;
        let invited_str: String = row.get("g_invited")?;
        let blocked_str: String = row.get("g_blocked")?;
        let updated_at_str: String = row.get("g_updated_at")?;

        Ok(GroupRecord {
            fid: row.get("g_fid")?,
            cname: row.get("g_cname")?,
            recipient_id: row.get::<_, Option<i64>>("g_recipient_id")?.map(RecipientId),
            title: row.get("g_title")?,
            mode: GroupMode::from_code(mode_code).unwrap_or(GroupMode::DeviceLocal),
            group_type: GroupType::from_code(type_code).unwrap_or_default(),
            privacy_mode: PrivacyMode::from_code(privacy_code).unwrap_or_default(),
            delivery_mode: DeliveryMode::from_code(delivery_code).unwrap_or_default(),
            join_mode: JoinMode::from_code(join_code).unwrap_or_default(),
            max_members: row.get("g_max_members")?,
            owner_user_id: row.get("g_owner_user_id")?,
            members: decode_ids(&members_str),
            invited: decode_ids(&invited_str),
            blocked: decode_ids(&blocked_str),
            updated_at: decode_ts(&updated_at_str),
        })
    }

    // ============================================
    // Thread operations
    // ============================================

    /// Record an inbound or outbound event.
    ///
    /// Creates the recipient's thread on first use; afterwards updates the
    /// snippet, timestamp and last-event payload, and adds to the unread
    /// counter for unread events. Returns the thread id.
    pub fn record_thread_event(&self, event: &ThreadEvent) -> Result<ThreadId> {
        let at = event.at.unwrap_or_else(Utc::now);
        let payload = event.payload.as_ref().map(|p| p.to_string());

        let conn = self.conn()?;
        let id: i64 = conn.query_row(
            r#"
            INSERT INTO threads (recipient_id, snippet, snippet_kind, last_message_at,
                                 unread_count, distribution_type, group_fid, group_eid, last_event)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(recipient_id) DO UPDATE SET
                snippet = excluded.snippet,
                snippet_kind = excluded.snippet_kind,
                last_message_at = excluded.last_message_at,
                unread_count = threads.unread_count + excluded.unread_count,
                distribution_type = excluded.distribution_type,
                group_fid = COALESCE(excluded.group_fid, threads.group_fid),
                group_eid = COALESCE(excluded.group_eid, threads.group_eid),
                last_event = excluded.last_event
            RETURNING id
            "#,
            params![
                event.recipient_id.0,
                event.snippet,
                event.snippet_kind.as_str(),
                encode_ts(&at),
                if event.unread { 1 } else { 0 },
                event.distribution_type.code(),
                event.group_fid,
                event.group_eid,
                payload,
            ],
            |row| row.get(0),
        )?;
        drop(conn);

        self.notify_change();
        Ok(ThreadId(id))
    }

    /// Get a thread summary by id
    pub fn get_thread(&self, id: ThreadId) -> Result<Option<ThreadSummary>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads t WHERE t.id = ?"),
            [id.0],
            Self::row_to_thread,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Get the thread routed to a recipient
    pub fn get_thread_by_recipient(&self, recipient_id: RecipientId) -> Result<Option<ThreadSummary>> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads t WHERE t.recipient_id = ?"),
            [recipient_id.0],
            Self::row_to_thread,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Reset the unread counter of a thread
    pub fn mark_read(&self, id: ThreadId) -> Result<()> {
        let conn = self.conn()?;
        let updated = conn.execute("UPDATE threads SET unread_count = 0 WHERE id = ?", [id.0])?;
        if updated == 0 {
            return Err(Error::ThreadNotFound(id.0));
        }
        Ok(())
    }

    /// Archive or unarchive threads. Archiving also drops the pin.
    pub fn set_archived(&self, ids: &[ThreadId], archived: bool) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for id in ids {
            let updated = if archived {
                tx.execute(
                    "UPDATE threads SET archived = 1, pinned = 0 WHERE id = ?",
                    [id.0],
                )?
            } else {
                tx.execute("UPDATE threads SET archived = 0 WHERE id = ?", [id.0])?
            };
            if updated == 0 {
                return Err(Error::ThreadNotFound(id.0));
            }
        }

        if archived {
            Self::compact_pins(&tx)?;
        }
        tx.commit()?;
        drop(conn);

        tracing::debug!(count = ids.len(), archived, "Updated archived flag");
        self.notify_change();
        Ok(())
    }

    /// Pin threads below the already pinned ones, in the given order.
    /// Threads that are already pinned keep their rank.
    pub fn pin_threads(&self, ids: &[ThreadId]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut rank: i64 = tx.query_row("SELECT COALESCE(MAX(pinned), 0) FROM threads", [], |row| {
            row.get(0)
        })?;

        for id in ids {
            let current: i64 = tx
                .query_row("SELECT pinned FROM threads WHERE id = ?", [id.0], |row| {
                    row.get(0)
                })
                .optional()?
                .ok_or(Error::ThreadNotFound(id.0))?;
            if current > 0 {
                continue;
            }
            rank += 1;
            tx.execute(
                "UPDATE threads SET pinned = ?1 WHERE id = ?2",
                params![rank, id.0],
            )?;
        }
        tx.commit()?;
        drop(conn);

        self.notify_change();
        Ok(())
    }

    /// Unpin threads and renumber the remaining pins 1..n.
    pub fn unpin_threads(&self, ids: &[ThreadId]) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        for id in ids {
            tx.execute("UPDATE threads SET pinned = 0 WHERE id = ?", [id.0])?;
        }
        Self::compact_pins(&tx)?;
        tx.commit()?;
        drop(conn);

        self.notify_change();
        Ok(())
    }

    /// Pinned thread ids, top first
    pub fn pinned_thread_ids(&self) -> Result<Vec<ThreadId>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id FROM threads WHERE pinned > 0 ORDER BY pinned ASC, id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0).map(ThreadId))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    fn compact_pins(conn: &Connection) -> Result<()> {
        let remaining: Vec<i64> = conn
            .prepare("SELECT id FROM threads WHERE pinned > 0 ORDER BY pinned ASC, id ASC")?
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (index, id) in remaining.iter().enumerate() {
            conn.execute(
                "UPDATE threads SET pinned = ?1 WHERE id = ?2",
                params![index as i64 + 1, id],
            )?;
        }
        Ok(())
    }

    /// Delete a thread (user purge)
    pub fn delete_thread(&self, id: ThreadId) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM threads WHERE id = ?", [id.0])?;
        if deleted == 0 {
            return Err(Error::ThreadNotFound(id.0));
        }
        Self::compact_pins(&tx)?;
        tx.commit()?;
        drop(conn);

        self.notify_change();
        Ok(())
    }

    pub(crate) fn row_to_thread(row: &Row) -> rusqlite::Result<ThreadSummary> {
        let snippet_kind_str: String = row.get("t_snippet_kind")?;
        let last_message_str: String = row.get("t_last_message_at")?;
        let distribution_code: i64 = row.get("t_distribution_type")?;
        let last_event_str: Option<String> = row.get("t_last_event")?;

        Ok(ThreadSummary {
            thread_id: ThreadId(row.get("t_id")?),
            recipient_id: RecipientId(row.get("t_recipient_id")?),
            snippet: row.get("t_snippet")?,
            snippet_kind: snippet_kind_str.parse().unwrap_or_default(),
            last_message_at: decode_ts(&last_message_str),
            unread_count: row.get("t_unread_count")?,
            archived: row.get("t_archived")?,
            distribution_type: DistributionType::from_code(distribution_code).unwrap_or_default(),
            group_fid: row.get("t_group_fid")?,
            group_eid: row.get("t_group_eid")?,
            last_event: last_event_str
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
        })
    }
}
