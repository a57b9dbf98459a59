//! Windowed partition queries
//!
//! Counts and offset-limited row windows for one [`ListQuery`] and pin
//! filter. The pager only talks to the store through
//! [`ConversationStore`], so tests can substitute an in-memory fake.

use super::repo::{Database, GROUP_COLUMNS, RECIPIENT_COLUMNS, THREAD_COLUMNS};
use crate::error::Result;
use crate::partition::{ListQuery, PartitionPredicate};
use crate::types::{GroupType, ThreadRow};
use rusqlite::{Row, ToSql};

/// Which pin state a window selects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinFilter {
    /// Pinned rows, ordered by pin rank
    Pinned,
    /// Unpinned rows, most recent first
    Unpinned,
    /// Every row, most recent first
    Any,
}

impl PinFilter {
    fn clause(&self) -> Option<&'static str> {
        match self {
            PinFilter::Pinned => Some("t.pinned > 0"),
            PinFilter::Unpinned => Some("t.pinned = 0"),
            PinFilter::Any => None,
        }
    }

    fn order_by(&self) -> &'static str {
        match self {
            PinFilter::Pinned => "t.pinned ASC, t.id ASC",
            PinFilter::Unpinned | PinFilter::Any => "t.last_message_at DESC, t.id DESC",
        }
    }
}

/// Read-only store primitives consumed by the pager.
pub trait ConversationStore: Send + Sync {
    /// Rows matching the query, pinned or not
    fn count_total(&self, query: &ListQuery) -> Result<usize>;

    /// Pinned rows matching the query
    fn count_pinned(&self, query: &ListQuery) -> Result<usize>;

    /// Up to `limit` rows starting at `offset` within the filtered, ordered set
    fn fetch_window(
        &self,
        query: &ListQuery,
        pin: PinFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ThreadRow>>;

    fn count_archived(&self) -> Result<usize> {
        self.count_total(&PartitionPredicate::Archived.into())
    }

    fn fetch_archived_window(&self, offset: usize, limit: usize) -> Result<Vec<ThreadRow>> {
        self.fetch_window(&PartitionPredicate::Archived.into(), PinFilter::Any, offset, limit)
    }
}

/// Builds the WHERE clause and its parameters for a query and pin filter.
fn where_clause(query: &ListQuery, pin: PinFilter) -> (String, Vec<Box<dyn ToSql>>) {
    let mut sql = String::from(" WHERE 1=1");
    let mut params: Vec<Box<dyn ToSql>> = vec![];

    match &query.predicate {
        PartitionPredicate::Archived => sql.push_str(" AND t.archived = 1"),
        PartitionPredicate::Guardian => {
            sql.push_str(" AND t.archived = 0 AND g.group_type = ?");
            params.push(Box::new(GroupType::Guardian.code()));
        }
        PartitionPredicate::Modes(modes) => {
            sql.push_str(" AND t.archived = 0 AND g.group_type != ?");
            params.push(Box::new(GroupType::Guardian.code()));

            if modes.is_empty() {
                sql.push_str(" AND 0");
            } else {
                let placeholders = vec!["?"; modes.len()].join(", ");
                sql.push_str(&format!(" AND g.mode IN ({placeholders})"));
                for mode in modes.iter() {
                    params.push(Box::new(mode.code()));
                }
            }
        }
    }

    if let Some(filter) = &query.filter {
        sql.push_str(
            " AND (r.address LIKE ? ESCAPE '\\' OR COALESCE(r.display_name, '') LIKE ? ESCAPE '\\')",
        );
        let pattern = filter.like_pattern();
        params.push(Box::new(pattern.clone()));
        params.push(Box::new(pattern));
    }

    if let Some(clause) = pin.clause() {
        sql.push_str(" AND ");
        sql.push_str(clause);
    }

    (sql, params)
}

const FROM_JOINED: &str = "
    FROM threads t
    LEFT JOIN recipients r ON r.id = t.recipient_id
    LEFT JOIN groups g ON g.fid = t.group_fid";

impl Database {
    /// Number of rows a partition window would contain
    pub fn count_partition(&self, query: &ListQuery, pin: PinFilter) -> Result<usize> {
        let (filter, params) = where_clause(query, pin);
        let sql = format!("SELECT COUNT(*) {FROM_JOINED}{filter}");

        let conn = self.conn()?;
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, params_refs.as_slice(), |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Ordered, offset-limited rows of a partition window
    pub fn fetch_partition_window(
        &self,
        query: &ListQuery,
        pin: PinFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ThreadRow>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let (filter, mut params) = where_clause(query, pin);
        let sql = format!(
            "SELECT {THREAD_COLUMNS}, {RECIPIENT_COLUMNS}, {GROUP_COLUMNS} {FROM_JOINED}{filter} ORDER BY {} LIMIT ? OFFSET ?",
            pin.order_by()
        );
        params.push(Box::new(limit as i64));
        params.push(Box::new(offset as i64));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let rows = stmt
            .query_map(params_refs.as_slice(), Self::row_to_thread_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Threads in a partition with at least one unread message
    pub fn count_unread(&self, query: &ListQuery) -> Result<usize> {
        let (filter, params) = where_clause(query, PinFilter::Any);
        let sql = format!("SELECT COUNT(*) {FROM_JOINED}{filter} AND t.unread_count > 0");

        let conn = self.conn()?;
        let params_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count: i64 = conn.query_row(&sql, params_refs.as_slice(), |row| row.get(0))?;
        Ok(count as usize)
    }

    fn row_to_thread_row(row: &Row) -> rusqlite::Result<ThreadRow> {
        let summary = Self::row_to_thread(row)?;

        // LEFT JOINs: a missing side shows up as a NULL key
        let recipient = match row.get::<_, Option<i64>>("r_id")? {
            Some(_) => Some(Self::row_to_recipient(row)?),
            None => None,
        };
        let group = match row.get::<_, Option<i64>>("g_fid")? {
            Some(_) => Some(Self::row_to_group(row)?),
            None => None,
        };

        Ok(ThreadRow {
            summary,
            recipient,
            group,
        })
    }
}

impl ConversationStore for Database {
    fn count_total(&self, query: &ListQuery) -> Result<usize> {
        self.count_partition(query, PinFilter::Any)
    }

    fn count_pinned(&self, query: &ListQuery) -> Result<usize> {
        self.count_partition(query, PinFilter::Pinned)
    }

    fn fetch_window(
        &self,
        query: &ListQuery,
        pin: PinFilter,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ThreadRow>> {
        let started = std::time::Instant::now();
        let rows = self.fetch_partition_window(query, pin, offset, limit)?;
        tracing::trace!(
            predicate = ?query.predicate,
            filter = query.filter.as_ref().map(|f| f.term()),
            ?pin,
            offset,
            limit,
            returned = rows.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "Fetched window"
        );
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::{GroupMode, Partition, RecipientFilter};
    use crate::types::*;
    use chrono::{Duration, Utc};

    fn open_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        db
    }

    /// Creates a group in `mode` with one thread, `minutes_ago` old
    fn create_group_thread(db: &Database, fid: i64, mode: GroupMode, minutes_ago: i64) -> ThreadId {
        let cname = format!("group-{fid}");
        let recipient = db
            .upsert_recipient(&cname, Some(&cname), RecipientKind::Group)
            .unwrap();
        let mut group = GroupRecord::new(fid, cname, mode);
        group.recipient_id = Some(recipient);
        db.upsert_group(&group).unwrap();
        db.record_thread_event(
            &ThreadEvent::message(recipient, format!("msg {fid}"))
                .at(Utc::now() - Duration::minutes(minutes_ago))
                .in_group(fid),
        )
        .unwrap()
    }

    fn ids(rows: &[ThreadRow]) -> Vec<ThreadId> {
        rows.iter().map(|r| r.summary.thread_id).collect()
    }

    #[test]
    fn test_counts_follow_partition_table() {
        let db = open_db();
        create_group_thread(&db, 1, GroupMode::JoinAccepted, 1);
        create_group_thread(&db, 2, GroupMode::LeaveNotConfirmed, 2);
        create_group_thread(&db, 3, GroupMode::Invitation, 3);
        create_group_thread(&db, 4, GroupMode::LeaveAccepted, 4);
        create_group_thread(&db, 5, GroupMode::Uninvited, 5);
        let archived = create_group_thread(&db, 6, GroupMode::JoinAccepted, 6);
        db.set_archived(&[archived], true).unwrap();

        let count = |p: Partition| db.count_total(&p.query()).unwrap();
        assert_eq!(count(Partition::Open), 2);
        assert_eq!(count(Partition::Invited), 1);
        assert_eq!(count(Partition::Left), 1);
        assert_eq!(count(Partition::Guardian), 0);
        assert_eq!(count(Partition::Archived), 1);
        assert_eq!(db.count_archived().unwrap(), 1);
    }

    #[test]
    fn test_guardian_fences_leave_mode_partitions() {
        let db = open_db();
        let recipient = db
            .upsert_recipient("guardian", None, RecipientKind::Group)
            .unwrap();
        let mut group = GroupRecord::new(9, "guardian", GroupMode::JoinAccepted);
        group.group_type = GroupType::Guardian;
        db.upsert_group(&group).unwrap();
        db.record_thread_event(&ThreadEvent::message(recipient, "hello").in_group(9))
            .unwrap();

        assert_eq!(db.count_total(&Partition::Guardian.query()).unwrap(), 1);
        assert_eq!(db.count_total(&Partition::Open.query()).unwrap(), 0);
    }

    #[test]
    fn test_threads_without_group_are_unlisted() {
        let db = open_db();
        let recipient = db
            .upsert_recipient("solo", None, RecipientKind::Individual)
            .unwrap();
        let thread = db
            .record_thread_event(&ThreadEvent::message(recipient, "hi"))
            .unwrap();

        for partition in [Partition::Open, Partition::Invited, Partition::Left, Partition::Guardian] {
            assert_eq!(db.count_total(&partition.query()).unwrap(), 0);
        }

        db.set_archived(&[thread], true).unwrap();
        assert_eq!(db.count_archived().unwrap(), 1);
    }

    #[test]
    fn test_window_ordering() {
        let db = open_db();
        let old = create_group_thread(&db, 1, GroupMode::JoinAccepted, 30);
        let mid = create_group_thread(&db, 2, GroupMode::JoinAccepted, 20);
        let new = create_group_thread(&db, 3, GroupMode::JoinAccepted, 10);
        let newest = create_group_thread(&db, 4, GroupMode::JoinAccepted, 0);
        db.pin_threads(&[mid, old]).unwrap();

        let query = Partition::Open.query();
        let pinned = db.fetch_window(&query, PinFilter::Pinned, 0, 10).unwrap();
        assert_eq!(ids(&pinned), vec![mid, old]);

        let unpinned = db.fetch_window(&query, PinFilter::Unpinned, 0, 10).unwrap();
        assert_eq!(ids(&unpinned), vec![newest, new]);

        let any = db.fetch_window(&query, PinFilter::Any, 1, 2).unwrap();
        assert_eq!(ids(&any), vec![new, mid]);

        assert_eq!(db.count_pinned(&query).unwrap(), 2);
        assert!(db.fetch_window(&query, PinFilter::Any, 0, 0).unwrap().is_empty());
        assert!(db.fetch_window(&query, PinFilter::Any, 10, 5).unwrap().is_empty());
    }

    #[test]
    fn test_equal_timestamps_break_ties_by_id() {
        let db = open_db();
        let at = Utc::now();
        let mut threads = vec![];
        for fid in 1..=3 {
            let cname = format!("tie-{fid}");
            let recipient = db
                .upsert_recipient(&cname, None, RecipientKind::Group)
                .unwrap();
            db.upsert_group(&GroupRecord::new(fid, cname, GroupMode::JoinAccepted))
                .unwrap();
            threads.push(
                db.record_thread_event(&ThreadEvent::message(recipient, "x").at(at).in_group(fid))
                    .unwrap(),
            );
        }

        let rows = db
            .fetch_window(&Partition::Open.query(), PinFilter::Any, 0, 10)
            .unwrap();
        threads.reverse();
        assert_eq!(ids(&rows), threads);
    }

    #[test]
    fn test_rows_carry_joined_attributes() {
        let db = open_db();
        create_group_thread(&db, 7, GroupMode::Invitation, 1);

        let rows = db
            .fetch_window(&Partition::Invited.query(), PinFilter::Any, 0, 1)
            .unwrap();
        let row = &rows[0];
        assert_eq!(row.summary.group_fid, Some(7));
        assert_eq!(row.group.as_ref().unwrap().cname, "group-7");
        assert_eq!(row.group.as_ref().unwrap().mode, GroupMode::Invitation);
        assert_eq!(row.recipient.as_ref().unwrap().address, "group-7");
    }

    #[test]
    fn test_count_unread() {
        let db = open_db();
        let recipient = db
            .upsert_recipient("loud", None, RecipientKind::Group)
            .unwrap();
        db.upsert_group(&GroupRecord::new(1, "loud", GroupMode::JoinAccepted))
            .unwrap();
        let thread = db
            .record_thread_event(&ThreadEvent::message(recipient, "ping").in_group(1).unread())
            .unwrap();
        create_group_thread(&db, 2, GroupMode::JoinAccepted, 1);

        let query = Partition::Open.query();
        assert_eq!(db.count_unread(&query).unwrap(), 1);

        db.mark_read(thread).unwrap();
        assert_eq!(db.count_unread(&query).unwrap(), 0);
    }

    #[test]
    fn test_recipient_filter_narrows_partition() {
        let db = open_db();
        let named = |fid: i64, address: &str, name: Option<&str>, mode: GroupMode| {
            let recipient = db
                .upsert_recipient(address, name, RecipientKind::Group)
                .unwrap();
            db.upsert_group(&GroupRecord::new(fid, address, mode)).unwrap();
            db.record_thread_event(
                &ThreadEvent::message(recipient, "x")
                    .at(Utc::now() - Duration::minutes(fid))
                    .in_group(fid),
            )
            .unwrap()
        };
        let climbing = named(1, "climb@fence", Some("Climbing Crew"), GroupMode::JoinAccepted);
        let gym = named(2, "gym@fence", Some("Climbing gym"), GroupMode::JoinAccepted);
        named(3, "books@fence", None, GroupMode::JoinAccepted);
        named(4, "climb-invite@fence", None, GroupMode::Invitation);
        named(5, "100%@fence", None, GroupMode::JoinAccepted);

        let open = |term: &str| {
            Partition::Open
                .query()
                .filtered(RecipientFilter::new(term))
        };

        // display name match is case-insensitive, address match too
        let query = open("CLIMB");
        assert_eq!(db.count_total(&query).unwrap(), 2);
        let rows = db.fetch_window(&query, PinFilter::Any, 0, 10).unwrap();
        assert_eq!(ids(&rows), vec![climbing, gym]);

        // the partition still applies
        let invited = Partition::Invited
            .query()
            .filtered(RecipientFilter::new("climb"));
        assert_eq!(db.count_total(&invited).unwrap(), 1);

        // wildcards in the term are literal
        assert_eq!(db.count_total(&open("0%")).unwrap(), 1);
        assert_eq!(db.count_total(&open("%")).unwrap(), 1);
        assert_eq!(db.count_total(&open("nobody")).unwrap(), 0);

        // a blank term filters nothing
        assert_eq!(db.count_total(&open(" ")).unwrap(), 4);

        db.pin_threads(&[gym]).unwrap();
        assert_eq!(db.count_pinned(&open("climb")).unwrap(), 1);
        assert_eq!(db.count_unread(&open("climb")).unwrap(), 0);
    }
}
