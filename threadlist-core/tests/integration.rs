//! Integration tests for the paged conversation lists
//!
//! These tests drive the pagers end to end against an in-memory SQLite
//! store, covering page composition, partition membership across lifecycle
//! transitions and change notification.

use chrono::{Duration, Utc};
use std::sync::Arc;
use threadlist_core::config::PagerConfig;
use threadlist_core::recipients::CachedRecipient;
use threadlist_core::{
    Conversation, ConversationLists, Database, GroupChangePayload, GroupMode, GroupRecord,
    LifecycleEvent, PagedSource, Partition, RecipientId, RecipientKind, ThreadEvent, ThreadId,
};
use tokio_util::sync::CancellationToken;

fn open_db() -> Arc<Database> {
    threadlist_core::logging::init_test();
    let db = Database::open_in_memory().expect("failed to open db");
    db.migrate().expect("failed to migrate db");
    Arc::new(db)
}

fn lists(db: &Arc<Database>, config: &PagerConfig) -> ConversationLists {
    ConversationLists::new(db.clone(), db.clone(), config)
}

/// Create a group in `mode` with a single thread whose last message is
/// `minutes_ago` old.
fn seed_group(db: &Database, fid: i64, mode: GroupMode, minutes_ago: i64) -> ThreadId {
    let cname = format!("fence-{fid}");
    let recipient = db
        .upsert_recipient(&cname, Some(&format!("Fence {fid}")), RecipientKind::Group)
        .expect("recipient upsert");
    let mut group = GroupRecord::new(fid, cname, mode);
    group.recipient_id = Some(recipient);
    db.upsert_group(&group).expect("group upsert");
    db.record_thread_event(
        &ThreadEvent::message(recipient, format!("hello from {fid}"))
            .at(Utc::now() - Duration::minutes(minutes_ago))
            .in_group(fid),
    )
    .expect("thread event")
}

fn keys(page: &[Conversation]) -> Vec<ThreadId> {
    page.iter().map(Conversation::key).collect()
}

// ============================================
// Page composition
// ============================================

#[test]
fn test_pinned_and_unpinned_pages() {
    let db = open_db();
    let threads: Vec<ThreadId> = (1..=7)
        .map(|fid| seed_group(&db, fid, GroupMode::JoinAccepted, 100 - fid))
        .collect();
    // threads[6] is the most recent
    db.pin_threads(&[threads[0], threads[1]]).unwrap();

    let open = lists(&db, &PagerConfig::default()).pager(Partition::Open);
    let cancel = CancellationToken::new();

    assert_eq!(open.count().unwrap(), 9);
    assert_eq!(
        keys(&open.fetch(0, 3, &cancel).unwrap()),
        vec![ThreadId::PINNED_HEADER, threads[0], threads[1]]
    );
    assert_eq!(
        keys(&open.fetch(3, 3, &cancel).unwrap()),
        vec![ThreadId::UNPINNED_HEADER, threads[6], threads[5]]
    );
    assert_eq!(
        keys(&open.fetch(6, 3, &cancel).unwrap()),
        vec![threads[4], threads[3], threads[2]]
    );
}

#[test]
fn test_archived_footer_on_last_page() {
    let db = open_db();
    for fid in 1..=4 {
        seed_group(&db, fid, GroupMode::JoinAccepted, fid);
    }
    let archived: Vec<ThreadId> = (5..=7)
        .map(|fid| seed_group(&db, fid, GroupMode::JoinAccepted, fid))
        .collect();
    db.set_archived(&archived, true).unwrap();

    let mut config = PagerConfig::default();
    config.archived_footer.open = true;
    let open = lists(&db, &config).pager(Partition::Open);
    let cancel = CancellationToken::new();

    assert_eq!(open.count().unwrap(), 5);
    assert_eq!(
        open.fetch(4, 1, &cancel).unwrap(),
        vec![Conversation::ArchivedFooter { archived_count: 3 }]
    );
    assert!(!open
        .fetch(0, 4, &cancel)
        .unwrap()
        .iter()
        .any(Conversation::is_footer));

    let archive = lists(&db, &config).pager(Partition::Archived);
    assert_eq!(archive.count().unwrap(), 3);
}

#[test]
fn test_pages_concatenate_to_full_list() {
    let db = open_db();
    let threads: Vec<ThreadId> = (1..=11)
        .map(|fid| seed_group(&db, fid, GroupMode::JoinAccepted, fid * 3))
        .collect();
    db.pin_threads(&[threads[4], threads[9], threads[2]]).unwrap();
    let archived = seed_group(&db, 50, GroupMode::JoinAccepted, 1);
    db.set_archived(&[archived], true).unwrap();

    let mut config = PagerConfig::default();
    config.archived_footer.open = true;
    let open = lists(&db, &config).pager(Partition::Open);
    let cancel = CancellationToken::new();

    let total = open.count().unwrap();
    let full = open.fetch(0, total, &cancel).unwrap();
    assert_eq!(full.len(), total);

    for page_size in 1..=total {
        let mut pieced = Vec::new();
        let mut offset = 0;
        while offset < total {
            pieced.extend(open.fetch(offset, page_size, &cancel).unwrap());
            offset += page_size;
        }
        assert_eq!(keys(&pieced), keys(&full), "page size {page_size}");
    }

    let mut seen = std::collections::HashSet::new();
    assert!(full.iter().all(|item| seen.insert(open.key_of(item))));
}

#[test]
fn test_filtered_list_by_recipient() {
    let db = open_db();
    let first = seed_group(&db, 1, GroupMode::JoinAccepted, 30);
    let second = seed_group(&db, 2, GroupMode::JoinAccepted, 20);
    let twelfth = seed_group(&db, 12, GroupMode::JoinAccepted, 10);
    db.pin_threads(&[first]).unwrap();

    let mut config = PagerConfig::default();
    config.archived_footer.open = true;
    let lists = lists(&db, &config);
    let cancel = CancellationToken::new();

    // matches "Fence 1" and "Fence 12", newest first, pins ignored
    let found = lists.filtered_pager(Partition::Open, "fence 1");
    assert_eq!(found.count().unwrap(), 2);
    assert_eq!(
        keys(&found.fetch(0, 10, &cancel).unwrap()),
        vec![twelfth, first]
    );

    db.set_archived(&[second], true).unwrap();
    assert_eq!(
        keys(
            &lists
                .filtered_pager(Partition::Archived, "FENCE-2")
                .fetch(0, 10, &cancel)
                .unwrap()
        ),
        vec![second]
    );
    assert_eq!(
        lists
            .filtered_pager(Partition::Archived, "fence 1")
            .count()
            .unwrap(),
        0
    );

    // the unfiltered list keeps its sections and footer
    assert_eq!(lists.pager(Partition::Open).count().unwrap(), 5);
}

#[test]
fn test_page_warms_recipient_cache() {
    let db = open_db();
    let thread = seed_group(&db, 1, GroupMode::JoinAccepted, 1);
    let actor = db
        .upsert_recipient("+15550100", Some("Lin"), RecipientKind::Individual)
        .unwrap();
    let recipient = db.get_thread(thread).unwrap().unwrap().recipient_id;

    let payload = GroupChangePayload {
        actor: Some(actor),
        added: vec![RecipientId(9999)],
        ..Default::default()
    };
    db.record_thread_event(
        &ThreadEvent::message(recipient, "Lin added someone")
            .in_group(1)
            .group_update(&payload),
    )
    .unwrap();

    let lists = lists(&db, &PagerConfig::default());
    let page = lists
        .pager(Partition::Open)
        .fetch(0, 10, &CancellationToken::new())
        .unwrap();
    assert_eq!(page.len(), 1);

    let cache = lists.cache();
    assert_eq!(cache.get(actor).unwrap().label(), "Lin");
    assert!(matches!(
        cache.get(recipient),
        Some(CachedRecipient::Resolved(_))
    ));
    assert!(cache.get(RecipientId(9999)).unwrap().is_placeholder());
}

#[test]
fn test_cancelled_fetch_is_empty() {
    let db = open_db();
    seed_group(&db, 1, GroupMode::JoinAccepted, 1);

    let open = lists(&db, &PagerConfig::default()).pager(Partition::Open);
    let cancel = CancellationToken::new();
    cancel.cancel();
    assert!(open.fetch(0, 10, &cancel).unwrap().is_empty());
}

// ============================================
// Partition membership
// ============================================

#[test]
fn test_accepted_invitation_moves_to_open() {
    let db = open_db();
    let thread = seed_group(&db, 1, GroupMode::Invitation, 1);
    let lists = lists(&db, &PagerConfig::default());
    let cancel = CancellationToken::new();

    let invited = lists.pager(Partition::Invited);
    let open = lists.pager(Partition::Open);
    assert_eq!(keys(&invited.fetch(0, 10, &cancel).unwrap()), vec![thread]);
    assert!(open.fetch(0, 10, &cancel).unwrap().is_empty());

    let mode = db
        .apply_lifecycle_event(1, LifecycleEvent::InvitationAccepted)
        .unwrap();
    assert_eq!(mode, GroupMode::InvitationJoinAccepted);

    assert_eq!(invited.count().unwrap(), 0);
    assert_eq!(keys(&open.fetch(0, 10, &cancel).unwrap()), vec![thread]);
}

#[test]
fn test_server_join_moves_invitation_to_open() {
    let db = open_db();
    let thread = seed_group(&db, 1, GroupMode::Invitation, 1);
    let lists = lists(&db, &PagerConfig::default());
    let cancel = CancellationToken::new();

    let invited = lists.pager(Partition::Invited);
    let open = lists.pager(Partition::Open);
    assert_eq!(invited.count().unwrap(), 1);

    let mode = db
        .apply_lifecycle_event(1, LifecycleEvent::JoinAccepted)
        .unwrap();
    assert_eq!(mode, GroupMode::JoinAccepted);

    assert_eq!(invited.count().unwrap(), 0);
    assert_eq!(keys(&open.fetch(0, 10, &cancel).unwrap()), vec![thread]);

    // redelivery changes nothing
    assert_eq!(
        db.apply_lifecycle_event(1, LifecycleEvent::JoinAccepted)
            .unwrap(),
        GroupMode::JoinAccepted
    );
    assert_eq!(open.count().unwrap(), 1);
}

#[test]
fn test_every_thread_lands_in_one_partition() {
    let db = open_db();
    let mut expected = 0;
    for (fid, mode) in GroupMode::ALL.into_iter().enumerate() {
        seed_group(&db, fid as i64 + 1, mode, fid as i64);
        if mode.partition().is_some() {
            expected += 1;
        }
    }
    let archived = seed_group(&db, 100, GroupMode::Invitation, 0);
    db.set_archived(&[archived], true).unwrap();
    expected += 1;

    let lists = lists(&db, &PagerConfig::default());
    let cancel = CancellationToken::new();
    let mut seen = std::collections::HashSet::new();
    for partition in Partition::ALL {
        let pager = lists.pager(partition);
        let total = pager.count().unwrap();
        if total == 0 {
            continue;
        }
        for item in pager.fetch(0, total, &cancel).unwrap() {
            if let Some(summary) = item.summary() {
                assert!(
                    seen.insert(summary.thread_id),
                    "{} listed twice",
                    summary.thread_id
                );
            }
        }
    }
    assert_eq!(seen.len(), expected);
}

#[test]
fn test_unarchive_returns_thread_to_its_partition() {
    let db = open_db();
    let thread = seed_group(&db, 1, GroupMode::LeaveAccepted, 1);
    let lists = lists(&db, &PagerConfig::default());
    let left = lists.pager(Partition::Left);

    db.set_archived(&[thread], true).unwrap();
    assert_eq!(left.count().unwrap(), 0);

    db.set_archived(&[thread], false).unwrap();
    assert_eq!(left.count().unwrap(), 1);
}

// ============================================
// Change notification
// ============================================

#[test]
fn test_lifecycle_event_notifies_subscribers() {
    let db = open_db();
    seed_group(&db, 1, GroupMode::Invitation, 1);
    let mut changes = db.subscribe_changes();
    changes.borrow_and_update();

    db.apply_lifecycle_event(1, LifecycleEvent::InvitationAccepted)
        .unwrap();
    assert!(changes.has_changed().unwrap());
    changes.borrow_and_update();

    // a rejected transition writes nothing
    assert!(db
        .apply_lifecycle_event(1, LifecycleEvent::InviteWithdrawn)
        .is_err());
    assert!(!changes.has_changed().unwrap());
}

#[test]
fn test_database_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/threads.db");

    {
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        seed_group(&db, 1, GroupMode::JoinAccepted, 1);
    }

    let db = Arc::new(Database::open(&path).unwrap());
    db.migrate().unwrap();
    let open = lists(&db, &PagerConfig::default()).pager(Partition::Open);
    assert_eq!(open.count().unwrap(), 1);
}
