// tests/queue_processing.rs

//! Queue ordering, budget accounting, and skip/retry/drop discipline.

mod common;

use common::*;
use chrono::{TimeZone, Utc};
use ntnsync::queue::{EntryKind, Priority, Queue, QueueEntry, QueuedPage};
use ntnsync::registry::ObjectRecord;
use ntnsync::{Crawler, Registry, SyncLimits};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

fn queued(id: &str, last_edited: &str) -> QueuedPage {
    QueuedPage {
        id: id.to_string(),
        last_edited: Some(last_edited.parse().unwrap()),
    }
}

fn drain_with(
    stub: &StubNotion,
    store: &ntnsync::Store,
    config: &ntnsync::Config,
    limits: &SyncLimits,
) -> ntnsync::SyncCounters {
    let crawler = Crawler::new(stub, store, config, Arc::new(AtomicBool::new(false))).unwrap();
    crawler.process_queue(limits, None).unwrap()
}

#[test]
fn test_webhook_entry_preempts_normal_backlog() {
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();

    let queue = Queue::new(&store);
    let mut tx = store.begin();
    for i in 0..3 {
        let id = format!("{i:032x}");
        stub.add_page(make_page(&id, &format!("Normal {i}"), workspace_parent(), "2024-05-01T00:00:00Z"));
        queue
            .create(
                &mut tx,
                &QueueEntry::with_pages(
                    EntryKind::Update,
                    "tech",
                    vec![queued(&id, "2024-05-01T00:00:00Z")],
                ),
                Priority::Normal,
            )
            .unwrap();
    }
    let hot_id = "ffffffffffffffffffffffffffffffff";
    stub.add_page(make_page(hot_id, "Hot Page", workspace_parent(), "2024-05-02T00:00:00Z"));
    queue
        .create(
            &mut tx,
            &QueueEntry::with_pages(
                EntryKind::Update,
                "tech",
                vec![queued(hot_id, "2024-05-02T00:00:00Z")],
            ),
            Priority::Webhook,
        )
        .unwrap();
    assert!(queue.list().unwrap().contains(&"00000999".to_string()));

    // One entry's worth of budget: the webhook entry must win
    let limits = SyncLimits {
        max_queue_files: 1,
        ..Default::default()
    };
    let counters = drain_with(&stub, &store, &config, &limits);
    assert_eq!(counters.queue_files_consumed, 1);
    assert!(Registry::new(&store).load(hot_id).unwrap().is_some());

    let names = queue.list().unwrap();
    assert_eq!(names.len(), 3);
    assert!(!names.contains(&"00000999".to_string()));
}

#[test]
fn test_consumed_budget_counts_deleted_entries() {
    // Regression: three entries holding only already-registered ids with
    // max_queue_files = 1 must leave exactly two entries behind.
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();
    let registry = Registry::new(&store);
    let queue = Queue::new(&store);
    let mut tx = store.begin();

    let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    for i in 0..3 {
        let id = format!("{i:032x}");
        registry
            .save(
                &mut tx,
                &ObjectRecord {
                    id: id.clone(),
                    last_edited: Some(stamp),
                    ..Default::default()
                },
            )
            .unwrap();
        // Queued time equals the stored time: not strictly newer, skipped
        queue
            .create(
                &mut tx,
                &QueueEntry::with_pages(
                    EntryKind::Update,
                    "tech",
                    vec![queued(&id, "2024-05-01T00:00:00Z")],
                ),
                Priority::Normal,
            )
            .unwrap();
    }

    let limits = SyncLimits {
        max_queue_files: 1,
        ..Default::default()
    };
    let counters = drain_with(&stub, &store, &config, &limits);

    assert_eq!(counters.queue_files_consumed, 1);
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.pages_processed, 0);
    assert_eq!(queue.list().unwrap().len(), 2);
}

#[test]
fn test_new_format_skip_requires_strictly_newer() {
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();
    let registry = Registry::new(&store);
    let queue = Queue::new(&store);
    let mut tx = store.begin();

    let stale_id = "aaaa0000aaaa0000aaaa0000aaaa0000";
    let fresh_id = "bbbb0000bbbb0000bbbb0000bbbb0000";
    let stored = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
    for id in [stale_id, fresh_id] {
        registry
            .save(
                &mut tx,
                &ObjectRecord {
                    id: id.to_string(),
                    last_edited: Some(stored),
                    ..Default::default()
                },
            )
            .unwrap();
        stub.add_page(make_page(id, "Page", workspace_parent(), "2024-06-01T00:00:00Z"));
    }

    queue
        .create(
            &mut tx,
            &QueueEntry::with_pages(
                EntryKind::Update,
                "tech",
                vec![
                    queued(stale_id, "2024-05-01T00:00:00Z"), // equal: skip
                    queued(fresh_id, "2024-06-01T00:00:00Z"), // newer: process
                ],
            ),
            Priority::Normal,
        )
        .unwrap();

    let counters = drain_with(&stub, &store, &config, &SyncLimits::default());
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.pages_processed, 1);

    let stale = registry.load(stale_id).unwrap().unwrap();
    assert!(stale.last_synced.is_none());
    let fresh = registry.load(fresh_id).unwrap().unwrap();
    assert!(fresh.last_synced.is_some());
}

#[test]
fn test_legacy_init_skips_registered_unconditionally() {
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();
    let registry = Registry::new(&store);
    let queue = Queue::new(&store);
    let mut tx = store.begin();

    let known = "aaaa0000aaaa0000aaaa0000aaaa0000";
    let unknown = "bbbb0000bbbb0000bbbb0000bbbb0000";
    registry
        .save(
            &mut tx,
            &ObjectRecord {
                id: known.to_string(),
                ..Default::default()
            },
        )
        .unwrap();
    stub.add_page(make_page(known, "Known", workspace_parent(), "2024-05-01T00:00:00Z"));
    stub.add_page(make_page(unknown, "Unknown", workspace_parent(), "2024-05-01T00:00:00Z"));

    queue
        .create(
            &mut tx,
            &QueueEntry {
                kind: EntryKind::Init,
                folder: "tech".to_string(),
                page_ids: Some(vec![known.to_string(), unknown.to_string()]),
                ..Default::default()
            },
            Priority::Normal,
        )
        .unwrap();

    let counters = drain_with(&stub, &store, &config, &SyncLimits::default());
    assert_eq!(counters.skipped, 1);
    assert_eq!(counters.pages_processed, 1);
    assert!(registry.load(unknown).unwrap().unwrap().last_synced.is_some());
}

#[test]
fn test_legacy_update_processes_unconditionally() {
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();
    let registry = Registry::new(&store);
    let queue = Queue::new(&store);
    let mut tx = store.begin();

    let known = "aaaa0000aaaa0000aaaa0000aaaa0000";
    registry
        .save(
            &mut tx,
            &ObjectRecord {
                id: known.to_string(),
                last_edited: Some(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()),
                ..Default::default()
            },
        )
        .unwrap();
    stub.add_page(make_page(known, "Old but forced", workspace_parent(), "2024-05-01T00:00:00Z"));

    queue
        .create(
            &mut tx,
            &QueueEntry {
                kind: EntryKind::Update,
                folder: "tech".to_string(),
                page_ids: Some(vec![known.to_string()]),
                ..Default::default()
            },
            Priority::Normal,
        )
        .unwrap();

    let counters = drain_with(&stub, &store, &config, &SyncLimits::default());
    assert_eq!(counters.skipped, 0);
    assert_eq!(counters.pages_processed, 1);
}

#[test]
fn test_transient_error_keeps_id_queued() {
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();
    let queue = Queue::new(&store);
    let mut tx = store.begin();

    let flaky = "aaaa0000aaaa0000aaaa0000aaaa0000";
    let good = "bbbb0000bbbb0000bbbb0000bbbb0000";
    stub.fail_with(flaky, 503, "service_unavailable");
    stub.add_page(make_page(good, "Fine", workspace_parent(), "2024-05-01T00:00:00Z"));

    queue
        .create(
            &mut tx,
            &QueueEntry::with_pages(
                EntryKind::Update,
                "tech",
                vec![
                    queued(flaky, "2024-05-01T00:00:00Z"),
                    queued(good, "2024-05-01T00:00:00Z"),
                ],
            ),
            Priority::Normal,
        )
        .unwrap();

    let counters = drain_with(&stub, &store, &config, &SyncLimits::default());
    assert_eq!(counters.dropped, 0);
    assert_eq!(counters.pages_processed, 1);

    // Entry rewritten in place with only the flaky id left
    let names = queue.list().unwrap();
    assert_eq!(names.len(), 1);
    let entry = queue.read(&names[0]).unwrap();
    let remaining = entry.pages.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, flaky);
    // Consumed: the entry was handled this pass, even though it survives
    assert_eq!(counters.queue_files_consumed, 1);
}

#[test]
fn test_folder_filter_passes_over_other_folders() {
    let (dir, store) = setup_store();
    let config = test_config(&dir);
    let stub = StubNotion::new();
    let queue = Queue::new(&store);
    let mut tx = store.begin();

    let work_id = "aaaa0000aaaa0000aaaa0000aaaa0000";
    let tech_id = "bbbb0000bbbb0000bbbb0000bbbb0000";
    stub.add_page(make_page(work_id, "Work Page", workspace_parent(), "2024-05-01T00:00:00Z"));
    stub.add_page(make_page(tech_id, "Tech Page", workspace_parent(), "2024-05-01T00:00:00Z"));
    queue
        .create(
            &mut tx,
            &QueueEntry::with_pages(EntryKind::Update, "work", vec![queued(work_id, "2024-05-01T00:00:00Z")]),
            Priority::Normal,
        )
        .unwrap();
    queue
        .create(
            &mut tx,
            &QueueEntry::with_pages(EntryKind::Update, "tech", vec![queued(tech_id, "2024-05-01T00:00:00Z")]),
            Priority::Normal,
        )
        .unwrap();

    let limits = SyncLimits {
        folder_filter: Some("tech".to_string()),
        ..Default::default()
    };
    let counters = drain_with(&stub, &store, &config, &limits);

    assert_eq!(counters.pages_processed, 1);
    assert!(Registry::new(&store).load(tech_id).unwrap().is_some());
    assert!(Registry::new(&store).load(work_id).unwrap().is_none());
    // The work entry was passed over, not consumed
    assert_eq!(queue.list().unwrap().len(), 1);
}
