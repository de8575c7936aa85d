//! Stuck-item recovery, batch liveness and the combined maintenance pass.

mod common;

use common::*;
use vigil::maintenance::Maintenance;
use vigil::SchedulerDecision;

fn maintenance(h: &TestHarness) -> Maintenance {
    Maintenance::from_config(h.db().clone(), h.orchestrator.config())
}

#[test]
fn test_three_item_batch_single_pass() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf", "b.pdf", "c.pdf"]);
    let items = h.orchestrator.batch_items(&batch).unwrap();

    start_batch(h.db(), &batch, &ago(600));
    heartbeat(h.db(), &batch, &ago(10));
    set_item_status(h.db(), items[0].id, "done", &ago(300));
    ResultBuilder::for_item(&items[0]).insert(h.db());
    set_item_status(h.db(), items[1].id, "running", &ago(120));

    let report = maintenance(&h).run().unwrap();

    assert_eq!(report.watchdog.items_reset, vec![items[1].id]);
    assert_eq!(report.watchdog.batches_requeued, vec![batch.clone()]);
    assert!(report.watchdog.batches_timed_out.is_empty());
    assert_eq!(report.reconcile.progress_updated, 1);

    assert_eq!(h.item_statuses(&batch), vec!["done", "pending", "pending"]);
    let row = h.orchestrator.batch(&batch).unwrap();
    assert_eq!(row.status, "queued");
    assert_eq!(row.progress, 1);
    assert_eq!(all_results(h.db()).len(), 1);

    let item = h.orchestrator.batch_items(&batch).unwrap().remove(1);
    assert!(item.message.contains("Watchdog"));

    let logs = h.orchestrator.batch_logs(&batch, 10).unwrap();
    assert!(logs
        .iter()
        .any(|l| l.level == "WARNING" && l.worker_id.as_deref() == Some("orchestrator")));
}

#[test]
fn test_stuck_item_exempt_with_heavy_work() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf"]);
    let item = h.item_ids(&batch)[0];

    start_batch(h.db(), &batch, &ago(600));
    heartbeat(h.db(), &batch, &ago(5));
    set_item_status(h.db(), item, "running", &ago(180));
    worker_log(h.db(), &batch, &ago(60), "Documents collected: 250");

    let report = maintenance(&h).run().unwrap();
    assert_eq!(report.watchdog.items_exempted, vec![item]);
    assert!(report.watchdog.items_reset.is_empty());
    assert_eq!(h.item_statuses(&batch), vec!["running"]);
    assert_eq!(h.batch_status(&batch), "running");
}

#[test]
fn test_recent_running_item_untouched() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf"]);
    let item = h.item_ids(&batch)[0];

    start_batch(h.db(), &batch, &ago(100));
    set_item_status(h.db(), item, "running", &ago(20));

    let report = maintenance(&h).run().unwrap();
    assert!(!report.watchdog.changed());
    assert_eq!(h.item_statuses(&batch), vec!["running"]);
}

#[test]
fn test_silent_batch_times_out() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf", "b.pdf", "c.pdf"]);
    let items = h.item_ids(&batch);

    start_batch(h.db(), &batch, &ago(1200));
    set_item_status(h.db(), items[0], "done", &ago(1100));
    set_item_status(h.db(), items[1], "running", &ago(1000));
    worker_log(h.db(), &batch, &ago(1000), "working on b.pdf");

    let report = maintenance(&h).run().unwrap();
    assert_eq!(report.watchdog.batches_timed_out, vec![batch.clone()]);
    assert!(report.watchdog.items_reset.is_empty());

    let row = h.orchestrator.batch(&batch).unwrap();
    assert_eq!(row.status, "error");
    assert!(row.completed_at.is_some());
    assert_eq!(h.item_statuses(&batch), vec!["done", "failed", "failed"]);

    // A failed batch is never picked up again by the scheduler.
    assert_eq!(h.orchestrator.launch_now().unwrap(), SchedulerDecision::Idle);
}

#[test]
fn test_heartbeat_keeps_batch_alive() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf"]);

    start_batch(h.db(), &batch, &ago(3600));
    heartbeat(h.db(), &batch, &ago(30));

    let report = maintenance(&h).run().unwrap();
    assert!(report.watchdog.batches_timed_out.is_empty());
    assert_eq!(h.batch_status(&batch), "running");
}

#[test]
fn test_orchestrator_entries_are_not_liveness() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf"]);
    start_batch(h.db(), &batch, &ago(3600));

    // Requeue/finalize logs are written by the orchestrator, not the worker.
    vigil::db::log_repo::append(
        h.db(),
        &vigil::db::log_repo::NewLogEntry::orchestrator(&ago(5), "INFO", "note").batch(&batch),
    )
    .unwrap();

    let report = maintenance(&h).run().unwrap();
    assert_eq!(report.watchdog.batches_timed_out, vec![batch]);
}

#[test]
fn test_stalled_launch_returns_to_queue() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf"]);
    set_batch_status(h.db(), &batch, "starting", &ago(600));

    let report = maintenance(&h).run().unwrap();
    assert_eq!(report.watchdog.launches_reverted, vec![batch.clone()]);
    assert_eq!(h.batch_status(&batch), "queued");
}

#[test]
fn test_requeue_failed_after_timeout() {
    let h = TestHarness::new();
    let batch = h.enqueue(&["a.pdf", "b.pdf"]);
    start_batch(h.db(), &batch, &ago(2000));
    maintenance(&h).run().unwrap();
    assert_eq!(h.batch_status(&batch), "error");

    let report = h.orchestrator.requeue_failed(&batch).unwrap();
    assert_eq!(report.requeued, 2);
    assert!(report.reopened);
    assert_eq!(h.batch_status(&batch), "queued");
    assert_eq!(h.item_statuses(&batch), vec!["pending", "pending"]);

    match h.orchestrator.launch_now().unwrap() {
        SchedulerDecision::Launched { batch_id, .. } => assert_eq!(batch_id, batch),
        other => panic!("expected relaunch, got {other:?}"),
    }
}
