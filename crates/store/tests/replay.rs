#![forbid(unsafe_code)]

use std::sync::Arc;

use hidwatch_core::{EventValue, JobEventKind, JobState, RawEvent, RunningJob, EVT_ARP, EVT_HID, EVT_LOG};
use hidwatch_store::{spawn_ingest, ChannelSink, Ingest, IngestConfig, NotificationKind};

fn hid(kind: i64, job: i64, result: &str, error: &str, message: &str, time: &str) -> RawEvent {
    RawEvent::new(
        EVT_HID,
        vec![
            EventValue::from(kind),
            2i64.into(),
            job.into(),
            false.into(),
            result.into(),
            error.into(),
            message.into(),
            time.into(),
        ],
    )
}

fn log(msg: &str) -> RawEvent {
    RawEvent::new(EVT_LOG, vec![EventValue::from("HIDScript"), 3i64.into(), msg.into(), "12:00".into()])
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn started_then_succeeded_through_ingest() {
    let (sink, mut notes) = ChannelSink::new();
    let (tx, backend) = spawn_ingest(IngestConfig::default(), Arc::new(sink)).unwrap();

    tx.send(Ingest::Event(hid(JobEventKind::STARTED, 5, "", "", "type('hi')", "12:00"))).await.unwrap();
    tx.send(Ingest::Event(hid(JobEventKind::SUCCEEDED, 5, "done", "", "OK", "12:01"))).await.unwrap();
    drop(tx);
    backend.stopped().await;

    let view = backend.current();
    assert_eq!(
        view.job(5).unwrap(),
        &JobState {
            id: 5,
            vm_id: 2,
            has_failed: false,
            has_succeeded: true,
            last_message: "OK".into(),
            text_result: "done".into(),
            last_update_time: "12:01".into(),
            script_source: "type('hi')".into(),
        }
    );
    assert_eq!(view.events.len(), 2);

    let n = notes.recv().await.unwrap();
    assert_eq!(n.detail, "done");
    assert_eq!(n.kind, NotificationKind::Positive);
    assert!(notes.try_recv().is_err(), "exactly one notification expected");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn events_apply_in_enqueue_order() {
    let (tx, backend) = spawn_ingest(IngestConfig::default(), Arc::new(hidwatch_store::NullSink)).unwrap();
    // Many jobs, each started then finished; ordering must hold for every id.
    for id in 0..200i64 {
        tx.send(Ingest::Event(hid(JobEventKind::STARTED, id, "", "", "src", "t0"))).await.unwrap();
        tx.send(Ingest::Event(hid(JobEventKind::FAILED, id, "", "e", "failed", "t1"))).await.unwrap();
    }
    drop(tx);
    backend.stopped().await;

    let view = backend.current();
    assert_eq!(view.jobs.len(), 200);
    for j in view.jobs.values() {
        assert!(j.has_failed, "job {} ended in wrong state", j.id);
        assert_eq!(j.last_update_time, "t1");
        assert_eq!(j.script_source, "src");
    }
    assert_eq!(view.events.len(), IngestConfig::default().event_cap);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_seed_then_stream() {
    let cfg = IngestConfig::default().with_max_entries(2);
    let (tx, backend) = spawn_ingest(cfg, Arc::new(hidwatch_store::NullSink)).unwrap();

    tx.send(Ingest::Seed(vec![RunningJob { id: 1, vm_id: 0, script_source: "layout('us')".into() }]))
        .await
        .unwrap();
    for m in ["r1", "r2", "r3"] {
        tx.send(Ingest::Event(log(m))).await.unwrap();
    }
    // malformed and unhandled events are dropped without side effects
    tx.send(Ingest::Event(RawEvent::new(EVT_LOG, vec![EventValue::from("src"), 1i64.into(), "msg".into()])))
        .await
        .unwrap();
    tx.send(Ingest::Event(RawEvent::new(EVT_ARP, vec![EventValue::from(1i64)]))).await.unwrap();
    tx.send(Ingest::Event(hid(JobEventKind::CANCELLED, 1, "", "", "cancelled", "12:05"))).await.unwrap();
    drop(tx);
    backend.stopped().await;

    let view = backend.current();
    let msgs: Vec<_> = view.logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(msgs, vec!["r2", "r3"]);
    let j = view.job(1).unwrap();
    assert!(j.has_failed && !j.has_succeeded);
    assert_eq!(j.text_result, "cancelled");
    assert_eq!(j.script_source, "layout('us')");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_goes_through_queue() {
    let (tx, backend) = spawn_ingest(IngestConfig::default(), Arc::new(hidwatch_store::NullSink)).unwrap();
    let mut epochs = backend.subscribe_epoch();
    tx.send(Ingest::Event(hid(JobEventKind::SUCCEEDED, 3, "ok", "", "", "t"))).await.unwrap();
    epochs.changed().await.unwrap();
    assert!(backend.current().job(3).is_some());

    tx.send(Ingest::Delete(3)).await.unwrap();
    drop(tx);
    backend.stopped().await;
    let view = backend.current();
    assert!(view.job(3).is_none());
    assert!(view.epoch >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn view_json_lists_jobs_in_id_order() {
    let (tx, backend) = spawn_ingest(IngestConfig::default(), Arc::new(hidwatch_store::NullSink)).unwrap();
    for id in [200i64, 3, 10, 7] {
        tx.send(Ingest::Event(hid(JobEventKind::STARTED, id, "", "", "src", "t"))).await.unwrap();
    }
    drop(tx);
    backend.stopped().await;

    let json = serde_json::to_string(&*backend.current()).unwrap();
    let at = |key: &str| json.find(key).unwrap_or_else(|| panic!("{key} missing in {json}"));
    assert!(at("\"3\":") < at("\"7\":"));
    assert!(at("\"7\":") < at("\"10\":"));
    assert!(at("\"10\":") < at("\"200\":"));
}

#[tokio::test]
async fn zero_capacity_fails_before_spawn() {
    let cfg = IngestConfig { queue_cap: 0, ..IngestConfig::default() };
    assert!(spawn_ingest(cfg, Arc::new(hidwatch_store::NullSink)).is_err());
}

#[tokio::test]
async fn oversized_queue_is_an_error_not_a_panic() {
    let cfg = IngestConfig { queue_cap: usize::MAX, ..IngestConfig::default() };
    assert!(matches!(
        spawn_ingest(cfg, Arc::new(hidwatch_store::NullSink)),
        Err(hidwatch_store::ConfigError::TooLarge { .. })
    ));
}
