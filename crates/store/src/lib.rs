//! hidwatch store: job-state table, event router and the ordered ingest loop.

#![forbid(unsafe_code)]

pub mod config;
pub mod feed;
pub mod jobs;
pub mod notify;
pub mod router;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use hidwatch_core::{JobEvent, JobId, JobState, LogRecord, RawEvent, RunningJob};
use metrics::histogram;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub use config::{ConfigError, IngestConfig};
pub use feed::{forward, seed, SnapshotService, StaticSnapshot};
pub use jobs::JobStateStore;
pub use notify::{ChannelSink, Notification, NotificationKind, NotificationSink, NullSink, TracingSink};
pub use router::{EventRouter, Outcome};

/// Upper bound on commands applied between two view publishes.
const MAX_BATCH: usize = 256;

/// Commands accepted by the ingest loop, applied strictly in arrival order.
#[derive(Debug, Clone)]
pub enum Ingest {
    Event(RawEvent),
    Seed(Vec<RunningJob>),
    Delete(JobId),
}

pub type IngestSender = mpsc::Sender<Ingest>;

/// Published, immutable state for readers.
#[derive(Debug, Clone, Default, Serialize)]
pub struct View {
    pub epoch: u64,
    #[serde(serialize_with = "jobs_by_id")]
    pub jobs: FxHashMap<JobId, JobState>,
    /// Oldest first.
    pub logs: Vec<LogRecord>,
    /// Oldest first.
    pub events: Vec<JobEvent>,
}

fn jobs_by_id<S: serde::Serializer>(jobs: &FxHashMap<JobId, JobState>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_map(jobs.iter().collect::<BTreeMap<_, _>>())
}

impl View {
    pub fn job(&self, id: JobId) -> Option<&JobState> { self.jobs.get(&id) }

    /// Jobs ordered by id, for stable listings.
    pub fn jobs_sorted(&self) -> Vec<&JobState> {
        let mut v: Vec<&JobState> = self.jobs.values().collect();
        v.sort_by_key(|j| j.id);
        v
    }
}

impl EventRouter {
    fn apply(&mut self, cmd: Ingest) {
        match cmd {
            Ingest::Event(raw) => {
                self.handle(&raw);
            }
            Ingest::Seed(running) => {
                self.seed(&running);
            }
            Ingest::Delete(id) => {
                if self.delete(id).is_none() {
                    debug!(job_id = id, "delete for unknown job");
                }
            }
        }
    }
}

/// Handle for readers to access the current view and subscribe to publishes.
#[derive(Clone)]
pub struct BackendHandle {
    snap: Arc<ArcSwap<View>>,
    epoch_rx: watch::Receiver<u64>,
}

impl BackendHandle {
    pub fn current(&self) -> Arc<View> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Resolves once the ingest loop has exited and its final view is published.
    pub async fn stopped(&self) {
        let mut rx = self.epoch_rx.clone();
        while rx.changed().await.is_ok() {}
    }
}

/// Spawn the ingest loop. Returns a sender for commands and a handle for reads.
///
/// A single task owns the [`EventRouter`]; commands are applied one at a time in
/// the order they were enqueued. After draining what is immediately available
/// (at most `MAX_BATCH`), a new [`View`] is swapped in and the epoch bumped.
pub fn spawn_ingest(
    cfg: IngestConfig,
    sink: Arc<dyn NotificationSink>,
) -> Result<(IngestSender, BackendHandle), ConfigError> {
    let mut router = EventRouter::new(&cfg, sink)?;
    let (tx, mut rx) = mpsc::channel::<Ingest>(cfg.queue_cap);
    let snap = Arc::new(ArcSwap::from_pointee(View::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut epoch = 0u64;
        while let Some(first) = rx.recv().await {
            let started = Instant::now();
            router.apply(first);
            let mut applied = 1usize;
            while applied < MAX_BATCH {
                match rx.try_recv() {
                    Ok(cmd) => {
                        router.apply(cmd);
                        applied += 1;
                    }
                    Err(_) => break,
                }
            }
            epoch = epoch.saturating_add(1);
            snap_clone.store(Arc::new(router.view(epoch)));
            let _ = epoch_tx.send(epoch);
            histogram!("hidwatch_ingest_batch_ms", started.elapsed().as_secs_f64() * 1000.0);
            debug!(epoch, applied, "view published");
        }
        info!(epoch, "ingest loop stopped");
    });

    info!(log_cap = cfg.log_cap, event_cap = cfg.event_cap, queue_cap = cfg.queue_cap, "ingest loop started");
    Ok((tx, BackendHandle { snap, epoch_rx }))
}
