//! Collaborator seams: the running-jobs snapshot query and the event transport.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use futures::{Stream, StreamExt};
use hidwatch_core::{RawEvent, RunningJob};
use tracing::{info, warn};

use crate::{Ingest, IngestSender};

/// One-shot query for jobs that are running right now.
#[async_trait::async_trait]
pub trait SnapshotService: Send + Sync {
    async fn running_jobs(&self) -> Result<Vec<RunningJob>>;
}

/// Fixed snapshot, e.g. loaded from a file or built in tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot {
    jobs: Vec<RunningJob>,
}

impl StaticSnapshot {
    pub fn new(jobs: Vec<RunningJob>) -> Self { Self { jobs } }

    /// Parse a JSON array of `{"id", "vmId", "scriptSource"}` rows.
    pub fn from_json(s: &str) -> Result<Self> {
        let jobs: Vec<RunningJob> = serde_json::from_str(s).context("parsing running jobs snapshot")?;
        Ok(Self { jobs })
    }
}

#[async_trait::async_trait]
impl SnapshotService for StaticSnapshot {
    async fn running_jobs(&self) -> Result<Vec<RunningJob>> { Ok(self.jobs.clone()) }
}

/// Fetch the snapshot once and enqueue it for seeding. Returns the row count.
pub async fn seed(service: &dyn SnapshotService, tx: &IngestSender) -> Result<usize> {
    let jobs = service.running_jobs().await.context("fetching running jobs")?;
    let n = jobs.len();
    tx.send(Ingest::Seed(jobs)).await.map_err(|_| anyhow::anyhow!("ingest queue closed"))?;
    info!(count = n, "running jobs snapshot enqueued");
    Ok(n)
}

/// Forward transport events into the ingest queue in delivery order.
/// Stops at stream end or when the queue is closed; returns the number forwarded.
pub async fn forward<S>(stream: S, tx: &IngestSender) -> usize
where
    S: Stream<Item = RawEvent>,
{
    futures::pin_mut!(stream);
    let mut forwarded = 0usize;
    while let Some(ev) = stream.next().await {
        if tx.send(Ingest::Event(ev)).await.is_err() {
            warn!(forwarded, "ingest queue closed; stopping event forward");
            return forwarded;
        }
        forwarded += 1;
    }
    info!(forwarded, "event stream ended");
    forwarded
}
