//! Event router: decode, buffer, merge and notify, one event at a time.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use hidwatch_core::{
    decode, tag_name, BoundedBuffer, DecodeError, Decoded, EventTag, JobEvent, JobEventKind, JobId, JobState,
    LogRecord, RawEvent, RunningJob,
};
use metrics::{counter, gauge};
use tracing::{debug, warn};

use crate::config::{ConfigError, IngestConfig};
use crate::jobs::JobStateStore;
use crate::notify::{Notification, NotificationSink};
use crate::View;

/// What [`EventRouter::handle`] did with an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Log,
    Job { kind: JobEventKind, job_id: JobId, notified: bool },
    Malformed(DecodeError),
    Unhandled(EventTag),
}

/// Sole writer of the job table and both history buffers.
pub struct EventRouter {
    jobs: JobStateStore,
    logs: BoundedBuffer<LogRecord>,
    events: BoundedBuffer<JobEvent>,
    sink: Arc<dyn NotificationSink>,
    notify_timeout: Duration,
}

impl EventRouter {
    pub fn new(cfg: &IngestConfig, sink: Arc<dyn NotificationSink>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        Ok(Self {
            jobs: JobStateStore::new(),
            logs: BoundedBuffer::new(cfg.log_cap)?,
            events: BoundedBuffer::new(cfg.event_cap)?,
            sink,
            notify_timeout: cfg.notify_timeout,
        })
    }

    pub fn jobs(&self) -> &JobStateStore { &self.jobs }
    pub fn logs(&self) -> &BoundedBuffer<LogRecord> { &self.logs }
    pub fn events(&self) -> &BoundedBuffer<JobEvent> { &self.events }

    /// Process one raw event. Never fails: malformed and unhandled events are
    /// dropped with a diagnostic and leave all state untouched.
    pub fn handle(&mut self, raw: &RawEvent) -> Outcome {
        match decode(raw) {
            Ok(Decoded::Log(rec)) => {
                counter!("hidwatch_events_total", 1u64, "kind" => "log");
                let dropped = self.logs.push(rec);
                if dropped > 0 {
                    counter!("hidwatch_buffer_evicted_total", dropped as u64, "buffer" => "log");
                }
                Outcome::Log
            }
            Ok(Decoded::Job(ev)) => {
                counter!("hidwatch_events_total", 1u64, "kind" => "hid");
                self.handle_job(ev)
            }
            Err(DecodeError::UnhandledEventTag(tag)) => {
                counter!("hidwatch_events_unhandled_total", 1u64);
                debug!(tag, name = tag_name(tag), values = raw.values.len(), "unhandled event tag");
                Outcome::Unhandled(tag)
            }
            Err(e) => {
                counter!("hidwatch_events_malformed_total", 1u64, "kind" => e.kind());
                warn!(error = %e, tag = raw.tag, values = raw.values.len(), "dropping malformed event");
                Outcome::Malformed(e)
            }
        }
    }

    fn handle_job(&mut self, ev: JobEvent) -> Outcome {
        let (kind, job_id) = (ev.kind, ev.job_id);
        let notification = Notification::for_job_event(&ev, self.notify_timeout);
        if !self.jobs.upsert_from_event(&ev) {
            debug!(job_id, vm_id = ev.vm_id, kind = %kind, "job event without state update");
        }
        let dropped = self.events.push(ev);
        if dropped > 0 {
            counter!("hidwatch_buffer_evicted_total", dropped as u64, "buffer" => "hid");
        }
        gauge!("hidwatch_jobs_tracked", self.jobs.len() as f64);
        let notified = match notification {
            Some(n) => {
                counter!("hidwatch_notifications_total", 1u64, "outcome" => kind.to_string());
                self.sink.notify(n);
                true
            }
            None => false,
        };
        debug!(job_id, kind = %kind, notified, "job event applied");
        Outcome::Job { kind, job_id, notified }
    }

    /// Seed entries for jobs that were already running before the stream attached.
    pub fn seed(&mut self, running: &[RunningJob]) -> usize {
        for j in running {
            self.jobs.upsert_from_snapshot(j.id, j.vm_id, &j.script_source);
        }
        gauge!("hidwatch_jobs_tracked", self.jobs.len() as f64);
        debug!(count = running.len(), tracked = self.jobs.len(), "seeded running jobs");
        running.len()
    }

    pub fn delete(&mut self, id: JobId) -> Option<JobState> {
        let removed = self.jobs.delete(id);
        gauge!("hidwatch_jobs_tracked", self.jobs.len() as f64);
        removed
    }

    /// Immutable copy of the current state for readers.
    pub fn view(&self, epoch: u64) -> View {
        View { epoch, jobs: self.jobs.to_map(), logs: self.logs.to_vec(), events: self.events.to_vec() }
    }
}
