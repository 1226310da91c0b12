//! Keyed job-state table merged from snapshot rows and job events.

#![forbid(unsafe_code)]

use hidwatch_core::{JobEvent, JobEventKind, JobId, JobState, VmId};
use rustc_hash::FxHashMap;

/// Field values a job event writes; one pattern per lifecycle subtype.
struct Update<'a> {
    has_failed: bool,
    has_succeeded: bool,
    last_message: &'a str,
    text_result: &'a str,
    script_source: &'a str,
}

impl<'a> Update<'a> {
    fn for_event(ev: &'a JobEvent) -> Option<Self> {
        let u = match ev.kind {
            // The start event carries the script source in its message slot.
            JobEventKind::Started => Update {
                has_failed: false,
                has_succeeded: false,
                last_message: "Script started",
                text_result: "",
                script_source: &ev.message,
            },
            JobEventKind::Failed => Update {
                has_failed: true,
                has_succeeded: false,
                last_message: &ev.message,
                text_result: &ev.error,
                script_source: "",
            },
            JobEventKind::Succeeded => Update {
                has_failed: false,
                has_succeeded: true,
                last_message: &ev.message,
                text_result: &ev.result,
                script_source: "",
            },
            JobEventKind::Cancelled => Update {
                has_failed: true,
                has_succeeded: false,
                last_message: &ev.message,
                text_result: &ev.message,
                script_source: "",
            },
            JobEventKind::Other(_) => return None,
        };
        Some(u)
    }
}

/// Job id -> current state. Entries are only removed through [`JobStateStore::delete`].
#[derive(Debug, Clone, Default)]
pub struct JobStateStore {
    jobs: FxHashMap<JobId, JobState>,
}

impl JobStateStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize { self.jobs.len() }
    pub fn is_empty(&self) -> bool { self.jobs.is_empty() }

    pub fn get(&self, id: JobId) -> Option<&JobState> { self.jobs.get(&id) }

    /// Seed or refresh an entry from the running-jobs snapshot.
    /// Result, message and time fields of an existing entry are left alone.
    pub fn upsert_from_snapshot(&mut self, id: JobId, vm_id: VmId, script_source: &str) -> &JobState {
        let job = self.jobs.entry(id).or_insert_with(|| JobState::new(id, vm_id));
        job.vm_id = vm_id;
        if !script_source.is_empty() {
            job.script_source = script_source.to_string();
        }
        job
    }

    /// Apply a job event (last write wins, no transition checks).
    /// Returns `false` for subtypes that carry no state update.
    pub fn upsert_from_event(&mut self, ev: &JobEvent) -> bool {
        let Some(u) = Update::for_event(ev) else { return false };
        let job = self.jobs.entry(ev.job_id).or_insert_with(|| JobState::new(ev.job_id, ev.vm_id));
        job.vm_id = ev.vm_id;
        job.has_failed = u.has_failed;
        job.has_succeeded = u.has_succeeded;
        job.last_message = u.last_message.to_string();
        job.text_result = u.text_result.to_string();
        job.last_update_time = ev.time.clone();
        if !u.script_source.is_empty() {
            job.script_source = u.script_source.to_string();
        }
        true
    }

    pub fn delete(&mut self, id: JobId) -> Option<JobState> { self.jobs.remove(&id) }

    /// Copy of the table for readers.
    pub fn to_map(&self) -> FxHashMap<JobId, JobState> { self.jobs.clone() }
}
