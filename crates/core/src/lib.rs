//! hidwatch core types: raw stream events, decoded records and job state.

#![forbid(unsafe_code)]

pub mod buffer;
pub mod decode;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

pub use buffer::{BoundedBuffer, BufferError};
pub use decode::{decode, DecodeError, Decoded, Mismatch};

pub type EventTag = i64;
pub type JobId = i64;
pub type VmId = i64;

// Event type tags as emitted by the device's event service.
pub const EVT_ANY: EventTag = 0;
pub const EVT_LOG: EventTag = 1;
pub const EVT_DHCP: EventTag = 2;
pub const EVT_ARP: EventTag = 3;
pub const EVT_HID: EventTag = 4;
pub const EVT_TRIGGER: EventTag = 5;

/// Human readable name for an event tag (for diagnostics only).
pub fn tag_name(tag: EventTag) -> &'static str {
    match tag {
        EVT_ANY => "any",
        EVT_LOG => "log",
        EVT_DHCP => "dhcp",
        EVT_ARP => "arp",
        EVT_HID => "hid",
        EVT_TRIGGER => "trigger",
        _ => "unknown",
    }
}

/// Scalar kinds a raw event value can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Int64,
    Str,
    Bool,
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ValueKind::Int64 => "int64",
            ValueKind::Str => "string",
            ValueKind::Bool => "bool",
        })
    }
}

/// Untyped scalar as delivered by the transport.
///
/// Serialized untagged, so a captured stream line reads `[0, 2, 5, false, "", ...]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Int64(i64),
    Str(String),
}

impl EventValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            EventValue::Bool(_) => ValueKind::Bool,
            EventValue::Int64(_) => ValueKind::Int64,
            EventValue::Str(_) => ValueKind::Str,
        }
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self { EventValue::Int64(v) }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self { EventValue::Bool(v) }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self { EventValue::Str(v.to_string()) }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self { EventValue::Str(v) }
}

/// A tagged event record exactly as received from the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub tag: EventTag,
    #[serde(default)]
    pub values: SmallVec<[EventValue; 8]>,
}

impl RawEvent {
    pub fn new<I, V>(tag: EventTag, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<EventValue>,
    {
        Self { tag, values: values.into_iter().map(Into::into).collect() }
    }

    /// Parse one line of a captured event stream (`{"type":4,"values":[...]}`).
    pub fn from_json(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// A log line pushed by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source: String,
    pub level: i64,
    pub message: String,
    pub time: String,
}

/// Lifecycle subtype carried in the first slot of a HID event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Started,
    Failed,
    Succeeded,
    Cancelled,
    /// A subtype code this client does not act on. Kept in the event
    /// history but never applied to job state.
    Other(i64),
}

impl JobEventKind {
    pub const STARTED: i64 = 0;
    pub const FAILED: i64 = 1;
    pub const SUCCEEDED: i64 = 2;
    pub const CANCELLED: i64 = 3;

    pub fn from_code(code: i64) -> Self {
        match code {
            Self::STARTED => JobEventKind::Started,
            Self::FAILED => JobEventKind::Failed,
            Self::SUCCEEDED => JobEventKind::Succeeded,
            Self::CANCELLED => JobEventKind::Cancelled,
            other => JobEventKind::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            JobEventKind::Started => Self::STARTED,
            JobEventKind::Failed => Self::FAILED,
            JobEventKind::Succeeded => Self::SUCCEEDED,
            JobEventKind::Cancelled => Self::CANCELLED,
            JobEventKind::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobEventKind::Started => f.write_str("started"),
            JobEventKind::Failed => f.write_str("failed"),
            JobEventKind::Succeeded => f.write_str("succeeded"),
            JobEventKind::Cancelled => f.write_str("cancelled"),
            JobEventKind::Other(code) => write!(f, "other({})", code),
        }
    }
}

/// A HID script job lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub vm_id: VmId,
    pub job_id: JobId,
    pub has_error: bool,
    pub result: String,
    pub error: String,
    /// Status text; for `Started` this slot carries the script source.
    pub message: String,
    pub time: String,
}

/// Client-side view of one job, merged from snapshot rows and job events.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub id: JobId,
    pub vm_id: VmId,
    pub has_failed: bool,
    pub has_succeeded: bool,
    pub last_message: String,
    pub text_result: String,
    /// Server timestamp of the last applied event, verbatim.
    pub last_update_time: String,
    pub script_source: String,
}

impl JobState {
    pub fn new(id: JobId, vm_id: VmId) -> Self {
        Self { id, vm_id, ..Default::default() }
    }
}

/// One row of the running-jobs snapshot query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningJob {
    pub id: JobId,
    pub vm_id: VmId,
    #[serde(default)]
    pub script_source: String,
}

pub mod prelude {
    pub use super::{
        decode, BoundedBuffer, BufferError, DecodeError, Decoded, EventTag, EventValue, JobEvent,
        JobEventKind, JobId, JobState, LogRecord, RawEvent, RunningJob, ValueKind, VmId, EVT_HID,
        EVT_LOG,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test-only accessor; the public `as_*` accessors were removed from the API.
    impl EventValue {
        fn as_str(&self) -> Option<&str> {
            match self {
                EventValue::Str(s) => Some(s),
                _ => None,
            }
        }
    }

    #[test]
    fn raw_event_parses_captured_line() {
        let ev = RawEvent::from_json(r#"{"type":4,"values":[0,2,5,false,"","","type('hi')","12:00"]}"#).unwrap();
        assert_eq!(ev.tag, EVT_HID);
        assert_eq!(ev.values.len(), 8);
        assert_eq!(ev.values[0], EventValue::Int64(0));
        assert_eq!(ev.values[3], EventValue::Bool(false));
        assert_eq!(ev.values[6].as_str(), Some("type('hi')"));
    }

    #[test]
    fn raw_event_without_values_is_empty() {
        let ev = RawEvent::from_json(r#"{"type":2}"#).unwrap();
        assert_eq!(ev.tag, EVT_DHCP);
        assert!(ev.values.is_empty());
    }

    #[test]
    fn job_kind_codes_roundtrip_and_unknown_is_other() {
        for k in [JobEventKind::Started, JobEventKind::Failed, JobEventKind::Succeeded, JobEventKind::Cancelled] {
            assert_eq!(JobEventKind::from_code(k.code()), k);
        }
        assert_eq!(JobEventKind::from_code(42), JobEventKind::Other(42));
    }

    #[test]
    fn job_state_serializes_camel_case() {
        let js = JobState { script_source: "x".into(), ..JobState::new(5, 2) };
        let v = serde_json::to_value(&js).unwrap();
        assert_eq!(v["vmId"], 2);
        assert_eq!(v["scriptSource"], "x");
        assert_eq!(v["hasSucceeded"], false);
    }
}
