//! Event decoder: validates arity and value kinds once at the boundary and
//! turns a [`RawEvent`] into a typed [`LogRecord`] or [`JobEvent`].

#![forbid(unsafe_code)]

use crate::{EventTag, EventValue, JobEvent, JobEventKind, LogRecord, RawEvent, ValueKind, EVT_HID, EVT_LOG};

const LOG_ARITY: usize = 4;
const HID_ARITY: usize = 8;

/// Why a record did not match the expected layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mismatch {
    Tag { expected: EventTag, got: EventTag },
    Arity { expected: usize, got: usize },
    Kind { index: usize, expected: ValueKind, got: ValueKind },
}

impl std::fmt::Display for Mismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatch::Tag { expected, got } => write!(f, "tag {} (expected {})", got, expected),
            Mismatch::Arity { expected, got } => write!(f, "{} values (expected {})", got, expected),
            Mismatch::Kind { index, expected, got } => write!(f, "value {} is {} (expected {})", index, got, expected),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed log event: {0}")]
    MalformedLogEvent(Mismatch),
    #[error("malformed hid event: {0}")]
    MalformedHidEvent(Mismatch),
    /// Not a failure: the tag is valid on the stream but this decoder has no use for it.
    #[error("unhandled event tag {0}")]
    UnhandledEventTag(EventTag),
}

impl DecodeError {
    pub fn is_unhandled(&self) -> bool {
        matches!(self, DecodeError::UnhandledEventTag(_))
    }

    /// Short label for metrics/log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::MalformedLogEvent(_) => "log",
            DecodeError::MalformedHidEvent(_) => "hid",
            DecodeError::UnhandledEventTag(_) => "unhandled",
        }
    }
}

/// Successful decode result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Log(LogRecord),
    Job(JobEvent),
}

/// Decode a raw event by dispatching on its tag.
pub fn decode(raw: &RawEvent) -> Result<Decoded, DecodeError> {
    match raw.tag {
        EVT_LOG => LogRecord::try_from(raw).map(Decoded::Log),
        EVT_HID => JobEvent::try_from(raw).map(Decoded::Job),
        other => Err(DecodeError::UnhandledEventTag(other)),
    }
}

/// Positional reader over an arity-checked value list.
struct Fields<'a> {
    values: &'a [EventValue],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn expect(values: &'a [EventValue], arity: usize) -> Result<Self, Mismatch> {
        if values.len() != arity {
            return Err(Mismatch::Arity { expected: arity, got: values.len() });
        }
        Ok(Self { values, pos: 0 })
    }

    fn advance(&mut self) -> (usize, &'a EventValue) {
        let index = self.pos;
        self.pos += 1;
        (index, &self.values[index])
    }

    fn int64(&mut self) -> Result<i64, Mismatch> {
        match self.advance() {
            (_, EventValue::Int64(v)) => Ok(*v),
            (index, other) => Err(Mismatch::Kind { index, expected: ValueKind::Int64, got: other.kind() }),
        }
    }

    fn string(&mut self) -> Result<String, Mismatch> {
        match self.advance() {
            (_, EventValue::Str(v)) => Ok(v.clone()),
            (index, other) => Err(Mismatch::Kind { index, expected: ValueKind::Str, got: other.kind() }),
        }
    }

    fn boolean(&mut self) -> Result<bool, Mismatch> {
        match self.advance() {
            (_, EventValue::Bool(v)) => Ok(*v),
            (index, other) => Err(Mismatch::Kind { index, expected: ValueKind::Bool, got: other.kind() }),
        }
    }
}

fn log_record(values: &[EventValue]) -> Result<LogRecord, Mismatch> {
    let mut f = Fields::expect(values, LOG_ARITY)?;
    let source = f.string()?;
    let level = f.int64()?;
    let message = f.string()?;
    let time = f.string()?;
    Ok(LogRecord { source, level, message, time })
}

fn job_event(values: &[EventValue]) -> Result<JobEvent, Mismatch> {
    let mut f = Fields::expect(values, HID_ARITY)?;
    Ok(JobEvent {
        kind: JobEventKind::from_code(f.int64()?),
        vm_id: f.int64()?,
        job_id: f.int64()?,
        has_error: f.boolean()?,
        result: f.string()?,
        error: f.string()?,
        message: f.string()?,
        time: f.string()?,
    })
}

impl TryFrom<&RawEvent> for LogRecord {
    type Error = DecodeError;

    fn try_from(raw: &RawEvent) -> Result<Self, Self::Error> {
        if raw.tag != EVT_LOG {
            return Err(DecodeError::MalformedLogEvent(Mismatch::Tag { expected: EVT_LOG, got: raw.tag }));
        }
        log_record(&raw.values).map_err(DecodeError::MalformedLogEvent)
    }
}

impl TryFrom<&RawEvent> for JobEvent {
    type Error = DecodeError;

    fn try_from(raw: &RawEvent) -> Result<Self, Self::Error> {
        if raw.tag != EVT_HID {
            return Err(DecodeError::MalformedHidEvent(Mismatch::Tag { expected: EVT_HID, got: raw.tag }));
        }
        job_event(&raw.values).map_err(DecodeError::MalformedHidEvent)
    }
}
