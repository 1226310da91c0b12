//! User-visible notifications for finished jobs and the sinks that receive them.

#![forbid(unsafe_code)]

use std::time::Duration;

use hidwatch_core::{JobEvent, JobEventKind};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub message: String,
    pub detail: String,
    #[serde(rename = "timeout_ms", serialize_with = "as_millis")]
    pub timeout: Duration,
    pub kind: NotificationKind,
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

impl Notification {
    /// Notification for a job event, if its subtype warrants one.
    /// Only failed and succeeded jobs notify.
    pub fn for_job_event(ev: &JobEvent, timeout: Duration) -> Option<Self> {
        match ev.kind {
            JobEventKind::Failed => Some(Self {
                message: format!("HIDScript job {} failed", ev.job_id),
                detail: ev.error.clone(),
                timeout,
                kind: NotificationKind::Negative,
            }),
            JobEventKind::Succeeded => Some(Self {
                message: format!("HIDScript job {} succeeded", ev.job_id),
                detail: ev.result.clone(),
                timeout,
                kind: NotificationKind::Positive,
            }),
            _ => None,
        }
    }
}

/// Fire-and-forget consumer of notifications (toast widget, log, channel...).
pub trait NotificationSink: Send + Sync {
    fn notify(&self, n: Notification);
}

/// Writes notifications as structured log lines.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, n: Notification) {
        info!(kind = ?n.kind, detail = %n.detail, timeout_ms = n.timeout.as_millis() as u64, "{}", n.message);
    }
}

/// Forwards notifications to a UI-side receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, n: Notification) {
        // Receiver gone means nobody is displaying; nothing to do.
        let _ = self.tx.send(n);
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn notify(&self, _n: Notification) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(kind: JobEventKind) -> JobEvent {
        JobEvent {
            kind,
            vm_id: 1,
            job_id: 12,
            has_error: false,
            result: "res".into(),
            error: "err".into(),
            message: "msg".into(),
            time: "t".into(),
        }
    }

    #[test]
    fn failed_and_succeeded_carry_detail() {
        let t = Duration::from_millis(5000);
        let n = Notification::for_job_event(&ev(JobEventKind::Failed), t).unwrap();
        assert_eq!(n.message, "HIDScript job 12 failed");
        assert_eq!(n.detail, "err");
        assert_eq!(n.kind, NotificationKind::Negative);
        let n = Notification::for_job_event(&ev(JobEventKind::Succeeded), t).unwrap();
        assert_eq!(n.message, "HIDScript job 12 succeeded");
        assert_eq!(n.detail, "res");
        assert_eq!(n.kind, NotificationKind::Positive);
        assert_eq!(n.timeout, t);
    }

    #[test]
    fn other_subtypes_do_not_notify() {
        for kind in [JobEventKind::Started, JobEventKind::Cancelled, JobEventKind::Other(9)] {
            assert!(Notification::for_job_event(&ev(kind), Duration::from_secs(1)).is_none());
        }
    }

    #[test]
    fn channel_sink_delivers() {
        let (sink, mut rx) = ChannelSink::new();
        let n = Notification::for_job_event(&ev(JobEventKind::Failed), Duration::from_secs(5)).unwrap();
        sink.notify(n.clone());
        assert_eq!(rx.try_recv().unwrap(), n);
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    #[test]
    fn tracing_sink_logs_message_and_detail() {
        let out = Captured::default();
        let writer = out.clone();
        let subscriber = tracing_subscriber::fmt().with_ansi(false).with_writer(move || writer.clone()).finish();
        tracing::subscriber::with_default(subscriber, || {
            TracingSink.notify(Notification::for_job_event(&ev(JobEventKind::Failed), Duration::from_millis(5000)).unwrap());
        });
        let text = String::from_utf8(out.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("HIDScript job 12 failed"), "{text}");
        assert!(text.contains("detail=err"), "{text}");
        assert!(text.contains("timeout_ms=5000"), "{text}");
    }

    #[test]
    fn serializes_timeout_as_millis() {
        let n = Notification::for_job_event(&ev(JobEventKind::Succeeded), Duration::from_millis(5000)).unwrap();
        let v = serde_json::to_value(&n).unwrap();
        assert_eq!(v["timeout_ms"], 5000);
        assert_eq!(v["kind"], "positive");
    }
}
