//! Frames of the push protocol.
//!
//! A frame is either a named data frame (`event:` / `data:` / optional `id:`)
//! or a comment used as a heartbeat. The HTTP layer maps frames onto its SSE
//! type; `encode` gives the raw wire form for other transports and tests.

use serde_json::json;

use jobstream_core::{JobId, JobSnapshot};

use crate::event::JobEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    /// First frame of every stream.
    Connected { job_id: JobId },
    /// Condensed state at connect time.
    Snapshot(JobSnapshot),
    /// A log entry, forwarded verbatim with its offset.
    Event(JobEvent),
    /// Comment frame (idle keep-alive or retry notice).
    Heartbeat(String),
    /// Terminal error; the stream closes after it.
    Error { message: String },
}

impl StreamFrame {
    pub fn ping() -> Self {
        StreamFrame::Heartbeat("ping".to_string())
    }

    /// SSE `event:` name; `None` for comment frames.
    pub fn name(&self) -> Option<&'static str> {
        match self {
            StreamFrame::Connected { .. } => Some("connected"),
            StreamFrame::Snapshot(_) => Some("snapshot"),
            StreamFrame::Event(ev) => Some(ev.kind.as_str()),
            StreamFrame::Heartbeat(_) => None,
            StreamFrame::Error { .. } => Some("error"),
        }
    }

    /// SSE `id:` value; only log events carry one.
    pub fn id(&self) -> Option<String> {
        match self {
            StreamFrame::Event(ev) => Some(ev.offset.to_string()),
            _ => None,
        }
    }

    /// JSON body for data frames; the comment text for heartbeats.
    pub fn data(&self) -> String {
        match self {
            StreamFrame::Connected { job_id } => json!({ "job_id": job_id }).to_string(),
            StreamFrame::Snapshot(s) => json!({
                "status": s.status,
                "done": s.done,
                "total": s.total,
                "percent": s.percent,
            })
            .to_string(),
            StreamFrame::Event(ev) => ev.data.clone(),
            StreamFrame::Heartbeat(text) => text.clone(),
            StreamFrame::Error { message } => json!({ "error": message }).to_string(),
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, StreamFrame::Heartbeat(_))
    }

    /// Raw `text/event-stream` encoding, terminated by a blank line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        match self.name() {
            None => {
                for line in self.data().lines() {
                    out.push_str(": ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
            Some(name) => {
                if let Some(id) = self.id() {
                    out.push_str("id: ");
                    out.push_str(&id);
                    out.push('\n');
                }
                out.push_str("event: ");
                out.push_str(name);
                out.push('\n');
                for line in self.data().lines() {
                    out.push_str("data: ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
        out.push('\n');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use crate::offset::EventOffset;
    use jobstream_core::JobStatus;

    #[test]
    fn event_frame_carries_offset_and_verbatim_data() {
        let ev = JobEvent::new(EventOffset::new(5, 1), EventKind::Log, r#"{"msg":"hi"}"#);
        let frame = StreamFrame::Event(ev);

        assert_eq!(frame.encode(), "id: 5-1\nevent: log\ndata: {\"msg\":\"hi\"}\n\n");
    }

    #[test]
    fn heartbeat_is_a_comment() {
        assert_eq!(StreamFrame::ping().encode(), ": ping\n\n");
        assert!(StreamFrame::ping().name().is_none());
    }

    #[test]
    fn snapshot_body() {
        let frame = StreamFrame::Snapshot(JobSnapshot {
            status: JobStatus::Done,
            done: 10,
            total: 10,
            percent: 100,
        });
        let body: serde_json::Value = serde_json::from_str(&frame.data()).unwrap();
        assert_eq!(body["status"], "done");
        assert_eq!(body["percent"], 100);
        assert!(frame.id().is_none());
    }

    #[test]
    fn error_frame_is_named_error() {
        let frame = StreamFrame::Error {
            message: "store lost".to_string(),
        };
        assert_eq!(frame.name(), Some("error"));
        assert!(frame.data().contains("store lost"));
    }
}
