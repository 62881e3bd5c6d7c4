//! The research event stream.
//!
//! One orchestrator run is the only producer. Sequence numbers start at 1 and
//! increase by one per delivered event.

use crate::search::SourceCount;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ResearchStart {
        query: String,
        timestamp: DateTime<Utc>,
    },
    Thought {
        content: String,
    },
    Status {
        message: String,
    },
    PlanCreated {
        subtasks: Vec<String>,
    },
    /// Running totals after one more subtask's results were merged.
    SourcesUpdate {
        count: usize,
        sources: Vec<SourceCount>,
    },
    SourcesComplete {
        total: usize,
        urls: Vec<String>,
    },
    SourceRead {
        title: String,
        url: String,
    },
    ContentChunk {
        chunk: String,
    },
    ResearchComplete {},
    Error {
        message: String,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::ResearchStart { .. } => "research_start",
            EventKind::Thought { .. } => "thought",
            EventKind::Status { .. } => "status",
            EventKind::PlanCreated { .. } => "plan_created",
            EventKind::SourcesUpdate { .. } => "sources_update",
            EventKind::SourcesComplete { .. } => "sources_complete",
            EventKind::SourceRead { .. } => "source_read",
            EventKind::ContentChunk { .. } => "content_chunk",
            EventKind::ResearchComplete {} => "research_complete",
            EventKind::Error { .. } => "error",
        }
    }

    /// `research_complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::ResearchComplete {} | EventKind::Error { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchEvent {
    pub sequence: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ResearchEvent {
    pub fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Payload fields plus `sequence`, without the type tag.
    pub fn data_json(&self) -> Value {
        let mut value = serde_json::to_value(&self.kind).unwrap_or(Value::Null);
        if let Value::Object(map) = &mut value {
            map.remove("type");
            map.insert("sequence".to_string(), Value::from(self.sequence));
        }
        value
    }

    /// Render as one server-sent event frame.
    pub fn to_sse(&self) -> String {
        format!(
            "id: {}\nevent: {}\ndata: {}\n\n",
            self.sequence,
            self.event_type(),
            self.data_json()
        )
    }
}

/// Sends events for one session and owns its sequence counter.
pub struct EventEmitter {
    tx: mpsc::UnboundedSender<ResearchEvent>,
    next_sequence: u64,
}

impl EventEmitter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ResearchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                next_sequence: 1,
            },
            rx,
        )
    }

    /// Deliver an event. Returns `false` once the receiver is gone; the
    /// sequence only advances on delivery.
    pub fn emit(&mut self, kind: EventKind) -> bool {
        let event = ResearchEvent {
            sequence: self.next_sequence,
            kind,
        };
        if self.tx.send(event).is_err() {
            return false;
        }
        self.next_sequence += 1;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Sequence of the last delivered event, 0 before the first.
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_layout() {
        let event = ResearchEvent {
            sequence: 7,
            kind: EventKind::SourceRead {
                title: "Fed minutes".into(),
                url: "https://a.com".into(),
            },
        };
        let frame = event.to_sse();
        assert!(frame.starts_with("id: 7\nevent: source_read\ndata: {"));
        assert!(frame.ends_with("}\n\n"));
        let data: Value = serde_json::from_str(
            frame.lines().find_map(|l| l.strip_prefix("data: ")).unwrap(),
        )
        .unwrap();
        assert_eq!(data["title"], "Fed minutes");
        assert_eq!(data["sequence"], 7);
        assert!(data.get("type").is_none());
    }

    #[test]
    fn complete_event_has_empty_payload() {
        let event = ResearchEvent {
            sequence: 1,
            kind: EventKind::ResearchComplete {},
        };
        assert_eq!(event.data_json(), serde_json::json!({"sequence": 1}));
        assert!(event.kind.is_terminal());
    }

    #[test]
    fn json_round_trip_keeps_tag() {
        let event = ResearchEvent {
            sequence: 3,
            kind: EventKind::PlanCreated {
                subtasks: vec!["a".into(), "b".into()],
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "plan_created");
        let back: ResearchEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[tokio::test]
    async fn emitter_numbers_from_one_without_gaps() {
        let (mut emitter, mut rx) = EventEmitter::channel();
        assert_eq!(emitter.last_sequence(), 0);
        for i in 0..3 {
            assert!(emitter.emit(EventKind::Status {
                message: format!("step {i}"),
            }));
        }
        let seqs: Vec<u64> = (0..3).map(|_| rx.try_recv().unwrap().sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);

        drop(rx);
        assert!(emitter.is_closed());
        assert!(!emitter.emit(EventKind::ResearchComplete {}));
        assert_eq!(emitter.last_sequence(), 3);
    }
}
