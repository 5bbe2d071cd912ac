//! Push-channel message types and parser.
//!
//! The backend sends newline-delimited JSON objects tagged by an `event`
//! field, e.g. `{"event": "line", "batch_id": 3, "line": "..."}`. This
//! module deserializes them into a strongly-typed [`LiveEvent`]. Anything
//! that does not match a known shape is kept verbatim as
//! [`StreamMessage::Opaque`] so no output is lost.

use serde::{Deserialize, Serialize};
use scanwatch_core::types::DbId;

/// All known push-channel events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LiveEvent {
    /// The server accepted the subscription for a scan.
    Connected { scan_id: DbId },

    /// One line of scanner output for a batch.
    Line { batch_id: DbId, line: String },

    /// A batch started executing.
    BatchStart {
        batch_id: DbId,
        #[serde(default)]
        targets: Vec<String>,
    },

    /// A batch finished, with its aggregate summary.
    BatchComplete {
        batch_id: DbId,
        summary: BatchSummary,
    },

    /// Every batch of the scan finished.
    ScanComplete { scan_id: DbId },
}

/// Aggregate result of one finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub hosts_up: u64,
    pub open_ports: u64,
}

/// One decoded unit from the push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    Event(LiveEvent),
    /// Raw text that did not match any known event.
    Opaque(String),
}

impl LiveEvent {
    /// Human-readable log line for this event.
    pub fn describe(&self) -> String {
        match self {
            LiveEvent::Connected { scan_id } => format!("connected to scan {scan_id}"),
            LiveEvent::Line { batch_id, line } => format!("[batch {batch_id}] {line}"),
            LiveEvent::BatchStart { batch_id, targets } => {
                format!("batch {batch_id} started ({} targets)", targets.len())
            }
            LiveEvent::BatchComplete { batch_id, summary } => format!(
                "batch {batch_id} complete: hosts_up={}, open_ports={}",
                summary.hosts_up, summary.open_ports
            ),
            LiveEvent::ScanComplete { scan_id } => format!("scan {scan_id} complete"),
        }
    }
}

/// Parse one JSON message. Never fails: unknown tags, missing fields and
/// malformed JSON all come back as [`StreamMessage::Opaque`].
pub fn parse_message(text: &str) -> StreamMessage {
    match serde_json::from_str::<LiveEvent>(text) {
        Ok(event) => StreamMessage::Event(event),
        Err(e) => {
            tracing::debug!(error = %e, raw_message = %text, "Unrecognised stream message");
            StreamMessage::Opaque(text.to_string())
        }
    }
}

/// Decode one transport frame.
///
/// A frame holding a single JSON document, pretty-printed or not, is one
/// message. Anything else is split on newlines and each non-blank line is
/// parsed on its own.
pub fn decode_frame(frame: &str) -> Vec<StreamMessage> {
    let trimmed = frame.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if serde_json::from_str::<serde::de::IgnoredAny>(trimmed).is_ok() {
        return vec![parse_message(trimmed)];
    }

    frame
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(parse_message)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_connected_message() {
        let msg = parse_message(r#"{"event":"connected","scan_id":12}"#);
        assert_eq!(msg, StreamMessage::Event(LiveEvent::Connected { scan_id: 12 }));
    }

    #[test]
    fn parse_line_message() {
        let msg = parse_message(r#"{"event":"line","batch_id":3,"line":"Nmap scan report for 192.0.2.1"}"#);
        assert_matches!(
            msg,
            StreamMessage::Event(LiveEvent::Line { batch_id: 3, ref line }) if line == "Nmap scan report for 192.0.2.1"
        );
    }

    #[test]
    fn parse_batch_start_message() {
        let msg = parse_message(r#"{"event":"batch_start","batch_id":4,"targets":["a","b"]}"#);
        match msg {
            StreamMessage::Event(LiveEvent::BatchStart { batch_id, targets }) => {
                assert_eq!(batch_id, 4);
                assert_eq!(targets, vec!["a", "b"]);
            }
            other => panic!("Expected BatchStart, got {other:?}"),
        }
    }

    #[test]
    fn parse_batch_complete_message() {
        let msg = parse_message(
            r#"{"event":"batch_complete","batch_id":4,"summary":{"hosts_up":5,"open_ports":17}}"#,
        );
        match msg {
            StreamMessage::Event(LiveEvent::BatchComplete { batch_id, summary }) => {
                assert_eq!(batch_id, 4);
                assert_eq!(summary.hosts_up, 5);
                assert_eq!(summary.open_ports, 17);
            }
            other => panic!("Expected BatchComplete, got {other:?}"),
        }
    }

    #[test]
    fn parse_scan_complete_message() {
        let msg = parse_message(r#"{"event":"scan_complete","scan_id":9}"#);
        assert_eq!(msg, StreamMessage::Event(LiveEvent::ScanComplete { scan_id: 9 }));
    }

    #[test]
    fn unknown_event_is_opaque() {
        let raw = r#"{"event":"heartbeat","ts":1}"#;
        assert_eq!(parse_message(raw), StreamMessage::Opaque(raw.to_string()));
    }

    #[test]
    fn negative_summary_counts_are_opaque() {
        let raw = r#"{"event":"batch_complete","batch_id":1,"summary":{"hosts_up":-1,"open_ports":0}}"#;
        assert_matches!(parse_message(raw), StreamMessage::Opaque(_));
    }

    #[test]
    fn missing_field_is_opaque() {
        assert_matches!(parse_message(r#"{"event":"line","batch_id":1}"#), StreamMessage::Opaque(_));
    }

    #[test]
    fn invalid_json_is_opaque() {
        assert_eq!(
            parse_message("not json at all"),
            StreamMessage::Opaque("not json at all".to_string())
        );
    }

    #[test]
    fn decode_frame_splits_newline_delimited_messages() {
        let frame = "{\"event\":\"connected\",\"scan_id\":1}\n\n{\"event\":\"scan_complete\",\"scan_id\":1}\r\n";
        let msgs = decode_frame(frame);
        assert_eq!(
            msgs,
            vec![
                StreamMessage::Event(LiveEvent::Connected { scan_id: 1 }),
                StreamMessage::Event(LiveEvent::ScanComplete { scan_id: 1 }),
            ]
        );
    }

    #[test]
    fn decode_frame_keeps_pretty_printed_event_whole() {
        let frame = "{\n  \"event\": \"batch_complete\",\n  \"batch_id\": 7,\n  \"summary\": {\n    \"hosts_up\": 2,\n    \"open_ports\": 5\n  }\n}\n";
        assert_eq!(
            decode_frame(frame),
            vec![StreamMessage::Event(LiveEvent::BatchComplete {
                batch_id: 7,
                summary: BatchSummary {
                    hosts_up: 2,
                    open_ports: 5,
                },
            })]
        );
    }

    #[test]
    fn decode_frame_keeps_multiline_unknown_json_as_one_line() {
        let frame = "{\n  \"kind\": \"heartbeat\"\n}";
        let msgs = decode_frame(frame);
        assert_eq!(msgs.len(), 1);
        assert_matches!(&msgs[0], StreamMessage::Opaque(raw) if raw.contains("heartbeat"));
        assert!(decode_frame(" \n\t").is_empty());
    }

    #[test]
    fn describe_matches_log_wording() {
        let complete = LiveEvent::BatchComplete {
            batch_id: 2,
            summary: BatchSummary {
                hosts_up: 3,
                open_ports: 4,
            },
        };
        assert_eq!(complete.describe(), "batch 2 complete: hosts_up=3, open_ports=4");
        let start = LiveEvent::BatchStart {
            batch_id: 2,
            targets: vec!["a".into(), "b".into()],
        };
        assert_eq!(start.describe(), "batch 2 started (2 targets)");
        let line = LiveEvent::Line {
            batch_id: 2,
            line: "PORT STATE".into(),
        };
        assert_eq!(line.describe(), "[batch 2] PORT STATE");
    }
}
