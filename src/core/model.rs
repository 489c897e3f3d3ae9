// LogRelay - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no threads.
//
// These types are the shared vocabulary across all layers: the record decoded
// from each log line, the wire events exchanged with subscribers, and the
// outcome of one tail-processing cycle.

use crate::util::error::TailError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// Record (one decoded log line)
// =============================================================================

/// A single access-log entry decoded from one JSON line.
///
/// The record is the producer's JSON object, kept verbatim and passed through
/// to subscribers unchanged. Any object decodes; the accessors below read the
/// commonly used fields leniently and return `None` when a field is absent or
/// has an unexpected type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
}

impl Record {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    /// Every top-level key of the source object.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// `ts` when it is numeric (Unix seconds).
    pub fn ts(&self) -> Option<f64> {
        self.get("ts")?.as_f64()
    }

    /// Request handling time in fractional seconds.
    pub fn duration(&self) -> Option<f64> {
        self.get("duration")?.as_f64()
    }

    /// HTTP response status code.
    pub fn status(&self) -> Option<u16> {
        let status = self.get("status")?.as_u64()?;
        u16::try_from(status).ok()
    }

    /// The `request` descriptor, when it is an object.
    pub fn request(&self) -> Option<&Map<String, Value>> {
        self.get("request")?.as_object()
    }

    /// A string field of the request descriptor, e.g. "method", "uri",
    /// "host", "proto", "remote_ip" or "client_ip".
    pub fn request_str(&self, key: &str) -> Option<&str> {
        self.request()?.get(key)?.as_str()
    }

    /// Values of one request header, in the order the producer wrote them.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.request()
            .and_then(|r| r.get("headers"))
            .and_then(Value::as_object)
            .and_then(|h| h.get(name))
            .and_then(Value::as_array)
            .map(|values| values.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }

    /// The record timestamp as a UTC datetime.
    ///
    /// Accepts numeric Unix seconds and RFC 3339 strings (the ISO-8601 time
    /// format some producers are configured with).
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.get("ts")? {
            Value::Number(n) => {
                let ts = n.as_f64()?;
                if !ts.is_finite() {
                    return None;
                }
                let secs = ts.floor();
                let nanos = ((ts - secs) * 1_000_000_000.0).round().min(999_999_999.0) as u32;
                DateTime::<Utc>::from_timestamp(secs as i64, nanos)
            }
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// One human-readable line: time, domain, method, URI, status, duration.
    /// Missing parts are shown as `-`.
    pub fn summary(&self, domain: &str) -> String {
        let time = self
            .timestamp()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_else(|| "-".to_string());
        let status = self
            .status()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        let duration = self
            .duration()
            .map(|d| format!("{:.3}s", d))
            .unwrap_or_else(|| "-".to_string());
        format!(
            "{time} {domain} {} {} {status} {duration}",
            self.request_str("method").unwrap_or("-"),
            self.request_str("uri").unwrap_or("-"),
        )
    }
}

// =============================================================================
// Subscription protocol
// =============================================================================

/// Events sent from the engine to a subscriber.
///
/// Serialised as one JSON object per event, discriminated by `"event"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A domain became known. Sent once per domain per subscriber.
    DomainDiscovered { domain: String },

    /// A record for a domain this subscriber joined, or a history replay.
    Record { domain: String, entry: Arc<Record> },

    /// A record on the all-domains feed.
    RecordAny { domain: String, entry: Arc<Record> },
}

/// Verbs a subscriber may send, discriminated by `"verb"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Start receiving live `record` events for one domain.
    Subscribe { domain: String },

    /// Stop receiving live `record` events for one domain.
    Unsubscribe { domain: String },

    /// Replay the recent tail of a domain's file to this subscriber only.
    RequestHistory { domain: String },

    /// Join the all-domains `record_any` feed.
    SubscribeAll,

    /// Leave the all-domains `record_any` feed.
    UnsubscribeAll,
}

// =============================================================================
// Tail processing results
// =============================================================================

/// Per-batch line counters. Malformed and noise lines never abort a batch;
/// they are only counted here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Lines decoded into records and forwarded.
    pub records: usize,
    /// Substantial lines that failed to decode (logged at warn).
    pub malformed: usize,
    /// Short undecodable fragments dropped silently.
    pub noise: usize,
}

/// Result of one `process(path)` cycle.
#[derive(Debug)]
pub enum TailOutcome {
    /// The path was never discovered; nothing to do.
    Untracked,

    /// The path lost its domain to a more recently discovered file.
    Superseded { active: PathBuf },

    /// The file no longer exists. State is unchanged.
    Vanished,

    /// The file shrank below the tracked offset; the offset was reset to 0.
    Rotated { previous_offset: u64, size: u64 },

    /// The file size equals the tracked offset.
    Unchanged,

    /// New bytes exist but contain no line terminator yet.
    AwaitingTerminator { pending_bytes: u64 },

    /// New lines were read and forwarded; the offset now equals `offset`.
    Delivered { stats: BatchStats, offset: u64 },

    /// A transient failure; state is unchanged and the next trigger retries.
    Failed(TailError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> Record {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_record_passes_object_through_verbatim() {
        let line = r#"{"ts":1700000000.5,"level":"info","status":404,"request":{"method":"GET","uri":"/x","tls":{"resumed":false}}}"#;
        let r = record(line);
        assert_eq!(r.status(), Some(404));
        assert_eq!(r.request_str("method"), Some("GET"));
        assert_eq!(r.get("level"), Some(&serde_json::json!("info")));

        let back = serde_json::to_value(&r).unwrap();
        let original: Value = serde_json::from_str(line).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn test_unexpected_field_types_read_as_none() {
        let r = record(r#"{"ts":"not a time","status":"200","duration":null,"request":null}"#);
        assert_eq!(r.ts(), None);
        assert_eq!(r.status(), None);
        assert_eq!(r.duration(), None);
        assert!(r.request().is_none());
        assert_eq!(r.request_str("uri"), None);
        assert!(r.timestamp().is_none());

        assert_eq!(record(r#"{"status":-1}"#).status(), None);
        assert_eq!(record(r#"{"status":70000}"#).status(), None);
        // Still passed through untouched.
        assert_eq!(r.get("status"), Some(&serde_json::json!("200")));
    }

    #[test]
    fn test_record_headers_keep_value_order() {
        let r = record(r#"{"request":{"headers":{"Accept":["text/html","*/*"]}}}"#);
        assert_eq!(r.header_values("Accept"), vec!["text/html", "*/*"]);
        assert!(r.header_values("Missing").is_empty());
    }

    #[test]
    fn test_timestamp_numeric_and_rfc3339() {
        let numeric = record(r#"{"ts":1700000000.25}"#);
        let dt = numeric.timestamp().unwrap();
        assert_eq!(dt.timestamp(), 1_700_000_000);
        assert_eq!(dt.timestamp_subsec_millis(), 250);

        let iso = record(r#"{"ts":"2024-01-01T00:00:00.5+01:00"}"#);
        let dt = iso.timestamp().unwrap();
        assert_eq!(dt.to_rfc3339_opts(SecondsFormat::Millis, true), "2023-12-31T23:00:00.500Z");

        assert!(Record::default().timestamp().is_none());
    }

    #[test]
    fn test_summary_line() {
        let r = record(
            r#"{"ts":1700000000.0,"duration":0.0123,"status":200,"request":{"method":"GET","uri":"/"}}"#,
        );
        assert_eq!(
            r.summary("shop.example.com"),
            "2023-11-14T22:13:20.000Z shop.example.com GET / 200 0.012s"
        );
        assert_eq!(Record::default().summary("a.com"), "- a.com - - - -");
    }

    #[test]
    fn test_server_event_wire_shape() {
        let event = ServerEvent::RecordAny {
            domain: "shop.example.com".to_string(),
            entry: Arc::new(record(r#"{"status":200}"#)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "record_any");
        assert_eq!(json["domain"], "shop.example.com");
        assert_eq!(json["entry"]["status"], 200);
    }

    #[test]
    fn test_client_command_parsing() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"verb":"request_history","domain":"a.com"}"#).unwrap();
        assert_eq!(
            cmd,
            ClientCommand::RequestHistory {
                domain: "a.com".to_string()
            }
        );
        let cmd: ClientCommand = serde_json::from_str(r#"{"verb":"subscribe_all"}"#).unwrap();
        assert_eq!(cmd, ClientCommand::SubscribeAll);
        assert!(serde_json::from_str::<ClientCommand>(r#"{"verb":"explode"}"#).is_err());
    }
}
