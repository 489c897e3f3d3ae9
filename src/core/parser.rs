// LogRelay - core/parser.rs
//
// Line-oriented record decoding.
// Core layer: works on bytes and strings handed in by the app layer, never
// touches the filesystem directly.
//
// Every line yields an explicit `LineOutcome`; a bad line is classified and
// counted, never raised, so one corrupt entry cannot abort the batch around it.

use crate::core::model::{BatchStats, Record};
use crate::util::constants::{DEBUG_MAX_LINE_PREVIEW, NOISE_LINE_MAX_LEN};
use crate::util::error::ParseError;
use crate::util::logging::preview;
use std::path::Path;

/// Classification of a single log line.
#[derive(Debug)]
pub enum LineOutcome {
    /// The line decoded into a record.
    Record(Record),
    /// Empty or whitespace only.
    Blank,
    /// Too short to be a real record: most likely the torn edge of a write.
    Noise,
    /// A substantial line that failed to decode.
    Malformed(ParseError),
}

/// Decode one line (without its terminator) into a record.
///
/// A trailing `\r` is tolerated. Undecodable lines of at most
/// `NOISE_LINE_MAX_LEN` bytes are `Noise`; longer ones are `Malformed`.
pub fn parse_line(line: &str) -> LineOutcome {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return LineOutcome::Blank;
    }

    match decode_record(trimmed) {
        Ok(record) => LineOutcome::Record(record),
        Err(_) if trimmed.len() <= NOISE_LINE_MAX_LEN => LineOutcome::Noise,
        Err(e) => LineOutcome::Malformed(e),
    }
}

fn decode_record(text: &str) -> Result<Record, ParseError> {
    if text.starts_with('{') {
        return serde_json::from_str(text).map_err(ParseError::Json);
    }
    // Distinguish "valid JSON of the wrong shape" from "not JSON at all" so
    // the warning tells the operator which one the producer is writing.
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => Err(ParseError::NotAnObject {
            kind: json_kind(&value),
        }),
        Err(e) => Err(ParseError::Json(e)),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Decode every line of `text` in order.
///
/// Returns the decoded records (file order preserved) and per-class counts.
/// Malformed lines are logged at warn with a truncated preview; noise and
/// blank lines are dropped silently.
pub fn parse_lines(text: &str, source: &Path) -> (Vec<Record>, BatchStats) {
    let mut records = Vec::new();
    let mut stats = BatchStats::default();

    for line in text.split('\n') {
        match parse_line(line) {
            LineOutcome::Record(record) => {
                stats.records += 1;
                records.push(record);
            }
            LineOutcome::Blank => {}
            LineOutcome::Noise => stats.noise += 1,
            LineOutcome::Malformed(e) => {
                stats.malformed += 1;
                tracing::warn!(
                    file = %source.display(),
                    error = %e,
                    line = preview(line.trim(), DEBUG_MAX_LINE_PREVIEW),
                    "Dropping malformed log line"
                );
            }
        }
    }

    (records, stats)
}

/// Length of the prefix of `bytes` that ends with the last `\n`, or `None`
/// when `bytes` holds no terminator at all.
pub fn complete_prefix_len(bytes: &[u8]) -> Option<usize> {
    bytes.iter().rposition(|&b| b == b'\n').map(|pos| pos + 1)
}

/// Drop the leading partial line of a trailing window.
///
/// `starts_mid_record` is true when the byte preceding the window is not a
/// line terminator, i.e. the window's first line is the tail end of a record.
/// In that case everything up to and including the first `\n` is discarded.
pub fn trim_leading_fragment(window: &[u8], starts_mid_record: bool) -> &[u8] {
    if !starts_mid_record {
        return window;
    }
    match window.iter().position(|&b| b == b'\n') {
        Some(pos) => &window[pos + 1..],
        None => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = r#"{"ts":1700000000.0,"status":200,"request":{"method":"GET","uri":"/","host":"shop.example.com"}}"#;

    #[test]
    fn test_parse_line_valid_record() {
        match parse_line(GOOD) {
            LineOutcome::Record(r) => {
                assert_eq!(r.status(), Some(200));
                assert_eq!(r.request_str("uri"), Some("/"));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_line_tolerates_crlf() {
        let line = format!("{GOOD}\r");
        assert!(matches!(parse_line(&line), LineOutcome::Record(_)));
    }

    #[test]
    fn test_parse_line_blank() {
        assert!(matches!(parse_line(""), LineOutcome::Blank));
        assert!(matches!(parse_line("   \t"), LineOutcome::Blank));
    }

    #[test]
    fn test_short_garbage_is_noise() {
        assert!(matches!(parse_line(r#"0.0,"st"#), LineOutcome::Noise));
        assert!(matches!(parse_line("}"), LineOutcome::Noise));
    }

    #[test]
    fn test_long_garbage_is_malformed() {
        let outcome = parse_line("this is definitely not json at all");
        assert!(matches!(outcome, LineOutcome::Malformed(ParseError::Json(_))));
    }

    #[test]
    fn test_non_object_json_is_rejected() {
        let outcome = parse_line(r#"["an","array","of","words"]"#);
        assert!(matches!(
            outcome,
            LineOutcome::Malformed(ParseError::NotAnObject { kind: "an array" })
        ));
    }

    #[test]
    fn test_any_object_is_a_record() {
        for line in [
            r#"{"ts":"2024-01-01T00:00:00Z","status":200,"request":{"uri":"/"}}"#,
            r#"{"status":"two hundred","request":null}"#,
            r#"{"status":-1}"#,
            "{}",
        ] {
            match parse_line(line) {
                LineOutcome::Record(r) => assert_eq!(serde_json::to_string(&r).unwrap().len(), line.len()),
                other => panic!("expected record for {line}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_parse_lines_keeps_going_after_bad_line() {
        let text = format!("{GOOD}\nnot json, but long enough to matter\n{GOOD}\n");
        let (records, stats) = parse_lines(&text, Path::new("t.log"));
        assert_eq!(records.len(), 2);
        assert_eq!(
            stats,
            BatchStats {
                records: 2,
                malformed: 1,
                noise: 0
            }
        );
    }

    #[test]
    fn test_complete_prefix_len() {
        assert_eq!(complete_prefix_len(b""), None);
        assert_eq!(complete_prefix_len(b"abc"), None);
        assert_eq!(complete_prefix_len(b"abc\n"), Some(4));
        assert_eq!(complete_prefix_len(b"a\nbc"), Some(2));
    }

    #[test]
    fn test_trim_leading_fragment() {
        assert_eq!(trim_leading_fragment(b"tail\nfull\n", true), b"full\n");
        assert_eq!(trim_leading_fragment(b"full\n", false), b"full\n");
        assert_eq!(trim_leading_fragment(b"no newline", true), b"");
    }
}
