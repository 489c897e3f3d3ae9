// LogRelay - app/history.rs
//
// History fetcher: bounded trailing-window replay for one subscriber.
//
// Reads at most `window` bytes from the end of a domain's file and returns
// the complete records in file order. Independent of live tailing: it never
// reads or writes the offset tracker, so it can run alongside `process` on
// the same file without coordination.

use crate::core::model::Record;
use crate::core::parser;
use crate::core::registry::DomainRegistry;
use crate::platform::fs;
use crate::util::error::HistoryError;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// Fetch the recent records of `domain`'s active file.
pub fn fetch_history(
    registry: &DomainRegistry,
    domain: &str,
    window: u64,
    timeout: Duration,
) -> Result<Vec<Record>, HistoryError> {
    let path = registry
        .path_for(domain)
        .ok_or_else(|| HistoryError::UnknownDomain {
            domain: domain.to_string(),
        })?;
    read_history(&path, window, timeout)
}

/// Read the trailing `window` bytes of `path` and decode the complete
/// records in it.
///
/// One extra byte before the window is read to tell whether the window
/// starts on a line boundary; if it does not, the first (partial) line is
/// discarded.
pub fn read_history(
    path: &Path,
    window: u64,
    timeout: Duration,
) -> Result<Vec<Record>, HistoryError> {
    // Each request reads on its own; there is no per-file state to share.
    let in_flight = Arc::new(AtomicBool::new(false));
    let owned = path.to_path_buf();
    let trailing = match fs::run_with_deadline(path, &in_flight, timeout, move || {
        fs::read_trailing(&owned, window)
    }) {
        Ok(t) => t,
        Err(e) if e.is_not_found() => {
            return Err(HistoryError::Vanished {
                path: path.to_path_buf(),
            });
        }
        Err(e) => return Err(e.into()),
    };

    let bytes = trailing.bytes;
    let body = if trailing.start == 0 {
        &bytes[..]
    } else {
        match bytes.split_first() {
            Some((&before, rest)) => parser::trim_leading_fragment(rest, before != b'\n'),
            None => &[][..],
        }
    };

    let text = String::from_utf8_lossy(body);
    let (records, stats) = parser::parse_lines(&text, path);

    tracing::debug!(
        file = %path.display(),
        window,
        bytes = body.len(),
        records = stats.records,
        malformed = stats.malformed,
        "History window read"
    );
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn line(n: u16) -> String {
        format!(r#"{{"ts":1700000000.0,"status":{n},"request":{{"uri":"/r{n}"}}}}"#)
    }

    fn write_records(path: &Path, count: u16) -> Vec<usize> {
        let mut content = String::new();
        let mut lens = Vec::new();
        for n in 1..=count {
            let l = format!("{}\n", line(n));
            lens.push(l.len());
            content.push_str(&l);
        }
        fs::write(path, content).unwrap();
        lens
    }

    fn statuses(records: &[Record]) -> Vec<u16> {
        records.iter().filter_map(Record::status).collect()
    }

    #[test]
    fn test_window_inside_record_drops_partial_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.log");
        let lens = write_records(&path, 10);

        // Last three records plus a few bytes of the seventh.
        let window = (lens[7] + lens[8] + lens[9] + 5) as u64;
        let records = read_history(&path, window, Duration::from_secs(5)).unwrap();
        assert_eq!(statuses(&records), vec![8, 9, 10]);
    }

    #[test]
    fn test_window_on_line_boundary_keeps_first_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.log");
        let lens = write_records(&path, 10);

        let window = (lens[7] + lens[8] + lens[9]) as u64;
        let records = read_history(&path, window, Duration::from_secs(5)).unwrap();
        assert_eq!(statuses(&records), vec![8, 9, 10]);
    }

    #[test]
    fn test_window_larger_than_file_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.com.log");
        write_records(&path, 4);

        let records = read_history(&path, 1 << 20, Duration::from_secs(5)).unwrap();
        assert_eq!(statuses(&records), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_unknown_domain_and_vanished_file() {
        let dir = tempfile::tempdir().unwrap();
        let registry = DomainRegistry::new();
        assert!(matches!(
            fetch_history(&registry, "nope.com", 1024, Duration::from_secs(5)),
            Err(HistoryError::UnknownDomain { .. })
        ));

        let path = dir.path().join("gone.com.log");
        registry.discover(&path);
        assert!(matches!(
            fetch_history(&registry, "gone.com", 1024, Duration::from_secs(5)),
            Err(HistoryError::Vanished { .. })
        ));
    }
}
