// LogRelay - core/discovery.rs
//
// Log directory listing: finds the per-domain log files in the watched
// directory. Used by the startup scan and by the poll source's periodic
// rescan.
//
// Architecture note: this module uses `walkdir` for directory traversal and
// `glob` for filename matching. It reads only file *metadata*, never file
// contents; that boundary is owned by the app layer.
//
// Error policy:
//   - A missing or unreadable root is returned as `Err` so the caller can log
//     it as a configuration problem and carry on with an empty registry.
//   - Per-entry I/O errors are non-fatal and skipped.
//   - The directory is listed one level deep: domains live side by side.

use crate::util::error::DiscoveryError;
use glob::Pattern;
use std::path::{Path, PathBuf};

/// Compile the configured filename glob.
pub fn compile_pattern(pattern: &str) -> Result<Pattern, DiscoveryError> {
    Pattern::new(pattern).map_err(|source| DiscoveryError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// True when `path` names a file directly inside `dir` whose filename matches
/// `pattern`. Used to filter filesystem notifications, which may carry paths
/// of siblings, temp files, or subdirectories.
pub fn is_log_file(path: &Path, dir: &Path, pattern: &Pattern) -> bool {
    if path.parent() != Some(dir) {
        return false;
    }
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| pattern.matches(name))
}

/// List the log files in `dir` whose filenames match `pattern`, sorted by
/// path so discovery order (and thus collision precedence) is deterministic.
///
/// # Fatal errors
/// Returns `Err` only if `dir` itself is unusable (`RootNotFound`,
/// `NotADirectory`, `PermissionDenied`, `Traversal`).
pub fn scan_log_dir(dir: &Path, pattern: &Pattern) -> Result<Vec<PathBuf>, DiscoveryError> {
    // --- Pre-flight validation ---
    // `fs::metadata()` rather than `Path::is_dir()` so access-denied is not
    // mistaken for a missing directory.
    match std::fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(DiscoveryError::NotADirectory {
                path: dir.to_path_buf(),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(DiscoveryError::PermissionDenied {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(_) => {
            return Err(DiscoveryError::RootNotFound {
                path: dir.to_path_buf(),
            })
        }
    }

    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name();

    let mut found = Vec::new();
    for entry_result in walker {
        let entry = match entry_result {
            Ok(e) => e,
            Err(e) if e.depth() == 0 => {
                return Err(DiscoveryError::Traversal {
                    path: dir.to_path_buf(),
                    source: e,
                });
            }
            Err(e) => {
                // Dangling symlink, entry removed mid-listing, etc.
                tracing::debug!(error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !pattern.matches(&name) {
            tracing::trace!(file = %entry.path().display(), "Ignoring non-matching file");
            continue;
        }

        found.push(entry.into_path());
    }

    tracing::debug!(
        dir = %dir.display(),
        pattern = pattern.as_str(),
        count = found.len(),
        "Log directory listed"
    );

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn log_pattern() -> Pattern {
        compile_pattern("*.log").unwrap()
    }

    #[test]
    fn test_scan_finds_matching_files_only() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.example.com.log"), "").unwrap();
        fs::write(dir.path().join("a.example.com.log"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::create_dir(dir.path().join("archive.log")).unwrap();

        let found = scan_log_dir(dir.path(), &log_pattern()).unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.example.com.log", "b.example.com.log"]);
    }

    #[test]
    fn test_scan_does_not_descend() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("old");
        fs::create_dir(&nested).unwrap();
        fs::write(nested.join("rotated.log"), "").unwrap();

        let found = scan_log_dir(dir.path(), &log_pattern()).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_root_not_found() {
        let result = scan_log_dir(Path::new("/nonexistent/path/logrelay"), &log_pattern());
        assert!(matches!(result, Err(DiscoveryError::RootNotFound { .. })));
    }

    #[test]
    fn test_root_not_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("not_a_dir.log");
        fs::write(&file, "content").unwrap();
        let result = scan_log_dir(&file, &log_pattern());
        assert!(matches!(result, Err(DiscoveryError::NotADirectory { .. })));
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(matches!(
            compile_pattern("[*.log"),
            Err(DiscoveryError::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_is_log_file() {
        let dir = Path::new("/logs");
        let pat = log_pattern();
        assert!(is_log_file(Path::new("/logs/a.com.log"), dir, &pat));
        assert!(!is_log_file(Path::new("/logs/a.com.log.swp"), dir, &pat));
        assert!(!is_log_file(Path::new("/logs/sub/a.com.log"), dir, &pat));
        assert!(!is_log_file(Path::new("/other/a.com.log"), dir, &pat));
    }
}
