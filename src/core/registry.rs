// LogRelay - core/registry.rs
//
// Domain registry: maps each domain to the one file currently backing it.
//
// The set of domains only grows. A domain whose file disappears stays listed;
// a second file deriving the same domain replaces the mapping (last
// discovered wins) and the replaced path stops being active.
//
// Lock poisoning is recovered rather than propagated: the map is always left
// consistent by every writer, so a panic elsewhere cannot corrupt it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Derive the domain for a log file: its base name with the extension
/// stripped (`/logs/shop.example.com.log` -> `shop.example.com`).
///
/// Returns `None` for paths without a usable UTF-8 file stem.
pub fn domain_for(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() {
        return None;
    }
    Some(stem.to_string())
}

/// What a `discover` call changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Domain derived from the path.
    pub domain: String,
    /// True the first time this domain is seen.
    pub is_new_domain: bool,
    /// The previously active path for this domain, when a different file
    /// just took it over.
    pub replaced: Option<PathBuf>,
}

/// Thread-safe domain -> path map shared by every engine component.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: RwLock<BTreeMap<String, PathBuf>>,
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `path` as the active file for its domain.
    ///
    /// Idempotent for a path that is already active. Returns `None` when no
    /// domain can be derived from the path.
    pub fn discover(&self, path: &Path) -> Option<Discovery> {
        let domain = domain_for(path)?;
        let mut domains = self.domains.write().unwrap_or_else(PoisonError::into_inner);

        let previous = domains.insert(domain.clone(), path.to_path_buf());
        let is_new_domain = previous.is_none();
        let replaced = previous.filter(|p| p != path);

        if let Some(ref old) = replaced {
            tracing::warn!(
                domain = %domain,
                previous = %old.display(),
                current = %path.display(),
                "Two files map to the same domain; the most recently discovered one wins"
            );
        }

        Some(Discovery {
            domain,
            is_new_domain,
            replaced,
        })
    }

    /// All known domains, sorted.
    pub fn list(&self) -> Vec<String> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// The active file for `domain`.
    pub fn path_for(&self, domain: &str) -> Option<PathBuf> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain)
            .cloned()
    }

    /// Every active file path, in domain order.
    pub fn active_paths(&self) -> Vec<PathBuf> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of known domains.
    pub fn len(&self) -> usize {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
