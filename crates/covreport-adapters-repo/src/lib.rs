//! Filesystem adapters: source reading and `collectCoverageFrom` glob matching.

use covreport_ports::{FileMatcher, SourceFinder, SourceReader};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Filesystem-backed source reader with a text cache.
///
/// Relative paths are resolved against `root`.
pub struct FsSourceReader {
    root: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl FsSourceReader {
    /// Create a new filesystem reader rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if Path::new(path).is_absolute() {
            PathBuf::from(path)
        } else {
            self.root.join(path)
        }
    }
}

impl SourceReader for FsSourceReader {
    fn read_source(&self, path: &str) -> Result<String, String> {
        if let Ok(cache) = self.cache.lock()
            && let Some(text) = cache.get(path)
        {
            return Ok(text.clone());
        }

        let full_path = self.full_path(path);
        let text = std::fs::read_to_string(&full_path)
            .map_err(|e| format!("failed to read {}: {}", full_path.display(), e))?;

        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(path.to_string(), text.clone());
        }
        Ok(text)
    }
}

impl SourceFinder for FsSourceReader {
    fn find_source(&self, path: &str) -> Option<String> {
        self.read_source(path).ok()
    }
}

/// Resolves glob patterns relative to a root directory.
///
/// Patterns starting with `!` exclude matches of the remaining pattern.
/// Results are absolute, sorted and de-duplicated; only regular files match.
#[derive(Debug, Clone, Default)]
pub struct GlobFileMatcher;

impl GlobFileMatcher {
    pub fn new() -> Self {
        Self
    }
}

fn to_slash(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

impl FileMatcher for GlobFileMatcher {
    fn match_files(&self, patterns: &[String], root_dir: &Path) -> Vec<String> {
        let root = absolute(root_dir);
        let mut includes = Vec::new();
        let mut excludes = Vec::new();

        for pattern in patterns {
            match pattern.strip_prefix('!') {
                Some(negated) => match glob::Pattern::new(negated) {
                    Ok(compiled) => excludes.push(compiled),
                    Err(e) => tracing::warn!(pattern = %pattern, error = %e, "ignoring invalid glob pattern"),
                },
                None => includes.push(pattern.as_str()),
            }
        }

        let mut matched = BTreeSet::new();
        for pattern in includes {
            let full = if Path::new(pattern).is_absolute() {
                pattern.to_string()
            } else {
                to_slash(&root.join(pattern))
            };
            let entries = match glob::glob(&full) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(pattern = %pattern, error = %e, "ignoring invalid glob pattern");
                    continue;
                }
            };

            for path in entries.flatten() {
                if !path.is_file() {
                    continue;
                }
                let relative = path
                    .strip_prefix(&root)
                    .map(to_slash)
                    .unwrap_or_else(|_| to_slash(&path));
                if excludes.iter().any(|exclude| exclude.matches(&relative)) {
                    continue;
                }
                matched.insert(to_slash(&absolute(&path)));
            }
        }

        matched.into_iter().collect()
    }
}
