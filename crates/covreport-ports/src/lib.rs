//! Shared port traits and boundary DTOs for covreport's hexagonal architecture.

use std::path::{Path, PathBuf};

use covreport_types::{CoverageModel, FileCoverage};

/// Port for reading source text of candidate files.
pub trait SourceReader {
    /// Read the full text of `path`.
    fn read_source(&self, path: &str) -> Result<String, String>;
}

/// Port for resolving `collectCoverageFrom` globs into candidate files.
pub trait FileMatcher {
    /// Return absolute paths of files under `root_dir` matching `patterns`.
    fn match_files(&self, patterns: &[String], root_dir: &Path) -> Vec<String>;
}

/// Zero-hit record produced by static analysis of an unexecuted file.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedCoverage {
    pub coverage: FileCoverage,
    /// Source map describing the transformation the generator applied, if any.
    pub source_map_path: Option<String>,
}

/// Port for deriving an empty coverage skeleton from source text.
pub trait EmptyCoverageGenerator {
    /// Enumerate the instrumentable items of `source` with every hit count at 0.
    ///
    /// Returns `Ok(None)` when the file has nothing worth reporting.
    fn generate(&self, source: &str, path: &str) -> Result<Option<GeneratedCoverage>, String>;
}

/// An original-source location resolved through a source map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    /// Path of the original source file.
    pub source: String,
    /// 1-based line.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
}

/// Port for registering and querying source maps.
pub trait SourceMapStore {
    /// Register the source map at `map_location` for the transformed file `path`.
    fn register(&mut self, path: &str, map_location: &str) -> Result<(), String>;

    /// Whether a map is registered for `path`.
    fn has_map(&self, path: &str) -> bool;

    /// Map a generated position in `path` to its original position.
    fn original_position(&self, path: &str, line: u32, column: u32) -> Option<OriginalPosition>;

    /// Original source text for a path returned by [`Self::original_position`].
    fn original_source(&self, source: &str) -> Option<String>;
}

/// Port used by writers that render original source text.
pub trait SourceFinder {
    /// Return the source text of `path`, or `None` when unavailable.
    fn find_source(&self, path: &str) -> Option<String>;
}

/// Output produced by a writer, materialized by the emitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Artifact {
    /// A file relative to the coverage directory.
    File { path: PathBuf, contents: String },
    /// Text for the console sink.
    Console(String),
}

/// Port for a report-format writer.
pub trait CoverageWriter {
    /// Render the model into artifacts.
    fn render(
        &self,
        model: &CoverageModel,
        sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String>;
}

/// Port for obtaining the current UTC time.
pub trait Clock {
    /// Returns the current time in UTC.
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}
