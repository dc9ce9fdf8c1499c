//! Application orchestration for covreport.
//!
//! This crate provides [`CoverageReporter`], the per-run aggregator driven by
//! a test runner:
//!
//! 1. `on_test_result` merges each finished test's coverage and registers its
//!    source maps
//! 2. `on_run_complete` synthesizes zero-hit records for untested files,
//!    optionally projects through source maps, runs every configured writer,
//!    and finally evaluates thresholds
//!
//! # Example
//!
//! ```rust,ignore
//! use covreport_app::{Collaborators, CoverageReporter, SystemClock, TestResult};
//!
//! let mut reporter = CoverageReporter::new(config, SourceMapRegistry::new());
//! reporter.on_run_start(&SystemClock);
//! reporter.on_test_result(TestResult::new("a.test.js", Some(coverage)));
//! let outcome = reporter.on_run_complete(&collaborators, &SystemClock, &mut std::io::stdout());
//! std::process::exit(outcome.exit_code());
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use covreport_config::EffectiveConfig;
use covreport_domain::{check_thresholds, merge, project_coverage, summarize};
pub use covreport_ports::Clock;
use covreport_ports::{
    Artifact, CoverageWriter, EmptyCoverageGenerator, FileMatcher, SourceFinder, SourceMapStore,
    SourceReader,
};
use covreport_types::{
    CoverageModel, CoverageStatus, CoverageSummary, FailureRecord, FailureStage,
    RECEIPT_SCHEMA_ID, Receipt, RunTiming, Tool, Violation,
};
use thiserror::Error;

// ============================================================================
// Clock
// ============================================================================

/// System clock implementation that returns the actual current time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while synthesizing coverage for an untested file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SynthesisError {
    /// The file could not be read.
    #[error("Failed to collect coverage from {path}: {message}")]
    Read { path: String, message: String },

    /// The generator rejected the file.
    #[error("Failed to collect coverage from {path}: {message}")]
    Generate { path: String, message: String },
}

/// Errors raised by one writer during emission.
#[derive(Debug, Error)]
pub enum EmitError {
    /// No writer is registered under this name.
    #[error("unknown coverage reporter '{0}'")]
    UnknownWriter(String),

    /// The writer failed to render.
    #[error("{writer} failed to render: {message}")]
    Render { writer: String, message: String },

    /// The output directory could not be created.
    #[error("failed to create directory {path}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be written.
    #[error("failed to write {path}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An artifact path would land outside the coverage directory.
    #[error("refusing to write {0} outside the coverage directory")]
    UnsafePath(PathBuf),

    /// The console sink rejected output.
    #[error("failed to write console output")]
    Console(#[source] std::io::Error),
}

/// Render an error with its full source chain.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

// ============================================================================
// Request and Result Types
// ============================================================================

/// One completed test file, as delivered by the runner.
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    pub test_path: String,
    /// Coverage recorded while the test ran, if instrumentation was on.
    pub coverage: Option<CoverageModel>,
    /// Transformed file path to source map location.
    pub source_maps: BTreeMap<String, String>,
}

impl TestResult {
    pub fn new(test_path: impl Into<String>, coverage: Option<CoverageModel>) -> Self {
        Self {
            test_path: test_path.into(),
            coverage,
            source_maps: BTreeMap::new(),
        }
    }
}

/// Collaborators consulted at the end of the run.
pub struct Collaborators<'a> {
    pub files: &'a dyn FileMatcher,
    pub reader: &'a dyn SourceReader,
    pub generator: &'a dyn EmptyCoverageGenerator,
}

/// A candidate file that could not be synthesized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisFailure {
    pub path: String,
    pub message: String,
}

/// A writer that failed during emission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterFailure {
    pub writer: String,
    pub message: String,
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The reported model: projected when source mapping is on.
    pub coverage: CoverageModel,
    pub summary: CoverageSummary,
    pub violations: Vec<Violation>,
    pub synthesis_failures: Vec<SynthesisFailure>,
    pub writer_failures: Vec<WriterFailure>,
    pub status: CoverageStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunOutcome {
    /// Process exit code: 0 on pass, 2 on threshold failure.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            CoverageStatus::Pass => 0,
            CoverageStatus::Fail => 2,
        }
    }

    /// The run's error state: every violation message, one per line.
    pub fn error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }
        Some(
            self.violations
                .iter()
                .map(|violation| violation.message.as_str())
                .collect::<Vec<_>>()
                .join("\n"),
        )
    }

    /// Build the machine-readable receipt for this run.
    pub fn receipt(&self) -> Receipt {
        let duration_ms = (self.completed_at - self.started_at)
            .num_milliseconds()
            .try_into()
            .ok();

        let failures = self
            .synthesis_failures
            .iter()
            .map(|failure| FailureRecord {
                stage: FailureStage::Synthesis,
                subject: failure.path.clone(),
                message: failure.message.clone(),
            })
            .chain(self.writer_failures.iter().map(|failure| FailureRecord {
                stage: FailureStage::Writer,
                subject: failure.writer.clone(),
                message: failure.message.clone(),
            }))
            .collect();

        Receipt {
            schema: RECEIPT_SCHEMA_ID.to_string(),
            tool: Tool::default(),
            run: RunTiming {
                started_at: self.started_at.to_rfc3339(),
                ended_at: self.completed_at.to_rfc3339(),
                duration_ms,
            },
            status: self.status,
            files: self.coverage.len(),
            summary: self.summary,
            violations: self.violations.clone(),
            failures,
        }
    }
}

// ============================================================================
// Untested-File Synthesis
// ============================================================================

/// Add zero-hit records for candidates that no test executed.
///
/// Existing records are never replaced. A source map reported by the
/// generator is registered with `source_maps`. Failures are logged, collected,
/// and do not stop the remaining candidates.
pub fn synthesize_untested<S: SourceMapStore + ?Sized>(
    model: &mut CoverageModel,
    candidates: &[String],
    reader: &dyn SourceReader,
    generator: &dyn EmptyCoverageGenerator,
    source_maps: &mut S,
) -> Vec<SynthesisFailure> {
    let mut failures = Vec::new();

    for path in candidates {
        if model.contains_key(path) {
            continue;
        }

        let generated = reader
            .read_source(path)
            .map_err(|message| SynthesisError::Read {
                path: path.clone(),
                message,
            })
            .and_then(|source| {
                generator
                    .generate(&source, path)
                    .map_err(|message| SynthesisError::Generate {
                        path: path.clone(),
                        message,
                    })
            });

        match generated {
            Ok(Some(result)) => {
                let mut coverage = result.coverage;
                if coverage.path.is_empty() {
                    coverage.path = path.clone();
                }
                model.insert(path.clone(), coverage);

                if let Some(map_location) = result.source_map_path
                    && let Err(e) = source_maps.register(path, &map_location)
                {
                    tracing::warn!(path = %path, error = %e, "skipping source map for untested file");
                }
            }
            Ok(None) => {
                tracing::debug!(path = %path, "nothing to cover in untested file");
            }
            Err(err) => {
                tracing::error!(path = %path, error = %err, "failed to collect coverage");
                failures.push(SynthesisFailure {
                    path: path.clone(),
                    message: err.to_string(),
                });
            }
        }
    }

    failures
}

// ============================================================================
// Report Emission
// ============================================================================

/// Name-indexed set of available writers.
pub struct WriterRegistry {
    writers: BTreeMap<String, Box<dyn CoverageWriter>>,
}

impl WriterRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            writers: BTreeMap::new(),
        }
    }

    /// A registry holding every built-in writer.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for name in covreport_render::BUILTIN_WRITERS {
            if let Some(writer) = covreport_render::builtin_writer(name) {
                registry.register(name, writer);
            }
        }
        registry
    }

    /// Add or replace a writer.
    pub fn register(&mut self, name: impl Into<String>, writer: Box<dyn CoverageWriter>) {
        self.writers.insert(name.into(), writer);
    }

    pub fn get(&self, name: &str) -> Option<&dyn CoverageWriter> {
        self.writers.get(name).map(|writer| writer.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.writers.contains_key(name)
    }
}

impl Default for WriterRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

/// Final writer list: a non-empty list without `text` or `text-summary` gets
/// `text-summary` appended, unless console output goes to stderr.
pub fn select_writers(configured: &[String], use_stderr: bool) -> Vec<String> {
    let mut writers = configured.to_vec();
    let has_console_table = writers
        .iter()
        .any(|name| name == "text" || name == "text-summary");
    if !use_stderr && !writers.is_empty() && !has_console_table {
        writers.push("text-summary".to_string());
    }
    writers
}

fn write_artifacts(
    artifacts: Vec<Artifact>,
    coverage_dir: &Path,
    console: &mut dyn Write,
) -> Result<(), EmitError> {
    for artifact in artifacts {
        match artifact {
            Artifact::File { path, contents } => {
                if !path
                    .components()
                    .all(|component| matches!(component, Component::Normal(_)))
                {
                    return Err(EmitError::UnsafePath(path));
                }
                let target = coverage_dir.join(&path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent).map_err(|source| EmitError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
                }
                std::fs::write(&target, contents).map_err(|source| EmitError::WriteFile {
                    path: target.clone(),
                    source,
                })?;
            }
            Artifact::Console(text) => {
                console.write_all(text.as_bytes()).map_err(EmitError::Console)?;
            }
        }
    }
    Ok(())
}

fn emit_one(
    name: &str,
    model: &CoverageModel,
    sources: Option<&dyn SourceFinder>,
    registry: &WriterRegistry,
    coverage_dir: &Path,
    console: &mut dyn Write,
) -> Result<(), EmitError> {
    let writer = registry
        .get(name)
        .ok_or_else(|| EmitError::UnknownWriter(name.to_string()))?;
    let artifacts = writer.render(model, sources).map_err(|message| EmitError::Render {
        writer: name.to_string(),
        message,
    })?;
    write_artifacts(artifacts, coverage_dir, console)
}

/// Run each named writer in order. A failing writer is logged and recorded
/// and the rest still run. Unknown names are reported once each.
pub fn emit_reports(
    model: &CoverageModel,
    writer_names: &[String],
    sources: Option<&dyn SourceFinder>,
    registry: &WriterRegistry,
    coverage_dir: &Path,
    console: &mut dyn Write,
) -> Vec<WriterFailure> {
    let mut failures = Vec::new();
    let mut reported_unknown = BTreeSet::new();

    for name in writer_names {
        if !registry.contains(name) && !reported_unknown.insert(name.as_str()) {
            continue;
        }

        if let Err(err) = emit_one(name, model, sources, registry, coverage_dir, console) {
            let message = error_chain(&err);
            tracing::error!(writer = %name, error = %message, "Failed to write coverage reports");
            failures.push(WriterFailure {
                writer: name.clone(),
                message,
            });
        }
    }

    failures
}

// ============================================================================
// Coverage Reporter
// ============================================================================

/// Aggregates coverage for one run.
///
/// Results are merged as they arrive; `on_run_complete` consumes the reporter,
/// so no state survives into another run.
pub struct CoverageReporter<S: SourceMapStore> {
    config: EffectiveConfig,
    source_maps: S,
    registry: WriterRegistry,
    model: CoverageModel,
    started_at: Option<DateTime<Utc>>,
}

impl<S: SourceMapStore> CoverageReporter<S> {
    /// Create a reporter with the built-in writers.
    pub fn new(config: EffectiveConfig, source_maps: S) -> Self {
        Self {
            config,
            source_maps,
            registry: WriterRegistry::with_builtin(),
            model: CoverageModel::new(),
            started_at: None,
        }
    }

    /// Replace the writer registry.
    pub fn with_registry(mut self, registry: WriterRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Record the run start time.
    pub fn on_run_start(&mut self, clock: &dyn Clock) {
        self.started_at = Some(clock.now());
    }

    /// Fold one completed test into the aggregate.
    ///
    /// The result's coverage is consumed. Its source maps are registered only
    /// when it carried coverage; a map that fails to load is skipped and the
    /// file is reported unmapped.
    pub fn on_test_result(&mut self, result: TestResult) {
        let Some(coverage) = result.coverage else {
            return;
        };
        tracing::debug!(test = %result.test_path, files = coverage.len(), "merging coverage");
        merge(&mut self.model, coverage);

        for (path, map_location) in &result.source_maps {
            if let Err(e) = self.source_maps.register(path, map_location) {
                tracing::warn!(path = %path, error = %e, "skipping source map");
            }
        }
    }

    /// The aggregate so far.
    pub fn coverage_model(&self) -> &CoverageModel {
        &self.model
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// Finish the run: synthesize, project, emit, then evaluate thresholds.
    pub fn on_run_complete(
        mut self,
        collaborators: &Collaborators<'_>,
        clock: &dyn Clock,
        console: &mut dyn Write,
    ) -> RunOutcome {
        let started_at = self.started_at.unwrap_or_else(|| clock.now());

        let mut synthesis_failures = Vec::new();
        if !self.config.collect_coverage_from.is_empty() {
            tracing::info!("Running coverage on untested files...");
            let candidates = collaborators
                .files
                .match_files(&self.config.collect_coverage_from, &self.config.root_dir);
            synthesis_failures = synthesize_untested(
                &mut self.model,
                &candidates,
                collaborators.reader,
                collaborators.generator,
                &mut self.source_maps,
            );
        }

        let (coverage, mapped_sources) = if self.config.map_coverage {
            let projected = project_coverage(&self.model, &self.source_maps);
            (projected.model, Some(projected.sources))
        } else {
            (self.model, None)
        };

        let writers = select_writers(&self.config.coverage_reporters, self.config.use_stderr);
        let writer_failures = emit_reports(
            &coverage,
            &writers,
            mapped_sources.as_ref().map(|sources| sources as &dyn SourceFinder),
            &self.registry,
            &self.config.coverage_directory,
            console,
        );

        let summary = summarize(&coverage);
        let violations = match &self.config.thresholds {
            Some(rules) => check_thresholds(&coverage, rules),
            None => Vec::new(),
        };

        let status = if violations.is_empty() {
            CoverageStatus::Pass
        } else {
            let joined = violations
                .iter()
                .map(|violation| violation.message.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            if let Err(e) = writeln!(console, "{}", joined) {
                tracing::warn!(error = %e, "failed to print threshold violations");
            }
            CoverageStatus::Fail
        };

        RunOutcome {
            coverage,
            summary,
            violations,
            synthesis_failures,
            writer_failures,
            status,
            started_at,
            completed_at: clock.now(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use covreport_ports::{GeneratedCoverage, OriginalPosition};
    use covreport_types::{FileCoverage, Metric, Span, ThresholdRules};
    use std::cell::Cell;

    /// A test clock that returns a fixed time.
    struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        fn new(timestamp: &str) -> Self {
            Self {
                time: DateTime::parse_from_rfc3339(timestamp)
                    .unwrap()
                    .with_timezone(&Utc),
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    struct ListMatcher(Vec<String>);

    impl FileMatcher for ListMatcher {
        fn match_files(&self, _patterns: &[String], _root_dir: &Path) -> Vec<String> {
            self.0.clone()
        }
    }

    struct MapReader {
        files: BTreeMap<String, String>,
    }

    impl MapReader {
        fn new(entries: Vec<(&str, &str)>) -> Self {
            Self {
                files: entries
                    .into_iter()
                    .map(|(path, text)| (path.to_string(), text.to_string()))
                    .collect(),
            }
        }
    }

    impl SourceReader for MapReader {
        fn read_source(&self, path: &str) -> Result<String, String> {
            self.files
                .get(path)
                .cloned()
                .ok_or_else(|| format!("ENOENT: {}", path))
        }
    }

    /// One zero-hit statement per non-empty line. Lines reading `MAP <loc>`
    /// report a source map; a file reading `INVALID` is rejected.
    struct LineGenerator {
        calls: Cell<usize>,
    }

    impl LineGenerator {
        fn new() -> Self {
            Self { calls: Cell::new(0) }
        }
    }

    impl EmptyCoverageGenerator for LineGenerator {
        fn generate(&self, source: &str, path: &str) -> Result<Option<GeneratedCoverage>, String> {
            self.calls.set(self.calls.get() + 1);
            if source == "INVALID" {
                return Err("Unexpected token".to_string());
            }
            let mut coverage = FileCoverage::new(path);
            let mut source_map_path = None;
            for (index, line) in source.lines().enumerate() {
                if let Some(location) = line.strip_prefix("MAP ") {
                    source_map_path = Some(location.to_string());
                } else if !line.trim().is_empty() {
                    coverage.add_statement(Span::whole_line(index as u32 + 1), 0);
                }
            }
            if coverage.is_empty() {
                return Ok(None);
            }
            Ok(Some(GeneratedCoverage {
                coverage,
                source_map_path,
            }))
        }
    }

    /// Records registrations; `bundle.js` maps line N to `app.ts` line N.
    #[derive(Default)]
    struct RecordingStore {
        registered: Vec<(String, String)>,
        reject: bool,
    }

    impl SourceMapStore for RecordingStore {
        fn register(&mut self, path: &str, map_location: &str) -> Result<(), String> {
            if self.reject {
                return Err("bad map".to_string());
            }
            self.registered.push((path.to_string(), map_location.to_string()));
            Ok(())
        }

        fn has_map(&self, path: &str) -> bool {
            self.registered.iter().any(|(p, _)| p == path)
        }

        fn original_position(&self, path: &str, line: u32, column: u32) -> Option<OriginalPosition> {
            self.has_map(path).then(|| OriginalPosition {
                source: "/repo/src/app.ts".to_string(),
                line,
                column,
            })
        }

        fn original_source(&self, source: &str) -> Option<String> {
            (source == "/repo/src/app.ts").then(|| "let app = 1;\n".to_string())
        }
    }

    struct FailingWriter;

    impl CoverageWriter for FailingWriter {
        fn render(
            &self,
            _model: &CoverageModel,
            _sources: Option<&dyn SourceFinder>,
        ) -> Result<Vec<Artifact>, String> {
            Err("disk quota exceeded".to_string())
        }
    }

    /// Emits a single artifact at a fixed path.
    struct PathWriter(&'static str);

    impl CoverageWriter for PathWriter {
        fn render(
            &self,
            _model: &CoverageModel,
            _sources: Option<&dyn SourceFinder>,
        ) -> Result<Vec<Artifact>, String> {
            Ok(vec![Artifact::File {
                path: PathBuf::from(self.0),
                contents: "escaped".to_string(),
            }])
        }
    }

    fn record(path: &str, hits: &[u64]) -> FileCoverage {
        let mut record = FileCoverage::new(path);
        for (index, count) in hits.iter().enumerate() {
            record.add_statement(Span::whole_line(index as u32 + 1), *count);
        }
        record
    }

    fn single(path: &str, hits: &[u64]) -> CoverageModel {
        CoverageModel::from([(path.to_string(), record(path, hits))])
    }

    fn config(dir: &Path) -> EffectiveConfig {
        EffectiveConfig {
            root_dir: PathBuf::from("/repo"),
            coverage_directory: dir.to_path_buf(),
            coverage_reporters: vec!["json".to_string()],
            ..Default::default()
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|name| name.to_string()).collect()
    }

    // ------------------------------------------------------------------------
    // Writer Selection
    // ------------------------------------------------------------------------

    #[test]
    fn test_select_writers_appends_summary() {
        assert_eq!(
            select_writers(&names(&["json", "lcov"]), false),
            names(&["json", "lcov", "text-summary"])
        );
    }

    #[test]
    fn test_select_writers_keeps_text_lists() {
        assert_eq!(
            select_writers(&names(&["json", "text"]), false),
            names(&["json", "text"])
        );
        assert_eq!(
            select_writers(&names(&["text-summary"]), false),
            names(&["text-summary"])
        );
    }

    #[test]
    fn test_select_writers_respects_stderr_and_empty() {
        assert_eq!(select_writers(&names(&["json"]), true), names(&["json"]));
        assert!(select_writers(&[], false).is_empty());
    }

    // ------------------------------------------------------------------------
    // Synthesis
    // ------------------------------------------------------------------------

    #[test]
    fn test_synthesis_never_overwrites() {
        let mut model = single("/repo/a.js", &[5]);
        let reader = MapReader::new(vec![("/repo/a.js", "x\ny\n")]);
        let generator = LineGenerator::new();
        let mut store = RecordingStore::default();

        let failures = synthesize_untested(
            &mut model,
            &names(&["/repo/a.js"]),
            &reader,
            &generator,
            &mut store,
        );

        assert!(failures.is_empty());
        assert_eq!(generator.calls.get(), 0);
        assert_eq!(model["/repo/a.js"].s.get(&0), Some(&5));
        assert_eq!(model["/repo/a.js"].statement_map.len(), 1);
    }

    #[test]
    fn test_synthesis_adds_zero_hit_records() {
        let mut model = CoverageModel::new();
        let reader = MapReader::new(vec![("/repo/c.js", "a\nb\nc\n")]);
        let mut store = RecordingStore::default();

        synthesize_untested(
            &mut model,
            &names(&["/repo/c.js"]),
            &reader,
            &LineGenerator::new(),
            &mut store,
        );

        let summary = summarize(&model);
        assert_eq!(summary.statements.total, 3);
        assert_eq!(summary.statements.covered, 0);
        assert_eq!(summary.statements.pct, 0.0);
    }

    #[test]
    fn test_synthesis_failures_do_not_stop_others() {
        let mut model = CoverageModel::new();
        let reader = MapReader::new(vec![("/repo/bad.js", "INVALID"), ("/repo/ok.js", "x\n")]);
        let mut store = RecordingStore::default();

        let failures = synthesize_untested(
            &mut model,
            &names(&["/repo/missing.js", "/repo/bad.js", "/repo/ok.js"]),
            &reader,
            &LineGenerator::new(),
            &mut store,
        );

        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].path, "/repo/missing.js");
        assert!(failures[0].message.contains("ENOENT"));
        assert_eq!(
            failures[1].message,
            "Failed to collect coverage from /repo/bad.js: Unexpected token"
        );
        assert_eq!(model.keys().collect::<Vec<_>>(), vec!["/repo/ok.js"]);
    }

    #[test]
    fn test_synthesis_registers_generator_source_map() {
        let mut model = CoverageModel::new();
        let reader = MapReader::new(vec![("/repo/dist/c.js", "x\nMAP /repo/dist/c.js.map\n")]);
        let mut store = RecordingStore::default();

        synthesize_untested(
            &mut model,
            &names(&["/repo/dist/c.js"]),
            &reader,
            &LineGenerator::new(),
            &mut store,
        );

        assert_eq!(
            store.registered,
            vec![("/repo/dist/c.js".to_string(), "/repo/dist/c.js.map".to_string())]
        );
    }

    #[test]
    fn test_synthesis_skips_files_with_nothing_to_cover() {
        let mut model = CoverageModel::new();
        let reader = MapReader::new(vec![("/repo/empty.js", "\n\n")]);
        let failures = synthesize_untested(
            &mut model,
            &names(&["/repo/empty.js"]),
            &reader,
            &LineGenerator::new(),
            &mut RecordingStore::default(),
        );
        assert!(failures.is_empty());
        assert!(model.is_empty());
    }

    // ------------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------------

    #[test]
    fn test_failing_writer_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = WriterRegistry::with_builtin();
        registry.register("broken", Box::new(FailingWriter));
        let mut console = Vec::new();

        let failures = emit_reports(
            &single("/repo/a.js", &[1]),
            &names(&["broken", "json", "text-summary"]),
            None,
            &registry,
            dir.path(),
            &mut console,
        );

        assert_eq!(
            failures,
            vec![WriterFailure {
                writer: "broken".to_string(),
                message: "broken failed to render: disk quota exceeded".to_string(),
            }]
        );
        assert!(dir.path().join("coverage-final.json").exists());
        assert!(String::from_utf8(console).unwrap().contains("Coverage summary"));
    }

    #[test]
    fn test_artifacts_cannot_leave_coverage_directory() {
        let root = tempfile::tempdir().unwrap();
        let coverage_dir = root.path().join("coverage");
        let mut registry = WriterRegistry::new();
        registry.register("parent", Box::new(PathWriter("../escape.txt")));
        registry.register("nested", Box::new(PathWriter("sub/../../escape.txt")));
        registry.register("absolute", Box::new(PathWriter("/tmp/covreport-escape.txt")));
        registry.register("inside", Box::new(PathWriter("pages/ok.txt")));

        let failures = emit_reports(
            &CoverageModel::new(),
            &names(&["parent", "nested", "absolute", "inside"]),
            None,
            &registry,
            &coverage_dir,
            &mut Vec::new(),
        );

        let failed: Vec<_> = failures.iter().map(|f| f.writer.as_str()).collect();
        assert_eq!(failed, vec!["parent", "nested", "absolute"]);
        assert!(failures[0].message.contains("outside the coverage directory"));
        assert!(!root.path().join("escape.txt").exists());
        assert!(coverage_dir.join("pages/ok.txt").exists());
    }

    #[test]
    fn test_unknown_writer_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let failures = emit_reports(
            &CoverageModel::new(),
            &names(&["cobertura", "json", "cobertura"]),
            None,
            &WriterRegistry::with_builtin(),
            dir.path(),
            &mut Vec::new(),
        );

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].message, "unknown coverage reporter 'cobertura'");
    }

    #[test]
    fn test_write_failure_includes_source_chain() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "not a directory").unwrap();

        let failures = emit_reports(
            &CoverageModel::new(),
            &names(&["json"]),
            None,
            &WriterRegistry::with_builtin(),
            &blocker,
            &mut Vec::new(),
        );

        assert_eq!(failures.len(), 1);
        assert!(failures[0].message.starts_with("failed to "));
        assert!(failures[0].message.contains(": "));
    }

    #[test]
    fn test_html_writer_receives_mapped_sources() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = RecordingStore::default();
        store.register("/repo/dist/bundle.js", "bundle.js.map").unwrap();

        let mut reporter = CoverageReporter::new(
            EffectiveConfig {
                coverage_reporters: names(&["html"]),
                map_coverage: true,
                ..config(dir.path())
            },
            store,
        );
        reporter.on_test_result(TestResult::new(
            "bundle.test.js",
            Some(single("/repo/dist/bundle.js", &[1])),
        ));

        let clock = FixedClock::new("2026-02-02T00:00:00Z");
        let collaborators = Collaborators {
            files: &ListMatcher(vec![]),
            reader: &MapReader::new(vec![]),
            generator: &LineGenerator::new(),
        };
        let outcome = reporter.on_run_complete(&collaborators, &clock, &mut Vec::new());

        assert!(outcome.writer_failures.is_empty());
        assert!(outcome.coverage.contains_key("/repo/src/app.ts"));
        let page = std::fs::read_to_string(dir.path().join("app.ts.html")).unwrap();
        assert!(page.contains("let app = 1;"));
    }

    // ------------------------------------------------------------------------
    // Reporter Lifecycle
    // ------------------------------------------------------------------------

    #[test]
    fn test_on_test_result_merges_and_registers_maps() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = CoverageReporter::new(config(dir.path()), RecordingStore::default());

        let mut result = TestResult::new("a.test.js", Some(single("/repo/a.js", &[1])));
        result
            .source_maps
            .insert("/repo/a.js".to_string(), "/repo/a.js.map".to_string());
        reporter.on_test_result(result);
        reporter.on_test_result(TestResult::new("b.test.js", Some(single("/repo/a.js", &[1]))));

        assert_eq!(reporter.coverage_model()["/repo/a.js"].s.get(&0), Some(&2));
        assert!(reporter.source_maps.has_map("/repo/a.js"));
    }

    #[test]
    fn test_result_without_coverage_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = CoverageReporter::new(config(dir.path()), RecordingStore::default());

        let mut result = TestResult::new("a.test.js", None);
        result
            .source_maps
            .insert("/repo/a.js".to_string(), "/repo/a.js.map".to_string());
        reporter.on_test_result(result);

        assert!(reporter.coverage_model().is_empty());
        assert!(reporter.source_maps.registered.is_empty());
    }

    #[test]
    fn test_rejected_source_map_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = RecordingStore {
            reject: true,
            ..Default::default()
        };
        let mut reporter = CoverageReporter::new(config(dir.path()), store);

        let mut result = TestResult::new("a.test.js", Some(single("/repo/a.js", &[1])));
        result
            .source_maps
            .insert("/repo/a.js".to_string(), "broken.map".to_string());
        reporter.on_test_result(result);

        assert_eq!(reporter.coverage_model().len(), 1);
    }

    #[test]
    fn test_end_to_end_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = CoverageReporter::new(
            EffectiveConfig {
                collect_coverage_from: names(&["src/**/*.js"]),
                thresholds: Some(ThresholdRules {
                    statements: Some(70.0),
                    ..Default::default()
                }),
                ..config(dir.path())
            },
            RecordingStore::default(),
        );

        let start = FixedClock::new("2026-02-02T00:00:00Z");
        let end = FixedClock::new("2026-02-02T00:00:01.500Z");
        reporter.on_run_start(&start);
        reporter.on_test_result(TestResult::new("a.test.js", Some(single("/repo/src/a.js", &[1, 1]))));
        reporter.on_test_result(TestResult::new("b.test.js", Some(single("/repo/src/b.js", &[1, 0]))));

        let collaborators = Collaborators {
            files: &ListMatcher(names(&["/repo/src/a.js", "/repo/src/b.js", "/repo/src/c.js"])),
            reader: &MapReader::new(vec![("/repo/src/c.js", "module.exports = 1;\n")]),
            generator: &LineGenerator::new(),
        };
        let mut console = Vec::new();
        let outcome = reporter.on_run_complete(&collaborators, &end, &mut console);

        assert_eq!(outcome.summary.statements.total, 5);
        assert_eq!(outcome.summary.statements.covered, 3);
        assert_eq!(outcome.summary.statements.pct, 60.0);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].metric, Metric::Statements);
        assert_eq!(outcome.status, CoverageStatus::Fail);
        assert_eq!(outcome.exit_code(), 2);
        assert_eq!(
            outcome.error_message().as_deref(),
            Some("Coverage for statements (60%) does not meet global threshold (70%)")
        );
        assert!(outcome.synthesis_failures.is_empty());
        assert!(outcome.writer_failures.is_empty());
        assert!(dir.path().join("coverage-final.json").exists());

        let console = String::from_utf8(console).unwrap();
        assert!(console.contains("Coverage summary"));
        assert!(console.ends_with("does not meet global threshold (70%)\n"));

        let receipt = outcome.receipt();
        assert_eq!(receipt.files, 3);
        assert_eq!(receipt.run.duration_ms, Some(1500));
        assert_eq!(receipt.run.started_at, "2026-02-02T00:00:00+00:00");
    }

    #[test]
    fn test_run_without_thresholds_passes() {
        let dir = tempfile::tempdir().unwrap();
        let mut reporter = CoverageReporter::new(config(dir.path()), RecordingStore::default());
        reporter.on_test_result(TestResult::new("a.test.js", Some(single("/repo/a.js", &[0]))));

        let clock = FixedClock::new("2026-02-02T00:00:00Z");
        let collaborators = Collaborators {
            files: &ListMatcher(names(&["/repo/never-matched.js"])),
            reader: &MapReader::new(vec![]),
            generator: &LineGenerator::new(),
        };
        let outcome = reporter.on_run_complete(&collaborators, &clock, &mut Vec::new());

        assert_eq!(outcome.status, CoverageStatus::Pass);
        assert_eq!(outcome.exit_code(), 0);
        assert!(outcome.error_message().is_none());
        assert_eq!(outcome.started_at, outcome.completed_at);
        // Synthesis is off when no collect patterns are configured
        assert_eq!(outcome.coverage.len(), 1);
    }

    #[test]
    fn test_writer_failure_does_not_block_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = WriterRegistry::new();
        registry.register("broken", Box::new(FailingWriter));
        let mut reporter = CoverageReporter::new(
            EffectiveConfig {
                coverage_reporters: names(&["broken"]),
                use_stderr: true,
                thresholds: Some(ThresholdRules {
                    lines: Some(-0.5),
                    ..Default::default()
                }),
                ..config(dir.path())
            },
            RecordingStore::default(),
        )
        .with_registry(registry);
        reporter.on_test_result(TestResult::new("a.test.js", Some(single("/repo/a.js", &[0, 1]))));

        let clock = FixedClock::new("2026-02-02T00:00:00Z");
        let collaborators = Collaborators {
            files: &ListMatcher(vec![]),
            reader: &MapReader::new(vec![]),
            generator: &LineGenerator::new(),
        };
        let outcome = reporter.on_run_complete(&collaborators, &clock, &mut Vec::new());

        assert_eq!(outcome.writer_failures.len(), 1);
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(
            outcome.violations[0].message,
            "Uncovered count for lines (1) exceeds global threshold (0)"
        );

        let receipt = outcome.receipt();
        assert_eq!(receipt.failures.len(), 1);
        assert_eq!(receipt.failures[0].stage, FailureStage::Writer);
    }

    #[test]
    fn test_error_chain_joins_sources() {
        let err = EmitError::WriteFile {
            path: PathBuf::from("/out/lcov.info"),
            source: std::io::Error::other("read-only file system"),
        };
        assert_eq!(
            error_chain(&err),
            "failed to write /out/lcov.info: read-only file system"
        );
    }
}
