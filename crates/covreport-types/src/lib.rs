//! Core types and DTOs for covreport.
//!
//! This crate defines the data shared by every other covreport crate: the
//! per-file coverage record, the run-wide coverage model, derived summaries,
//! threshold rules, violations, and the run receipt schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Schema Constants
// ============================================================================

/// Schema identifier for the run receipt written by the CLI.
pub const RECEIPT_SCHEMA_ID: &str = "covreport.receipt.v1";

/// Name of the only threshold scope currently recognized.
pub const GLOBAL_SCOPE: &str = "global";

// ============================================================================
// Metrics
// ============================================================================

/// One of the four coverage categories tracked per file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Statements,
    Branches,
    Lines,
    Functions,
}

impl Metric {
    /// All metrics, in the order thresholds are evaluated and reported.
    pub const ALL: [Metric; 4] = [
        Metric::Statements,
        Metric::Branches,
        Metric::Lines,
        Metric::Functions,
    ];

    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Statements => "statements",
            Metric::Branches => "branches",
            Metric::Lines => "lines",
            Metric::Functions => "functions",
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Locations
// ============================================================================

/// A position in a source file. Lines are 1-indexed, columns 0-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    /// Column, when the producer recorded one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self {
            line,
            column: Some(column),
        }
    }
}

/// A half-open source range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Position,
    pub end: Position,
}

impl Span {
    /// Create a span from explicit line/column pairs.
    pub fn new(start_line: u32, start_col: u32, end_line: u32, end_col: u32) -> Self {
        Self {
            start: Position::new(start_line, start_col),
            end: Position::new(end_line, end_col),
        }
    }

    /// A span covering a whole line whose width is unknown.
    pub fn whole_line(line: u32) -> Self {
        Self {
            start: Position::new(line, 0),
            end: Position { line, column: None },
        }
    }
}

/// Static description of an instrumented function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionMeta {
    pub name: String,
    /// Location of the declaration (name) only.
    pub decl: Span,
    /// Location of the whole function body.
    pub loc: Span,
    #[serde(default)]
    pub line: u32,
}

/// Static description of an instrumented branch point and its arms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMeta {
    /// Branch kind as reported by the instrumenter (`if`, `switch`, `cond-expr`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    pub loc: Span,
    /// One location per arm.
    pub locations: Vec<Span>,
    #[serde(default)]
    pub line: u32,
}

// ============================================================================
// Coverage Records
// ============================================================================

/// Coverage record for a single source file.
///
/// Items are keyed by file-local ids that stay stable across repeated
/// executions of the same unmodified file, so counts for one id coming from
/// different executions can be summed. Line coverage is derived from the
/// statements (see [`FileCoverage::line_coverage`]).
///
/// The serialized shape matches istanbul's `coverage-final.json` entries.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileCoverage {
    /// Absolute path of the source file.
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub statement_map: BTreeMap<u32, Span>,
    #[serde(default)]
    pub fn_map: BTreeMap<u32, FunctionMeta>,
    #[serde(default)]
    pub branch_map: BTreeMap<u32, BranchMeta>,
    /// Statement hit counts.
    #[serde(default)]
    pub s: BTreeMap<u32, u64>,
    /// Function hit counts.
    #[serde(default)]
    pub f: BTreeMap<u32, u64>,
    /// Branch hit counts, one entry per arm.
    #[serde(default)]
    pub b: BTreeMap<u32, Vec<u64>>,
}

fn next_id<V>(map: &BTreeMap<u32, V>) -> u32 {
    map.keys().next_back().map_or(0, |id| id + 1)
}

impl FileCoverage {
    /// Create an empty record for `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Append a statement and return its id.
    pub fn add_statement(&mut self, span: Span, hits: u64) -> u32 {
        let id = next_id(&self.statement_map);
        self.statement_map.insert(id, span);
        self.s.insert(id, hits);
        id
    }

    /// Append a function and return its id.
    pub fn add_function(&mut self, meta: FunctionMeta, hits: u64) -> u32 {
        let id = next_id(&self.fn_map);
        self.fn_map.insert(id, meta);
        self.f.insert(id, hits);
        id
    }

    /// Append a branch point and return its id.
    ///
    /// `hits` is padded with zeros (or truncated) to the number of arms.
    pub fn add_branch(&mut self, meta: BranchMeta, mut hits: Vec<u64>) -> u32 {
        let id = next_id(&self.branch_map);
        hits.resize(meta.locations.len(), 0);
        self.branch_map.insert(id, meta);
        self.b.insert(id, hits);
        id
    }

    /// Set every hit count to zero, keeping the items.
    pub fn reset_hits(&mut self) {
        self.s.values_mut().for_each(|hits| *hits = 0);
        self.f.values_mut().for_each(|hits| *hits = 0);
        self.b
            .values_mut()
            .for_each(|arms| arms.iter_mut().for_each(|hits| *hits = 0));
    }

    /// Derive line coverage: each statement contributes its start line, and a
    /// line's hit count is the maximum over statements starting on it.
    pub fn line_coverage(&self) -> BTreeMap<u32, u64> {
        let mut lines = BTreeMap::new();
        for (id, span) in &self.statement_map {
            let hits = self.s.get(id).copied().unwrap_or(0);
            let entry = lines.entry(span.start.line).or_insert(hits);
            if hits > *entry {
                *entry = hits;
            }
        }
        lines
    }

    /// Whether the record has no instrumentable items at all.
    pub fn is_empty(&self) -> bool {
        self.statement_map.is_empty() && self.fn_map.is_empty() && self.branch_map.is_empty()
    }
}

/// Run-wide coverage: absolute file path to its record.
pub type CoverageModel = BTreeMap<String, FileCoverage>;

// ============================================================================
// Summaries
// ============================================================================

/// Totals for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    /// Number of items of this kind.
    pub total: u64,
    /// Number of items with at least one hit.
    pub covered: u64,
    /// Covered percentage, rounded half-up to two decimals; 100 when `total` is 0.
    pub pct: f64,
}

impl MetricSummary {
    /// Number of items with zero hits.
    pub fn uncovered(&self) -> u64 {
        self.total.saturating_sub(self.covered)
    }
}

/// Derived totals for all four metrics.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub lines: MetricSummary,
    pub statements: MetricSummary,
    pub functions: MetricSummary,
    pub branches: MetricSummary,
}

impl CoverageSummary {
    /// Get the totals for a metric.
    pub fn get(&self, metric: Metric) -> &MetricSummary {
        match metric {
            Metric::Statements => &self.statements,
            Metric::Branches => &self.branches,
            Metric::Lines => &self.lines,
            Metric::Functions => &self.functions,
        }
    }

    /// Mutable access to the totals for a metric.
    pub fn get_mut(&mut self, metric: Metric) -> &mut MetricSummary {
        match metric {
            Metric::Statements => &mut self.statements,
            Metric::Branches => &mut self.branches,
            Metric::Lines => &mut self.lines,
            Metric::Functions => &mut self.functions,
        }
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Configured threshold values for one scope.
///
/// A non-negative value is a minimum percentage; a negative value `-N` is a
/// maximum of `N` uncovered items. Absent means unchecked.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ThresholdRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statements: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branches: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lines: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<f64>,
}

impl ThresholdRules {
    /// Raw configured value for a metric.
    pub fn value(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Statements => self.statements,
            Metric::Branches => self.branches,
            Metric::Lines => self.lines,
            Metric::Functions => self.functions,
        }
    }

    /// Set the raw value for a metric.
    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        match metric {
            Metric::Statements => self.statements = value,
            Metric::Branches => self.branches = value,
            Metric::Lines => self.lines = value,
            Metric::Functions => self.functions = value,
        }
    }

    /// Interpreted rule for a metric.
    pub fn rule(&self, metric: Metric) -> Option<ThresholdRule> {
        self.value(metric).map(ThresholdRule::from_value)
    }

    /// Whether no metric carries a rule.
    pub fn is_empty(&self) -> bool {
        Metric::ALL.iter().all(|metric| self.value(*metric).is_none())
    }
}

/// A threshold value interpreted by its sign.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdRule {
    /// Coverage percentage must be at least this value.
    MinPercent(f64),
    /// At most this many items may be uncovered.
    MaxUncovered(u64),
}

impl ThresholdRule {
    /// Interpret a configured value: negative means an uncovered-count ceiling.
    pub fn from_value(value: f64) -> Self {
        if value < 0.0 {
            ThresholdRule::MaxUncovered((-value) as u64)
        } else {
            ThresholdRule::MinPercent(value)
        }
    }
}

/// How a metric failed its rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    BelowPercent { actual_pct: f64, threshold_pct: f64 },
    TooManyUncovered { uncovered: u64, limit: u64 },
}

/// A single failed threshold rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub metric: Metric,
    #[serde(flatten)]
    pub kind: ViolationKind,
    /// Human-readable message naming the metric, the actual value and the limit.
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Terminal coverage status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoverageStatus {
    Pass,
    Fail,
}

// ============================================================================
// Receipt
// ============================================================================

/// Information about the tool that generated the receipt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
}

impl Default for Tool {
    fn default() -> Self {
        Self {
            name: "covreport".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Information about the run timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTiming {
    /// ISO 8601 timestamp when the run started.
    pub started_at: String,
    /// ISO 8601 timestamp when the run completed.
    pub ended_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Pipeline stage a non-fatal failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureStage {
    Synthesis,
    Writer,
}

/// A logged, non-fatal failure recorded in the receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub stage: FailureStage,
    /// File path (synthesis) or writer name (writer).
    pub subject: String,
    pub message: String,
}

/// Machine-readable outcome of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub schema: String,
    pub tool: Tool,
    pub run: RunTiming,
    pub status: CoverageStatus,
    pub files: usize,
    pub summary: CoverageSummary,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureRecord>,
}

// ============================================================================
// Tests
// ============================================================================
