//! Pure domain logic for covreport.
//!
//! This crate implements the side-effect free parts of the pipeline:
//! merging partial coverage records, summarizing a coverage model,
//! evaluating threshold rules, and projecting locations through source maps.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use covreport_ports::{SourceFinder, SourceMapStore};
use covreport_types::{
    BranchMeta, CoverageModel, CoverageSummary, FileCoverage, FunctionMeta, Metric,
    MetricSummary, Position, Span, ThresholdRule, ThresholdRules, Violation, ViolationKind,
};

// ============================================================================
// Merge Engine
// ============================================================================

/// Fold every record of `incoming` into `model`.
///
/// Files absent from the model are inserted as they are. Files already present
/// are combined item by item: hit counts for the same id are summed and ids
/// present on only one side keep their count.
///
/// Merging is associative and commutative but not idempotent: submitting the
/// same execution twice doubles its hit counts.
///
/// # Examples
///
/// ```
/// use covreport_domain::merge;
/// use covreport_types::{CoverageModel, FileCoverage, Span};
///
/// let mut record = FileCoverage::new("/repo/a.js");
/// record.add_statement(Span::whole_line(1), 1);
///
/// let mut model = CoverageModel::new();
/// merge(&mut model, CoverageModel::from([("/repo/a.js".to_string(), record.clone())]));
/// merge(&mut model, CoverageModel::from([("/repo/a.js".to_string(), record)]));
///
/// assert_eq!(model["/repo/a.js"].s.get(&0), Some(&2));
/// ```
pub fn merge(model: &mut CoverageModel, incoming: CoverageModel) {
    for (path, record) in incoming {
        merge_file(model, path, record);
    }
}

/// Fold a single record into `model` under `path`.
pub fn merge_file(model: &mut CoverageModel, path: String, mut record: FileCoverage) {
    match model.entry(path) {
        Entry::Vacant(entry) => {
            if record.path.is_empty() {
                record.path = entry.key().clone();
            }
            entry.insert(record);
        }
        Entry::Occupied(mut entry) => merge_records(entry.get_mut(), record),
    }
}

/// Merge multiple models into a new one.
pub fn merge_all(models: Vec<CoverageModel>) -> CoverageModel {
    let mut merged = CoverageModel::new();
    for model in models {
        merge(&mut merged, model);
    }
    merged
}

/// Combine `other` into `target`, summing hits for shared ids.
pub fn merge_records(target: &mut FileCoverage, other: FileCoverage) {
    for (id, span) in other.statement_map {
        target.statement_map.entry(id).or_insert(span);
    }
    for (id, meta) in other.fn_map {
        target.fn_map.entry(id).or_insert(meta);
    }
    for (id, meta) in other.branch_map {
        target.branch_map.entry(id).or_insert(meta);
    }
    for (id, hits) in other.s {
        let current = target.s.entry(id).or_insert(0);
        *current = current.saturating_add(hits);
    }
    for (id, hits) in other.f {
        let current = target.f.entry(id).or_insert(0);
        *current = current.saturating_add(hits);
    }
    for (id, arms) in other.b {
        let current = target.b.entry(id).or_default();
        if current.len() < arms.len() {
            current.resize(arms.len(), 0);
        }
        for (slot, hits) in current.iter_mut().zip(arms) {
            *slot = slot.saturating_add(hits);
        }
    }
}

// ============================================================================
// Summary
// ============================================================================

/// Calculate a coverage percentage rounded half-up to two decimals.
///
/// Returns 100.0 when there is nothing to cover.
pub fn percent(covered: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let thousandths = (covered as u128 * 100_000) / total as u128;
    let basis_points = (thousandths + 5) / 10;
    basis_points as f64 / 100.0
}

fn metric_summary(total: u64, covered: u64) -> MetricSummary {
    MetricSummary {
        total,
        covered,
        pct: percent(covered, total),
    }
}

fn count_hits<'a>(hits: impl Iterator<Item = &'a u64>) -> (u64, u64) {
    hits.fold((0, 0), |(total, covered), hits| {
        (total + 1, covered + u64::from(*hits > 0))
    })
}

fn raw_counts(record: &FileCoverage) -> [(Metric, u64, u64); 4] {
    let (statements_total, statements_covered) = count_hits(record.s.values());
    let (functions_total, functions_covered) = count_hits(record.f.values());
    let (branches_total, branches_covered) = count_hits(record.b.values().flatten());
    let lines = record.line_coverage();
    let (lines_total, lines_covered) = count_hits(lines.values());
    [
        (Metric::Statements, statements_total, statements_covered),
        (Metric::Branches, branches_total, branches_covered),
        (Metric::Lines, lines_total, lines_covered),
        (Metric::Functions, functions_total, functions_covered),
    ]
}

/// Summarize a single file.
pub fn summarize_file(record: &FileCoverage) -> CoverageSummary {
    let mut summary = CoverageSummary::default();
    for (metric, total, covered) in raw_counts(record) {
        *summary.get_mut(metric) = metric_summary(total, covered);
    }
    summary
}

/// Summarize the whole model. Totals are summed before percentages are taken.
pub fn summarize(model: &CoverageModel) -> CoverageSummary {
    let mut totals: BTreeMap<Metric, (u64, u64)> = BTreeMap::new();
    for record in model.values() {
        for (metric, total, covered) in raw_counts(record) {
            let entry = totals.entry(metric).or_insert((0, 0));
            entry.0 += total;
            entry.1 += covered;
        }
    }

    let mut summary = CoverageSummary::default();
    for metric in Metric::ALL {
        let (total, covered) = totals.get(&metric).copied().unwrap_or((0, 0));
        *summary.get_mut(metric) = metric_summary(total, covered);
    }
    summary
}

// ============================================================================
// Threshold Evaluation
// ============================================================================

/// Evaluate threshold rules against the global summary of `model`.
///
/// Every metric with a rule is checked; violations accumulate in the order
/// statements, branches, lines, functions.
pub fn check_thresholds(model: &CoverageModel, rules: &ThresholdRules) -> Vec<Violation> {
    check_summary_thresholds(&summarize(model), rules)
}

/// Evaluate threshold rules against an already computed summary.
pub fn check_summary_thresholds(
    summary: &CoverageSummary,
    rules: &ThresholdRules,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    for metric in Metric::ALL {
        let Some(rule) = rules.rule(metric) else {
            continue;
        };
        let actual = summary.get(metric);

        match rule {
            ThresholdRule::MinPercent(threshold) => {
                if actual.pct < threshold {
                    violations.push(Violation {
                        metric,
                        kind: ViolationKind::BelowPercent {
                            actual_pct: actual.pct,
                            threshold_pct: threshold,
                        },
                        message: format!(
                            "Coverage for {} ({}%) does not meet global threshold ({}%)",
                            metric, actual.pct, threshold
                        ),
                    });
                }
            }
            ThresholdRule::MaxUncovered(limit) => {
                let uncovered = actual.uncovered();
                if uncovered > limit {
                    violations.push(Violation {
                        metric,
                        kind: ViolationKind::TooManyUncovered { uncovered, limit },
                        message: format!(
                            "Uncovered count for {} ({}) exceeds global threshold ({})",
                            metric, uncovered, limit
                        ),
                    });
                }
            }
        }
    }

    violations
}

// ============================================================================
// Source-Map Projection
// ============================================================================

/// Original source texts collected during projection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MappedSources {
    sources: BTreeMap<String, String>,
}

impl MappedSources {
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

impl SourceFinder for MappedSources {
    fn find_source(&self, path: &str) -> Option<String> {
        self.sources.get(path).cloned()
    }
}

/// Result of projecting a model through source maps.
#[derive(Debug, Clone)]
pub struct ProjectedCoverage {
    /// Model keyed by original source paths.
    pub model: CoverageModel,
    /// Original texts for every path the projection produced.
    pub sources: MappedSources,
}

/// Per-original-file accumulator that collapses items landing on the same location.
struct ProjectedFile {
    coverage: FileCoverage,
    statements: HashMap<Span, u32>,
    functions: HashMap<(String, Span), u32>,
    branches: HashMap<(Span, Vec<Span>), u32>,
}

impl ProjectedFile {
    fn new(path: &str) -> Self {
        Self {
            coverage: FileCoverage::new(path),
            statements: HashMap::new(),
            functions: HashMap::new(),
            branches: HashMap::new(),
        }
    }

    fn add_statement(&mut self, span: Span, hits: u64) {
        if let Some(id) = self.statements.get(&span) {
            let current = self.coverage.s.entry(*id).or_insert(0);
            *current = current.saturating_add(hits);
        } else {
            let id = self.coverage.add_statement(span, hits);
            self.statements.insert(span, id);
        }
    }

    fn add_function(&mut self, meta: FunctionMeta, hits: u64) {
        let key = (meta.name.clone(), meta.loc);
        if let Some(id) = self.functions.get(&key) {
            let current = self.coverage.f.entry(*id).or_insert(0);
            *current = current.saturating_add(hits);
        } else {
            let id = self.coverage.add_function(meta, hits);
            self.functions.insert(key, id);
        }
    }

    fn add_branch(&mut self, meta: BranchMeta, hits: Vec<u64>) {
        let key = (meta.loc, meta.locations.clone());
        if let Some(id) = self.branches.get(&key) {
            let current = self.coverage.b.entry(*id).or_default();
            for (slot, arm_hits) in current.iter_mut().zip(hits) {
                *slot = slot.saturating_add(arm_hits);
            }
        } else {
            let id = self.coverage.add_branch(meta, hits);
            self.branches.insert(key, id);
        }
    }
}

/// Map both ends of a generated span. Both ends must land in the same source.
fn map_span<S: SourceMapStore + ?Sized>(store: &S, path: &str, span: &Span) -> Option<(String, Span)> {
    let start = store.original_position(path, span.start.line, span.start.column.unwrap_or(0))?;
    // End columns are exclusive; look up the last covered character.
    let end_column = span.end.column.map(|column| column.saturating_sub(1));
    let end = store.original_position(path, span.end.line, end_column.unwrap_or(0))?;
    if start.source != end.source {
        return None;
    }

    let mapped = Span {
        start: Position::new(start.line, start.column),
        end: Position {
            line: end.line,
            column: end_column.map(|_| end.column + 1),
        },
    };
    Some((start.source, mapped))
}

fn project_record<S: SourceMapStore + ?Sized>(
    store: &S,
    path: &str,
    record: &FileCoverage,
    files: &mut BTreeMap<String, ProjectedFile>,
) {
    for (id, span) in &record.statement_map {
        let hits = record.s.get(id).copied().unwrap_or(0);
        if let Some((source, mapped)) = map_span(store, path, span) {
            files
                .entry(source.clone())
                .or_insert_with(|| ProjectedFile::new(&source))
                .add_statement(mapped, hits);
        }
    }

    for (id, meta) in &record.fn_map {
        let hits = record.f.get(id).copied().unwrap_or(0);
        let Some((source, loc)) = map_span(store, path, &meta.loc) else {
            continue;
        };
        let decl = match map_span(store, path, &meta.decl) {
            Some((decl_source, decl)) if decl_source == source => decl,
            _ => loc,
        };
        let mapped = FunctionMeta {
            name: meta.name.clone(),
            decl,
            loc,
            line: loc.start.line,
        };
        files
            .entry(source.clone())
            .or_insert_with(|| ProjectedFile::new(&source))
            .add_function(mapped, hits);
    }

    for (id, meta) in &record.branch_map {
        let hits = record.b.get(id).cloned().unwrap_or_default();
        let mut source: Option<String> = None;
        let mut locations = Vec::with_capacity(meta.locations.len());
        for location in &meta.locations {
            let Some((arm_source, mapped)) = map_span(store, path, location) else {
                break;
            };
            if source.as_ref().is_some_and(|s| *s != arm_source) {
                break;
            }
            source = Some(arm_source);
            locations.push(mapped);
        }
        let Some(source) = source else {
            continue;
        };
        if locations.len() != meta.locations.len() {
            continue;
        }
        let loc = match map_span(store, path, &meta.loc) {
            Some((loc_source, loc)) if loc_source == source => loc,
            _ => locations[0],
        };
        let mapped = BranchMeta {
            kind: meta.kind.clone(),
            loc,
            locations,
            line: loc.start.line,
        };
        files
            .entry(source.clone())
            .or_insert_with(|| ProjectedFile::new(&source))
            .add_branch(mapped, hits);
    }
}

/// Rewrite every location of `model` into original-source coordinates.
///
/// Files without a registered map pass through unchanged. Items whose
/// locations cannot be mapped are dropped; items from different generated
/// locations that land on the same original location are merged by summing.
pub fn project_coverage<S: SourceMapStore + ?Sized>(
    model: &CoverageModel,
    store: &S,
) -> ProjectedCoverage {
    let mut projected = CoverageModel::new();
    let mut files: BTreeMap<String, ProjectedFile> = BTreeMap::new();

    for (path, record) in model {
        if store.has_map(path) {
            project_record(store, path, record, &mut files);
        } else {
            merge_file(&mut projected, path.clone(), record.clone());
        }
    }

    let original_paths: BTreeSet<String> = files.keys().cloned().collect();
    for (source, file) in files {
        merge_file(&mut projected, source, file.coverage);
    }

    let sources = original_paths
        .into_iter()
        .filter_map(|path| store.original_source(&path).map(|text| (path, text)))
        .collect();

    ProjectedCoverage {
        model: projected,
        sources: MappedSources { sources },
    }
}

// ============================================================================
// Tests
// ============================================================================


// ============================================================================
// Property Tests
// ============================================================================

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Statement ids map to fixed spans so metadata agrees across executions.
    fn record_from(path: &str, hits: BTreeMap<u32, u64>) -> FileCoverage {
        let mut record = FileCoverage::new(path);
        for (id, count) in hits {
            record.statement_map.insert(id, Span::whole_line(id + 1));
            record.s.insert(id, count);
        }
        record
    }

    fn model_strategy() -> impl Strategy<Value = CoverageModel> {
        prop::collection::btree_map(
            prop::sample::select(vec!["/a.js", "/b.js", "/c.js"]),
            prop::collection::btree_map(0u32..20, 0u64..1000, 0..8),
            0..3,
        )
        .prop_map(|files| {
            files
                .into_iter()
                .map(|(path, hits)| (path.to_string(), record_from(path, hits)))
                .collect()
        })
    }

    proptest! {
        /// Merge order does not matter.
        #[test]
        fn merge_is_commutative(a in model_strategy(), b in model_strategy()) {
            let ab = merge_all(vec![a.clone(), b.clone()]);
            let ba = merge_all(vec![b, a]);
            prop_assert_eq!(ab, ba);
        }

        /// Grouping of merges does not matter.
        #[test]
        fn merge_is_associative(
            a in model_strategy(),
            b in model_strategy(),
            c in model_strategy(),
        ) {
            let left = merge_all(vec![merge_all(vec![a.clone(), b.clone()]), c.clone()]);
            let right = merge_all(vec![a, merge_all(vec![b, c])]);
            prop_assert_eq!(left, right);
        }

        /// Merging into an empty model is identity.
        #[test]
        fn merge_with_empty_is_identity(a in model_strategy()) {
            let merged = merge_all(vec![a.clone(), CoverageModel::new()]);
            prop_assert_eq!(merged, a);
        }

        /// Summed hit totals are preserved.
        #[test]
        fn merge_preserves_hit_totals(a in model_strategy(), b in model_strategy()) {
            let total = |m: &CoverageModel| -> u64 {
                m.values().flat_map(|r| r.s.values()).sum()
            };
            let merged = merge_all(vec![a.clone(), b.clone()]);
            prop_assert_eq!(total(&merged), total(&a) + total(&b));
        }

        /// Percentages stay within bounds.
        #[test]
        fn percent_is_bounded(total in 0u64..10_000, covered_ratio in 0.0f64..=1.0) {
            let covered = (total as f64 * covered_ratio) as u64;
            let pct = percent(covered, total);
            prop_assert!((0.0..=100.0).contains(&pct));
        }
    }
}
