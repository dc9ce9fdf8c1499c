//! Report writers for covreport.
//!
//! This crate provides the built-in [`CoverageWriter`] implementations that
//! turn a `CoverageModel` into report artifacts:
//! - `json`: istanbul `coverage-final.json`
//! - `json-summary`: per-file and total summaries in `coverage-summary.json`
//! - `lcov` / `lcovonly`: an LCOV tracefile in `lcov.info`
//! - `text`: a console table with uncovered line ranges
//! - `text-summary`: console totals
//! - `html`: an index page plus one hit-annotated page per file
//!
//! # Example
//!
//! ```rust
//! use covreport_render::{builtin_writer, render_text_summary};
//! use covreport_types::CoverageSummary;
//!
//! assert!(builtin_writer("lcov").is_some());
//! assert!(builtin_writer("cobertura").is_none());
//! let text = render_text_summary(&CoverageSummary::default());
//! assert!(text.contains("Coverage summary"));
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use covreport_domain::{summarize, summarize_file};
use covreport_ports::{Artifact, CoverageWriter, SourceFinder};
use covreport_types::{CoverageModel, CoverageSummary, FileCoverage, Metric, MetricSummary};
use serde_json::{Value, json};

/// Names of the writers provided by this crate, in documentation order.
pub const BUILTIN_WRITERS: [&str; 7] = [
    "json",
    "json-summary",
    "lcov",
    "lcovonly",
    "text",
    "text-summary",
    "html",
];

/// Construct a built-in writer by name.
pub fn builtin_writer(name: &str) -> Option<Box<dyn CoverageWriter>> {
    let writer: Box<dyn CoverageWriter> = match name {
        "json" => Box::new(JsonWriter),
        "json-summary" => Box::new(JsonSummaryWriter),
        "lcov" | "lcovonly" => Box::new(LcovWriter),
        "text" => Box::new(TextWriter),
        "text-summary" => Box::new(TextSummaryWriter),
        "html" => Box::new(HtmlWriter),
        _ => return None,
    };
    Some(writer)
}

// ============================================================================
// Path Display
// ============================================================================

/// Shorten paths relative to the deepest directory shared by every file.
fn display_paths(model: &CoverageModel) -> BTreeMap<&str, String> {
    let mut common: Option<Vec<&str>> = None;
    for path in model.keys() {
        let mut dirs: Vec<&str> = path.split('/').collect();
        dirs.pop();
        common = Some(match common {
            None => dirs,
            Some(prefix) => prefix
                .into_iter()
                .zip(dirs)
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| a)
                .collect(),
        });
    }

    let skip = common.map_or(0, |prefix| prefix.len());
    model
        .keys()
        .map(|path| {
            let relative = path.split('/').skip(skip).collect::<Vec<_>>().join("/");
            (path.as_str(), relative)
        })
        .collect()
}

/// Page file name for a display path, confined below the output directory.
///
/// Root, drive, `.` and `..` segments are dropped so a page can never be
/// written outside the directory the writer renders into.
fn page_name(display: &str) -> String {
    let segments: Vec<&str> = display
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .enumerate()
        .filter(|(index, segment)| !(*index == 0 && segment.ends_with(':')))
        .map(|(_, segment)| segment)
        .collect();
    if segments.is_empty() {
        "file".to_string()
    } else {
        segments.join("/")
    }
}

// ============================================================================
// JSON
// ============================================================================

/// Serialize the model in istanbul's `coverage-final.json` shape.
pub fn render_json(model: &CoverageModel) -> Result<String, String> {
    serde_json::to_string(model).map_err(|e| format!("failed to serialize coverage: {}", e))
}

/// Writes `coverage-final.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonWriter;

impl CoverageWriter for JsonWriter {
    fn render(
        &self,
        model: &CoverageModel,
        _sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String> {
        Ok(vec![Artifact::File {
            path: PathBuf::from("coverage-final.json"),
            contents: render_json(model)?,
        }])
    }
}

fn metric_json(summary: &MetricSummary) -> Value {
    json!({
        "total": summary.total,
        "covered": summary.covered,
        "skipped": 0,
        "pct": summary.pct,
    })
}

fn summary_json(summary: &CoverageSummary) -> Value {
    json!({
        "lines": metric_json(&summary.lines),
        "statements": metric_json(&summary.statements),
        "functions": metric_json(&summary.functions),
        "branches": metric_json(&summary.branches),
    })
}

/// Build the `coverage-summary.json` document: `total` plus one entry per file.
pub fn render_json_summary(model: &CoverageModel) -> Result<String, String> {
    let mut document = serde_json::Map::new();
    document.insert("total".to_string(), summary_json(&summarize(model)));
    for (path, record) in model {
        document.insert(path.clone(), summary_json(&summarize_file(record)));
    }
    serde_json::to_string(&Value::Object(document))
        .map_err(|e| format!("failed to serialize summary: {}", e))
}

/// Writes `coverage-summary.json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSummaryWriter;

impl CoverageWriter for JsonSummaryWriter {
    fn render(
        &self,
        model: &CoverageModel,
        _sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String> {
        Ok(vec![Artifact::File {
            path: PathBuf::from("coverage-summary.json"),
            contents: render_json_summary(model)?,
        }])
    }
}

// ============================================================================
// LCOV
// ============================================================================

fn render_lcov_record(output: &mut String, path: &str, record: &FileCoverage) {
    output.push_str("TN:\n");
    output.push_str(&format!("SF:{}\n", path));

    for meta in record.fn_map.values() {
        let line = if meta.line > 0 { meta.line } else { meta.loc.start.line };
        output.push_str(&format!("FN:{},{}\n", line, meta.name));
    }
    let mut functions_hit = 0;
    for (id, meta) in &record.fn_map {
        let hits = record.f.get(id).copied().unwrap_or(0);
        if hits > 0 {
            functions_hit += 1;
        }
        output.push_str(&format!("FNDA:{},{}\n", hits, meta.name));
    }
    output.push_str(&format!("FNF:{}\n", record.fn_map.len()));
    output.push_str(&format!("FNH:{}\n", functions_hit));

    let lines = record.line_coverage();
    for (line, hits) in &lines {
        output.push_str(&format!("DA:{},{}\n", line, hits));
    }
    output.push_str(&format!("LF:{}\n", lines.len()));
    output.push_str(&format!(
        "LH:{}\n",
        lines.values().filter(|hits| **hits > 0).count()
    ));

    let mut branches_found = 0;
    let mut branches_hit = 0;
    for (id, meta) in &record.branch_map {
        let line = if meta.line > 0 { meta.line } else { meta.loc.start.line };
        let arms = record.b.get(id).cloned().unwrap_or_default();
        for (arm, taken) in arms.iter().enumerate() {
            branches_found += 1;
            if *taken > 0 {
                branches_hit += 1;
            }
            output.push_str(&format!("BRDA:{},{},{},{}\n", line, id, arm, taken));
        }
    }
    output.push_str(&format!("BRF:{}\n", branches_found));
    output.push_str(&format!("BRH:{}\n", branches_hit));
    output.push_str("end_of_record\n");
}

/// Render the model as an LCOV tracefile.
pub fn render_lcov(model: &CoverageModel) -> String {
    let mut output = String::new();
    for (path, record) in model {
        render_lcov_record(&mut output, path, record);
    }
    output
}

/// Writes `lcov.info`. Serves both `lcov` and `lcovonly`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LcovWriter;

impl CoverageWriter for LcovWriter {
    fn render(
        &self,
        model: &CoverageModel,
        _sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String> {
        Ok(vec![Artifact::File {
            path: PathBuf::from("lcov.info"),
            contents: render_lcov(model),
        }])
    }
}

// ============================================================================
// Text
// ============================================================================

/// Collapse uncovered lines into ranges over consecutive instrumented lines.
///
/// # Examples
///
/// ```rust
/// use covreport_render::uncovered_line_ranges;
/// use covreport_types::{FileCoverage, Span};
///
/// let mut record = FileCoverage::new("a.js");
/// for (line, hits) in [(1, 1), (3, 0), (4, 0), (7, 0), (9, 2), (10, 0)] {
///     record.add_statement(Span::whole_line(line), hits);
/// }
/// assert_eq!(uncovered_line_ranges(&record), "3-7,10");
/// ```
pub fn uncovered_line_ranges(record: &FileCoverage) -> String {
    let mut ranges: Vec<(u32, u32)> = Vec::new();
    let mut open = false;

    for (line, hits) in record.line_coverage() {
        if hits > 0 {
            open = false;
            continue;
        }
        match ranges.last_mut() {
            Some(range) if open => range.1 = line,
            _ => ranges.push((line, line)),
        }
        open = true;
    }

    ranges
        .iter()
        .map(|(start, end)| {
            if start == end {
                start.to_string()
            } else {
                format!("{}-{}", start, end)
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

const TABLE_HEADER: [&str; 6] = [
    "File",
    "% Stmts",
    "% Branch",
    "% Funcs",
    "% Lines",
    "Uncovered Line #s",
];

fn table_row(name: String, summary: &CoverageSummary, uncovered: String) -> [String; 6] {
    [
        name,
        summary.statements.pct.to_string(),
        summary.branches.pct.to_string(),
        summary.functions.pct.to_string(),
        summary.lines.pct.to_string(),
        uncovered,
    ]
}

/// Render the per-file console table.
pub fn render_text_table(model: &CoverageModel) -> String {
    let names = display_paths(model);
    let mut rows = vec![
        TABLE_HEADER.map(str::to_string),
        table_row("All files".to_string(), &summarize(model), String::new()),
    ];
    for (path, record) in model {
        let name = names.get(path.as_str()).cloned().unwrap_or_else(|| path.clone());
        rows.push(table_row(
            format!(" {}", name),
            &summarize_file(record),
            uncovered_line_ranges(record),
        ));
    }

    let mut widths = [0usize; 6];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let separator = widths
        .iter()
        .map(|width| "-".repeat(*width))
        .collect::<Vec<_>>()
        .join("-|-");

    let mut output = String::new();
    output.push_str(&separator);
    output.push('\n');
    for (index, row) in rows.iter().enumerate() {
        let cells: Vec<String> = row
            .iter()
            .zip(widths)
            .enumerate()
            .map(|(column, (cell, width))| {
                if column == 0 || column == 5 {
                    format!("{:<width$}", cell)
                } else {
                    format!("{:>width$}", cell)
                }
            })
            .collect();
        output.push_str(cells.join(" | ").trim_end());
        output.push('\n');
        if index == 0 {
            output.push_str(&separator);
            output.push('\n');
        }
    }
    output.push_str(&separator);
    output.push('\n');
    output
}

/// Prints the per-file table to the console.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextWriter;

impl CoverageWriter for TextWriter {
    fn render(
        &self,
        model: &CoverageModel,
        _sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String> {
        Ok(vec![Artifact::Console(render_text_table(model))])
    }
}

/// Render the totals block printed at the end of a run.
pub fn render_text_summary(summary: &CoverageSummary) -> String {
    let rule = "=".repeat(31);
    let mut output = format!("\n{} Coverage summary {}\n", rule, rule);
    for (label, metric) in [
        ("Statements", Metric::Statements),
        ("Branches", Metric::Branches),
        ("Functions", Metric::Functions),
        ("Lines", Metric::Lines),
    ] {
        let totals = summary.get(metric);
        output.push_str(&format!(
            "{:<13}: {}% ( {}/{} )\n",
            label, totals.pct, totals.covered, totals.total
        ));
    }
    output.push_str(&"=".repeat(80));
    output.push('\n');
    output
}

/// Prints the totals block to the console.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextSummaryWriter;

impl CoverageWriter for TextSummaryWriter {
    fn render(
        &self,
        model: &CoverageModel,
        _sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String> {
        Ok(vec![Artifact::Console(render_text_summary(&summarize(model)))])
    }
}

// ============================================================================
// HTML
// ============================================================================

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

const HTML_STYLE: &str = "body{font-family:sans-serif}table{border-collapse:collapse}\
td,th{padding:2px 8px;border:1px solid #ccc}.hit{background:#dfd}.miss{background:#fdd}\
pre{margin:0}";

fn html_page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>{}</style>\n</head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        HTML_STYLE,
        body
    )
}

fn summary_cells(summary: &CoverageSummary) -> String {
    Metric::ALL
        .iter()
        .map(|metric| {
            let totals = summary.get(*metric);
            format!("<td>{}% ({}/{})</td>", totals.pct, totals.covered, totals.total)
        })
        .collect()
}

/// Render the HTML index page linking every file page.
pub fn render_html_index(model: &CoverageModel) -> String {
    let names = display_paths(model);
    let mut body = String::from("<h1>Coverage report</h1>\n<table>\n<tr><th>File</th>");
    for metric in Metric::ALL {
        body.push_str(&format!("<th>{}</th>", metric));
    }
    body.push_str("</tr>\n");
    body.push_str(&format!(
        "<tr><td>All files</td>{}</tr>\n",
        summary_cells(&summarize(model))
    ));
    for (path, record) in model {
        let name = names.get(path.as_str()).cloned().unwrap_or_else(|| path.clone());
        body.push_str(&format!(
            "<tr><td><a href=\"{}.html\">{}</a></td>{}</tr>\n",
            escape_html(&page_name(&name)),
            escape_html(&name),
            summary_cells(&summarize_file(record))
        ));
    }
    body.push_str("</table>\n");
    html_page("Coverage report", &body)
}

/// Render one file page. Source lines are annotated with their hit counts
/// when `source` is available.
pub fn render_html_file(name: &str, record: &FileCoverage, source: Option<&str>) -> String {
    let mut body = format!(
        "<h1>{}</h1>\n<table>\n<tr>{}</tr>\n</table>\n",
        escape_html(name),
        summary_cells(&summarize_file(record))
    );

    let Some(source) = source else {
        body.push_str("<p>Source not available.</p>\n");
        return html_page(name, &body);
    };

    let lines = record.line_coverage();
    body.push_str("<table>\n");
    for (index, text) in source.lines().enumerate() {
        let line = index as u32 + 1;
        let (class, hits) = match lines.get(&line) {
            Some(0) => ("miss", "0".to_string()),
            Some(hits) => ("hit", format!("{}x", hits)),
            None => ("", String::new()),
        };
        body.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td><pre>{}</pre></td></tr>\n",
            class,
            line,
            hits,
            escape_html(text)
        ));
    }
    body.push_str("</table>\n");
    html_page(name, &body)
}

/// Writes `index.html` and one page per file.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlWriter;

impl CoverageWriter for HtmlWriter {
    fn render(
        &self,
        model: &CoverageModel,
        sources: Option<&dyn SourceFinder>,
    ) -> Result<Vec<Artifact>, String> {
        let names = display_paths(model);
        let mut artifacts = vec![Artifact::File {
            path: PathBuf::from("index.html"),
            contents: render_html_index(model),
        }];

        for (path, record) in model {
            let name = names.get(path.as_str()).cloned().unwrap_or_else(|| path.clone());
            let source = sources.and_then(|finder| finder.find_source(path));
            artifacts.push(Artifact::File {
                path: PathBuf::from(format!("{}.html", page_name(&name))),
                contents: render_html_file(&name, record, source.as_deref()),
            });
        }

        Ok(artifacts)
    }
}

// ============================================================================
// Tests
// ============================================================================
