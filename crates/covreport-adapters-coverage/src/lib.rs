//! Coverage file parsers and the empty-coverage generator for covreport.
//!
//! This crate reads istanbul `coverage-final.json` and LCOV tracefiles into a
//! [`CoverageModel`], and provides [`LineEmptyCoverage`], a line-based
//! generator producing zero-hit records for files no test executed.

use std::collections::BTreeMap;
use std::path::Path;

use covreport_domain::merge_file;
use covreport_ports::{EmptyCoverageGenerator, GeneratedCoverage};
use covreport_types::{BranchMeta, CoverageModel, FileCoverage, FunctionMeta, Span};
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while reading coverage files.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoverageParseError {
    /// Invalid format in an LCOV file.
    #[error("Invalid LCOV format: {0}")]
    InvalidFormat(String),

    /// Invalid istanbul JSON.
    #[error("Invalid istanbul JSON: {0}")]
    InvalidJson(String),

    /// I/O error while reading the file.
    #[error("I/O error: {0}")]
    IoError(String),
}

// ============================================================================
// Format Detection
// ============================================================================

/// Supported coverage input formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageFormat {
    /// istanbul `coverage-final.json`.
    Istanbul,
    /// LCOV tracefile.
    Lcov,
}

/// Detect the format from the file extension, falling back to content sniffing.
pub fn detect_format(path: &Path, text: &str) -> CoverageFormat {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => CoverageFormat::Istanbul,
        Some("info") | Some("lcov") => CoverageFormat::Lcov,
        _ if text.trim_start().starts_with('{') => CoverageFormat::Istanbul,
        _ => CoverageFormat::Lcov,
    }
}

/// Read and parse a coverage file in either supported format.
pub fn parse_coverage_file(path: &Path) -> Result<CoverageModel, CoverageParseError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CoverageParseError::IoError(format!("{}: {}", path.display(), e)))?;
    match detect_format(path, &text) {
        CoverageFormat::Istanbul => parse_istanbul_json(&text),
        CoverageFormat::Lcov => parse_lcov(&text),
    }
}

// ============================================================================
// Path Normalization
// ============================================================================

/// Normalize a path reported by a coverage producer.
///
/// - Converts backslashes to forward slashes
/// - Removes leading `./`
///
/// # Examples
///
/// ```
/// use covreport_adapters_coverage::normalize_path;
///
/// assert_eq!(normalize_path("src/lib.js"), "src/lib.js");
/// assert_eq!(normalize_path("./src/lib.js"), "src/lib.js");
/// assert_eq!(normalize_path("src\\lib.js"), "src/lib.js");
/// ```
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.trim().replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Re-key relative paths of `model` under `root`, leaving absolute ones alone.
pub fn rebase_paths(model: CoverageModel, root: &Path) -> CoverageModel {
    let mut rebased = CoverageModel::new();
    for (path, mut record) in model {
        let key = if Path::new(&path).is_absolute() {
            path
        } else {
            root.join(&path).to_string_lossy().replace('\\', "/")
        };
        record.path = key.clone();
        merge_file(&mut rebased, key, record);
    }
    rebased
}

// ============================================================================
// istanbul JSON
// ============================================================================

/// Parse an istanbul `coverage-final.json` document.
///
/// Records with an empty `path` take their key.
///
/// # Examples
///
/// ```
/// use covreport_adapters_coverage::parse_istanbul_json;
///
/// let json = r#"{"/repo/a.js": {
///     "statementMap": {"0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 9}}},
///     "s": {"0": 2}
/// }}"#;
///
/// let model = parse_istanbul_json(json).unwrap();
/// assert_eq!(model["/repo/a.js"].s.get(&0), Some(&2));
/// ```
pub fn parse_istanbul_json(text: &str) -> Result<CoverageModel, CoverageParseError> {
    let raw: BTreeMap<String, FileCoverage> =
        serde_json::from_str(text).map_err(|e| CoverageParseError::InvalidJson(e.to_string()))?;

    let mut model = CoverageModel::new();
    for (key, mut record) in raw {
        if record.path.is_empty() {
            record.path = key.clone();
        }
        merge_file(&mut model, key, record);
    }
    Ok(model)
}

// ============================================================================
// LCOV Parsing
// ============================================================================

/// Builder for one `SF` ... `end_of_record` section.
#[derive(Default)]
struct LcovRecord {
    coverage: FileCoverage,
    functions: BTreeMap<String, u32>,
    branches: BTreeMap<(u32, u32), BTreeMap<u32, u64>>,
}

impl LcovRecord {
    fn new(path: String) -> Self {
        Self {
            coverage: FileCoverage::new(path),
            ..Default::default()
        }
    }

    fn finish(mut self) -> FileCoverage {
        for ((line, _block), arms) in self.branches {
            let locations = vec![Span::whole_line(line); arms.len()];
            let hits = arms.into_values().collect();
            self.coverage.add_branch(
                BranchMeta {
                    kind: "branch".to_string(),
                    loc: Span::whole_line(line),
                    locations,
                    line,
                },
                hits,
            );
        }
        self.coverage
    }
}

fn invalid(line_num: usize, message: impl std::fmt::Display) -> CoverageParseError {
    CoverageParseError::InvalidFormat(format!("{} at line {}", message, line_num + 1))
}

fn parse_number<T: std::str::FromStr>(
    value: &str,
    what: &str,
    line_num: usize,
) -> Result<T, CoverageParseError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(line_num, format!("Invalid {}: '{}'", what, value)))
}

/// Parse an LCOV format string into a coverage model.
///
/// LCOV format records:
/// - `TN:<test name>` - Test name (ignored)
/// - `SF:<source file>` - Source file path (starts a record)
/// - `FN:<line>[,<end line>],<name>` - Function declaration
/// - `FNDA:<hits>,<name>` - Function hit count
/// - `DA:<line>,<hits>[,<checksum>]` - Line hit count, one statement per line
/// - `BRDA:<line>,<block>,<branch>,<taken>` - Branch arm hit count (`-` is 0)
/// - `end_of_record` - Ends the current record
///
/// Summary records (`FNF`, `FNH`, `LF`, `LH`, `BRF`, `BRH`) are recomputed
/// from the model and ignored. Repeated sections for one file are merged by
/// summing.
///
/// # Examples
///
/// ```
/// use covreport_adapters_coverage::parse_lcov;
///
/// let lcov = "TN:\nSF:/repo/src/lib.js\nDA:1,1\nDA:2,0\nend_of_record\n";
///
/// let model = parse_lcov(lcov).unwrap();
/// let record = &model["/repo/src/lib.js"];
/// assert_eq!(record.line_coverage().get(&1), Some(&1));
/// assert_eq!(record.line_coverage().get(&2), Some(&0));
/// ```
pub fn parse_lcov(text: &str) -> Result<CoverageModel, CoverageParseError> {
    let mut model = CoverageModel::new();
    let mut current: Option<LcovRecord> = None;

    for (line_num, line) in text.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with("TN:") {
            continue;
        }

        if let Some(path) = line.strip_prefix("SF:") {
            // A missing end_of_record still closes the previous section
            if let Some(record) = current.take() {
                let record = record.finish();
                merge_file(&mut model, record.path.clone(), record);
            }
            current = Some(LcovRecord::new(normalize_path(path)));
            continue;
        }

        if line == "end_of_record" {
            if let Some(record) = current.take() {
                let record = record.finish();
                merge_file(&mut model, record.path.clone(), record);
            }
            continue;
        }

        let Some((tag, data)) = line.split_once(':') else {
            continue;
        };
        if !matches!(tag, "DA" | "FN" | "FNDA" | "BRDA") {
            continue;
        }
        let Some(record) = current.as_mut() else {
            return Err(invalid(
                line_num,
                format!("{} record without preceding SF record", tag),
            ));
        };

        match tag {
            "DA" => {
                let parts: Vec<&str> = data.split(',').collect();
                if parts.len() < 2 {
                    return Err(invalid(
                        line_num,
                        format!("Invalid DA format: expected 'DA:<line>,<hits>', got '{}'", line),
                    ));
                }
                let line_number: u32 = parse_number(parts[0], "line number", line_num)?;
                let hits: u64 = parse_number(parts[1], "hit count", line_num)?;
                record
                    .coverage
                    .add_statement(Span::whole_line(line_number), hits);
            }
            "FN" => {
                let Some((start, rest)) = data.split_once(',') else {
                    return Err(invalid(
                        line_num,
                        format!("Invalid FN format: expected 'FN:<line>,<name>', got '{}'", line),
                    ));
                };
                // Newer producers insert the end line before the name
                let name = match rest.split_once(',') {
                    Some((end, name)) if end.trim().parse::<u32>().is_ok() => name,
                    _ => rest,
                };
                let start_line: u32 = parse_number(start, "line number", line_num)?;
                let span = Span::whole_line(start_line);
                let id = record.coverage.add_function(
                    FunctionMeta {
                        name: name.to_string(),
                        decl: span,
                        loc: span,
                        line: start_line,
                    },
                    0,
                );
                record.functions.insert(name.to_string(), id);
            }
            "FNDA" => {
                let Some((hits, name)) = data.split_once(',') else {
                    return Err(invalid(
                        line_num,
                        format!("Invalid FNDA format: expected 'FNDA:<hits>,<name>', got '{}'", line),
                    ));
                };
                let hits: u64 = parse_number(hits, "hit count", line_num)?;
                if let Some(id) = record.functions.get(name) {
                    record.coverage.f.insert(*id, hits);
                }
            }
            "BRDA" => {
                let parts: Vec<&str> = data.split(',').collect();
                if parts.len() < 4 {
                    return Err(invalid(
                        line_num,
                        format!(
                            "Invalid BRDA format: expected 'BRDA:<line>,<block>,<branch>,<taken>', got '{}'",
                            line
                        ),
                    ));
                }
                let line_number: u32 = parse_number(parts[0], "line number", line_num)?;
                let block: u32 = parse_number(parts[1], "block number", line_num)?;
                let arm: u32 = parse_number(parts[2], "branch number", line_num)?;
                let taken: u64 = if parts[3].trim() == "-" {
                    0
                } else {
                    parse_number(parts[3], "taken count", line_num)?
                };
                record
                    .branches
                    .entry((line_number, block))
                    .or_default()
                    .insert(arm, taken);
            }
            _ => {}
        }
    }

    if let Some(record) = current {
        let record = record.finish();
        merge_file(&mut model, record.path.clone(), record);
    }

    Ok(model)
}

// ============================================================================
// Empty Coverage Generator
// ============================================================================

/// Line-based generator for files that no test executed.
///
/// Every line holding code becomes one zero-hit statement; lines declaring a
/// function also become a zero-hit function. Comment-only lines and lines
/// made of closing punctuation are skipped. A trailing `sourceMappingURL`
/// comment is reported as the file's source map.
#[derive(Debug, Clone, Default)]
pub struct LineEmptyCoverage;

impl LineEmptyCoverage {
    pub fn new() -> Self {
        Self
    }
}

const SOURCE_MAP_MARKERS: [&str; 2] = ["//# sourceMappingURL=", "//@ sourceMappingURL="];

fn is_punctuation_only(code: &str) -> bool {
    code.chars()
        .all(|c| matches!(c, '{' | '}' | '(' | ')' | '[' | ']' | ';' | ',') || c.is_whitespace())
}

fn is_identifier(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn leading_identifier(text: &str) -> Option<&str> {
    let text = text.trim_start();
    let end = text.find(|c: char| !is_identifier(c)).unwrap_or(text.len());
    (end > 0).then(|| &text[..end])
}

/// Name of the function declared on `code`, if any.
///
/// Returns `Some(None)` for anonymous functions.
fn function_name(code: &str) -> Option<Option<String>> {
    for keyword in ["function", "fn", "def"] {
        let mut search = code;
        while let Some(pos) = search.find(keyword) {
            let before_ok = search[..pos]
                .chars()
                .next_back()
                .is_none_or(|c| !is_identifier(c));
            let after = &search[pos + keyword.len()..];
            let after_ok = after
                .chars()
                .next()
                .is_some_and(|c| c.is_whitespace() || c == '(' || c == '*');
            if before_ok && after_ok {
                let name = leading_identifier(after.trim_start_matches('*'));
                return Some(name.map(str::to_string));
            }
            search = after;
        }
    }

    if code.contains("=>") {
        for binding in ["const ", "let ", "var "] {
            if let Some(rest) = code.trim_start().strip_prefix(binding) {
                return Some(leading_identifier(rest).map(str::to_string));
            }
        }
        return Some(None);
    }

    None
}

fn resolve_map_location(path: &str, url: &str) -> String {
    if url.starts_with("data:") || Path::new(url).is_absolute() {
        return url.to_string();
    }
    match Path::new(path).parent() {
        Some(dir) => dir.join(url).to_string_lossy().into_owned(),
        None => url.to_string(),
    }
}

impl EmptyCoverageGenerator for LineEmptyCoverage {
    fn generate(&self, source: &str, path: &str) -> Result<Option<GeneratedCoverage>, String> {
        if source.contains('\0') {
            return Err(format!("{} does not look like a text file", path));
        }

        let mut coverage = FileCoverage::new(path);
        let mut source_map_path = None;
        let mut in_block_comment = false;
        let mut anonymous = 0;

        for (index, raw) in source.lines().enumerate() {
            let line_number = index as u32 + 1;
            let trimmed = raw.trim();

            if let Some(url) = SOURCE_MAP_MARKERS
                .iter()
                .find_map(|marker| trimmed.strip_prefix(marker))
            {
                source_map_path = Some(resolve_map_location(path, url.trim()));
                continue;
            }

            let mut code = trimmed;
            if in_block_comment {
                match code.find("*/") {
                    Some(end) => {
                        in_block_comment = false;
                        code = code[end + 2..].trim();
                    }
                    None => continue,
                }
            }
            if let Some(start) = code.find("/*") {
                let (before, after) = code.split_at(start);
                if !after.contains("*/") {
                    in_block_comment = true;
                }
                code = before.trim();
            }
            if code.starts_with("//") || code.starts_with('#') {
                continue;
            }
            if code.is_empty() || is_punctuation_only(code) {
                continue;
            }

            let indent = raw.len() - raw.trim_start().len();
            let span = Span::new(
                line_number,
                indent as u32,
                line_number,
                (indent + trimmed.len()) as u32,
            );
            coverage.add_statement(span, 0);

            if let Some(name) = function_name(code) {
                let name = name.unwrap_or_else(|| {
                    anonymous += 1;
                    format!("(anonymous_{})", anonymous - 1)
                });
                coverage.add_function(
                    FunctionMeta {
                        name,
                        decl: span,
                        loc: span,
                        line: line_number,
                    },
                    0,
                );
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

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // ------------------------------------------------------------------------
    // Path Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_normalize_path_converts_backslashes() {
        assert_eq!(normalize_path("src\\nested\\lib.js"), "src/nested/lib.js");
    }

    #[test]
    fn test_normalize_path_removes_leading_dot_slash() {
        assert_eq!(normalize_path("././src/lib.js"), "src/lib.js");
        assert_eq!(normalize_path("/repo/src/lib.js"), "/repo/src/lib.js");
    }

    #[test]
    fn test_rebase_paths() {
        let model = parse_lcov("SF:src/a.js\nDA:1,1\nend_of_record\nSF:/abs/b.js\nDA:1,0\nend_of_record\n")
            .unwrap();
        let rebased = rebase_paths(model, Path::new("/repo"));

        assert!(rebased.contains_key("/repo/src/a.js"));
        assert!(rebased.contains_key("/abs/b.js"));
        assert_eq!(rebased["/repo/src/a.js"].path, "/repo/src/a.js");
    }

    #[test]
    fn test_detect_format() {
        assert_eq!(detect_format(Path::new("coverage-final.json"), ""), CoverageFormat::Istanbul);
        assert_eq!(detect_format(Path::new("lcov.info"), "{"), CoverageFormat::Lcov);
        assert_eq!(detect_format(Path::new("cov.out"), "  {\"a\": {}}"), CoverageFormat::Istanbul);
        assert_eq!(detect_format(Path::new("cov.out"), "SF:a.js"), CoverageFormat::Lcov);
    }

    // ------------------------------------------------------------------------
    // istanbul Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_istanbul_fills_path_from_key() {
        let json = r#"{"/repo/a.js": {"s": {"0": 1}, "statementMap": {"0": {"start": {"line": 1, "column": 0}, "end": {"line": 1, "column": 4}}}}}"#;
        let model = parse_istanbul_json(json).unwrap();
        assert_eq!(model["/repo/a.js"].path, "/repo/a.js");
    }

    #[test]
    fn test_parse_istanbul_rejects_non_object() {
        let result = parse_istanbul_json("[1, 2, 3]");
        assert!(matches!(result, Err(CoverageParseError::InvalidJson(_))));
    }

    #[test]
    fn test_parse_istanbul_empty_object() {
        assert!(parse_istanbul_json("{}").unwrap().is_empty());
    }

    // ------------------------------------------------------------------------
    // LCOV Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_parse_lcov_lines() {
        let lcov = "TN:\nSF:/repo/a.js\nDA:1,3\nDA:2,0\nDA:4,1,abcdef\nLF:3\nLH:2\nend_of_record\n";
        let model = parse_lcov(lcov).unwrap();

        let record = &model["/repo/a.js"];
        assert_eq!(record.statement_map.len(), 3);
        assert_eq!(record.s.values().copied().collect::<Vec<_>>(), vec![3, 0, 1]);
        assert_eq!(record.statement_map[&2], Span::whole_line(4));
    }

    #[test]
    fn test_parse_lcov_functions() {
        let lcov = "SF:/repo/a.js\nFN:1,add\nFN:5,9,sub\nFNDA:4,add\nFNDA:0,sub\nFNF:2\nFNH:1\nend_of_record\n";
        let model = parse_lcov(lcov).unwrap();

        let record = &model["/repo/a.js"];
        assert_eq!(record.fn_map.len(), 2);
        assert_eq!(record.fn_map[&0].name, "add");
        assert_eq!(record.fn_map[&1].name, "sub");
        assert_eq!(record.fn_map[&1].line, 5);
        assert_eq!(record.f.get(&0), Some(&4));
        assert_eq!(record.f.get(&1), Some(&0));
    }

    #[test]
    fn test_parse_lcov_branches() {
        let lcov = "SF:/repo/a.js\nBRDA:3,0,0,2\nBRDA:3,0,1,-\nBRDA:7,1,0,1\nBRF:3\nBRH:2\nend_of_record\n";
        let model = parse_lcov(lcov).unwrap();

        let record = &model["/repo/a.js"];
        assert_eq!(record.branch_map.len(), 2);
        assert_eq!(record.b.get(&0), Some(&vec![2, 0]));
        assert_eq!(record.b.get(&1), Some(&vec![1]));
        assert_eq!(record.branch_map[&0].locations.len(), 2);
    }

    #[test]
    fn test_parse_lcov_repeated_sections_sum() {
        let lcov = "SF:/repo/a.js\nDA:1,1\nend_of_record\nSF:/repo/a.js\nDA:1,2\nend_of_record\n";
        let model = parse_lcov(lcov).unwrap();
        assert_eq!(model["/repo/a.js"].s.get(&0), Some(&3));
    }

    #[test]
    fn test_parse_lcov_missing_end_of_record() {
        let lcov = "SF:/repo/a.js\nDA:1,1\nSF:/repo/b.js\nDA:1,0";
        let model = parse_lcov(lcov).unwrap();
        assert_eq!(model.len(), 2);
    }

    #[test]
    fn test_parse_lcov_empty_input() {
        assert!(parse_lcov("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_da_without_sf_fails() {
        let result = parse_lcov("DA:1,1\n");
        assert_eq!(
            result,
            Err(CoverageParseError::InvalidFormat(
                "DA record without preceding SF record at line 1".to_string()
            ))
        );
    }

    #[test]
    fn test_parse_invalid_da_format() {
        assert!(parse_lcov("SF:a.js\nDA:1\n").is_err());
    }

    #[test]
    fn test_parse_invalid_hit_count() {
        let err = parse_lcov("SF:a.js\nDA:1,many\n").unwrap_err();
        assert!(err.to_string().contains("hit count"));
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_parse_invalid_brda() {
        assert!(parse_lcov("SF:a.js\nBRDA:1,0\n").is_err());
        assert!(parse_lcov("SF:a.js\nBRDA:1,0,0,x\n").is_err());
    }

    // ------------------------------------------------------------------------
    // Generator Tests
    // ------------------------------------------------------------------------

    #[test]
    fn test_generator_counts_code_lines() {
        let source = "// header\nconst a = 1;\n\nfunction add(x, y) {\n  return x + y;\n}\n";
        let generated = LineEmptyCoverage::new()
            .generate(source, "/repo/src/c.js")
            .unwrap()
            .unwrap();

        let coverage = generated.coverage;
        assert_eq!(coverage.path, "/repo/src/c.js");
        assert_eq!(coverage.statement_map.len(), 3);
        assert!(coverage.s.values().all(|hits| *hits == 0));
        assert_eq!(coverage.fn_map.len(), 1);
        assert_eq!(coverage.fn_map[&0].name, "add");
        assert_eq!(coverage.fn_map[&0].line, 4);
        assert_eq!(coverage.statement_map[&2], Span::new(5, 2, 5, 15));
        assert!(generated.source_map_path.is_none());
    }

    #[test]
    fn test_generator_skips_block_comments() {
        let source = "/**\n * docs\n */\nlet x = 2; /* trailing\n still comment */\n";
        let generated = LineEmptyCoverage::new().generate(source, "/a.js").unwrap().unwrap();
        assert_eq!(generated.coverage.statement_map.len(), 1);
    }

    #[test]
    fn test_generator_names_arrow_functions() {
        let source = "const double = (x) => x * 2;\nitems.map((x) => x);\n";
        let generated = LineEmptyCoverage::new().generate(source, "/a.js").unwrap().unwrap();
        let names: Vec<_> = generated.coverage.fn_map.values().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["double", "(anonymous_0)"]);
    }

    #[test]
    fn test_generator_ignores_identifiers_containing_keywords() {
        let source = "const functional = defined;\n";
        let generated = LineEmptyCoverage::new().generate(source, "/a.js").unwrap().unwrap();
        assert!(generated.coverage.fn_map.is_empty());
    }

    #[test]
    fn test_generator_reports_source_map() {
        let source = "var a = 1;\n//# sourceMappingURL=a.js.map\n";
        let generated = LineEmptyCoverage::new()
            .generate(source, "/repo/dist/a.js")
            .unwrap()
            .unwrap();
        assert_eq!(generated.source_map_path.as_deref(), Some("/repo/dist/a.js.map"));
        assert_eq!(generated.coverage.statement_map.len(), 1);
    }

    #[test]
    fn test_generator_keeps_inline_source_map_url() {
        let source = "var a = 1;\n//# sourceMappingURL=data:application/json;base64,e30=\n";
        let generated = LineEmptyCoverage::new().generate(source, "/a.js").unwrap().unwrap();
        assert_eq!(
            generated.source_map_path.as_deref(),
            Some("data:application/json;base64,e30=")
        );
    }

    #[test]
    fn test_generator_returns_none_for_empty_file() {
        let generated = LineEmptyCoverage::new()
            .generate("// only a comment\n\n}\n", "/a.js")
            .unwrap();
        assert!(generated.is_none());
    }

    #[test]
    fn test_generator_rejects_binary() {
        assert!(LineEmptyCoverage::new().generate("abc\0def", "/a.bin").is_err());
    }
}


// ============================================================================
// Integration Tests (with actual fixture files)
// ============================================================================

#[cfg(test)]
mod integration_tests {
    use super::*;

    #[test]
    fn test_parse_lcov_fixture_file() {
        let lcov = include_str!("../../../fixtures/lcov/app.info");
        let model = parse_lcov(lcov).unwrap();

        let record = &model["src/app.js"];
        assert_eq!(record.statement_map.len(), 4);
        assert_eq!(record.fn_map.len(), 2);
        assert_eq!(record.b.get(&0), Some(&vec![1, 0]));
    }

    #[test]
    fn test_parse_istanbul_fixture_file() {
        let json = include_str!("../../../fixtures/istanbul/coverage-final.json");
        let model = parse_istanbul_json(json).unwrap();

        assert_eq!(model.len(), 2);
        let a = &model["/repo/src/a.js"];
        assert_eq!(a.s.values().filter(|h| **h > 0).count(), 2);
        assert_eq!(a.fn_map[&0].name, "greet");
        assert_eq!(a.b.get(&0), Some(&vec![1, 0]));
    }
}
