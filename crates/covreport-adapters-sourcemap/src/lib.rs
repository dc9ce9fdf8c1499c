//! Source map v3 adapter for covreport.
//!
//! Loads maps from files or inline `data:` URLs, decodes their VLQ mappings,
//! and answers original-position queries through the
//! [`SourceMapStore`](covreport_ports::SourceMapStore) port.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::Engine;
use covreport_ports::{OriginalPosition, SourceMapStore};
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// Errors that can occur while loading a source map.
#[derive(Debug, Error)]
pub enum SourceMapError {
    /// Failed to read the map file.
    #[error("failed to read source map {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The map is not valid JSON or lacks required fields.
    #[error("invalid source map JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Only version 3 maps are understood.
    #[error("unsupported source map version {0}")]
    UnsupportedVersion(u32),

    /// The `mappings` field could not be decoded.
    #[error("invalid mappings: {0}")]
    InvalidMappings(String),

    /// A `data:` URL could not be decoded.
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),
}

// ============================================================================
// VLQ Decoding
// ============================================================================

const VLQ_CONTINUATION: u32 = 0b10_0000;
const VLQ_MASK: u32 = 0b1_1111;

fn base64_value(c: u8) -> Option<u32> {
    let value = match c {
        b'A'..=b'Z' => c - b'A',
        b'a'..=b'z' => c - b'a' + 26,
        b'0'..=b'9' => c - b'0' + 52,
        b'+' => 62,
        b'/' => 63,
        _ => return None,
    };
    Some(u32::from(value))
}

/// Decode one mapping segment into its signed values.
///
/// # Examples
///
/// ```
/// use covreport_adapters_sourcemap::decode_vlq;
///
/// assert_eq!(decode_vlq("AACD").unwrap(), vec![0, 0, 1, -1]);
/// assert_eq!(decode_vlq("gB").unwrap(), vec![16]);
/// ```
pub fn decode_vlq(segment: &str) -> Result<Vec<i64>, SourceMapError> {
    let mut values = Vec::new();
    let mut value: u64 = 0;
    let mut shift = 0u32;

    for c in segment.bytes() {
        let digit = base64_value(c).ok_or_else(|| {
            SourceMapError::InvalidMappings(format!("invalid base64 digit '{}'", c as char))
        })?;
        if shift > 60 {
            return Err(SourceMapError::InvalidMappings(format!(
                "VLQ value too large in '{}'",
                segment
            )));
        }
        value |= u64::from(digit & VLQ_MASK) << shift;
        if digit & VLQ_CONTINUATION != 0 {
            shift += 5;
            continue;
        }

        let magnitude = (value >> 1) as i64;
        values.push(if value & 1 == 1 { -magnitude } else { magnitude });
        value = 0;
        shift = 0;
    }

    if shift != 0 {
        return Err(SourceMapError::InvalidMappings(format!(
            "unterminated VLQ value in '{}'",
            segment
        )));
    }
    Ok(values)
}

/// One decoded mapping: a generated column and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// 0-based generated column.
    pub generated_column: u32,
    /// Index into the map's sources, with 0-based line and column, if mapped.
    pub original: Option<(usize, u32, u32)>,
}

/// Accumulate a relative field. Results must stay within `0..=u32::MAX`.
fn apply_delta(base: i64, delta: i64, what: &str) -> Result<i64, SourceMapError> {
    let next = base
        .checked_add(delta)
        .ok_or_else(|| SourceMapError::InvalidMappings(format!("{} overflows", what)))?;
    if next < 0 {
        return Err(SourceMapError::InvalidMappings(format!("negative {}", what)));
    }
    if next > i64::from(u32::MAX) {
        return Err(SourceMapError::InvalidMappings(format!("{} out of range", what)));
    }
    Ok(next)
}

/// Decode a `mappings` string into per-line segments sorted by column.
pub fn decode_mappings(mappings: &str) -> Result<Vec<Vec<Segment>>, SourceMapError> {
    let mut lines = Vec::new();
    let mut source = 0i64;
    let mut original_line = 0i64;
    let mut original_column = 0i64;
    let mut name = 0i64;

    for line in mappings.split(';') {
        let mut segments = Vec::new();
        let mut generated_column = 0i64;

        for raw in line.split(',').filter(|raw| !raw.is_empty()) {
            let fields = decode_vlq(raw)?;
            match fields.len() {
                1 | 4 | 5 => {}
                n => {
                    return Err(SourceMapError::InvalidMappings(format!(
                        "segment '{}' has {} fields",
                        raw, n
                    )));
                }
            }

            generated_column = apply_delta(generated_column, fields[0], "generated column")?;
            let original = if fields.len() >= 4 {
                source = apply_delta(source, fields[1], "source index")?;
                original_line = apply_delta(original_line, fields[2], "original line")?;
                original_column = apply_delta(original_column, fields[3], "original column")?;
                if let Some(delta) = fields.get(4) {
                    name = apply_delta(name, *delta, "name index")?;
                }
                Some((source as usize, original_line as u32, original_column as u32))
            } else {
                None
            };

            segments.push(Segment {
                generated_column: generated_column as u32,
                original,
            });
        }

        segments.sort_by_key(|segment| segment.generated_column);
        lines.push(segments);
    }

    Ok(lines)
}

// ============================================================================
// Source Map
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSourceMap {
    version: u32,
    #[serde(default)]
    source_root: Option<String>,
    sources: Vec<Option<String>>,
    #[serde(default)]
    sources_content: Vec<Option<String>>,
    mappings: String,
}

/// A decoded source map with sources resolved to paths.
#[derive(Debug, Clone)]
pub struct SourceMap {
    sources: Vec<String>,
    sources_content: Vec<Option<String>>,
    lines: Vec<Vec<Segment>>,
}

fn join_source(base: Option<&Path>, source_root: Option<&str>, source: &str) -> String {
    let mut path = PathBuf::new();
    if let Some(base) = base {
        path.push(base);
    }
    if let Some(root) = source_root.filter(|root| !root.is_empty()) {
        path.push(root);
    }
    path.push(source);
    normalize(&path)
}

/// Collapse `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> String {
    use std::path::Component;

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out.to_string_lossy().replace('\\', "/")
}

impl SourceMap {
    /// Parse a map. Relative sources are resolved against `base_dir`.
    pub fn parse(text: &str, base_dir: Option<&Path>) -> Result<Self, SourceMapError> {
        let raw: RawSourceMap = serde_json::from_str(text)?;
        if raw.version != 3 {
            return Err(SourceMapError::UnsupportedVersion(raw.version));
        }

        let sources = raw
            .sources
            .iter()
            .map(|source| {
                join_source(base_dir, raw.source_root.as_deref(), source.as_deref().unwrap_or(""))
            })
            .collect();

        Ok(Self {
            sources,
            sources_content: raw.sources_content,
            lines: decode_mappings(&raw.mappings)?,
        })
    }

    /// Resolved source paths, in map order.
    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Embedded content for a resolved source path.
    pub fn source_content(&self, source: &str) -> Option<&str> {
        let index = self.sources.iter().position(|s| s == source)?;
        self.sources_content.get(index)?.as_deref()
    }

    /// Map a generated position (1-based line, 0-based column).
    ///
    /// Uses the closest segment at or before `column`, or the first segment
    /// of the line when `column` precedes all of them.
    pub fn original_position(&self, line: u32, column: u32) -> Option<OriginalPosition> {
        let segments = self.lines.get(line.checked_sub(1)? as usize)?;
        let index = segments.partition_point(|segment| segment.generated_column <= column);
        let segment = if index == 0 {
            segments.first()?
        } else {
            &segments[index - 1]
        };
        let (source, original_line, original_column) = segment.original?;

        Some(OriginalPosition {
            source: self.sources.get(source)?.clone(),
            line: original_line + 1,
            column: original_column,
        })
    }
}

/// Decode an inline `data:` URL into the map text.
pub fn decode_data_url(url: &str) -> Result<String, SourceMapError> {
    let body = url
        .strip_prefix("data:")
        .ok_or_else(|| SourceMapError::InvalidDataUrl("missing data: prefix".to_string()))?;
    let (header, payload) = body
        .split_once(',')
        .ok_or_else(|| SourceMapError::InvalidDataUrl("missing ',' separator".to_string()))?;

    if header.split(';').any(|part| part.eq_ignore_ascii_case("base64")) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| SourceMapError::InvalidDataUrl(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| SourceMapError::InvalidDataUrl(e.to_string()))
    } else {
        Ok(payload.to_string())
    }
}

/// Load a map from a file path or `data:` URL.
///
/// Relative sources resolve against the map's directory, or against
/// `generated_path`'s directory for inline maps.
pub fn load_source_map(location: &str, generated_path: &str) -> Result<SourceMap, SourceMapError> {
    if location.starts_with("data:") {
        let text = decode_data_url(location)?;
        return SourceMap::parse(&text, Path::new(generated_path).parent());
    }

    let path = Path::new(location);
    let text = std::fs::read_to_string(path).map_err(|source| SourceMapError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    SourceMap::parse(&text, path.parent())
}

// ============================================================================
// Registry
// ============================================================================

/// In-memory [`SourceMapStore`] keyed by generated file path.
///
/// Maps are loaded eagerly on registration so failures surface immediately.
#[derive(Debug, Clone, Default)]
pub struct SourceMapRegistry {
    maps: HashMap<String, SourceMap>,
}

impl SourceMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already decoded map.
    pub fn insert(&mut self, path: impl Into<String>, map: SourceMap) {
        self.maps.insert(path.into(), map);
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }
}

impl SourceMapStore for SourceMapRegistry {
    fn register(&mut self, path: &str, map_location: &str) -> Result<(), String> {
        let map = load_source_map(map_location, path).map_err(|e| e.to_string())?;
        tracing::debug!(path, sources = map.sources().len(), "registered source map");
        self.maps.insert(path.to_string(), map);
        Ok(())
    }

    fn has_map(&self, path: &str) -> bool {
        self.maps.contains_key(path)
    }

    fn original_position(&self, path: &str, line: u32, column: u32) -> Option<OriginalPosition> {
        self.maps.get(path)?.original_position(line, column)
    }

    fn original_source(&self, source: &str) -> Option<String> {
        self.maps
            .values()
            .find_map(|map| map.source_content(source))
            .map(str::to_string)
            .or_else(|| std::fs::read_to_string(source).ok())
    }
}

// ============================================================================
// Tests
// ============================================================================
