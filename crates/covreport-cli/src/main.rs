//! covreport aggregates per-test coverage records into one run-wide model, fills in files no test executed, optionally projects through source maps, writes reports, and enforces global coverage thresholds.

use clap::{Parser, Subcommand};
use covreport_adapters_coverage::{
    CoverageParseError, LineEmptyCoverage, parse_coverage_file, rebase_paths,
};
use covreport_adapters_repo::{FsSourceReader, GlobFileMatcher};
use covreport_adapters_sourcemap::SourceMapRegistry;
use covreport_app::{Collaborators, CoverageReporter, SystemClock, TestResult};
use covreport_config::{
    CliOverrides, ConfigError, discover_config, load_config, resolve_config, resolve_root_path,
    validate_thresholds,
};
use covreport_domain::merge_all;
use covreport_types::{Metric, ThresholdRules};
use std::fs;
use std::io::{self, IsTerminal};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// covreport aggregates per-test coverage, writes reports, and enforces global thresholds.
#[derive(Parser)]
#[command(name = "covreport")]
#[command(
    about = "covreport aggregates per-test coverage records, fills in untested files, writes coverage reports, and enforces global coverage thresholds."
)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate coverage files, write reports and check thresholds
    Report {
        /// Coverage record of one completed test (istanbul JSON or LCOV, repeatable)
        #[arg(long, required = true)]
        coverage: Vec<String>,

        /// Path to config file (default: auto-discover covreport.toml)
        #[arg(long, short = 'c')]
        config: Option<String>,

        /// Project root; relative coverage paths and globs resolve against it
        #[arg(long)]
        root_dir: Option<String>,

        /// Directory that receives report files
        #[arg(long)]
        coverage_directory: Option<String>,

        /// Report writer name (repeatable, replaces the configured list)
        #[arg(long = "reporter")]
        reporters: Vec<String>,

        /// Glob selecting files to include even when no test ran them (repeatable)
        #[arg(long = "collect-from")]
        collect_from: Vec<String>,

        /// Project coverage through registered source maps
        #[arg(long)]
        map_coverage: bool,

        /// Send console reports to stderr
        #[arg(long)]
        use_stderr: bool,

        /// Source map for a generated file, as GENERATED=MAP (repeatable)
        #[arg(long = "source-map")]
        source_maps: Vec<String>,

        /// Global statements threshold (negative: max uncovered)
        #[arg(long, allow_hyphen_values = true)]
        threshold_statements: Option<f64>,

        /// Global branches threshold (negative: max uncovered)
        #[arg(long, allow_hyphen_values = true)]
        threshold_branches: Option<f64>,

        /// Global lines threshold (negative: max uncovered)
        #[arg(long, allow_hyphen_values = true)]
        threshold_lines: Option<f64>,

        /// Global functions threshold (negative: max uncovered)
        #[arg(long, allow_hyphen_values = true)]
        threshold_functions: Option<f64>,

        /// Output path for the JSON run receipt
        #[arg(long)]
        receipt: Option<String>,
    },
    /// Merge coverage files into one istanbul JSON document
    Merge {
        /// Coverage file to merge (repeatable)
        #[arg(long, required = true)]
        coverage: Vec<String>,

        /// Output path for the merged coverage
        #[arg(long)]
        out: String,
    },
}

/// CLI errors
#[derive(Debug, Error)]
enum CliError {
    #[error("Failed to load config: {0}")]
    ConfigLoad(#[from] ConfigError),

    #[error("Failed to read coverage '{path}': {source}")]
    Coverage {
        path: String,
        #[source]
        source: CoverageParseError,
    },

    #[error("Invalid --source-map '{0}': expected GENERATED=MAP")]
    SourceMapArg(String),

    #[error("Failed to resolve path '{path}': {source}")]
    ResolvePath {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    DirCreate {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to render merged coverage: {0}")]
    Render(String),
}

/// Exit codes:
/// - 0: Pass
/// - 1: Tool/runtime error (I/O, parse failure, bad config)
/// - 2: Threshold failure
const EXIT_CODE_ERROR: i32 = 1;

/// Environment variable holding the log filter directive.
const LOG_ENV: &str = "COVREPORT_LOG";

/// Install the global subscriber. Fails if one is already installed.
fn init_logging() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_target(false)
        .try_init()
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logging() {
        eprintln!("warning: logging was not initialized: {}", e);
    }

    let exit_code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            EXIT_CODE_ERROR
        }
    };
    std::process::exit(exit_code);
}

fn run(cli: Cli) -> Result<i32, CliError> {
    match cli.command {
        Commands::Report {
            coverage,
            config,
            root_dir,
            coverage_directory,
            reporters,
            collect_from,
            map_coverage,
            use_stderr,
            source_maps,
            threshold_statements,
            threshold_branches,
            threshold_lines,
            threshold_functions,
            receipt,
        } => {
            let mut thresholds = ThresholdRules::default();
            thresholds.set(Metric::Statements, threshold_statements);
            thresholds.set(Metric::Branches, threshold_branches);
            thresholds.set(Metric::Lines, threshold_lines);
            thresholds.set(Metric::Functions, threshold_functions);

            let overrides = CliOverrides {
                root_dir: root_dir.map(PathBuf::from),
                coverage_directory: coverage_directory.map(PathBuf::from),
                coverage_reporters: (!reporters.is_empty()).then_some(reporters),
                use_stderr: use_stderr.then_some(true),
                collect_coverage_from: (!collect_from.is_empty()).then_some(collect_from),
                map_coverage: map_coverage.then_some(true),
                thresholds,
            };

            run_report(ReportArgs {
                coverage,
                config_path: config,
                overrides,
                source_maps,
                receipt,
            })
        }
        Commands::Merge { coverage, out } => run_merge(&coverage, &out),
    }
}

struct ReportArgs {
    coverage: Vec<String>,
    config_path: Option<String>,
    overrides: CliOverrides,
    source_maps: Vec<String>,
    receipt: Option<String>,
}

fn run_report(args: ReportArgs) -> Result<i32, CliError> {
    let loaded = match &args.config_path {
        Some(path) => {
            let path = absolute_path(Path::new(path))?;
            let config = load_config(&path)?;
            Some((path, config))
        }
        None => discover_config()?.inspect(|(path, _)| {
            tracing::debug!(path = %path.display(), "using discovered config");
        }),
    };
    validate_thresholds(&args.overrides.thresholds)?;

    let config_dir = loaded
        .as_ref()
        .and_then(|(path, _)| path.parent().map(Path::to_path_buf));
    let mut effective = resolve_config(
        loaded.as_ref().map(|(_, config)| config),
        config_dir.as_deref(),
        &args.overrides,
    );
    effective.root_dir = absolute_path(&effective.root_dir)?;
    let root = effective.root_dir.clone();

    let mut results = Vec::with_capacity(args.coverage.len());
    for path in &args.coverage {
        let model = parse_coverage_file(Path::new(path)).map_err(|source| CliError::Coverage {
            path: path.clone(),
            source,
        })?;
        results.push(TestResult::new(path.clone(), Some(rebase_paths(model, &root))));
    }

    let maps = parse_source_map_args(&args.source_maps, &root)?;
    if let Some(first) = results.first_mut() {
        first.source_maps = maps;
    }

    let use_stderr = effective.use_stderr;
    let reader = FsSourceReader::new(&root);
    let matcher = GlobFileMatcher::new();
    let generator = LineEmptyCoverage::new();
    let collaborators = Collaborators {
        files: &matcher,
        reader: &reader,
        generator: &generator,
    };

    let clock = SystemClock;
    let mut reporter = CoverageReporter::new(effective, SourceMapRegistry::new());
    reporter.on_run_start(&clock);
    for result in results {
        reporter.on_test_result(result);
    }

    let outcome = if use_stderr {
        reporter.on_run_complete(&collaborators, &clock, &mut io::stderr().lock())
    } else {
        reporter.on_run_complete(&collaborators, &clock, &mut io::stdout().lock())
    };

    if let Some(path) = &args.receipt {
        let json = serde_json::to_string_pretty(&outcome.receipt())?;
        write_text(path, &json)?;
    }

    Ok(outcome.exit_code())
}

fn absolute_path(path: &Path) -> Result<PathBuf, CliError> {
    std::path::absolute(path).map_err(|source| CliError::ResolvePath {
        path: path.display().to_string(),
        source,
    })
}

/// Parse `GENERATED=MAP` pairs, anchoring relative paths at `root`.
fn parse_source_map_args(
    args: &[String],
    root: &Path,
) -> Result<std::collections::BTreeMap<String, String>, CliError> {
    let mut maps = std::collections::BTreeMap::new();
    for arg in args {
        let Some((generated, map)) = arg.split_once('=') else {
            return Err(CliError::SourceMapArg(arg.clone()));
        };
        if generated.is_empty() || map.is_empty() {
            return Err(CliError::SourceMapArg(arg.clone()));
        }
        let generated = resolve_root_path(root, generated)
            .to_string_lossy()
            .replace('\\', "/");
        let map = if map.starts_with("data:") {
            map.to_string()
        } else {
            resolve_root_path(root, map).to_string_lossy().into_owned()
        };
        maps.insert(generated, map);
    }
    Ok(maps)
}

fn run_merge(coverage: &[String], out: &str) -> Result<i32, CliError> {
    let mut models = Vec::with_capacity(coverage.len());
    for path in coverage {
        let model = parse_coverage_file(Path::new(path)).map_err(|source| CliError::Coverage {
            path: path.clone(),
            source,
        })?;
        models.push(model);
    }

    let merged = merge_all(models);
    tracing::info!(files = merged.len(), out = %out, "writing merged coverage");
    let json = covreport_render::render_json(&merged).map_err(CliError::Render)?;
    write_text(out, &json)?;
    Ok(0)
}

fn write_text(path: &str, contents: &str) -> Result<(), CliError> {
    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|source| CliError::DirCreate {
            path: parent.display().to_string(),
            source,
        })?;
    }
    fs::write(path, contents).map_err(|source| CliError::FileWrite {
        path: path.to_string(),
        source,
    })
}
