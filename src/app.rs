//! The `shellharness` command line.
//!
//! [`execute`] takes everything it touches through [`Options`], so the CLI
//! can be driven in-process with captured output.

use crate::config::HarnessConfig;
use crate::loader;
use crate::presets::Registry;
use crate::report::{self, FileResult, Summary};
use crate::runner::Harness;
use crate::schema;
use crate::table::{self, TableResult};
use clap::{Parser, Subcommand, ValueEnum};
use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Default, ValueEnum)]
enum OutputFormat {
    /// Human-readable output with checkmarks
    #[default]
    Human,
    /// Machine-readable JSON output
    Json,
    /// JUnit XML output for CI systems
    Junit,
}

#[derive(Parser)]
#[command(name = "shellharness")]
#[command(about = "Runs shell-script library tests against generated mock binaries")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Execute test tables
    Run {
        /// Path to test tables (file or directory)
        path: PathBuf,
        /// Output format
        #[arg(short, long, default_value = "human")]
        output: OutputFormat,
        /// Filter tests by name pattern (substring match)
        #[arg(short, long)]
        filter: Option<String>,
        /// Show verbose output (debug logging, stream dumps)
        #[arg(short, long)]
        verbose: bool,
        /// Directory failing scripts are saved to (overrides config)
        #[arg(long)]
        debug_dir: Option<PathBuf>,
        /// Watchdog timeout per script in seconds, 0 to disable (overrides config)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Validate test tables without running them
    Validate {
        /// Path to test tables (file or directory)
        path: PathBuf,
    },
    /// Scaffold a new table file
    Init {
        /// Output path for the new table file
        #[arg(default_value = "tests/example.yaml")]
        path: PathBuf,
    },
    /// Output the table schema
    Schema,
}

/// Everything the CLI reads from or writes to.
pub struct Options {
    /// Command line, program name first.
    pub args: Vec<OsString>,
    pub stdout: Box<dyn Write>,
    pub stderr: Box<dyn Write>,
}

impl Options {
    /// The process arguments and standard streams.
    pub fn from_env() -> Self {
        Self {
            args: std::env::args_os().collect(),
            stdout: Box::new(io::stdout()),
            stderr: Box::new(io::stderr()),
        }
    }
}

/// Runs the CLI and returns the process exit code.
pub fn execute(options: Options) -> i32 {
    let Options {
        args,
        mut stdout,
        mut stderr,
    } = options;

    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(e) => {
            let sink = if e.use_stderr() { &mut stderr } else { &mut stdout };
            let _ = write!(sink, "{}", e.render());
            return e.exit_code();
        }
    };

    let verbose = matches!(cli.command, Command::Run { verbose: true, .. });
    init_logging(verbose);

    let outcome = match cli.command {
        Command::Run {
            path,
            output,
            filter,
            verbose,
            debug_dir,
            timeout,
        } => run(
            RunArgs {
                path,
                output,
                filter,
                verbose,
                debug_dir,
                timeout,
            },
            &mut *stdout,
            &mut *stderr,
        ),
        Command::Validate { path } => validate(&path, &mut *stdout, &mut *stderr),
        Command::Init { path } => init(&path, &mut *stdout),
        Command::Schema => print_schema(&mut *stdout),
    };

    let code = match outcome {
        Ok(code) => code,
        Err(message) => {
            let _ = writeln!(stderr, "{message}");
            1
        }
    };
    let _ = stdout.flush();
    let _ = stderr.flush();
    code
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when driven in-process
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

struct RunArgs {
    path: PathBuf,
    output: OutputFormat,
    filter: Option<String>,
    verbose: bool,
    debug_dir: Option<PathBuf>,
    timeout: Option<u64>,
}

type Outcome = Result<i32, String>;

fn run(args: RunArgs, out: &mut dyn Write, err: &mut dyn Write) -> Outcome {
    let io_err = |e: io::Error| format!("Error writing output: {e}");

    // Show filter info in verbose mode
    if args.verbose
        && let Some(ref f) = args.filter
    {
        writeln!(err, "Filtering tests by: {f:?}").map_err(io_err)?;
    }

    // Determine the test root directory for the harness config
    let test_root = if args.path.is_file() {
        args.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
    } else {
        &args.path
    };

    let mut config = load_harness_config(test_root)?;

    // CLI flags override the config file
    if let Some(dir) = args.debug_dir {
        config.debug_dir = Some(dir);
    }
    if let Some(secs) = args.timeout {
        config.timeout = Some(secs);
    }

    let harness = Harness::new(config).map_err(|e| format!("Error loading harness config: {e}"))?;
    let registry = Registry::builtin();

    let table_paths = loader::find_tables(&args.path)
        .map_err(|e| format!("Error finding tables: {e}"))?;
    if table_paths.is_empty() {
        return Err(format!("No table files found at: {}", args.path.display()));
    }

    harness
        .prefetch_suite()
        .map_err(|e| format!("Suite prefetch failed: {e}"))?;

    // Load all tables first, tracking any load failures
    let tables: Vec<_> = table_paths
        .iter()
        .map(|p| (p.clone(), loader::load_table(p).map_err(|e| e.to_string())))
        .collect();

    let run_start = Instant::now();
    let filter = args.filter.as_deref();
    let run_one = |spec: Result<schema::TableSpec, String>| -> Result<TableResult, String> {
        spec.map(|spec| table::run_table_filtered(&spec, &harness, &registry, filter))
    };

    // Run tables (parallel by default, serial if configured)
    let results: Vec<FileResult> = if harness.config().serial {
        tables
            .into_iter()
            .map(|(path, spec)| FileResult {
                file: path.display().to_string(),
                outcome: run_one(spec),
            })
            .collect()
    } else {
        thread::scope(|s| {
            let handles: Vec<_> = tables
                .into_iter()
                .map(|(path, spec)| {
                    let run_one = &run_one;
                    s.spawn(move || FileResult {
                        file: path.display().to_string(),
                        outcome: run_one(spec),
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| FileResult {
                        file: "<unknown>".to_string(),
                        outcome: Err("Table thread panicked".to_string()),
                    })
                })
                .collect()
        })
    };
    let total_time = run_start.elapsed();

    match args.output {
        OutputFormat::Human => report::write_human(out, err, &results, args.verbose),
        OutputFormat::Json => report::write_json(out, &results),
        OutputFormat::Junit => write!(out, "{}", report::format_junit_xml(&results, total_time)),
    }
    .map_err(io_err)?;

    Ok(if Summary::of(&results).failed > 0 { 1 } else { 0 })
}

fn load_harness_config(test_root: &Path) -> Result<HarnessConfig, String> {
    match loader::load_config(test_root) {
        Ok(Some(config)) => Ok(config),
        Ok(None) => {
            let root = std::path::absolute(test_root)
                .map_err(|e| format!("Error resolving {}: {e}", test_root.display()))?;
            HarnessConfig::default()
                .resolve(&root)
                .map_err(|e| format!("Error loading harness config: {e}"))
        }
        Err(e) => Err(format!("Error loading harness config: {e}")),
    }
}

fn validate(path: &Path, out: &mut dyn Write, err: &mut dyn Write) -> Outcome {
    let io_err = |e: io::Error| format!("Error writing output: {e}");
    let tables = loader::find_tables(path).map_err(|e| format!("Error finding tables: {e}"))?;
    if tables.is_empty() {
        return Err(format!("No table files found at: {}", path.display()));
    }

    let registry = Registry::builtin();
    let mut errors = 0;
    for table_path in &tables {
        match loader::load_table(table_path) {
            Ok(spec) => match table::validate(&spec, &registry) {
                Ok(()) => {
                    writeln!(out, "✓ {} ({} tests)", table_path.display(), spec.tests.len())
                        .map_err(io_err)?;
                }
                Err(problems) => {
                    writeln!(err, "✗ {}:", table_path.display()).map_err(io_err)?;
                    for problem in problems {
                        writeln!(err, "    {problem}").map_err(io_err)?;
                    }
                    errors += 1;
                }
            },
            Err(e) => {
                writeln!(err, "✗ {}: {e}", table_path.display()).map_err(io_err)?;
                errors += 1;
            }
        }
    }

    if errors > 0 {
        writeln!(err, "\n{errors} table(s) failed validation").map_err(io_err)?;
        return Ok(1);
    }
    writeln!(out, "\nAll {} table(s) valid", tables.len()).map_err(io_err)?;
    Ok(0)
}

const TABLE_TEMPLATE: &str = r#"version: 1

# Scriptlets assembled, in order, into the program under test.
scripts:
  - load: [library.bash]
  - preset: kubectl
  # - mock:
  #     name: gcloud
  #     responses:
  #       - prefix: config get-value
  #         output: my-project

tests:
  - name: wait_until_pods_running knative-serving
    stdout:
      contains: "are up"

  - name: abort_on_error
    commands:
      - abort "something went wrong"
    stderr:
      contains: "something went wrong"
"#;

fn init(path: &Path, out: &mut dyn Write) -> Outcome {
    if path.exists() {
        return Err(format!("Error: file already exists: {}", path.display()));
    }
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        fs::create_dir_all(parent).map_err(|e| format!("Error creating directory: {e}"))?;
    }
    fs::write(path, TABLE_TEMPLATE).map_err(|e| format!("Error writing file: {e}"))?;
    writeln!(out, "Created: {}", path.display()).map_err(|e| e.to_string())?;
    Ok(0)
}

fn print_schema(out: &mut dyn Write) -> Outcome {
    let schema = schema::generate_schema();
    let json = serde_json::to_string_pretty(&schema)
        .map_err(|e| format!("Failed to serialize schema: {e}"))?;
    writeln!(out, "{json}").map_err(|e| e.to_string())?;
    Ok(0)
}
