//! ry CLI Entry Point
//!
//! Thin front end over the engine: loads one workflow document and runs,
//! plans or dumps the handler matched by the remaining arguments.
//!
//! # Usage
//!
//! ```bash
//! # Run the handler matching `commit -m wip`
//! ry git.yaml commit -m wip
//!
//! # Print the matched handler as a shell program instead of running it
//! ry --dry-run git.yaml commit -m wip
//!
//! # Print the canonical definition
//! ry --dump git.yaml
//!
//! # Run from another directory with pipefail semantics
//! ry --working-dir /srv/repo --strict-pipes git.yaml log
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use ry_engine::execution::{Engine, ExitStatus, PipelineMode};
use ry_engine::workflow::{dump_definition, Loader};
use ry_engine::{Context, EngineError, APP_NAME, VERSION};

/// Exit code for command-line usage errors.
const USAGE_EXIT_CODE: u8 = 2;

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default, PartialEq)]
struct Config {
    workflow_path: String,
    arguments: Vec<String>,
    dry_run: bool,
    dump: bool,
    working_dir: Option<PathBuf>,
    strict_pipes: bool,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: ry [OPTIONS] <WORKFLOW_FILE> [ARGS]...");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML document");
    println!("  [ARGS]...           Invocation, forwarded untouched");
    println!();
    println!("Options:");
    println!("  --dry-run           Print the matched handler as a shell program");
    println!("  --dump              Print the canonical definition as YAML");
    println!("  --working-dir PATH  Directory spawned processes start in");
    println!("  --strict-pipes      Fail pipelines on the first failing member");
    println!("  --verbose           Enable debug logging and print the trace");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  ry git.yaml status");
    println!("  ry --dry-run git.yaml commit -m wip");
    println!("  ry --working-dir /srv/repo git.yaml log --oneline -5");
}

/// Parses command-line arguments into a Config struct.
///
/// Options are only recognized before the workflow path; every token after
/// it belongs to the invocation.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--dry-run" => config.dry_run = true,
            "--dump" => config.dump = true,
            "--strict-pipes" => config.strict_pipes = true,
            "--verbose" | "-v" => config.verbose = true,
            "--working-dir" => {
                i += 1;
                if i >= args.len() {
                    return Err("--working-dir requires a path argument".to_string());
                }
                config.working_dir = Some(PathBuf::from(&args[i]));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                config.workflow_path = arg.clone();
                config.arguments = args[i + 1..].to_vec();
                return Ok(config);
            }
        }
        i += 1;
    }

    Err("missing <WORKFLOW_FILE>".to_string())
}

/// Checks that the requested working directory is usable.
fn check_working_directory(dir: &Path) -> ry_engine::Result<()> {
    let metadata = fs::metadata(dir)
        .map_err(|e| EngineError::io(format!("working directory {}", dir.display()), e))?;

    if !metadata.is_dir() {
        return Err(EngineError::io(
            format!("working directory {}", dir.display()),
            io::Error::new(io::ErrorKind::Other, "not a directory"),
        ));
    }
    Ok(())
}

/// Loads the document and performs the requested action.
fn run(config: Config) -> ry_engine::Result<ExitStatus> {
    info!("Loading workflow: {}", config.workflow_path);
    let definition = Loader::default()
        .with_arguments(config.arguments.clone())
        .load_path(Path::new(&config.workflow_path))?;
    let mut engine = Engine::new(definition);

    if config.dump {
        print!("{}", dump_definition(engine.definition())?);
        return Ok(ExitStatus::SUCCESS);
    }

    if let Some(dir) = config.working_dir {
        check_working_directory(&dir)?;
        info!("Working directory: {}", dir.display());
        engine.set_working_dir(dir);
    }

    if config.strict_pipes {
        engine.set_pipeline_mode(PipelineMode::Strict);
    }

    let environment = Context::process_environment();

    if config.dry_run {
        print!("{}", engine.plan(config.arguments, environment)?);
        return Ok(ExitStatus::SUCCESS);
    }

    let mut invocation = engine.invocation(config.arguments, environment);
    let result = invocation.run();

    if config.verbose {
        if let Some(trace) = invocation.trace() {
            eprint!("{}", trace.summary());
        }
    }

    if result.is_err() {
        error!(
            "Invocation of '{}' failed ({})",
            config.workflow_path,
            invocation.handler().unwrap_or("no handler")
        );
    }
    result
}

/// Clamps an engine exit code into the range a process can report.
fn process_exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config = match parse_arguments(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            eprintln!();
            print_usage();
            return ExitCode::from(USAGE_EXIT_CODE);
        }
    };

    setup_logging(config.verbose);

    match run(config) {
        Ok(status) => process_exit_code(status.code()),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            process_exit_code(e.exit_code())
        }
    }
}
