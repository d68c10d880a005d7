//! CycleFlow CLI Entry Point
//!
//! Loads a workflow, compiles it into a graph, validates it and prints a
//! diagnostic view.
//!
//! # Usage
//!
//! ```bash
//! # Print cycles, tasks and edges as a tree
//! cycleflow icon.yml
//!
//! # Print tasks in execution order
//! cycleflow icon.yml --order
//!
//! # Dump the compiled graph as JSON
//! cycleflow icon.yml --json
//! ```

use std::env;
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use cycleflow::graph::render::{render_order, render_tree};
use cycleflow::{compile, load_workflow, validate, APP_NAME, VERSION};

/// Default workflow file used when none is specified.
const DEFAULT_WORKFLOW: &str = "workflow.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Output {
    Tree,
    Order,
    Json,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    workflow_path: String,
    output: Output,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workflow_path: DEFAULT_WORKFLOW.to_string(),
            output: Output::Tree,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
///
/// Logs go to stderr so `--json` output stays machine readable.
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
    println!("Usage: cycleflow [OPTIONS] <WORKFLOW_FILE>");
    println!();
    println!("Arguments:");
    println!("  <WORKFLOW_FILE>     Path to workflow YAML file (default: {})", DEFAULT_WORKFLOW);
    println!();
    println!("Options:");
    println!("  --order             Print tasks in execution order");
    println!("  --json              Print the compiled graph as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Exit status is non-zero on configuration errors and on validation findings.");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut positional_seen = false;

    for arg in args.iter().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--order" => config.output = Output::Order,
            "--json" => config.output = Output::Json,
            "--verbose" | "-v" => config.verbose = true,
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if positional_seen {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.workflow_path = arg.clone();
                positional_seen = true;
            }
        }
    }

    Ok(config)
}

/// Main application entry point.
///
/// Returns `Ok(false)` when the graph compiled but has findings.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);
    info!("{} v{}", APP_NAME, VERSION);

    let workflow = load_workflow(&config.workflow_path).map_err(|e| {
        error!("Failed to load workflow: {}", e);
        format!(
            "Could not load workflow from '{}': {}",
            config.workflow_path, e
        )
    })?;

    let graph = compile(&workflow)?;
    let findings = validate(&graph);

    match config.output {
        Output::Json => println!("{}", graph.to_json()?),
        Output::Tree => println!("{}", render_tree(&graph)),
        Output::Order => match graph.task_order() {
            Ok(order) => println!("{}", render_order(&graph, &order)),
            Err(_) => eprintln!("{}", "No execution order: the graph has a dependency loop".red()),
        },
    }

    if findings.is_clean() {
        if config.output != Output::Json {
            eprintln!("{}", "Graph is valid".green());
        }
        return Ok(true);
    }

    eprintln!();
    eprintln!("{} finding(s):", findings.len().to_string().red().bold());
    for finding in findings.iter() {
        eprintln!("  {}", finding.to_string().yellow());
    }
    Ok(false)
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
