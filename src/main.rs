//! Skein CLI entrypoint.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::process::ExitCode;

use skein::{
    Config, ExitStatus, Reporter, RunOptions, RunReport, ScenarioDefinition, ScenarioPath,
    SkeinDuration, example_document, run_scenario,
};

#[derive(Debug, Parser)]
#[command(name = "skein")]
#[command(about = "scenario player for payment-channel networks")]
struct Cli {
    /// Path to config file. Missing configs are treated as "defaults".
    #[arg(long, global = true, default_value = "skein.toml")]
    config: PathBuf,

    /// Log level.
    #[arg(long, global = true, default_value = "info")]
    log: String,

    /// Machine-readable output to stdout (JSON).
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Execute a scenario against the configured node cluster
    Run {
        scenario: PathBuf,

        /// Assertion poll interval override, e.g. "500ms".
        #[arg(long)]
        poll_interval: Option<SkeinDuration>,

        /// Assertion deadline override, e.g. "3m".
        #[arg(long)]
        max_wait: Option<SkeinDuration>,

        /// Where to write the structured result tree.
        #[arg(long)]
        report_to: Option<PathBuf>,

        #[arg(long)]
        reporter: Option<Reporter>,
    },

    /// Load and validate a scenario without executing it
    Validate { scenario: PathBuf },

    /// Print an example scenario document
    Example,

    /// Print version and build info
    Version,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_tracing(&cli.log) {
        // Tracing is best-effort; if it fails, we still continue.
        eprintln!("warning: failed to init tracing: {err:#}");
    }

    let config = Config::load_optional(&cli.config);

    match run_command(&cli, &config) {
        Ok(code) => code,
        Err(err) => print_error_and_exit(&cli, err),
    }
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
    Ok(())
}

fn run_command(cli: &Cli, config: &Config) -> anyhow::Result<ExitCode> {
    match &cli.command {
        Command::Run {
            scenario,
            poll_interval,
            max_wait,
            report_to,
            reporter,
        } => {
            let options = RunOptions {
                poll_interval: poll_interval.map(|d| d.0),
                max_wait: max_wait.map(|d| d.0),
                reporter: reporter.unwrap_or(config.reporter),
                report_to: report_to.clone(),
            };
            let report = run_scenario(config, ScenarioPath::new(scenario.clone()), &options)?;
            print_report(cli, &options, &report)?;
            Ok(exit_code_for_status(report.summary.status))
        }

        Command::Validate { scenario } => {
            let definition = ScenarioDefinition::load(&ScenarioPath::new(scenario.clone()))?;
            if cli.json {
                let out = serde_json::json!({
                    "status": "ok",
                    "scenario": definition.name,
                    "nodes": definition.nodes.count,
                });
                println!("{out}");
            } else {
                println!(
                    "{}: ok ({} nodes)",
                    definition.name, definition.nodes.count
                );
            }
            Ok(ExitCode::SUCCESS)
        }

        Command::Example => {
            println!("{}", example_document());
            Ok(ExitCode::SUCCESS)
        }

        Command::Version => {
            if cli.json {
                let out = serde_json::json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                });
                println!("{out}");
            } else {
                println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(cli: &Cli, options: &RunOptions, report: &RunReport) -> anyhow::Result<()> {
    if cli.json || options.reporter == Reporter::Json {
        println!("{}", serde_json::to_string(&report.summary)?);
    } else {
        println!("{}", report.pretty());
    }
    Ok(())
}

fn print_error_and_exit(cli: &Cli, err: anyhow::Error) -> ExitCode {
    let msg = format!("{err:#}");
    if cli.json {
        let out = serde_json::json!({
            "status": "error",
            "message": msg,
        });
        println!("{out}");
    } else {
        eprintln!("{msg}");
    }
    ExitCode::from(2)
}

fn exit_code_for_status(status: ExitStatus) -> ExitCode {
    match status {
        ExitStatus::Pass => ExitCode::SUCCESS,
        ExitStatus::Fail => ExitCode::from(1),
        ExitStatus::Error => ExitCode::from(2),
        ExitStatus::Timeout => ExitCode::from(3),
    }
}
