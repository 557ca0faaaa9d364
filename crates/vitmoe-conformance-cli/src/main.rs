use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

mod commands;
mod exit;

use exit::CliExitCode;

/// Top-level CLI argument parser for the `vmc` command
#[derive(Parser)]
#[command(
    name = "vmc",
    about = "vmc: conformance checks for a ViT/MoE inference engine",
    version
)]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `vmc` CLI
#[derive(Subcommand)]
enum Commands {
    /// Load tables, run the engine and compare against the reference
    Run {
        /// Directory holding tables.yaml and its .float32.bin files
        #[arg(long)]
        tables: PathBuf,
        /// Configuration YAML (canonical model when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override harness.mse_threshold
        #[arg(long)]
        threshold: Option<f64>,
        /// Reuse weights cached by a previous call
        #[arg(long)]
        no_reload: bool,
        /// Override harness.debug_tap
        #[arg(long)]
        debug_tap: Option<u32>,
        /// Override harness.gate_task
        #[arg(long)]
        gate_task: Option<usize>,
        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the configuration YAML
        #[arg(long)]
        config: PathBuf,
    },
    /// Print the tensor shape contract for a configuration
    Shapes {
        /// Configuration YAML (canonical model when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Assemble a table set from per-layer float32 dumps
    Import {
        /// Directory of per-layer dumps
        #[arg(long)]
        dumps: PathBuf,
        /// Output table directory
        #[arg(short, long)]
        output: PathBuf,
        /// Configuration YAML (canonical model when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Write a seeded, self-consistent synthetic table set
    Synth {
        /// Output table directory
        #[arg(short, long)]
        output: PathBuf,
        /// Configuration YAML (canonical model when omitted)
        #[arg(long)]
        config: Option<PathBuf>,
        /// RNG seed
        #[arg(long, default_value_t = 0)]
        seed: u64,
    },
}

/// Dispatch a parsed CLI subcommand to its handler
fn run_command(command: Commands) -> Result<CliExitCode, Box<dyn std::error::Error>> {
    match command {
        Commands::Run {
            tables,
            config,
            threshold,
            no_reload,
            debug_tap,
            gate_task,
            format,
        } => {
            let format = commands::run::ReportFormat::from_str(&format)?;
            commands::run::run(&commands::run::RunOptions {
                tables,
                config,
                threshold,
                reload: !no_reload,
                debug_tap,
                gate_task,
                format,
            })
        }
        Commands::Validate { config } => commands::validate::run(&config),
        Commands::Shapes { config } => commands::shapes::run(config.as_deref()),
        Commands::Import {
            dumps,
            output,
            config,
        } => commands::import::run(&dumps, &output, config.as_deref()),
        Commands::Synth {
            output,
            config,
            seed,
        } => commands::synth::run(&output, config.as_deref(), seed),
    }
}

/// Entry point: parse CLI arguments, set up logging, run the subcommand
fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let code = match run_command(cli.command) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            CliExitCode::Error
        }
    };
    process::exit(code.into());
}
