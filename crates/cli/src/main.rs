mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Battery-cycler protocol bridge.
#[derive(Parser)]
#[command(
    name = "cycler",
    version,
    about = "Convert Maccor procedures to Arbin schedules"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long = "output-format", global = true, default_value = "text", value_enum)]
    output_format: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log conversion stages to stderr (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a procedure (.000) into a schedule (.sdu) based on a baseline
    Convert {
        /// Path to the procedure file
        procedure: PathBuf,
        /// Baseline schedule whose non-step sections are kept
        #[arg(long)]
        baseline: PathBuf,
        /// Where to write the converted schedule
        #[arg(long)]
        output: PathBuf,
        /// TOML file with converter settings
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Parse and re-serialize a file in memory and report whether the bytes match
    Roundtrip {
        /// Procedure (.000) or schedule (.sdu) file
        file: PathBuf,
    },

    /// Print the JSON mirror of a procedure or schedule
    Json {
        /// Procedure (.000) or schedule (.sdu) file
        file: PathBuf,
    },

    /// Generate a procedure from a placeholder template
    Template {
        /// Cell capacity in Ah
        #[arg(long)]
        capacity: f64,
        /// Charge C-rate
        #[arg(long)]
        charge_rate: f64,
        /// Discharge C-rate
        #[arg(long)]
        discharge_rate: f64,
        /// Where to write the procedure
        #[arg(long)]
        output: PathBuf,
        /// Template file (defaults to the built-in EXP.000)
        #[arg(long)]
        template: Option<PathBuf>,
    },

    /// Derive a fast-charge schedule from a baseline schedule
    FastCharge {
        /// First-stage charge current
        #[arg(long)]
        charge_rate: f64,
        /// Capacity at which the first stage ends
        #[arg(long)]
        capacity: f64,
        /// Second-stage current
        #[arg(long)]
        discharge_rate: f64,
        /// Baseline schedule
        #[arg(long)]
        baseline: PathBuf,
        /// Where to write the schedule
        #[arg(long)]
        output: PathBuf,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Convert {
            procedure,
            baseline,
            output,
            config,
        } => {
            commands::convert::cmd_convert(
                &procedure,
                &baseline,
                &output,
                config.as_deref(),
                cli.output_format,
                cli.quiet,
            );
        }
        Commands::Roundtrip { file } => {
            commands::roundtrip::cmd_roundtrip(&file, cli.output_format, cli.quiet);
        }
        Commands::Json { file } => {
            commands::json::cmd_json(&file, cli.output_format, cli.quiet);
        }
        Commands::Template {
            capacity,
            charge_rate,
            discharge_rate,
            output,
            template,
        } => {
            commands::template::cmd_template(
                capacity,
                charge_rate,
                discharge_rate,
                &output,
                template.as_deref(),
                cli.output_format,
                cli.quiet,
            );
        }
        Commands::FastCharge {
            charge_rate,
            capacity,
            discharge_rate,
            baseline,
            output,
        } => {
            commands::fast_charge::cmd_fast_charge(
                charge_rate,
                capacity,
                discharge_rate,
                &baseline,
                &output,
                cli.output_format,
                cli.quiet,
            );
        }
    }
}
