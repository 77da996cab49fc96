//! portlens CLI: static port-pressure and latency analysis of loop kernels.

mod commands;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use tracing::Level;

#[derive(Parser)]
#[command(
    name = "portlens",
    version,
    about = "Static port-pressure and latency analysis of loop kernels"
)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a kernel against a machine model
    Analyze {
        /// Kernel file (JSON array of parsed instructions)
        kernel: PathBuf,
        /// Machine model name or path to a .model.toml file
        #[arg(long)]
        model: String,
        /// ISA model name or path (default: the one matching the machine's ISA)
        #[arg(long)]
        isa: Option<String>,
        /// Directory searched for models given by name
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Configuration file (default: ./portlens.toml if present)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Loop-carried dependency search budget in seconds (-1: no limit)
        #[arg(long, allow_negative_numbers = true)]
        lcd_timeout: Option<f64>,
        /// Track dependencies through condition flags
        #[arg(long)]
        consider_flag_deps: bool,
        /// Keep the even split of port pressure instead of balancing it
        #[arg(long)]
        no_optimal_throughput: bool,
        /// Output format (text, json)
        #[arg(long)]
        export: Option<String>,
        /// Write the dependency graph in Graphviz format to this file
        #[arg(long)]
        dot: Option<PathBuf>,
    },
    /// Inspect machine and ISA models
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// List models in the data directory
    List {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Show details of a model
    Describe {
        /// Model name or path
        name: String,
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Output format (default: human-readable, "toml" for TOML)
        #[arg(long)]
        format: Option<String>,
    },
    /// Check a model for structural problems
    Validate {
        /// Model name or path
        name: String,
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let result = run(cli);
    if let Err(e) = result {
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Analyze {
            kernel,
            model,
            isa,
            data_dir,
            config,
            lcd_timeout,
            consider_flag_deps,
            no_optimal_throughput,
            export,
            dot,
        } => commands::analyze::run(&commands::analyze::AnalyzeArgs {
            kernel: &kernel,
            model: &model,
            isa: isa.as_deref(),
            data_dir: &data_dir,
            config: config.as_deref(),
            lcd_timeout,
            consider_flag_deps,
            no_optimal_throughput,
            export: export.as_deref(),
            dot: dot.as_deref(),
        }),

        Commands::Model { action } => match action {
            ModelAction::List { data_dir } => commands::model::list(&data_dir),
            ModelAction::Describe {
                name,
                data_dir,
                format,
            } => commands::model::describe(&name, &data_dir, format.as_deref()),
            ModelAction::Validate { name, data_dir } => {
                commands::model::validate(&name, &data_dir)
            }
        },
    }
}
