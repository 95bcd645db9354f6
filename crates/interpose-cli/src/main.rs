//! Interpose CLI tool
//!
//! Inspect the compiled-in interception table and drive the interception
//! core through a small demo workload.

use clap::{ArgAction, Parser, Subcommand};
use interpose_cli::commands::{demo, info, specs};
use interpose_cli::output::{resolve_color_choice, StyledOutput};
use interpose_engine::SwapMode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interpose")]
#[command(about = "Dispatch-table method interception toolkit", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Colored output: auto, always, never
    #[arg(long, global = true)]
    color: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the compiled-in interception table
    Specs {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run intercepted calls on App.Activity and report what happened
    Demo {
        /// Call guard strategy (per-call or class-wide)
        #[arg(short, long, default_value = "per-call")]
        mode: SwapMode,
        /// Worker threads, one activity each
        #[arg(short, long, default_value_t = 4)]
        threads: usize,
        /// onResume calls per thread
        #[arg(short, long, default_value_t = 1000)]
        calls: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version and configuration defaults
    Info,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("INTERPOSE_LOG").unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut out = StyledOutput::new(resolve_color_choice(cli.color.as_deref()));

    match cli.command {
        Commands::Specs { json } => specs::execute(json, &mut out),

        Commands::Demo {
            mode,
            threads,
            calls,
            json,
        } => demo::execute(
            demo::DemoOptions {
                mode,
                threads,
                calls,
            },
            json,
            &mut out,
        ),

        Commands::Info => info::execute(&mut out),
    }
}
