mod channel;
mod cmd;
mod output;
mod root;

use clap::{Parser, Subcommand};
use cmd::{
    config::ConfigSubcommand, threshold::ThresholdSubcommand, venture::VentureSubcommand,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "greenlight",
    about = "Adaptive gating engine: score candidate items, queue human decisions, and walk ventures through the launch pipeline",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .greenlight/ or .git/)
    #[arg(long, global = true, env = "GREENLIGHT_ROOT")]
    root: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize greenlight in the current project
    Init,

    /// Score drafts from a JSON file and queue review actions
    Ingest {
        /// Path to a draft object or an array of drafts
        #[arg(long)]
        file: PathBuf,
    },

    /// Show the next queued action for the operator
    Next,

    /// Approve a queued action
    Approve { id: String },

    /// Reject a queued action
    Reject {
        id: String,
        /// Why the item was rejected
        #[arg(long)]
        reason: Option<String>,
    },

    /// Skip a queued action without deciding
    Skip { id: String },

    /// List queued actions
    Queue {
        /// Include completed, rejected, skipped, and expired actions
        #[arg(long)]
        all: bool,
    },

    /// Inspect or override gating thresholds
    Threshold {
        #[command(subcommand)]
        subcommand: ThresholdSubcommand,
    },

    /// Manage ventures in the launch pipeline
    Venture {
        #[command(subcommand)]
        subcommand: VentureSubcommand,
    },

    /// Inspect the project configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },

    /// Run an out-of-cycle threshold controller pass
    Retune,

    /// Expire stale actions and purge old terminal ones
    Gc,

    /// Show project summary
    Status,

    /// Run the periodic maintenance loop in the foreground
    Watch {
        /// Seconds between maintenance passes
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Watch { .. } => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root_path = cli.root.as_deref();
    let root = root::resolve_root(root_path);

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Ingest { file } => cmd::ingest::run(&root, &file, cli.json),
        Commands::Next => cmd::next::run(&root, cli.json),
        Commands::Approve { id } => cmd::respond::approve(&root, &id, cli.json),
        Commands::Reject { id, reason } => {
            cmd::respond::reject(&root, &id, reason.as_deref(), cli.json)
        }
        Commands::Skip { id } => cmd::respond::skip(&root, &id, cli.json),
        Commands::Queue { all } => cmd::queue::run(&root, all, cli.json),
        Commands::Threshold { subcommand } => cmd::threshold::run(&root, subcommand, cli.json),
        Commands::Venture { subcommand } => cmd::venture::run(&root, subcommand, cli.json),
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
        Commands::Retune => cmd::retune::run(&root, cli.json),
        Commands::Gc => cmd::gc::run(&root, cli.json),
        Commands::Status => cmd::status::run(&root, cli.json),
        Commands::Watch { interval } => cmd::watch::run(&root, interval),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
