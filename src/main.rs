use anyhow::Context;
use clap::Parser;
use dbops::cli::{self, Command};
use dbops::config::{Config, DEFAULT_CONFIG_FILE};
use dbops::report::ReportFormat;
use dbops::Store;
use std::path::PathBuf;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbops", version, about = "Low-level maintenance of the exercise store")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// SQLite store; overrides the config file and DBOPS_DATABASE
    #[arg(long)]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Report format: csv or json
    #[arg(long, default_value = "csv")]
    format: ReportFormat,

    /// Command as <group>:<operation>, e.g. runtimes:migrate
    command: String,

    args: Vec<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let command = Command::parse(&args.command, &args.args)?;

    let mut config = Config::load(&args.config)?.with_env_overrides();
    if let Some(db) = args.database {
        config.database = db;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    init_logging(&config.log_level);

    let mut store = Store::open(&config.database)
        .with_context(|| format!("failed to open {}", config.database.to_string_lossy()))?;
    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    cli::execute(
        &command,
        &mut store,
        &config,
        args.format,
        &mut stdout.lock(),
        &mut stderr.lock(),
    )
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
