// src/main.rs

use anyhow::Result;
use clap::Parser;
use ntnsync::cli::{Cli, Commands};
use ntnsync::commands;
use ntnsync::{Config, LogFormat};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    init_logging(config.log_format);

    if let Err(e) = run(&cli, &config) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Pull {
            folder,
            since,
            max_pages,
            all,
            dry_run,
        } => commands::cmd_pull(
            config,
            folder.clone(),
            since.clone(),
            *max_pages,
            *all,
            *dry_run,
        ),
        Commands::Sync {
            folder,
            max_pages,
            max_files,
            max_time,
            max_queue_files,
        } => commands::cmd_sync(
            config,
            folder.clone(),
            *max_pages,
            *max_files,
            max_time.clone(),
            *max_queue_files,
        ),
        Commands::Get { target, folder } => commands::cmd_get(config, target, folder.clone()),
        Commands::Scan { folder } => commands::cmd_scan(config, folder.clone()),
        Commands::List { folder, tree } => commands::cmd_list(config, folder.clone(), *tree),
        Commands::Status { folder } => commands::cmd_status(config, folder.clone()),
        Commands::Cleanup { dry_run } => commands::cmd_cleanup(config, *dry_run),
        Commands::Reindex { dry_run } => commands::cmd_reindex(config, *dry_run),
        Commands::Serve => commands::cmd_serve(config),
    }
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}
