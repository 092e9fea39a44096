mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

use metascribe::config::{self, Config};
use metascribe::db::init_pool;
use metascribe::graph::ServiceGraph;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start => {
            let mut config = config::load_config_or_default(cli.config.as_deref())?;
            if let Some(database) = cli.database {
                config.database.file = database;
            }
            init_logging(cli.verbose, &config.log_level);

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start(config, cli.config.as_deref()))
        }
        Commands::Validate {
            config: config_path,
        } => {
            init_logging(cli.verbose, "info");
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("metascribe {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_logging(verbose: bool, level: &str) {
    // Respect RUST_LOG if set, otherwise use the verbose flag or the
    // configured level.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if verbose {
            "metascribe=trace".to_string()
        } else {
            format!("metascribe={level}")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();
}

async fn start(config: Config, config_path: Option<&Path>) -> Result<()> {
    tracing::info!("Starting metascribe");

    let db_file = config.database.file.clone();
    tracing::info!("Opening database at {:?}", db_file);
    let pool = init_pool(&db_file)?;

    let graph = ServiceGraph::new(config, config_path.map(|p| p.to_path_buf()), pool)?;

    let generation = graph.current();
    let backends: Vec<String> = generation
        .backends()
        .map(|(kind, _)| kind.to_string())
        .collect();
    if backends.is_empty() {
        tracing::warn!("No media server backend configured; metadata jobs cannot be dispatched");
    } else {
        tracing::info!(backends = ?backends, providers = generation.providers().len(), "Service graph ready");
    }
    drop(generation);

    wait_for_shutdown(&graph, config_path).await
}

/// Block until Ctrl-C. On Unix, SIGHUP triggers a config reload through the
/// service graph; a failed reload keeps the previous generation running.
#[cfg(unix)]
async fn wait_for_shutdown(graph: &ServiceGraph, config_path: Option<&Path>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = hangup.recv() => {
                let Some(path) = config_path else {
                    tracing::warn!("SIGHUP received but no config file is in use; ignoring");
                    continue;
                };
                tracing::info!("SIGHUP received; reloading configuration");
                match config::load_config(path) {
                    Ok(new_config) => {
                        if let Err(e) = graph.reconfigure(new_config).await {
                            tracing::error!("Reload failed, keeping previous configuration: {e}");
                        }
                    }
                    Err(e) => {
                        tracing::error!("Reload failed, keeping previous configuration: {e}");
                    }
                }
            }
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_graph: &ServiceGraph, _config_path: Option<&Path>) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Komga: {}", config.komga.is_some());
            println!("  Kavita: {}", config.kavita.is_some());
            let providers = config.providers.enabled();
            println!("  Providers: {}", providers.len());
            for (identity, provider) in providers {
                println!(
                    "    {} (priority {}, {}/{}s)",
                    identity,
                    provider.priority,
                    provider.rate_limit.events_per_interval,
                    provider.rate_limit.interval_secs
                );
            }
            println!("  Webhooks: {}", config.notifications.webhooks.len());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("  Database: {:?}", config.database.file);
        }
    }

    Ok(())
}
