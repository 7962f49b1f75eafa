//! vigil - multi-source alert watcher
//!
//! Polls alert backends, tracks alert lifecycles and prints alerts with an
//! owner's colors and visibility rules applied.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};
use vigil_cli::{AlertView, Monitor, VigilConfig, fingerprint_args};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Multi-source alert watcher")]
#[command(version)]
struct Cli {
    /// Emit logs and output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the configured sources and print lifecycle events
    Watch {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "vigil.json")]
        config: PathBuf,
    },

    /// Refresh once and print the active alerts
    Snapshot {
        /// Path to config file
        #[arg(short, long, env = "VIGIL_CONFIG", default_value = "vigil.json")]
        config: PathBuf,
    },

    /// Print the canonical labels and fingerprint of a label set
    Fingerprint {
        /// Labels as key=value
        #[arg(required = true)]
        labels: Vec<String>,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = "vigil.json")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("vigil=info".parse()?);
    tracing_subscriber::registry()
        .with(cli.json.then(|| fmt::layer().json()))
        .with((!cli.json).then(fmt::layer))
        .with(filter)
        .init();

    match cli.command {
        Commands::Watch { config } => watch(config, cli.json).await?,
        Commands::Snapshot { config } => snapshot(config, cli.json).await?,
        Commands::Fingerprint { labels } => fingerprint(&labels, cli.json)?,
        Commands::InitConfig { output } => init_config(output)?,
    }

    Ok(())
}

fn load_monitor(config_path: &Path) -> anyhow::Result<Monitor> {
    let config = VigilConfig::from_file(config_path)?;
    info!(
        config = %config_path.display(),
        owner = %config.owner,
        sources = config.sources.len(),
        refresh_interval_ms = config.refresh_interval_ms,
        "loaded config"
    );
    Ok(Monitor::from_config(&config)?)
}

async fn watch(config_path: PathBuf, json: bool) -> anyhow::Result<()> {
    let monitor = load_monitor(&config_path)?;

    // Subscribe before starting so the initial refresh's events are seen.
    let mut events = monitor.cache().subscribe();
    monitor.cache().start().await;
    info!(owner = %monitor.owner(), "watching alerts");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "failed to listen for ctrl-c");
                }
                info!("shutting down");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    let view = monitor.describe_event(&event).await;
                    print_view(&view, json)?;
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged, some events were dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    monitor.cache().shutdown().await;
    Ok(())
}

async fn snapshot(config_path: PathBuf, json: bool) -> anyhow::Result<()> {
    let monitor = load_monitor(&config_path)?;
    let views = monitor.snapshot().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&views)?);
        return Ok(());
    }

    for view in &views {
        print_view(view, false)?;
    }
    let hidden = views.iter().filter(|v| v.hidden).count();
    println!("{} active alerts, {hidden} hidden for {}", views.len(), monitor.owner());
    Ok(())
}

fn print_view(view: &AlertView, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(view)?);
    } else {
        println!("{}", view.render_line());
    }
    Ok(())
}

fn fingerprint(labels: &[String], json: bool) -> anyhow::Result<()> {
    let normalized = fingerprint_args(labels)?;

    if json {
        let output = serde_json::json!({
            "labels": normalized.labels,
            "fingerprint": normalized.fingerprint,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    for (key, value) in &normalized.labels {
        println!("{key}={value}");
    }
    println!("fingerprint: {}", normalized.fingerprint);
    Ok(())
}

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    VigilConfig::sample().write_to(&output)?;
    println!("Wrote sample config to {}", output.display());
    println!();
    println!("Point each source's path at an Alertmanager /api/v2/alerts dump,");
    println!("then run: vigil watch --config {}", output.display());
    Ok(())
}
