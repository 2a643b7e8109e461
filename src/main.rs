//! Downtrail - availability monitor
//!
//! Probes HTTP services and ICMP hosts on a fixed cadence, stores every
//! sample in a relational or time-series backend, and writes downtime reports.

mod config;
mod db;
mod probe;
mod scheduler;
mod web;

use config::MonitorConfig;
use db::MetricsStore;
use scheduler::Supervisor;
use web::Server;

use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "downtrail", version, about = "Service and host availability monitor")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Probe all configured targets until interrupted, then write a final report
    Run,
    /// Write a report from the stored samples and exit
    Report,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("downtrail=info".parse()?))
        .init();

    let cli = Cli::parse();

    // Load configuration
    let cfg = Arc::new(MonitorConfig::load()?);
    let store = MetricsStore::from_config(&cfg)?;
    tracing::info!("Using the {} backend", store.backend_name());

    let supervisor = Arc::new(Supervisor::new(cfg.clone(), store));

    match cli.command.unwrap_or(Command::Run) {
        Command::Report => {
            let report = supervisor.report().await?;
            print!("{}", report.text);
            tracing::info!("Report written to {}", cfg.report_file.display());
        }
        Command::Run => {
            if let Some(port) = cfg.http_port {
                let server = Server::new(port, supervisor.clone());
                tokio::spawn(async move {
                    if let Err(e) = server.start().await {
                        tracing::error!("Control surface stopped: {}", e);
                    }
                });
            }

            supervisor
                .run_until(&cfg.targets, async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        tracing::error!("Failed to listen for shutdown signal: {}", e);
                        std::future::pending::<()>().await;
                    }
                })
                .await?;

            tracing::info!("Shutting down, writing final report");
            supervisor.report().await?;
        }
    }

    Ok(())
}
