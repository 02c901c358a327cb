// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! CLI for the SensorHub SOS hub (soshub)

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};
#[cfg(feature = "cli")]
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use soshub::config::HubConfig;
use soshub::http_server::HttpServer;
use soshub::modules::LocalModuleRegistry;
use soshub::SosService;

#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "soshub")]
#[command(about = "SensorHub SOS: serve live sensors and observation storages as Sensor Observation Service offerings", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Hub configuration file
    #[arg(short, long, global = true, default_value = "soshub.toml")]
    config: PathBuf,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Start the SOS HTTP endpoint
    Serve {
        /// Override the configured listen address
        #[arg(long)]
        host: Option<String>,
        /// Override the configured port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print a sample configuration file
    SampleConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate the configuration and list the offerings it produces
    CheckConfig,
    /// Print the capabilities document as JSON
    Capabilities,
}

#[cfg(feature = "cli")]
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::SampleConfig { output } => {
            let sample = HubConfig::sample_toml();
            match output {
                Some(path) => {
                    std::fs::write(path, sample)?;
                    println!("{} {}", "Sample configuration written to".green(), path.display());
                }
                None => print!("{}", sample),
            }
        }

        Commands::CheckConfig => {
            let hub = load(&cli.config)?;
            let service = build_service(hub, None)?;
            let doc = service.start();
            println!("{} {}", "Configuration OK:".green().bold(), cli.config.display());
            for layer in &doc.layers {
                println!(
                    "  {} {} ({})",
                    "•".cyan(),
                    layer.identifier,
                    layer.phenomenon_time
                );
            }
            let configured = service.config().data_providers.len();
            if doc.layers.len() < configured {
                println!(
                    "{} {} of {} provider(s) failed to start, see log",
                    "Warning:".yellow().bold(),
                    configured - doc.layers.len(),
                    configured
                );
            }
        }

        Commands::Capabilities => {
            let hub = load(&cli.config)?;
            let service = build_service(hub, None)?;
            let doc = service.start();
            println!("{}", serde_json::to_string_pretty(doc.as_ref())?);
        }

        Commands::Serve { host, port } => {
            let mut hub = load(&cli.config)?;
            if let Some(host) = host {
                hub.server.host = host.clone();
            }
            if let Some(port) = port {
                hub.server.port = *port;
            }
            let server_config = hub.server.clone();
            let service = Arc::new(build_service(hub, Some(cli.config.clone()))?);
            if !service.config().enabled {
                log::warn!("SOS service is disabled in {}", cli.config.display());
                return Ok(());
            }
            service.start();

            let server = HttpServer::new(server_config, service.clone());
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(async {
                tokio::select! {
                    result = server.run() => result,
                    _ = tokio::signal::ctrl_c() => {
                        log::info!("Shutting down");
                        Ok(())
                    }
                }
            })?;
            service.stop();
        }
    }

    Ok(())
}

/// Load the hub configuration and start logging at its level
#[cfg(feature = "cli")]
fn load(path: &Path) -> Result<HubConfig, Box<dyn std::error::Error>> {
    let hub = HubConfig::from_toml_file(path)
        .map_err(|e| format!("Cannot load {}: {}", path.display(), e))?;
    env_logger::Builder::new()
        .filter_level(hub.log_level.to_filter())
        .parse_default_env()
        .init();
    Ok(hub)
}

#[cfg(feature = "cli")]
fn build_service(hub: HubConfig, config_path: Option<PathBuf>) -> soshub::Result<SosService> {
    let sos = hub.sos.clone();
    let modules = Arc::new(LocalModuleRegistry::new(hub, config_path)?);
    Ok(SosService::new(sos, modules))
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("soshub requires the 'cli' feature");
}
