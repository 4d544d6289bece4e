// SPDX-FileCopyrightText: 2026 Conflux Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conflux - multi-channel message ingestion and synchronization service.
//!
//! This is the binary entry point for the Conflux server.

use clap::{Parser, Subcommand};

mod serve;

/// Conflux - multi-channel message ingestion and synchronization service.
#[derive(Parser, Debug)]
#[command(name = "conflux", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the Conflux gateway server.
    Serve,
    /// Print the resolved configuration.
    Config,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match conflux_config::load_and_validate() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    match cli.command {
        Some(Commands::Serve) => {
            if let Err(e) = serve::run_serve(config).await {
                eprintln!("error: {e}");
                std::process::exit(1);
            }
        }
        Some(Commands::Config) => {
            // Redact the API token before printing.
            let mut shown = config;
            if shown.server.bearer_token.is_some() {
                shown.server.bearer_token = Some("[redacted]".to_string());
            }
            match toml::to_string_pretty(&shown) {
                Ok(rendered) => println!("{rendered}"),
                Err(e) => {
                    eprintln!("error: {e}");
                    std::process::exit(1);
                }
            }
        }
        None => {
            println!("conflux: use --help for available commands");
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn binary_loads_config_defaults() {
        let config = conflux_config::load_and_validate()
            .expect("default config should be valid");
        assert_eq!(config.service.name, "conflux");
    }
}
