//! Succus Demo CLI
//!
//! Command-line interface for exercising the succus messaging protocol
//! against an in-process graph store.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use succus_lib::ProtocolConfig;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "succus-demo")]
#[command(about = "Succus Demo CLI - Exercise the succus encrypted messaging protocol", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Protocol configuration file (JSON); SUCCUS_* env vars override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate an identity keypair
    Keygen {
        /// Write a password-protected backup of the keypair to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Address to record in the backup
        #[arg(long)]
        address: Option<String>,

        /// Backup password (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Restore a keypair backup and register its public keys
    Restore {
        /// Backup file written by `keygen`
        #[arg(short, long)]
        input: PathBuf,

        /// Address to register under (defaults to the one in the backup)
        #[arg(long)]
        address: Option<String>,

        /// Backup password (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Compute the conversation namespace of two addresses
    Namespace {
        /// First address
        a: String,

        /// Second address
        b: String,
    },

    /// Run a two-party exchange end to end
    Demo {
        /// Sender address
        #[arg(long, default_value = "0xAA")]
        from: String,

        /// Recipient address
        #[arg(long, default_value = "0xBB")]
        to: String,

        /// Message to send
        #[arg(short, long, default_value = "hi")]
        message: String,

        /// Sender keypair backup written by `keygen` (generated if omitted)
        #[arg(long)]
        keys: Option<PathBuf>,

        /// Password of the `--keys` backup (prompted for if omitted)
        #[arg(long)]
        password: Option<String>,

        /// Do not register the recipient, forcing the unencrypted fallback
        #[arg(long)]
        unregistered: bool,
    },

    /// Check that the store accepts and returns writes
    Probe,

    /// Print the effective protocol configuration
    Config,
}

fn load_config(path: Option<&PathBuf>) -> Result<ProtocolConfig> {
    let config = match path {
        Some(path) => ProtocolConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ProtocolConfig::default(),
    };
    Ok(config.apply_env())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("succus_demo_cli=debug,succus_lib=debug")
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("succus_demo_cli=info,succus_lib=warn")
            .init();
    }

    let config = load_config(cli.config.as_ref())?;

    // Dispatch commands
    match cli.command {
        Commands::Keygen {
            output,
            address,
            password,
        } => {
            let options = commands::keygen::KeygenOptions {
                output: output.as_deref(),
                address: address.as_deref(),
                password: password.as_deref(),
            };
            commands::keygen::run(options, cli.verbose)?;
        }
        Commands::Restore {
            input,
            address,
            password,
        } => {
            commands::backup::import(
                config,
                &input,
                address.as_deref(),
                password.as_deref(),
                cli.verbose,
            )
            .await?;
        }
        Commands::Namespace { a, b } => {
            commands::namespace::run(&a, &b);
        }
        Commands::Demo {
            from,
            to,
            message,
            keys,
            password,
            unregistered,
        } => {
            let options = commands::demo::DemoOptions {
                from,
                to,
                message,
                keys,
                password,
                unregistered,
            };
            commands::demo::run(config, options, cli.verbose).await?;
        }
        Commands::Probe => {
            commands::probe::run(config).await?;
        }
        Commands::Config => {
            ui::json(&serde_json::to_value(&config)?);
        }
    }

    Ok(())
}
