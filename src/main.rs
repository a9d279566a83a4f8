//! sshdeck CLI
//!
//! Manual checks against a real server:
//!
//! ```text
//! sshdeck probe <config.json>
//! sshdeck exec <config.json> <command>...
//! ```

// mimalloc: many small allocations (shell chunks, channel messages)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sshdeck::config::load_settings_or_default;
use sshdeck::{ConnectionConfig, SessionRegistry, SshCommands};

/// Multiplexed SSH session manager
#[derive(Debug, Parser)]
#[command(name = "sshdeck", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the server answers SSH, without opening a session
    Probe {
        /// Connection config (JSON)
        config: PathBuf,
    },
    /// Connect, run one command and disconnect
    Exec {
        /// Connection config (JSON)
        config: PathBuf,
        /// Command line to run on the remote host
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

async fn read_config(path: &Path) -> Result<ConnectionConfig, String> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&contents).map_err(|e| format!("Invalid config {}: {}", path.display(), e))
}

async fn run(cli: Cli) -> Result<(), String> {
    let settings = load_settings_or_default().await;
    let commands = SshCommands::new(SessionRegistry::new(settings));

    match cli.command {
        Command::Probe { config } => {
            let config = read_config(&config).await?;
            let result = commands.probe(&config).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&result).map_err(|e| e.to_string())?
            );
            if result.reachable {
                Ok(())
            } else {
                Err(format!("{} is not reachable", config.address()))
            }
        }
        Command::Exec { config, command } => {
            let config = read_config(&config).await?;
            let command = command.join(" ");

            let connected = commands.connect(config).await;
            let Some(session_id) = connected.session_id else {
                return Err(connected.error.unwrap_or_else(|| "Connect failed".to_string()));
            };

            let result = commands.execute(&session_id, &command).await;
            commands.shutdown().await;

            if let Some(output) = &result.output {
                print!("{}", output);
            }
            match result.error {
                Some(error) => Err(error),
                None => Ok(()),
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    sshdeck::init_logging();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}
