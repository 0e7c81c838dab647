//! `gatewayctl` — operator CLI over the gateway's on-disk configuration
//! store (§4.10, §6): list/verify/prune config backups, toggle chaos, and
//! dump the current inventory of `.env` keys. Talks to the same
//! [`gateway_core::config_manager::ConfigManager`] the running gateway
//! process uses, so a `gatewayctl` invocation and a live admin request
//! never interleave (they share the same lock file).
//!
//! Exit codes (§6): 0 success, 1 generic failure, 2 validation error,
//! 3 lock timeout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use gateway_core::config_manager::ConfigManager;
use gateway_core::error::Error;

#[derive(Parser)]
#[command(name = "gatewayctl")]
#[command(version, about = "Operator CLI for the agent gateway", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the gateway's `.env` configuration file.
    #[arg(long, global = true, default_value = "config/.env")]
    env_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage configuration backups.
    Backups {
        #[command(subcommand)]
        command: BackupCommands,
    },
    /// Toggle the chaos injector's global enable flag.
    Chaos {
        #[command(subcommand)]
        command: ChaosCommands,
    },
    /// Dump the current `.env` key/value inventory.
    Inventory {
        /// Print as JSON instead of a key=value table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum BackupCommands {
    /// List backups, newest first.
    List,
    /// Verify a backup's checksum still matches its recorded metadata.
    Verify {
        /// Backup id (from `gatewayctl backups list`).
        id: String,
    },
    /// Delete backups past the most recent `--keep`.
    Prune {
        #[arg(long, default_value_t = 10)]
        keep: usize,
    },
    /// Restore a backup over the live `.env` file.
    Rollback {
        /// Backup id (from `gatewayctl backups list`).
        id: String,
    },
}

#[derive(Subcommand)]
enum ChaosCommands {
    /// Set `CHAOS_ENABLED=true`.
    Enable,
    /// Set `CHAOS_ENABLED=false`.
    Disable,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let manager = match ConfigManager::open(&cli.env_path) {
        Ok(manager) => manager,
        Err(e) => return fail(&e),
    };

    let result = match cli.command {
        Commands::Backups { command } => run_backups(&manager, command),
        Commands::Chaos { command } => run_chaos(&manager, command),
        Commands::Inventory { json } => run_inventory(&manager, json),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fail(&e),
    }
}

fn run_backups(manager: &ConfigManager, command: BackupCommands) -> Result<(), Error> {
    match command {
        BackupCommands::List => {
            let backups = manager.list_backups()?;
            if backups.is_empty() {
                println!("{}", "no backups found".dimmed());
                return Ok(());
            }
            for backup in backups {
                println!(
                    "{}  {}  {}  checksum={:016x}  size={}",
                    backup.id.bold(),
                    backup.timestamp.to_rfc3339(),
                    backup.reason,
                    backup.checksum,
                    backup.size,
                );
            }
        }
        BackupCommands::Verify { id } => {
            let ok = manager.verify_backup(&id)?;
            if ok {
                println!("{} backup {} matches its recorded checksum", "OK".green().bold(), id);
            } else {
                println!(
                    "{} backup {} checksum mismatch (corrupted or tampered)",
                    "FAILED".red().bold(),
                    id
                );
                return Err(Error::ValidationError(format!(
                    "backup {id} failed checksum verification"
                )));
            }
        }
        BackupCommands::Prune { keep } => {
            let removed = manager.cleanup_backups(keep)?;
            println!("removed {removed} backup(s), kept the {keep} most recent");
        }
        BackupCommands::Rollback { id } => {
            manager.rollback_config(&id)?;
            println!("{} rolled back to backup {}", "OK".green().bold(), id);
        }
    }
    Ok(())
}

fn run_chaos(manager: &ConfigManager, command: ChaosCommands) -> Result<(), Error> {
    let enabled = matches!(command, ChaosCommands::Enable);
    manager.toggle_chaos(enabled)?;
    println!(
        "chaos injection {}",
        if enabled {
            "enabled".yellow().bold()
        } else {
            "disabled".green().bold()
        }
    );
    Ok(())
}

fn run_inventory(manager: &ConfigManager, json: bool) -> Result<(), Error> {
    let config = manager.read_config()?;
    if json {
        let serialized =
            serde_json::to_string_pretty(&config).map_err(|e| Error::ConfigManager(e.to_string()))?;
        println!("{serialized}");
    } else {
        let mut keys: Vec<_> = config.keys().collect();
        keys.sort();
        for key in keys {
            println!("{}={}", key.bold(), config[key]);
        }
    }
    Ok(())
}

/// Print the error and translate it to the exit code contract (§6): a lock
/// acquisition timeout is 3, any other validation failure is 2, everything
/// else is the generic 1.
fn fail(e: &Error) -> ExitCode {
    eprintln!("{} {}", "error:".red().bold(), e);
    match e {
        Error::ValidationError(_) => ExitCode::from(2),
        Error::ConfigManager(msg) if msg.contains("timed out waiting for config lock") => {
            ExitCode::from(3)
        }
        _ => ExitCode::FAILURE,
    }
}
