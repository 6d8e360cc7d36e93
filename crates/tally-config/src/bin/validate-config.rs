//! Config validation CLI tool
//!
//! Validates a tally configuration file and reports any errors.

use std::path::PathBuf;
use std::process::ExitCode;
use tally_util::default_config_path;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a tally configuration file.");
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match tally_config::load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", tally_config::CURRENT_CONFIG_VERSION);
            println!("  Poll interval:  {}s", config.poll_interval.as_secs());
            println!("  Database:       {}", config.database_path().display());
            println!("  Spill log:      {}", config.spill_path().display());
            println!(
                "  User:           {}",
                config.user.as_ref().map_or("(from OS)", |u| u.as_str())
            );
            println!(
                "  Machine:        {}",
                config.machine.as_ref().map_or("(hostname)", |m| m.as_str())
            );
            println!(
                "  Retry:          {} attempts, queue of {}",
                config.retry.max_attempts, config.retry.queue_capacity
            );

            if config.inventory.enabled {
                println!();
                println!("Inventory sources:");
                for path in tally_config::describe_sources(&config.inventory) {
                    println!("  - {}", path.display());
                }
            } else {
                println!("  Inventory:      disabled");
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration is invalid");
            eprintln!();
            match e {
                tally_config::ConfigError::ValidationFailed { errors } => {
                    for error in errors {
                        eprintln!("  - {}", error);
                    }
                }
                other => eprintln!("  {}", other),
            }
            ExitCode::from(1)
        }
    }
}
