//! CLI module - command-line argument parsing and handlers
//!
//! `statsrec` is primarily a library; this binary is scaffolding for
//! inspecting configuration and running the engine standalone against a
//! platform registry of canned test platforms, for manual soak-testing
//! (spec §0.5). It is not itself a spec module.

use statsrec::config::RecorderConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "statsrec")]
#[command(version = statsrec::config::VERSION)]
#[command(about = "Long-term statistics engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect effective configuration
    Config {
        /// Show the config file path
        #[arg(long)]
        path: bool,
    },
    /// Run the engine standalone, polling registered demo platforms
    /// (spec §0.5: useful for manual soak-testing, not a production mode)
    Run,
}

/// Parsed CLI arguments for `main` to act on. Returns `None` if the caller
/// should fall through to the default `Run` behavior with no subcommand
/// given.
pub fn parse() -> Cli {
    Cli::parse()
}

pub fn handle_config(path: bool) {
    if path {
        match RecorderConfig::config_path() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("could not determine a config directory for this platform"),
        }
        return;
    }

    match RecorderConfig::from_env() {
        Ok(config) => {
            println!("# Effective configuration (env > file > defaults)");
            println!();
            println!("db_path = {:?}", config.db_path.display().to_string());
            println!("keep_days_short_term = {}", config.keep_days_short_term);
            println!("commit_interval = {:?}", config.commit_interval);
            println!("batch_size = {}", config.batch_size);
            println!("max_retries = {}", config.max_retries);
            println!("retry_backoff_base = {:?}", config.retry_backoff_base);
            println!("channel_buffer = {}", config.channel_buffer);
            println!();
            println!("[logging]");
            println!("level = {:?}", config.logging.level);

            if let Some(path) = RecorderConfig::config_path() {
                println!();
                if path.exists() {
                    println!("# Source: {}", path.display());
                } else {
                    println!("# Source: defaults (no config file)");
                }
            }
        }
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    }
}
