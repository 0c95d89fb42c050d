//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "logsieve",
    version,
    author = "neur0map",
    about = "Hybrid log classifier: regex rules, statistical model, LLM fallback",
    long_about = "logsieve classifies log lines into a fixed set of categories. Each line is resolved \
                  by the cheapest tier that can: compiled regex rules first, then a statistical text \
                  model, and finally a batched LLM request for whatever is left."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/logsieve/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Classify JSONL log entries ({"source": ..., "message": ...} per line)
    Classify {
        /// Input file (reads stdin when omitted)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file for JSONL results (writes stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Profile to use (e.g., "offline", "strict")
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Inspect or clear the classification cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Inspect the statistical model and LLM tiers
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show {
        /// Profile to apply before showing
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration and rules
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show cache statistics
    Stats,

    /// Remove all cached entries (memory and disk)
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum ModelAction {
    /// Show model load state and LLM tier availability
    Info,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_classify() {
        let cli = Cli::try_parse_from([
            "logsieve",
            "classify",
            "--input",
            "logs.jsonl",
            "--profile",
            "offline",
        ])
        .unwrap();

        match cli.command {
            Commands::Classify {
                input,
                output,
                profile,
            } => {
                assert_eq!(input, Some(PathBuf::from("logs.jsonl")));
                assert!(output.is_none());
                assert_eq!(profile.as_deref(), Some("offline"));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["logsieve", "cache", "stats", "-v", "-c", "x.toml"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("x.toml")));
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Stats
            }
        ));
    }
}
