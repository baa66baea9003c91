//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// netenrich - Registry enrichment for scanner network ranges
///
/// Looks up RDAP ownership, ASN and contact data for IPs and CIDR blocks,
/// throttled, cached, and resumable after interruption.
#[derive(Parser, Debug)]
#[command(name = "netenrich")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "NETENRICH_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Enrich a file of network ranges
    Enrich(EnrichArgs),

    /// Show or reset the progress of the current run
    Progress(ProgressArgs),

    /// Inspect or clear the lookup cache
    Cache(CacheArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the enrich command
#[derive(Parser, Debug)]
pub struct EnrichArgs {
    /// Input file: JSON array of records, or one range per line
    pub input: PathBuf,

    /// Write enriched records here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent workers (default: from config)
    #[arg(short = 'j', long)]
    pub parallelism: Option<usize>,

    /// Registry lookups per second (default: from config)
    #[arg(short = 'r', long)]
    pub throttle: Option<u32>,

    /// Maximum cache entry age in hours (default: from config)
    #[arg(long)]
    pub ttl_hours: Option<u32>,

    /// Discard saved progress and start over
    #[arg(long)]
    pub fresh: bool,
}

/// Arguments for the progress command
#[derive(Parser, Debug)]
pub struct ProgressArgs {
    /// Delete the progress file
    #[arg(long)]
    pub reset: bool,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., enrichment.throttle_rate)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for status-style commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

/// Arguments for the cache command
#[derive(Parser, Debug)]
pub struct CacheArgs {
    /// Subcommand for cache
    #[command(subcommand)]
    pub action: CacheAction,
}

/// Cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Show entry counts by freshness
    Stats {
        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show the cached entry for a range
    Show {
        /// IP address or CIDR block
        range: String,
    },

    /// Remove every cached entry
    Clear {
        /// Skip confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_enrich() {
        let cli = Cli::parse_from(["netenrich", "enrich", "ranges.txt"]);
        match cli.command {
            Commands::Enrich(args) => {
                assert_eq!(args.input, PathBuf::from("ranges.txt"));
                assert!(args.output.is_none());
                assert!(args.parallelism.is_none());
                assert!(!args.fresh);
            }
            _ => panic!("expected Enrich command"),
        }
    }

    #[test]
    fn cli_parses_enrich_overrides() {
        let cli = Cli::parse_from([
            "netenrich", "enrich", "in.json", "-o", "out.json", "-j", "8", "-r", "2", "--ttl-hours",
            "24", "--fresh",
        ]);
        match cli.command {
            Commands::Enrich(args) => {
                assert_eq!(args.output, Some(PathBuf::from("out.json")));
                assert_eq!(args.parallelism, Some(8));
                assert_eq!(args.throttle, Some(2));
                assert_eq!(args.ttl_hours, Some(24));
                assert!(args.fresh);
            }
            _ => panic!("expected Enrich command"),
        }
    }

    #[test]
    fn cli_parses_progress_json() {
        let cli = Cli::parse_from(["netenrich", "progress", "--format", "json"]);
        match cli.command {
            Commands::Progress(args) => {
                assert_eq!(args.format, OutputFormat::Json);
                assert!(!args.reset);
            }
            _ => panic!("expected Progress command"),
        }
    }

    #[test]
    fn cli_parses_cache_show() {
        let cli = Cli::parse_from(["netenrich", "cache", "show", "10.0.0.0/8"]);
        match cli.command {
            Commands::Cache(CacheArgs {
                action: CacheAction::Show { range },
            }) => assert_eq!(range, "10.0.0.0/8"),
            _ => panic!("expected Cache Show command"),
        }
    }

    #[test]
    fn cli_parses_config_set() {
        let cli = Cli::parse_from(["netenrich", "config", "set", "enrichment.parallelism", "8"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Set { key, value }),
            }) => {
                assert_eq!(key, "enrichment.parallelism");
                assert_eq!(value, "8");
            }
            _ => panic!("expected Config Set command"),
        }
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["netenrich", "progress"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["netenrich", "-v", "progress"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["netenrich", "-vv", "progress"]);
        assert_eq!(cli.verbose, 2);
    }
}
