//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Hangar - worker volumes, resource caches and artifacts for CI
///
/// Places volumes on workers, tracks which builds and resources use
/// each cached fetch, serves build artifacts, and reclaims whatever
/// nothing references anymore.
#[derive(Parser, Debug)]
#[command(name = "hangar")]
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
    #[arg(short, long, global = true, env = "HANGAR_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the artifact API and run the sweeper loop
    Serve(ServeArgs),

    /// Run a single sweep cycle against the ledger snapshot
    Sweep(SweepArgs),

    /// Show workers, caches and volumes recorded in the ledger
    Status(StatusArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the serve command
#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Listen address (overrides api.listen)
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Serve the API without running the sweeper
    #[arg(long)]
    pub no_sweep: bool,
}

/// Arguments for the sweep command
#[derive(Parser, Debug)]
pub struct SweepArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the status command
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,

    /// List every volume row
    #[arg(long)]
    pub volumes: bool,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Config subcommand
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
}

/// Output format for listings
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_serve() {
        let cli = Cli::parse_from(["hangar", "serve", "--listen", "0.0.0.0:9000"]);
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.listen.as_deref(), Some("0.0.0.0:9000"));
                assert!(!args.no_sweep);
            }
            _ => panic!("expected Serve command"),
        }
    }

    #[test]
    fn cli_parses_sweep_format() {
        let cli = Cli::parse_from(["hangar", "sweep", "--format", "json"]);
        match cli.command {
            Commands::Sweep(args) => assert_eq!(args.format, OutputFormat::Json),
            _ => panic!("expected Sweep command"),
        }
    }

    #[test]
    fn cli_parses_status_volumes() {
        let cli = Cli::parse_from(["hangar", "status", "--volumes"]);
        match cli.command {
            Commands::Status(args) => {
                assert!(args.volumes);
                assert_eq!(args.format, OutputFormat::Table);
            }
            _ => panic!("expected Status command"),
        }
    }

    #[test]
    fn cli_parses_config_init_force() {
        let cli = Cli::parse_from(["hangar", "config", "init", "--force"]);
        match cli.command {
            Commands::Config(ConfigArgs {
                action: Some(ConfigAction::Init { force }),
            }) => assert!(force),
            _ => panic!("expected Config init"),
        }
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["hangar", "status"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["hangar", "-vv", "status"]);
        assert_eq!(cli.verbose, 2);
    }
}
