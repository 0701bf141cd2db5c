//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// simstate - inspect and maintain stored simulation instances
#[derive(Parser)]
#[command(
    name = "ss",
    about = "Inspect and maintain stored simulation instances",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// List stored instances
    List,

    /// Print one instance as JSON
    Show {
        /// Instance id
        id: String,

        /// Print the state as stored, without decompressing logs
        #[arg(long)]
        raw: bool,
    },

    /// Delete an instance
    Delete {
        /// Instance id
        id: String,
    },

    /// Show seconds until an instance expires
    Ttl {
        /// Instance id
        id: String,
    },

    /// Convert an expanded log to compact form
    Compress {
        /// JSON file to read, or - for stdin
        input: String,

        /// Log shape (settings, results, series)
        #[arg(short, long)]
        kind: DataKind,
    },

    /// Convert a compact log back to expanded form
    Decompress {
        /// JSON file to read, or - for stdin
        input: String,

        /// Log shape (settings, results, series)
        #[arg(short, long)]
        kind: DataKind,
    },
}

/// Shape of the data passed to compress/decompress
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataKind {
    Settings,
    Results,
    Series,
}

impl std::str::FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "DataKind::from_str: called");
        match s.to_lowercase().as_str() {
            "settings" | "settings_log" => Ok(Self::Settings),
            "results" | "results_log" => Ok(Self::Results),
            "series" => Ok(Self::Series),
            _ => Err(format!("Unknown kind: {}. Use settings, results, or series", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compress() {
        let cli = Cli::try_parse_from(["ss", "compress", "log.json", "--kind", "results"]).unwrap();
        match cli.command {
            Command::Compress { input, kind } => {
                assert_eq!(input, "log.json");
                assert_eq!(kind, DataKind::Results);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_show_raw_with_globals() {
        let cli = Cli::try_parse_from(["ss", "show", "abc", "--raw", "-l", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Show { ref id, raw: true } if id == "abc"));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert!(Cli::try_parse_from(["ss", "decompress", "-", "--kind", "bogus"]).is_err());
    }

    #[test]
    fn test_data_kind_aliases() {
        assert_eq!("Settings_Log".parse::<DataKind>().unwrap(), DataKind::Settings);
        assert_eq!("series".parse::<DataKind>().unwrap(), DataKind::Series);
    }
}
