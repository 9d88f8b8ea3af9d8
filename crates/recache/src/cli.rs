//! Command-line surface: argument parsing, errors and exit codes

use crate::logging::{LogFormat, LogLevel};
use clap::{Parser, Subcommand};
use miette::{Diagnostic, Report};
use recache_core::Config;
use std::path::PathBuf;
use thiserror::Error;

/// Success
pub const EXIT_OK: i32 = 0;
/// A purge batch failed or `check` reported an invalid resource
pub const EXIT_FAILED: i32 = 1;
/// Bad arguments or configuration
pub const EXIT_CLI: i32 = 2;

/// Errors surfaced to the user by the CLI
#[derive(Error, Debug, Diagnostic)]
pub enum CliError {
    /// The configuration could not be loaded
    #[error("Configuration error: {message}")]
    #[diagnostic(code(recache::cli::config))]
    Config {
        /// What went wrong
        message: String,
        /// Optional help text
        #[help]
        help: Option<String>,
    },

    /// A resource fetched at the given time has been purged since
    #[error("{url} fetched at {timestamp_ms} is invalid")]
    #[diagnostic(code(recache::cli::invalid))]
    Invalid {
        /// The URL that was checked
        url: String,
        /// Fetch time that was checked
        timestamp_ms: i64,
    },

    /// Writing command output failed
    #[error("Failed to write output: {0}")]
    #[diagnostic(code(recache::cli::output))]
    Output(#[from] std::io::Error),

    /// A purge did not reach the purge file
    #[error(transparent)]
    #[diagnostic(transparent)]
    Purge(#[from] recache_purge::Error),
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: None,
        }
    }

    /// Create a configuration error with help text
    #[must_use]
    pub fn config_with_help(message: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            help: Some(help.into()),
        }
    }
}

/// Map an error to the process exit status
#[must_use]
pub const fn exit_code_for(err: &CliError) -> i32 {
    match err {
        CliError::Config { .. } => EXIT_CLI,
        CliError::Invalid { .. } | CliError::Output(_) | CliError::Purge(_) => EXIT_FAILED,
    }
}

/// Print an error to stderr with its diagnostic decorations
#[allow(clippy::print_stderr)]
pub fn render_error(err: CliError) {
    eprintln!("{:?}", Report::new(err));
}

/// Apply purges to the shared purge file and inspect it
#[derive(Parser, Debug)]
#[command(name = "recache", version, about)]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "RECACHE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Purge file, overriding the configuration
    #[arg(long, global = true)]
    pub file: Option<PathBuf>,

    /// Lock directory, overriding the configuration
    #[arg(long, global = true)]
    pub lock_dir: Option<PathBuf>,

    /// Log level
    #[arg(short = 'L', long, global = true, value_enum, default_value = "warn")]
    pub level: LogLevel,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "compact")]
    pub log_format: LogFormat,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Invalidate URLs as of now
    Purge {
        /// URLs to invalidate
        #[arg(required = true)]
        urls: Vec<String>,
    },
    /// Raise the global invalidation timestamp to now
    PurgeAll,
    /// Report whether a resource fetched at TIMESTAMP_MS is still valid
    Check {
        /// URL of the resource
        url: String,
        /// Fetch time in milliseconds since the Unix epoch
        #[arg(allow_negative_numbers = true)]
        timestamp_ms: i64,
    },
    /// Print the parsed purge file
    Show,
}

impl Cli {
    /// Load the configuration file, if any, and apply command-line overrides
    pub fn load_config(&self) -> Result<Config, CliError> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).map_err(|e| {
                CliError::config_with_help(
                    e.to_string(),
                    "Pass --config with a valid TOML file, or unset RECACHE_CONFIG",
                )
            })?,
            None => Config::default(),
        };
        if let Some(file) = &self.file {
            config.purge.file.clone_from(file);
        }
        if let Some(dir) = &self.lock_dir {
            config.purge.lock_dir.clone_from(dir);
        }
        config
            .validate()
            .map_err(|e| CliError::config(e.to_string()))?;
        Ok(config)
    }
}

/// Parse the process arguments
#[must_use]
pub fn parse() -> Cli {
    Cli::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_purge_urls() {
        let cli = Cli::try_parse_from(["recache", "purge", "http://a/", "http://b/"]).unwrap();
        assert_eq!(
            cli.command,
            Command::Purge {
                urls: vec!["http://a/".into(), "http://b/".into()]
            }
        );
        assert!(matches!(cli.level, LogLevel::Warn));
    }

    #[test]
    fn test_purge_requires_a_url() {
        assert!(Cli::try_parse_from(["recache", "purge"]).is_err());
    }

    #[test]
    fn test_parse_check_with_level_after_subcommand() {
        let cli = Cli::try_parse_from(["recache", "check", "http://a/", "1700000000000", "-L", "debug"])
            .unwrap();
        assert_eq!(
            cli.command,
            Command::Check {
                url: "http://a/".into(),
                timestamp_ms: 1_700_000_000_000
            }
        );
        assert!(matches!(cli.level, LogLevel::Debug));
    }

    #[test]
    fn test_overrides_apply_without_config_file() {
        let cli = Cli::try_parse_from([
            "recache",
            "--file",
            "/tmp/x.purge",
            "--lock-dir",
            "/tmp/locks",
            "show",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.purge.file, PathBuf::from("/tmp/x.purge"));
        assert_eq!(config.purge.lock_dir, PathBuf::from("/tmp/locks"));
    }

    #[test]
    fn test_missing_config_file_is_a_config_error() {
        let cli =
            Cli::try_parse_from(["recache", "--config", "/nonexistent/recache.toml", "show"]).unwrap();
        let err = cli.load_config().unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CLI);
    }

    #[test]
    fn test_exit_codes() {
        let invalid = CliError::Invalid {
            url: "http://a/".into(),
            timestamp_ms: 1,
        };
        assert_eq!(exit_code_for(&invalid), EXIT_FAILED);
        let batch = CliError::from(recache_purge::Error::batch("lock timeout"));
        assert_eq!(exit_code_for(&batch), EXIT_FAILED);
    }
}
