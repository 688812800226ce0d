//! Logging configuration.

use clap::Args;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Logging error.
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    /// A global subscriber was already installed.
    #[error("failed to install tracing subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Logging configuration.
#[derive(Debug, Args, Clone, Default, Serialize, Deserialize)]
#[command(next_help_heading = "Logging")]
#[serde(default)]
pub struct LogArgs {
    /// Silence all output except errors.
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose mode (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    #[serde(skip)] // CLI-only, count action doesn't make sense in config
    pub verbosity: u8,

    /// Log filter directive (e.g., "relayd=debug,libp2p_kad=info").
    #[arg(long = "log.filter", value_name = "DIRECTIVE")]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Use JSON format for log output.
    #[arg(long = "log.json")]
    pub json: bool,
}

impl LogArgs {
    /// Level used when `RUST_LOG` is not set.
    pub fn base_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    /// Build the filter with the following precedence:
    /// 1. `--quiet` shows errors only
    /// 2. `RUST_LOG` if set, otherwise the verbosity level
    /// 3. `--log.filter` directives on top
    pub fn env_filter(&self) -> EnvFilter {
        if self.quiet {
            return EnvFilter::new(self.base_level());
        }

        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.base_level()));

        if let Some(custom) = &self.filter {
            for directive in custom.split(',') {
                match directive.parse() {
                    Ok(d) => filter = filter.add_directive(d),
                    Err(e) => eprintln!("ignoring invalid log directive {directive:?}: {e}"),
                }
            }
        }

        filter
    }
}

/// Install the global `tracing` subscriber.
pub fn init_logging(args: &LogArgs) -> Result<(), LoggingError> {
    let registry = tracing_subscriber::registry().with(args.env_filter());

    if args.json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }

    Ok(())
}
