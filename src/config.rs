//! Command line and environment configuration.
//!
//! Every flag can also be set through a `PAYFLOW_*` environment variable,
//! and a `.env` file in the working directory is honoured by the binary.

use crate::domain::session::DestinationId;
use crate::error::{PaymentError, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

/// Default session lifetime: fifteen minutes.
pub const DEFAULT_TIMEOUT_MS: u64 = 15 * 60 * 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline bank-transfer verification coordinator", long_about = None)]
pub struct Cli {
    /// Inbound events CSV file
    pub input: PathBuf,

    /// Orders CSV file (`order,amount`)
    #[arg(long, env = "PAYFLOW_ORDERS")]
    pub orders: PathBuf,

    /// Payment destination id; repeat for several
    #[arg(long = "destination", env = "PAYFLOW_DESTINATIONS", value_delimiter = ',', required = true)]
    pub destinations: Vec<String>,

    /// Session lifetime in milliseconds, counted from session start
    #[arg(long, env = "PAYFLOW_TIMEOUT_MS", default_value_t = DEFAULT_TIMEOUT_MS)]
    pub timeout_ms: u64,

    /// How long to wait for open sessions after the input is exhausted
    #[arg(long, env = "PAYFLOW_LINGER_MS", default_value_t = 0)]
    pub linger_ms: u64,

    /// Path to a persistent review queue (optional). If provided, uses RocksDB.
    #[arg(long, env = "PAYFLOW_DB_PATH")]
    pub db_path: Option<PathBuf>,

    /// Write published claims to this CSV file at exit
    #[arg(long, env = "PAYFLOW_CLAIMS_OUT")]
    pub claims_out: Option<PathBuf>,

    #[arg(long, env = "PAYFLOW_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub input: PathBuf,
    pub orders: PathBuf,
    pub destinations: Vec<DestinationId>,
    pub session_timeout: Duration,
    pub linger: Duration,
    pub db_path: Option<PathBuf>,
    pub claims_out: Option<PathBuf>,
    pub log_format: LogFormat,
}

impl TryFrom<Cli> for Settings {
    type Error = PaymentError;

    fn try_from(cli: Cli) -> Result<Self> {
        if cli.timeout_ms == 0 {
            return Err(PaymentError::ConfigError(
                "timeout must be greater than zero".to_string(),
            ));
        }

        let mut destinations: Vec<DestinationId> = Vec::new();
        for raw in cli.destinations {
            let id = DestinationId::new(raw)
                .map_err(|e| PaymentError::ConfigError(e.to_string()))?;
            if !destinations.contains(&id) {
                destinations.push(id);
            }
        }
        if destinations.is_empty() {
            return Err(PaymentError::ConfigError(
                "at least one destination is required".to_string(),
            ));
        }

        Ok(Self {
            input: cli.input,
            orders: cli.orders,
            destinations,
            session_timeout: Duration::from_millis(cli.timeout_ms),
            linger: Duration::from_millis(cli.linger_ms),
            db_path: cli.db_path,
            claims_out: cli.claims_out,
            log_format: cli.log_format,
        })
    }
}
