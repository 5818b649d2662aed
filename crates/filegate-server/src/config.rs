//! Command-line + environment configuration (§6 "Backend URL syntax").

use anyhow::{Context, Result};
use clap::Parser;
use filegate_schema::BackendUrl;
use std::env;

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-backend object-storage gateway")]
pub struct Args {
    /// Host to bind to (overrides FILEGATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEGATE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// One `<scheme>://<name>[/<prefix>]` backend to register. May be
    /// repeated; at least one is required (via flag or FILEGATE_BACKENDS).
    #[arg(long = "backend")]
    pub backends: Vec<String>,
}

/// Centralized application configuration, combining CLI args and
/// environment-variable fallbacks.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub backends: Vec<BackendUrl>,
}

impl AppConfig {
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();

        let env_host = env::var("FILEGATE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("FILEGATE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing FILEGATE_PORT value `{value}`"))?,
            Err(env::VarError::NotPresent) => 8080,
            Err(err) => return Err(err).context("reading FILEGATE_PORT"),
        };

        let mut raw_backends = args.backends;
        if raw_backends.is_empty() {
            if let Ok(value) = env::var("FILEGATE_BACKENDS") {
                raw_backends = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
            }
        }
        if raw_backends.is_empty() {
            anyhow::bail!(
                "no backends configured; pass --backend <scheme>://<name>[/<prefix>] at least once \
                 or set FILEGATE_BACKENDS=<spec>[,<spec>...]"
            );
        }

        let backends = raw_backends
            .iter()
            .map(|spec| BackendUrl::parse(spec).map_err(|e| anyhow::anyhow!("{}", e.message)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            backends,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
