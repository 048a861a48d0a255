use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use parley_gateway::TypingIdentity;

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me-to-a-random-string", "dev-secret-change-me"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub attachments_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub typing_identity: TypingIdentity,
    pub outbound_buffer: usize,
    pub heartbeat_interval: Duration,
}

impl Config {
    /// Read `PARLEY_*` variables from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let jwt_secret = lookup("PARLEY_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("PARLEY_JWT_SECRET is unset or still a placeholder");
        }

        let heartbeat_secs: u64 = var("PARLEY_HEARTBEAT_SECS", "15")
            .parse()
            .context("PARLEY_HEARTBEAT_SECS")?;
        if heartbeat_secs == 0 {
            bail!("PARLEY_HEARTBEAT_SECS must be at least 1");
        }

        let outbound_buffer: usize = var("PARLEY_OUTBOUND_BUFFER", "256")
            .parse()
            .context("PARLEY_OUTBOUND_BUFFER")?;
        if outbound_buffer == 0 {
            bail!("PARLEY_OUTBOUND_BUFFER must be at least 1");
        }

        Ok(Self {
            host: var("PARLEY_HOST", "0.0.0.0"),
            port: var("PARLEY_PORT", "3000").parse().context("PARLEY_PORT")?,
            db_path: var("PARLEY_DB_PATH", "parley.db").into(),
            jwt_secret,
            attachments_dir: var("PARLEY_ATTACHMENTS_DIR", "./attachments").into(),
            max_upload_bytes: var("PARLEY_MAX_UPLOAD_BYTES", "26214400")
                .parse()
                .context("PARLEY_MAX_UPLOAD_BYTES")?,
            typing_identity: var("PARLEY_TYPING_IDENTITY", "declared")
                .parse()
                .map_err(anyhow::Error::msg)?,
            outbound_buffer,
            heartbeat_interval: Duration::from_secs(heartbeat_secs),
        })
    }
}
