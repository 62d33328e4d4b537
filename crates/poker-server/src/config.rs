use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

const DEFAULT_JWT_SECRET: &str = "dev-secret-change-me";

/// Process configuration, read once at startup from `POKER_*` variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
    pub frontend_origin: String,
    pub magic_link_ttl: chrono::Duration,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = var_or("POKER_PORT", "4000")
            .parse()
            .context("POKER_PORT must be a port number")?;
        let ttl_minutes: i64 = var_or("POKER_MAGIC_LINK_TTL_MINUTES", "15")
            .parse()
            .context("POKER_MAGIC_LINK_TTL_MINUTES must be a whole number")?;
        if ttl_minutes <= 0 {
            anyhow::bail!("POKER_MAGIC_LINK_TTL_MINUTES must be positive");
        }

        let jwt_secret = var_or("POKER_JWT_SECRET", DEFAULT_JWT_SECRET);
        if jwt_secret == DEFAULT_JWT_SECRET {
            warn!("POKER_JWT_SECRET is not set, using the development secret");
        }

        Ok(Self {
            host: var_or("POKER_HOST", "0.0.0.0"),
            port,
            db_path: PathBuf::from(var_or("POKER_DB_PATH", "poker.db")),
            jwt_secret,
            frontend_origin: var_or("POKER_FRONTEND_ORIGIN", "http://localhost:5173"),
            magic_link_ttl: chrono::Duration::minutes(ttl_minutes),
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}
