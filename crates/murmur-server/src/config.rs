use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

/// Runtime configuration, read once from the environment at startup.
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Lifetime in days of keys minted by login and provisioning.
    pub key_ttl_days: i64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        let host = std::env::var("MURMUR_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = std::env::var("MURMUR_PORT")
            .unwrap_or_else(|_| "7910".into())
            .parse()
            .context("MURMUR_PORT must be a port number")?;
        let db_path = std::env::var("MURMUR_DB_PATH").unwrap_or_else(|_| "murmur.db".into());
        let key_ttl_days: i64 = std::env::var("MURMUR_KEY_TTL_DAYS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .context("MURMUR_KEY_TTL_DAYS must be a whole number of days")?;

        if key_ttl_days <= 0 {
            anyhow::bail!("MURMUR_KEY_TTL_DAYS must be positive");
        }

        Ok(Self {
            host,
            port,
            db_path: PathBuf::from(db_path),
            key_ttl_days,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(host: &str, port: u16) -> ServerConfig {
        ServerConfig {
            host: host.into(),
            port,
            db_path: PathBuf::from("murmur.db"),
            key_ttl_days: 30,
        }
    }

    #[test]
    fn addr_combines_host_and_port() {
        let addr = config("127.0.0.1", 7910).addr().unwrap();
        assert_eq!(addr.port(), 7910);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn addr_rejects_hostnames() {
        assert!(config("not a host", 80).addr().is_err());
    }
}
