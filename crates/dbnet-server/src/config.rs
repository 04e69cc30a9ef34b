use dbnet_core::{DbnetError, Result};
use std::net::SocketAddr;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5987;

/// Listen address of the HTTP server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `DBNET_HOST` and `DBNET_PORT`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("DBNET_HOST")
            && !host.trim().is_empty()
        {
            config.host = host.trim().to_string();
        }
        if let Ok(port) = std::env::var("DBNET_PORT")
            && !port.trim().is_empty()
        {
            config.port = port
                .trim()
                .parse()
                .map_err(|_| DbnetError::Config(format!("invalid DBNET_PORT '{}'", port)))?;
        }
        Ok(config)
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse::<SocketAddr>()
            .map_err(|e| {
                DbnetError::Config(format!(
                    "invalid listen address {}:{}: {}",
                    self.host, self.port, e
                ))
            })
    }
}
