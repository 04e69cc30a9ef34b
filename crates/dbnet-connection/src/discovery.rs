//! Connection discovery from environment variables and `env.yaml`

use dbnet_core::{ConnectionConfig, DbnetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use url::Url;

use crate::{DriverRegistry, normalize_name};

/// Schemes whose URL names a local file rather than a server
const FILE_SCHEMES: &[&str] = &["sqlite", "sqlite3", "file", "duckdb"];

/// The credentials file in the DbNet home directory
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvFile {
    #[serde(default)]
    pub connections: Option<BTreeMap<String, BTreeMap<String, serde_yaml::Value>>>,
}

/// Build a configuration from a connection URL. Returns `None` when no
/// registered driver claims the scheme.
pub fn config_from_url(name: &str, raw: &str, drivers: &DriverRegistry) -> Option<ConnectionConfig> {
    let parsed = Url::parse(raw).ok()?;
    let driver = drivers.for_scheme(parsed.scheme())?;

    let mut config = ConnectionConfig::new(driver, &normalize_name(name));
    config.set_param("url", raw);

    if FILE_SCHEMES.contains(&parsed.scheme()) {
        // sqlite:///abs/path and sqlite://relative/path
        let location = match parsed.host_str() {
            Some(host) if !host.is_empty() => format!("{}{}", host, parsed.path()),
            _ => parsed.path().to_string(),
        };
        config.set_param("path", location);
    } else {
        if let Some(host) = parsed.host_str() {
            config.set_param("host", host);
        }
        if let Some(port) = parsed.port() {
            config.set_param("port", port.to_string());
        }
        if !parsed.username().is_empty() {
            config.set_param("user", parsed.username());
        }
        if let Some(password) = parsed.password() {
            config.set_param("password", password);
        }
        let database = parsed.path().trim_start_matches('/');
        if !database.is_empty() {
            config.set_param("database", database);
        }
    }

    for (key, value) in parsed.query_pairs() {
        config.set_param(&key, value.into_owned());
    }
    Some(config)
}

/// Connections declared as environment variables holding a URL
pub fn discover_env_vars<I>(vars: I, drivers: &DriverRegistry) -> Vec<ConnectionConfig>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(_, value)| value.contains(":/"))
        .filter_map(|(key, value)| config_from_url(&key, &value, drivers))
        .collect()
}

/// Connections declared under `connections:` in an env file. A missing file
/// yields no connections.
pub fn load_env_file(path: &Path, drivers: &DriverRegistry) -> Result<Vec<ConnectionConfig>> {
    if !path.exists() {
        tracing::debug!(path = ?path, "env file not found");
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)?;
    let env: EnvFile = serde_yaml::from_str(&content)
        .map_err(|e| DbnetError::Config(format!("could not parse {}: {}", path.display(), e)))?;

    let mut configs = Vec::new();
    for (name, props) in env.connections.unwrap_or_default() {
        let props: BTreeMap<String, String> = props
            .into_iter()
            .filter_map(|(k, v)| yaml_scalar(&v).map(|s| (k.to_lowercase(), s)))
            .collect();

        let mut config = match props.get("url") {
            Some(url) => match config_from_url(&name, url, drivers) {
                Some(config) => config,
                None => {
                    tracing::warn!(conn = %name, "no driver for connection url, skipping");
                    continue;
                }
            },
            None => match props.get("type") {
                Some(driver) => ConnectionConfig::new(&driver.to_lowercase(), &normalize_name(&name)),
                None => {
                    tracing::warn!(conn = %name, "connection has neither type nor url, skipping");
                    continue;
                }
            },
        };

        for (key, value) in props {
            if key != "type" {
                config.set_param(&key, value);
            }
        }
        configs.push(config);
    }

    tracing::debug!(path = ?path, count = configs.len(), "connections loaded from env file");
    Ok(configs)
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
