use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

pub const DEFAULT_SERVER_ADDRESS: &str = "2.pool.ntp.org";
pub const DEFAULT_SERVER_PORT: u16 = 123;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub ntp: NtpConfig,
    pub logging: LoggingConfig,
}

/// Where to send queries. Not validated until resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_SERVER_ADDRESS.to_string(),
            port: DEFAULT_SERVER_PORT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NtpConfig {
    pub server: ServerConfig,
    pub timeout_ms: u64,
    pub bind_addr: IpAddr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

fn env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_parse<T: std::str::FromStr>(key: &str, default: T) -> T
where
    T::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Split an optional `:port` suffix off a server string.
/// A port given here takes precedence over `NTP_PORT`.
/// Bare IPv6 literals are left whole.
fn split_host_port(server: &str, default_port: u16) -> Result<(String, u16)> {
    let server = server.trim();
    if let Some(rest) = server.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .context("Unterminated IPv6 literal in NTP_SERVER")?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p.parse().context("Failed to parse NTP_SERVER port")?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }

    match server.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => Ok((
            host.to_string(),
            port.parse().context("Failed to parse NTP_SERVER port")?,
        )),
        _ => Ok((server.to_string(), default_port)),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // NTP config
        let default_port = env_or_parse("NTP_PORT", DEFAULT_SERVER_PORT);
        let (address, port) = split_host_port(
            &env_or_default("NTP_SERVER", DEFAULT_SERVER_ADDRESS),
            default_port,
        )?;
        let timeout_ms = env_or_parse("NTP_TIMEOUT_MS", 5000);
        let bind_addr = env_or_default("NTP_BIND_ADDR", "0.0.0.0")
            .parse()
            .context("Failed to parse NTP_BIND_ADDR")?;

        // Logging config
        let level = env_or_default("LOG_LEVEL", "info");
        let format = match env_or_default("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        let config = Config {
            ntp: NtpConfig {
                server: ServerConfig { address, port },
                timeout_ms,
                bind_addr,
            },
            logging: LoggingConfig { level, format },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.ntp.server.address.is_empty() {
            anyhow::bail!("NTP_SERVER cannot be empty");
        }
        if self.ntp.server.port == 0 {
            anyhow::bail!("NTP_PORT must be non-zero");
        }
        if self.ntp.timeout_ms < 1 {
            anyhow::bail!("NTP_TIMEOUT_MS must be at least 1 millisecond");
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.ntp.timeout_ms)
    }
}

// For tests only
#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            ntp: NtpConfig {
                server: ServerConfig::default(),
                timeout_ms: 5000,
                bind_addr: "0.0.0.0".parse().unwrap(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: LogFormat::Pretty,
            },
        }
    }
}
