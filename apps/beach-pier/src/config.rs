use std::env;
use std::time::Duration;

use crate::rtc::IceSettings;

pub const DEFAULT_PORT: u16 = 5040;
pub const DEFAULT_LAUNCH_URL: &str = "https://www.example.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Empty means any origin is allowed.
    pub cors_origins: Vec<String>,
    pub default_launch_url: String,
    pub ice: IceSettings,
    pub stale_session_after: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let port_range = match (
            lookup("BEACH_ICE_PORT_START").and_then(|v| v.parse::<u16>().ok()),
            lookup("BEACH_ICE_PORT_END").and_then(|v| v.parse::<u16>().ok()),
        ) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            _ => None,
        };

        Self {
            host: lookup("BEACH_PIER_HOST")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.host),
            port: lookup("BEACH_PIER_PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            cors_origins: lookup("BEACH_PIER_CORS_ORIGINS")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            default_launch_url: lookup("BEACH_PIER_LAUNCH_URL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.default_launch_url),
            ice: IceSettings {
                servers: lookup("BEACH_PIER_ICE_SERVERS")
                    .map(|v| split_list(&v))
                    .unwrap_or_default(),
                port_range,
                public_ip: lookup("BEACH_ICE_PUBLIC_IP").filter(|v| !v.trim().is_empty()),
                include_loopback: lookup("BEACH_PIER_ICE_LOOPBACK")
                    .map(|v| matches_truthy(&v))
                    .unwrap_or(false),
            },
            stale_session_after: lookup("BEACH_PIER_STALE_SESSION_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            cors_origins: Vec::new(),
            default_launch_url: DEFAULT_LAUNCH_URL.to_string(),
            ice: IceSettings::default(),
            stale_session_after: None,
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

fn matches_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
