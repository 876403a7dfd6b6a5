//! Client-wide settings shared by every connection a registry creates.

use serde::Deserialize;

use crate::error::ConfigError;

pub const DEFAULT_CHUNK_SIZE: usize = 65536;
pub const DEFAULT_MAX_REDIRECTS: u32 = 10;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    /// Size of each body read and of each write into the destination.
    pub chunk_size: usize,
    /// Sent as `User-Agent` unless the request sets one.
    pub user_agent: Option<String>,
    /// Redirect limit used when the host allows redirects without a count.
    pub max_redirects: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            user_agent: None,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl ClientConfig {
    /// Parse a JSON object. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Defaults overridden by `URLCLIENT_CHUNK_SIZE`, `URLCLIENT_USER_AGENT`
    /// and `URLCLIENT_MAX_REDIRECTS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(value) = lookup("URLCLIENT_CHUNK_SIZE") {
            config.chunk_size = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "URLCLIENT_CHUNK_SIZE",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("URLCLIENT_USER_AGENT") {
            config.user_agent = Some(value);
        }
        if let Some(value) = lookup("URLCLIENT_MAX_REDIRECTS") {
            config.max_redirects = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                name: "URLCLIENT_MAX_REDIRECTS",
                value: value.clone(),
            })?;
        }
        Ok(config.normalized())
    }

    // A zero chunk size would make every body read return immediately.
    fn normalized(mut self) -> Self {
        if self.chunk_size == 0 {
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        self
    }
}
