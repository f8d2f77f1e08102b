//! Server configuration
//!
//! Loaded from environment variables; the bind address may also be given as
//! the first command line argument.

use std::env;

use crate::error::ConfigError;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address to listen on (`CHAT_ADDR`)
    pub addr: String,
    /// Token required for admin commands (`CHAT_ADMIN_TOKEN`); unset disables them
    pub admin_token: Option<String>,
    /// Fixed seed for candidate selection (`CHAT_RNG_SEED`)
    pub rng_seed: Option<u64>,
    /// Whether searching is enabled at boot (`CHAT_SYSTEM_ON`)
    pub system_on: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            admin_token: None,
            rng_seed: None,
            system_on: true,
        }
    }
}

impl Config {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|name| env::var(name).ok())?;
        if let Some(addr) = env::args().nth(1) {
            config.addr = addr;
        }
        Ok(config)
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let rng_seed = match lookup("CHAT_RNG_SEED") {
            Some(value) => Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "CHAT_RNG_SEED",
                value,
            })?),
            None => None,
        };

        let system_on = match lookup("CHAT_SYSTEM_ON") {
            Some(value) => parse_switch(&value).ok_or(ConfigError::Invalid {
                name: "CHAT_SYSTEM_ON",
                value,
            })?,
            None => defaults.system_on,
        };

        Ok(Self {
            addr: lookup("CHAT_ADDR").unwrap_or(defaults.addr),
            admin_token: lookup("CHAT_ADMIN_TOKEN").filter(|token| !token.is_empty()),
            rng_seed,
            system_on,
        })
    }
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
