use crate::env;
use crate::session::types::{Result as SessionResult, SessionError};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionDriver {
    File,
    Memory,
}

/// `SameSite` attribute of the identifier cookie
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Lax,
    Strict,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Lax => "Lax",
            SameSite::Strict => "Strict",
            SameSite::None => "None",
        }
    }
}

/// Session layer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub driver: SessionDriver,
    pub cookie_name: String,
    /// Seconds of inactivity before gc may purge a record; 0 keeps the cookie
    /// for the browser session only
    pub expiration: u64,
    pub save_path: Option<PathBuf>,
    pub match_ip: bool,
    pub match_user_agent: bool,
    /// Regeneration interval in seconds; 0 disables periodic rotation
    pub time_to_update: u64,
    pub regenerate_destroy: bool,
    pub compress: bool,
    pub cookie_domain: String,
    pub cookie_path: String,
    pub cookie_prefix: String,
    pub cookie_secure: bool,
    pub cookie_http_only: bool,
    pub cookie_same_site: SameSite,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            driver: SessionDriver::File,
            cookie_name: env::session::DEFAULT_COOKIE_NAME.to_string(),
            expiration: env::session::DEFAULT_EXPIRATION_SECS,
            save_path: None,
            match_ip: false,
            match_user_agent: false,
            time_to_update: env::session::DEFAULT_TIME_TO_UPDATE_SECS,
            regenerate_destroy: false,
            compress: false,
            cookie_domain: String::new(),
            cookie_path: "/".to_string(),
            cookie_prefix: String::new(),
            cookie_secure: false,
            cookie_http_only: true,
            cookie_same_site: SameSite::Lax,
        }
    }
}

impl SessionConfig {
    /// Configuration backed by the in-memory handler
    pub fn in_memory() -> Self {
        Self {
            driver: SessionDriver::Memory,
            ..Self::default()
        }
    }

    /// Cookie name as sent to the client, prefix included
    pub fn full_cookie_name(&self) -> String {
        format!("{}{}", self.cookie_prefix, self.cookie_name)
    }

    /// Gc lifetime of a record. A browser-session cookie still needs a server
    /// side bound, so 0 falls back to the default expiration.
    pub fn max_lifetime(&self) -> std::time::Duration {
        let secs = if self.expiration == 0 {
            env::session::DEFAULT_EXPIRATION_SECS
        } else {
            self.expiration
        };
        std::time::Duration::from_secs(secs)
    }

    /// Reject settings the session layer cannot work with
    pub fn validate(&self) -> SessionResult<()> {
        let name = self.full_cookie_name();
        let valid_token = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c));
        if !valid_token {
            return Err(SessionError::Config(format!(
                "cookie name '{}' is not a valid cookie token",
                name
            )));
        }

        if !self.cookie_path.starts_with('/') {
            return Err(SessionError::Config(format!(
                "cookie path '{}' must start with '/'",
                self.cookie_path
            )));
        }

        if self.cookie_same_site == SameSite::None && !self.cookie_secure {
            return Err(SessionError::Config(
                "SameSite=None requires cookie_secure".to_string(),
            ));
        }

        let max_lifetime = env::session::MAX_LIFETIME_SECS as u64;
        for (name, secs) in [
            ("expiration", self.expiration),
            ("time_to_update", self.time_to_update),
        ] {
            if secs > max_lifetime {
                return Err(SessionError::Config(format!(
                    "{} ({}s) exceeds the maximum of {}s",
                    name, secs, max_lifetime
                )));
            }
        }

        if self.time_to_update > 0 && self.expiration > 0 && self.time_to_update > self.expiration
        {
            return Err(SessionError::Config(format!(
                "time_to_update ({}s) exceeds expiration ({}s)",
                self.time_to_update, self.expiration
            )));
        }

        Ok(())
    }

    /// Load configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_toml_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = self.to_toml_string()?;
        std::fs::write(path, content).context("Failed to write config file")
    }

    /// Convert configuration to a TOML string
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}
