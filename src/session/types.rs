use crate::env;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(env::session::ID_PATTERN).expect("identifier pattern is valid"));

/// Opaque, unguessable session identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        let bytes: [u8; env::session::ID_BYTES] = rand::random();
        let mut token = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            token.push_str(&format!("{:02x}", byte));
        }
        Self(token)
    }

    /// Accept an inbound identifier only if it has the expected shape
    pub fn parse(raw: &str) -> Option<Self> {
        if ID_REGEX.is_match(raw) {
            Some(Self(raw.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle marker attached to a session key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Marker {
    /// Flash value written this cycle
    FlashNew,
    /// Flash value already carried into one later cycle; purged on the next start
    FlashOld,
    /// Temp value that expires at the given instant
    TempUntil(DateTime<Utc>),
}

impl Marker {
    pub fn is_flash(&self) -> bool {
        matches!(self, Marker::FlashNew | Marker::FlashOld)
    }

    pub fn is_temp(&self) -> bool {
        matches!(self, Marker::TempUntil(_))
    }

    /// Expiry instant of a temp marker
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Marker::TempUntil(at) => Some(*at),
            _ => None,
        }
    }
}

/// What the transport layer knows about the inbound request
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Raw value of the identifier cookie, if the client sent one
    pub cookie: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cookie(mut self, value: impl Into<String>) -> Self {
        self.cookie = Some(value.into());
        self
    }

    pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }
}

/// Errors raised by the session layer
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Session storage unavailable: {0}")]
    Unavailable(String),

    #[error("Could not allocate an unused session identifier after {attempts} attempts")]
    IdentifierExhausted { attempts: u32 },

    #[error("Session has not been started")]
    NotStarted,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
