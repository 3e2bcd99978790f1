//! Identifier exchange with the transport layer.

use crate::clock::{bounded_secs, offset_secs};
use crate::session::config::{SameSite, SessionConfig};
use chrono::{DateTime, Utc};

/// Identifier cookie to send back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    /// `None` for a browser-session cookie
    pub max_age: Option<i64>,
    pub expires: Option<DateTime<Utc>>,
}

impl SessionCookie {
    /// Cookie carrying `value`, expiring `expiration` seconds after `now`
    pub fn issue(config: &SessionConfig, value: &str, now: DateTime<Utc>) -> Self {
        let (max_age, expires) = if config.expiration == 0 {
            (None, None)
        } else {
            let secs = bounded_secs(i64::try_from(config.expiration).unwrap_or(i64::MAX));
            (Some(secs), Some(offset_secs(now, secs)))
        };

        Self {
            name: config.full_cookie_name(),
            value: value.to_string(),
            domain: (!config.cookie_domain.is_empty()).then(|| config.cookie_domain.clone()),
            path: config.cookie_path.clone(),
            secure: config.cookie_secure,
            http_only: config.cookie_http_only,
            same_site: config.cookie_same_site,
            max_age,
            expires,
        }
    }

    /// Cookie instructing the client to forget its identifier
    pub fn expired(config: &SessionConfig) -> Self {
        Self {
            max_age: Some(0),
            expires: Some(DateTime::<Utc>::UNIX_EPOCH),
            ..Self::issue(config, "", DateTime::<Utc>::UNIX_EPOCH)
        }
    }

    pub fn is_removal(&self) -> bool {
        self.max_age == Some(0)
    }

    /// Render as a `Set-Cookie` header value
    pub fn to_header_value(&self) -> String {
        let mut header = format!("{}={}", self.name, self.value);

        if let Some(expires) = self.expires {
            header.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if let Some(max_age) = self.max_age {
            header.push_str(&format!("; Max-Age={}", max_age));
        }
        if let Some(domain) = &self.domain {
            header.push_str(&format!("; Domain={}", domain));
        }
        header.push_str(&format!("; Path={}", self.path));
        if self.secure {
            header.push_str("; Secure");
        }
        if self.http_only {
            header.push_str("; HttpOnly");
        }
        header.push_str(&format!("; SameSite={}", self.same_site.as_str()));

        header
    }
}

/// Extract one cookie value from a `Cookie` request header
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        (key == name).then(|| value.trim_matches('"').to_string())
    })
}
