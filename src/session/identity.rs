use crate::clock::bounded_secs;
use crate::env;
use crate::handler::SessionHandler;
use crate::session::config::SessionConfig;
use crate::session::store::SessionStore;
use crate::session::types::*;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// Where the identifier stands in its rotation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityState {
    /// No identifier issued yet
    Fresh,
    /// Identifier issued, rotation timer running
    Active,
    /// Inside a rotation
    Regenerating,
}

/// Rotation and binding rules
#[derive(Debug, Clone)]
pub struct RegenerationPolicy {
    pub interval: Option<Duration>,
    pub destroy_old: bool,
    pub match_ip: bool,
    pub match_user_agent: bool,
}

impl RegenerationPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            interval: (config.time_to_update > 0)
                .then(|| {
                    let secs = i64::try_from(config.time_to_update).unwrap_or(i64::MAX);
                    Duration::seconds(bounded_secs(secs))
                }),
            destroy_old: config.regenerate_destroy,
            match_ip: config.match_ip,
            match_user_agent: config.match_user_agent,
        }
    }

    /// Rotation is due once the interval has fully elapsed
    pub fn is_due(&self, last_regenerate: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.interval {
            Some(interval) => now.signed_duration_since(last_regenerate) >= interval,
            None => false,
        }
    }
}

/// Which binding a request failed to satisfy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingMismatch {
    IpAddress,
    UserAgent,
}

/// Owns the session identifier across cycles
#[derive(Debug)]
pub struct IdentityManager {
    current: Option<SessionId>,
    state: IdentityState,
    policy: RegenerationPolicy,
}

impl IdentityManager {
    pub fn new(policy: RegenerationPolicy) -> Self {
        Self {
            current: None,
            state: IdentityState::Fresh,
            policy,
        }
    }

    pub fn current(&self) -> Option<&SessionId> {
        self.current.as_ref()
    }

    pub fn state(&self) -> IdentityState {
        self.state
    }

    pub fn policy(&self) -> &RegenerationPolicy {
        &self.policy
    }

    /// Identifier a cycle should resume.
    ///
    /// An inbound cookie wins; a malformed one is discarded rather than
    /// falling back. Without a cookie the identifier of the previous cycle is
    /// reused.
    pub fn resolve(&self, request: &RequestContext) -> Option<SessionId> {
        match &request.cookie {
            Some(raw) => {
                let parsed = SessionId::parse(raw);
                if parsed.is_none() {
                    warn!("Discarding malformed session identifier from request");
                }
                parsed
            }
            None => self.current.clone(),
        }
    }

    /// Generate an identifier no stored record uses yet
    pub async fn allocate(&self, handler: &dyn SessionHandler) -> Result<SessionId> {
        for attempt in 1..=env::session::MAX_ID_ATTEMPTS {
            let candidate = SessionId::generate();
            if !handler.exists(&candidate).await? {
                return Ok(candidate);
            }
            warn!("Session identifier collision on attempt {}", attempt);
        }

        Err(SessionError::IdentifierExhausted {
            attempts: env::session::MAX_ID_ATTEMPTS,
        })
    }

    /// Adopt an identifier for the running cycle
    pub fn activate(&mut self, id: SessionId) {
        debug!("Session identifier active: {}", id);
        self.current = Some(id);
        self.state = IdentityState::Active;
    }

    pub fn begin_regeneration(&mut self) {
        self.state = IdentityState::Regenerating;
    }

    /// Forget the identifier; the next cycle starts fresh
    pub fn reset(&mut self) {
        self.current = None;
        self.state = IdentityState::Fresh;
    }

    /// Whether the stored record is due for rotation
    pub fn should_regenerate(&self, store: &SessionStore, now: DateTime<Utc>) -> bool {
        store
            .last_regenerate()
            .is_some_and(|last| self.policy.is_due(last, now))
    }

    /// Record the request attributes the session is bound to
    pub fn bind(&self, store: &mut SessionStore, request: &RequestContext) {
        let ip_address = if self.policy.match_ip {
            request.ip_address.clone()
        } else {
            None
        };
        let user_agent = if self.policy.match_user_agent {
            request.user_agent.clone()
        } else {
            None
        };
        store.bind(ip_address, user_agent);
    }

    /// Compare a stored session with the request it arrived on
    pub fn check_binding(
        &self,
        store: &SessionStore,
        request: &RequestContext,
    ) -> Option<BindingMismatch> {
        if self.policy.match_ip && store.ip_address() != request.ip_address.as_deref() {
            return Some(BindingMismatch::IpAddress);
        }
        if self.policy.match_user_agent && store.user_agent() != request.user_agent.as_deref() {
            return Some(BindingMismatch::UserAgent);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{MemoryHandler, SessionHandler};

    fn policy(secs: u64) -> RegenerationPolicy {
        RegenerationPolicy::from_config(&SessionConfig {
            time_to_update: secs,
            ..SessionConfig::default()
        })
    }

    #[test]
    fn test_rotation_due_at_interval_boundary() {
        let policy = policy(300);
        let last = Utc::now();

        assert!(!policy.is_due(last, last + Duration::seconds(299)));
        assert!(policy.is_due(last, last + Duration::seconds(300)));
        assert!(policy.is_due(last, last + Duration::seconds(400)));
    }

    #[test]
    fn test_zero_interval_disables_rotation() {
        let policy = policy(0);
        let last = Utc::now();
        assert!(!policy.is_due(last, last + Duration::days(365)));
    }

    #[test]
    fn test_resolve_prefers_cookie_and_discards_garbage() {
        let mut identity = IdentityManager::new(policy(300));
        let remembered = SessionId::generate();
        identity.activate(remembered.clone());

        let inbound = SessionId::generate();
        let request = RequestContext::new().with_cookie(inbound.as_str());
        assert_eq!(identity.resolve(&request), Some(inbound));

        let garbage = RequestContext::new().with_cookie("<script>");
        assert_eq!(identity.resolve(&garbage), None);

        assert_eq!(identity.resolve(&RequestContext::new()), Some(remembered));
    }

    #[tokio::test]
    async fn test_allocate_returns_unused_identifier() {
        let handler = MemoryHandler::new();
        let identity = IdentityManager::new(policy(300));

        let id = identity.allocate(&handler).await.unwrap();

        assert!(!handler.exists(&id).await.unwrap());
        assert_eq!(identity.state(), IdentityState::Fresh);
    }

    #[test]
    fn test_binding_detects_ip_change() {
        let identity = IdentityManager::new(RegenerationPolicy {
            match_ip: true,
            ..policy(300)
        });
        let mut store = SessionStore::default();
        let origin = RequestContext::new().with_ip_address("10.0.0.1");
        identity.bind(&mut store, &origin);

        assert_eq!(identity.check_binding(&store, &origin), None);

        let elsewhere = RequestContext::new().with_ip_address("10.0.0.2");
        assert_eq!(
            identity.check_binding(&store, &elsewhere),
            Some(BindingMismatch::IpAddress)
        );
    }

    #[test]
    fn test_unbound_sessions_ignore_request_attributes() {
        let identity = IdentityManager::new(policy(300));
        let mut store = SessionStore::default();
        identity.bind(&mut store, &RequestContext::new().with_ip_address("10.0.0.1"));

        assert!(store.ip_address().is_none());
        let other = RequestContext::new().with_ip_address("192.168.0.9");
        assert_eq!(identity.check_binding(&store, &other), None);
    }
}
