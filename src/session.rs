use crate::auth::{Principal, Role};
use crate::error::{PortalError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::debug;

pub type SessionToken = String;

type IdentityKey = (Role, String);

#[derive(Debug, Clone)]
pub struct Session {
    pub token: SessionToken,
    pub principal: Principal,
    pub expires_at: Instant,
}

fn identity_key(principal: &Principal) -> IdentityKey {
    (principal.role(), principal.identity().to_string())
}

#[derive(Debug, Default)]
struct Sessions {
    by_token: HashMap<SessionToken, Session>,
    /// Tokens held by each identity, so all of them can be revoked at once.
    by_identity: HashMap<IdentityKey, HashSet<SessionToken>>,
}

impl Sessions {
    fn insert(&mut self, session: Session) {
        self.by_identity
            .entry(identity_key(&session.principal))
            .or_default()
            .insert(session.token.clone());
        self.by_token.insert(session.token.clone(), session);
    }

    fn remove(&mut self, token: &str) -> Option<Session> {
        let session = self.by_token.remove(token)?;
        let key = identity_key(&session.principal);
        if let Some(tokens) = self.by_identity.get_mut(&key) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_identity.remove(&key);
            }
        }
        Some(session)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<SessionToken> = self
            .by_token
            .values()
            .filter(|s| s.expires_at <= now)
            .map(|s| s.token.clone())
            .collect();

        for token in &expired {
            self.remove(token);
        }
        expired.len()
    }
}

/// Live sessions, keyed by token. Owned by the server state and shared between handlers.
#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<Sessions>,
}

// 256-bit random token, base64url without padding
fn gen_token() -> Result<SessionToken> {
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf)
        .map_err(|e| PortalError::Unavailable(format!("no randomness for session token: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(buf))
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            sessions: RwLock::new(Sessions::default()),
        }
    }

    /// Starts a session for `principal` and returns it. Expired sessions are swept first.
    pub fn issue(&self, principal: Principal) -> Result<Session> {
        let now = Instant::now();
        let session = Session {
            token: gen_token()?,
            principal,
            expires_at: now + self.ttl,
        };

        let mut sessions = self.sessions.write();
        let purged = sessions.purge_expired(now);
        sessions.insert(session.clone());
        drop(sessions);

        debug!(
            identity = session.principal.identity(),
            ttl_secs = self.ttl.as_secs(),
            purged,
            "session issued"
        );

        Ok(session)
    }

    /// Returns the principal bound to `token`, dropping the session if it has expired.
    pub fn validate(&self, token: &str) -> Option<Principal> {
        let now = Instant::now();

        let expired = {
            let sessions = self.sessions.read();
            match sessions.by_token.get(token) {
                Some(session) if session.expires_at > now => {
                    return Some(session.principal.clone());
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            self.sessions.write().remove(token);
            debug!("session expired");
        }
        None
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Ends a session. Returns whether it existed.
    pub fn revoke(&self, token: &str) -> bool {
        self.sessions.write().remove(token).is_some()
    }

    /// Ends every session of one identity, returning how many were removed.
    pub fn revoke_identity(&self, role: Role, identity: &str) -> usize {
        let mut sessions = self.sessions.write();
        let tokens = sessions
            .by_identity
            .remove(&(role, identity.to_string()))
            .unwrap_or_default();

        let count = tokens
            .iter()
            .filter(|token| sessions.by_token.remove(token.as_str()).is_some())
            .count();
        debug!(identity, count, "sessions revoked");
        count
    }

    pub fn len(&self) -> usize {
        self.sessions.read().by_token.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> Principal {
        Principal::Student {
            usn: "1RV21CS002".to_string(),
            name: "Jane Smith".to_string(),
        }
    }

    #[test]
    fn test_issue_validate_revoke() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.issue(jane()).unwrap();

        assert_eq!(store.validate(&session.token), Some(jane()));
        assert!(store.revoke(&session.token));
        assert_eq!(store.validate(&session.token), None);
        assert!(!store.revoke(&session.token));
    }

    #[test]
    fn test_tokens_are_distinct() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.issue(jane()).unwrap();
        let b = store.issue(jane()).unwrap();
        assert_ne!(a.token, b.token);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_expired_session_is_dropped() {
        let store = SessionStore::new(Duration::ZERO);
        let session = store.issue(jane()).unwrap();

        assert_eq!(store.validate(&session.token), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_abandoned_sessions_are_swept_on_issue() {
        let store = SessionStore::new(Duration::ZERO);
        store.issue(jane()).unwrap();
        store.issue(jane()).unwrap();
        store.issue(Principal::operator()).unwrap();

        // Each issue sweeps the ones before it.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_revoke_identity() {
        let store = SessionStore::new(Duration::from_secs(60));
        let a = store.issue(jane()).unwrap();
        let b = store.issue(jane()).unwrap();
        let teacher = store.issue(Principal::operator()).unwrap();

        assert_eq!(store.revoke_identity(Role::Student, "1RV21CS002"), 2);
        assert_eq!(store.validate(&a.token), None);
        assert_eq!(store.validate(&b.token), None);
        assert_eq!(store.validate(&teacher.token), Some(Principal::operator()));

        // A teacher named like the USN is a different identity.
        assert_eq!(store.revoke_identity(Role::Teacher, "1RV21CS002"), 0);
        assert_eq!(store.revoke_identity(Role::Student, "1RV21CS002"), 0);
    }

    #[test]
    fn test_unknown_token() {
        let store = SessionStore::new(Duration::from_secs(60));
        assert_eq!(store.validate("nope"), None);
    }
}
