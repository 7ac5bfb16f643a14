use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use base64::Engine;
use parking_lot::RwLock;
use crate::tprintln;

use super::principal::Principal;

/// Random 128-bit session id, base64url without padding.
pub fn issue_session_id() -> String {
    let mut buf = [0u8; 16];
    let _ = getrandom::getrandom(&mut buf);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf)
}

#[derive(Debug)]
struct SessionEntry {
    principal: Principal,
    expires_at: Instant,
}

/// Per-client session state, keyed by session id. One entry per client
/// context; `establish` on an existing id overwrites the previous principal
/// wholesale. The map is owned by the manager instance, not process-global.
#[derive(Clone)]
pub struct SessionManager {
    ttl: Duration,
    inner: Arc<RwLock<HashMap<String, SessionEntry>>>,
}

impl Default for SessionManager {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

impl SessionManager {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Store the principal for this client, replacing any previous session
    /// content unconditionally.
    pub fn establish(&self, session_id: &str, principal: Principal) {
        let entry = SessionEntry {
            principal,
            expires_at: Instant::now() + self.ttl,
        };
        let mut map = self.inner.write();
        let user = entry.principal.identifier.clone();
        map.insert(session_id.to_string(), entry);
        tprintln!("session.establish user={} sid={}", user, session_id);
    }

    /// Last-established principal for this client, or None if no session
    /// exists. Expired entries are dropped on read.
    pub fn current_principal(&self, session_id: &str) -> Option<Principal> {
        let now = Instant::now();
        let mut drop_key: Option<String> = None;
        let out = {
            let map = self.inner.read();
            if let Some(ent) = map.get(session_id) {
                if ent.expires_at > now {
                    Some(ent.principal.clone())
                } else {
                    drop_key = Some(session_id.to_string());
                    None
                }
            } else { None }
        };
        if let Some(k) = drop_key {
            self.inner.write().remove(&k);
        }
        out
    }

    /// Remove all session content for this client. Returns whether a session
    /// existed.
    pub fn clear(&self, session_id: &str) -> bool {
        self.inner.write().remove(session_id).is_some()
    }
}
