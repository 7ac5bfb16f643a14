use super::Principal;
use super::session::SessionManager;

/// Per-request view of the client's session, resolved once by the server and
/// passed to handler logic instead of any ambient global state.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub principal: Option<Principal>,
    pub session_id: Option<String>,
}

impl RequestContext {
    pub fn resolve(sessions: &SessionManager, session_id: Option<String>) -> Self {
        let principal = session_id.as_deref().and_then(|sid| sessions.current_principal(sid));
        Self { principal, session_id }
    }

    pub fn is_admin(&self) -> bool {
        self.principal
            .as_ref()
            .map(|p| p.role == super::Role::Admin)
            .unwrap_or(false)
    }
}
