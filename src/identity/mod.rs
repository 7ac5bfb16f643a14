//! Identity and session management for the portal: credential verification,
//! principal records and per-client sessions.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod verifier;
mod request_context;

pub use principal::{Attrs, Principal, Role};
pub use session::{issue_session_id, SessionManager};
pub use verifier::{is_valid_student_identifier, verify, VerifyError};
pub use request_context::RequestContext;
