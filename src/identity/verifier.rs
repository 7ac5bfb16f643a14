use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use crate::tprintln;

use super::principal::{Principal, Role};
use crate::store::{PortalStore, StoreError};

static STUDENT_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^K\d{6}$").expect("static regex"));

/// Exactly the letter `K` followed by six ASCII digits.
pub fn is_valid_student_identifier(s: &str) -> bool {
    STUDENT_ID_RE.is_match(s)
}

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid student identifier format")]
    Format,
    #[error("invalid identifier or secret")]
    Credentials,
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),
}

impl From<VerifyError> for crate::error::AppError {
    fn from(e: VerifyError) -> Self {
        use crate::error::AppError;
        match e {
            VerifyError::Format => AppError::format(
                "invalid_identifier",
                "Invalid student identifier format. It should be 'K' followed by 6 digits.",
            ),
            VerifyError::Credentials => {
                AppError::credentials("invalid_credentials", "Invalid identifier or password")
            }
            VerifyError::Store(err) => {
                AppError::store_unavailable("store_unavailable".to_string(), err.to_string())
            }
        }
    }
}

/// Validate and check a credential pair against the backing store.
///
/// Student identifiers are shape-checked before any store access; a
/// malformed identifier never reaches the store. The lookup is a single
/// parameterized identifier+secret conjunction, and verification succeeds
/// iff it matches exactly one row. More than one match (a latent
/// data-integrity problem in the store) reads as invalid credentials, not
/// as a win for the first row.
///
/// Secrets are never logged and never echoed back on failure.
pub async fn verify(
    store: &dyn PortalStore,
    role: Role,
    identifier: &str,
    secret: &str,
) -> Result<Principal, VerifyError> {
    if role == Role::Student && !is_valid_student_identifier(identifier) {
        return Err(VerifyError::Format);
    }
    let mut rows = store.lookup_principal(role, identifier, secret).await?;
    let principal = match rows.len() {
        1 => rows.remove(0),
        _ => return Err(VerifyError::Credentials),
    };
    tprintln!("auth.verify ok user={} role={}", principal.identifier, role.as_str());
    Ok(principal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use std::sync::Arc;

    #[test]
    fn student_identifier_truth_table() {
        assert!(is_valid_student_identifier("K123456"));
        assert!(!is_valid_student_identifier("K12345"));
        assert!(!is_valid_student_identifier("K1234567"));
        assert!(!is_valid_student_identifier("123456"));
        assert!(!is_valid_student_identifier("X123456"));
        assert!(!is_valid_student_identifier("K12345A"));
        assert!(!is_valid_student_identifier("k123456"));
        assert!(!is_valid_student_identifier(""));
    }

    fn seeded_store() -> Arc<MemStore> {
        let store = MemStore::new();
        store.seed_student(
            crate::store::StudentRecord {
                student_id: "K123456".into(),
                name: "Ayesha".into(),
                point_no: "12".into(),
                phone: "0300123456".into(),
                fee_status: "paid".into(),
                driver_id: Some("D-7".into()),
            },
            "pw",
        );
        store.seed_admin("admin@campus.edu", "adminpw");
        Arc::new(store)
    }

    #[tokio::test]
    async fn valid_student_credentials_return_full_record() {
        let store = seeded_store();
        let p = verify(store.as_ref(), Role::Student, "K123456", "pw").await.expect("verify");
        assert_eq!(p.identifier, "K123456");
        assert_eq!(p.name, "Ayesha");
        assert_eq!(p.role, Role::Student);
        assert_eq!(p.attrs.point_no.as_deref(), Some("12"));
        assert_eq!(p.attrs.fee_status.as_deref(), Some("paid"));
        assert_eq!(p.attrs.driver_id.as_deref(), Some("D-7"));
    }

    #[tokio::test]
    async fn admin_identifier_has_no_shape_constraint() {
        let store = seeded_store();
        let p = verify(store.as_ref(), Role::Admin, "admin@campus.edu", "adminpw").await.expect("verify");
        assert_eq!(p.role, Role::Admin);
        assert_eq!(p.identifier, "admin@campus.edu");
    }

    #[tokio::test]
    async fn malformed_student_identifier_never_reaches_the_store() {
        let store = seeded_store();
        let err = verify(store.as_ref(), Role::Student, "K12345", "pw").await.unwrap_err();
        assert!(matches!(err, VerifyError::Format));
        assert_eq!(store.lookup_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_credentials_are_rejected_generically() {
        let store = seeded_store();
        let err = verify(store.as_ref(), Role::Student, "K999999", "pw").await.unwrap_err();
        assert!(matches!(err, VerifyError::Credentials));
        let err = verify(store.as_ref(), Role::Student, "K123456", "wrong").await.unwrap_err();
        assert!(matches!(err, VerifyError::Credentials));
    }

    #[tokio::test]
    async fn ambiguous_multi_row_match_reads_as_invalid_credentials() {
        let store = seeded_store();
        // A second row with the same identifier+secret pair.
        store.seed_student(
            crate::store::StudentRecord {
                student_id: "K123456".into(),
                name: "Duplicate".into(),
                point_no: "3".into(),
                phone: "0300000000".into(),
                fee_status: "unpaid".into(),
                driver_id: None,
            },
            "pw",
        );
        let err = verify(store.as_ref(), Role::Student, "K123456", "pw").await.unwrap_err();
        assert!(matches!(err, VerifyError::Credentials));
    }

    #[tokio::test]
    async fn verification_is_deterministic_for_fixed_store_state() {
        let store = seeded_store();
        let a = verify(store.as_ref(), Role::Student, "K123456", "pw").await.expect("first");
        let b = verify(store.as_ref(), Role::Student, "K123456", "pw").await.expect("second");
        assert_eq!(a, b);
        let e1 = verify(store.as_ref(), Role::Student, "K123456", "nope").await.unwrap_err();
        let e2 = verify(store.as_ref(), Role::Student, "K123456", "nope").await.unwrap_err();
        assert!(matches!(e1, VerifyError::Credentials));
        assert!(matches!(e2, VerifyError::Credentials));
    }
}
