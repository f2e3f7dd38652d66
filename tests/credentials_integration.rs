//! Credential integration tests: issue, rotate, verify through the public API.

use actor_kernel::credentials::{Claims, CredentialConfig, SigningAlgorithm};
use actor_kernel::{Config, CredentialError, CredentialManager, Error, Kernel};
use chrono::{Duration as ChronoDuration, Utc};
use proptest::prelude::*;
use std::time::Duration;

fn new_manager(algorithm: SigningAlgorithm) -> CredentialManager {
    CredentialManager::new(CredentialConfig {
        rotation_interval: Duration::from_secs(3600),
        secret_lifetime: Duration::from_secs(4 * 3600),
        algorithm,
        initial_secret_material: None,
    })
    .unwrap()
}

fn credential_error(err: Error) -> CredentialError {
    match err {
        Error::Credential(inner) => inner,
        other => panic!("expected credential error, got {:?}", other),
    }
}

#[test]
fn test_round_trip_for_every_algorithm() {
    for algorithm in [
        SigningAlgorithm::Hs256,
        SigningAlgorithm::Hs384,
        SigningAlgorithm::Hs512,
    ] {
        let manager = new_manager(algorithm);
        manager.initialize(None);
        let exp = Utc::now().timestamp() + 3600;

        let token = manager.sign(Claims::new("u1", exp, "a")).unwrap();
        assert_eq!(token.split('.').count(), 3);

        let claims = manager.verify(&token).unwrap();
        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.jti, "a");
    }
}

#[test]
fn test_verification_error_classes() {
    let manager = new_manager(SigningAlgorithm::Hs256);
    manager.initialize(None);
    let now = Utc::now();

    let err = credential_error(manager.verify("no-dots-at-all").unwrap_err());
    assert!(matches!(err, CredentialError::InvalidFormat(_)));

    let expired = manager
        .sign_at(Claims::new("u1", now.timestamp() - 1, "a"), now)
        .unwrap();
    let err = credential_error(manager.verify_at(&expired, now).unwrap_err());
    assert_eq!(err, CredentialError::Expired);

    let other = new_manager(SigningAlgorithm::Hs256);
    other.initialize(None);
    let foreign = other
        .sign_at(Claims::new("u1", now.timestamp() + 60, "a"), now)
        .unwrap();
    let err = credential_error(manager.verify_at(&foreign, now).unwrap_err());
    assert!(matches!(err, CredentialError::InvalidSignature(_)));
}

#[test]
fn test_exported_metadata_has_no_material() {
    let manager = new_manager(SigningAlgorithm::Hs256);
    manager.initialize(Some(b"do-not-leak-this-material"));
    manager.rotate();

    let json = serde_json::to_string(&manager.export_metadata()).unwrap();
    assert!(!json.contains("do-not-leak-this-material"));
    assert!(!json.contains("material"));
}

#[test]
fn test_kernel_issues_verifiable_sessions() {
    let kernel = Kernel::new(Config::default(), None).unwrap();
    let token = kernel
        .credentials()
        .issue("u42", Duration::from_secs(600), Some("sess-42"))
        .unwrap();
    let claims = kernel.credentials().verify(&token).unwrap();
    assert_eq!(claims.sub, "u42");
    assert_eq!(claims.sid.as_deref(), Some("sess-42"));
    assert_eq!(claims.kid, kernel.credentials().active_secret_id());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any rotation schedule keeps exactly one active secret, and a token
    /// verifies for as long as its signing secret is alive.
    #[test]
    fn prop_rotation_keeps_one_active_secret(gaps in proptest::collection::vec(1i64..180, 1..12)) {
        let manager = new_manager(SigningAlgorithm::Hs256);
        let t0 = Utc::now();
        manager.initialize_at(None, t0);
        let token = manager
            .sign_at(Claims::new("u1", t0.timestamp() + 1_000_000, "a"), t0)
            .unwrap();
        let secret_expiry = t0 + ChronoDuration::hours(4);

        let mut now = t0;
        for gap in gaps {
            now += ChronoDuration::minutes(gap);
            manager.rotate_at(now);

            let active = manager
                .export_metadata()
                .iter()
                .filter(|m| m.is_active)
                .count();
            prop_assert_eq!(active, 1);

            let verified = manager.verify_at(&token, now);
            if now <= secret_expiry {
                prop_assert!(verified.is_ok());
            } else {
                prop_assert!(verified.is_err());
            }
        }
    }
}
