//! Credential manager - issues, rotates and verifies signed session credentials.
//!
//! Exactly one secret is active at a time and signs new credentials. On
//! rotation the active secret is retired but retained, so credentials it
//! signed keep verifying until the secret itself expires. Retired secrets
//! past their expiry are evicted during rotation (and by
//! [`CredentialManager::remove_expired`]).
//!
//! Verification order matters: a `kid` that names a retained secret is
//! checked against that secret only; without a usable `kid` every
//! non-expired secret is tried, active first.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

mod secrets;
mod token;

pub use secrets::{SecretMetadata, SigningAlgorithm, SigningSecret};
pub use token::{Claims, TokenHeader, TOKEN_TYPE};

use crate::types::{self, CredentialError, Error, SecretId};
use crate::validation::validate_non_zero;

/// Credential manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CredentialConfig {
    /// Age of the active secret after which rotation is due.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub rotation_interval: Duration,

    /// How long a secret stays usable for verification after creation.
    #[serde(with = "humantime_serde")]
    #[schemars(with = "String")]
    pub secret_lifetime: Duration,

    pub algorithm: SigningAlgorithm,

    /// Seed material for the first secret (random when absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_secret_material: Option<String>,
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            rotation_interval: Duration::from_secs(24 * 3600),
            secret_lifetime: Duration::from_secs(48 * 3600),
            algorithm: SigningAlgorithm::default(),
            initial_secret_material: None,
        }
    }
}

impl CredentialConfig {
    /// Reject schedules that would leave the active secret expired before
    /// its rotation is due.
    pub fn validate(&self) -> types::Result<()> {
        validate_non_zero(self.rotation_interval, "credentials.rotation_interval")?;
        if self.secret_lifetime < self.rotation_interval {
            return Err(Error::config(format!(
                "credentials.secret_lifetime ({:?}) must be at least credentials.rotation_interval ({:?})",
                self.secret_lifetime, self.rotation_interval
            )));
        }
        Ok(())
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[derive(Debug, Default)]
struct SecretStore {
    secrets: HashMap<SecretId, SigningSecret>,
    active: Option<SecretId>,
}

impl SecretStore {
    fn active(&self) -> Option<&SigningSecret> {
        self.active.as_ref().and_then(|id| self.secrets.get(id))
    }

    fn insert_active(&mut self, secret: SigningSecret) -> SecretId {
        let id = secret.id.clone();
        self.secrets.insert(id.clone(), secret);
        self.active = Some(id.clone());
        id
    }

    fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.secrets.len();
        self.secrets.retain(|_, s| !s.is_evictable_at(now));
        before - self.secrets.len()
    }
}

/// Issues, rotates and verifies session credentials.
#[derive(Debug)]
pub struct CredentialManager {
    config: CredentialConfig,
    store: RwLock<SecretStore>,
}

impl CredentialManager {
    /// Create an uninitialized manager; signing fails until [`initialize`](Self::initialize).
    pub fn new(config: CredentialConfig) -> types::Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store: RwLock::new(SecretStore::default()),
        })
    }

    pub fn config(&self) -> &CredentialConfig {
        &self.config
    }

    /// Create the first active secret, replacing any existing secret set.
    ///
    /// `seed` wins over `initial_secret_material` from the config; without
    /// either, material is random.
    pub fn initialize(&self, seed: Option<&[u8]>) -> SecretId {
        self.initialize_at(seed, Utc::now())
    }

    pub fn initialize_at(&self, seed: Option<&[u8]>, now: DateTime<Utc>) -> SecretId {
        let lifetime = to_chrono(self.config.secret_lifetime);
        let material = seed
            .map(<[u8]>::to_vec)
            .or_else(|| {
                self.config
                    .initial_secret_material
                    .as_ref()
                    .map(|m| m.as_bytes().to_vec())
            });
        let secret = match material {
            Some(material) => {
                SigningSecret::from_material(material, self.config.algorithm, now, lifetime)
            }
            None => SigningSecret::generate(self.config.algorithm, now, lifetime),
        };

        let mut store = self.store.write();
        *store = SecretStore::default();
        let id = store.insert_active(secret);
        tracing::info!(
            "credentials_initialized: kid={} algorithm={}",
            id,
            self.config.algorithm
        );
        id
    }

    pub fn active_secret_id(&self) -> Option<SecretId> {
        self.store.read().active.clone()
    }

    pub fn secret_count(&self) -> usize {
        self.store.read().secrets.len()
    }

    // =========================================================================
    // Rotation
    // =========================================================================

    pub fn should_rotate(&self) -> bool {
        self.should_rotate_at(Utc::now())
    }

    /// True once the active secret is older than the rotation interval, or
    /// when there is no active secret at all.
    pub fn should_rotate_at(&self, now: DateTime<Utc>) -> bool {
        match self.store.read().active() {
            Some(active) => now > active.created_at + to_chrono(self.config.rotation_interval),
            None => true,
        }
    }

    pub fn rotate(&self) -> SecretId {
        self.rotate_at(Utc::now())
    }

    /// Retire the active secret, activate a fresh one, and evict retired
    /// secrets past their expiry. Exactly one secret is active afterwards.
    pub fn rotate_at(&self, now: DateTime<Utc>) -> SecretId {
        let secret = SigningSecret::generate(
            self.config.algorithm,
            now,
            to_chrono(self.config.secret_lifetime),
        );

        let mut store = self.store.write();
        let retired = store.active.take();
        if let Some(previous) = retired.as_ref().and_then(|id| store.secrets.get_mut(id)) {
            previous.is_active = false;
            previous.rotated_at = Some(now);
        }

        let id = store.insert_active(secret);
        let evicted = store.evict_expired(now);

        tracing::info!(
            "credentials_rotated: kid={} retired={} evicted={} retained={}",
            id,
            retired.as_ref().map(SecretId::as_str).unwrap_or("none"),
            evicted,
            store.secrets.len()
        );
        id
    }

    pub fn rotate_if_due(&self) -> Option<SecretId> {
        self.rotate_if_due_at(Utc::now())
    }

    pub fn rotate_if_due_at(&self, now: DateTime<Utc>) -> Option<SecretId> {
        if self.should_rotate_at(now) {
            Some(self.rotate_at(now))
        } else {
            None
        }
    }

    /// Evict retired secrets past their expiry. Returns the number removed.
    pub fn remove_expired(&self) -> usize {
        self.remove_expired_at(Utc::now())
    }

    pub fn remove_expired_at(&self, now: DateTime<Utc>) -> usize {
        self.store.write().evict_expired(now)
    }

    // =========================================================================
    // Signing
    // =========================================================================

    /// Sign `claims` with the active secret, stamping `iat` and `kid`.
    pub fn sign(&self, claims: Claims) -> types::Result<String> {
        self.sign_at(claims, Utc::now())
    }

    pub fn sign_at(&self, mut claims: Claims, now: DateTime<Utc>) -> types::Result<String> {
        let store = self.store.read();
        let secret = store.active().ok_or(CredentialError::NoActiveSecret)?;

        claims.iat = now.timestamp();
        claims.kid = Some(secret.id.clone());
        let header = TokenHeader {
            alg: secret.algorithm,
            typ: TOKEN_TYPE.to_string(),
            kid: Some(secret.id.clone()),
        };
        token::encode(&header, &claims, secret)
    }

    /// Issue a credential for `subject` valid for `ttl`, with a random `jti`.
    pub fn issue(
        &self,
        subject: &str,
        ttl: Duration,
        session_id: Option<&str>,
    ) -> types::Result<String> {
        self.issue_at(subject, ttl, session_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: &str,
        ttl: Duration,
        session_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> types::Result<String> {
        let exp = (now + to_chrono(ttl)).timestamp();
        let mut claims = Claims::new(subject, exp, uuid::Uuid::new_v4().to_string());
        if let Some(sid) = session_id {
            claims = claims.with_session(sid);
        }
        self.sign_at(claims, now)
    }

    // =========================================================================
    // Verification
    // =========================================================================

    pub fn verify(&self, token: &str) -> types::Result<Claims> {
        self.verify_at(token, Utc::now())
    }

    /// Verify format, expiry, then signature.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> types::Result<Claims> {
        let decoded = token::decode(token)?;

        if decoded.claims.exp < now.timestamp() {
            return Err(CredentialError::Expired.into());
        }

        let store = self.store.read();

        if let Some(secret) = decoded.header.kid.as_ref().and_then(|kid| store.secrets.get(kid)) {
            if secret.is_expired_at(now) {
                return Err(CredentialError::InvalidSignature(format!(
                    "signing secret {} has expired",
                    secret.id
                ))
                .into());
            }
            if decoded.verifies_with(secret) {
                return Ok(decoded.claims);
            }
            return Err(CredentialError::InvalidSignature(format!(
                "signature does not match secret {}",
                secret.id
            ))
            .into());
        }

        // No usable kid: try every live secret, active first, then newest.
        let mut candidates: Vec<&SigningSecret> = store
            .secrets
            .values()
            .filter(|s| !s.is_expired_at(now))
            .collect();
        candidates.sort_by(|a, b| {
            b.is_active
                .cmp(&a.is_active)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });

        if candidates.into_iter().any(|s| decoded.verifies_with(s)) {
            return Ok(decoded.claims);
        }

        Err(CredentialError::InvalidSignature("no retained secret matches".to_string()).into())
    }

    /// Secret metadata, oldest first. Never includes key material.
    pub fn export_metadata(&self) -> Vec<SecretMetadata> {
        let store = self.store.read();
        let mut metadata: Vec<SecretMetadata> =
            store.secrets.values().map(SigningSecret::metadata).collect();
        metadata.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        metadata
    }
}

impl Default for CredentialManager {
    fn default() -> Self {
        // The default config always passes `validate`, so build directly.
        Self {
            config: CredentialConfig::default(),
            store: RwLock::new(SecretStore::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine as _;
    use chrono::Duration as ChronoDuration;

    fn manager() -> CredentialManager {
        CredentialManager::new(CredentialConfig {
            rotation_interval: Duration::from_secs(3600),
            secret_lifetime: Duration::from_secs(7200),
            algorithm: SigningAlgorithm::Hs256,
            initial_secret_material: None,
        })
        .unwrap()
    }

    fn claims(now: DateTime<Utc>, ttl_secs: i64) -> Claims {
        Claims::new("u1", now.timestamp() + ttl_secs, "a")
    }

    fn credential_error(err: Error) -> CredentialError {
        match err {
            Error::Credential(inner) => inner,
            other => panic!("expected credential error, got {:?}", other),
        }
    }

    /// Re-sign the token body without a `kid` so verification must search.
    fn strip_kid(token: &str, key: &[u8]) -> String {
        let parts: Vec<&str> = token.split('.').collect();
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
        let input = format!("{}.{}", header, parts[1]);
        let sig = SigningAlgorithm::Hs256.sign(key, input.as_bytes()).unwrap();
        format!("{}.{}", input, URL_SAFE_NO_PAD.encode(sig))
    }

    #[test]
    fn test_sign_without_secret_fails() {
        let manager = manager();
        let err = manager.sign(claims(Utc::now(), 60)).unwrap_err();
        assert_eq!(credential_error(err), CredentialError::NoActiveSecret);
    }

    #[test]
    fn test_round_trip_stamps_iat_and_kid() {
        let manager = manager();
        let kid = manager.initialize(None);
        let now = Utc::now();

        let token = manager.sign_at(claims(now, 3600), now).unwrap();
        let verified = manager.verify_at(&token, now).unwrap();

        assert_eq!(verified.sub, "u1");
        assert_eq!(verified.jti, "a");
        assert_eq!(verified.iat, now.timestamp());
        assert_eq!(verified.kid, Some(kid));
    }

    #[test]
    fn test_tampered_signature_is_rejected() {
        let manager = manager();
        manager.initialize(None);
        let token = manager.sign(claims(Utc::now(), 3600)).unwrap();

        let (input, sig) = token.rsplit_once('.').unwrap();
        let first = if sig.starts_with('A') { 'B' } else { 'A' };
        let tampered = format!("{}.{}{}", input, first, &sig[1..]);

        let err = credential_error(manager.verify(&tampered).unwrap_err());
        assert!(matches!(err, CredentialError::InvalidSignature(_)));
    }

    #[test]
    fn test_expired_token_is_rejected_before_signature() {
        let manager = manager();
        manager.initialize(None);
        let now = Utc::now();
        let token = manager.sign_at(claims(now, -10), now).unwrap();

        let err = credential_error(manager.verify_at(&token, now).unwrap_err());
        assert_eq!(err, CredentialError::Expired);
    }

    #[test]
    fn test_malformed_token_is_invalid_format() {
        let manager = manager();
        manager.initialize(None);
        let err = credential_error(manager.verify("only.two").unwrap_err());
        assert!(matches!(err, CredentialError::InvalidFormat(_)));
    }

    #[test]
    fn test_seed_material_makes_signatures_reproducible() {
        let a = manager();
        let b = manager();
        a.initialize(Some(b"seed"));
        b.initialize(Some(b"seed"));
        let now = Utc::now();

        let token = a.sign_at(claims(now, 60), now).unwrap();
        // Different kid, same material: the kid misses and the search succeeds.
        assert_eq!(b.verify_at(&token, now).unwrap().sub, "u1");
    }

    #[test]
    fn test_config_seed_used_when_no_explicit_seed() {
        let manager = CredentialManager::new(CredentialConfig {
            initial_secret_material: Some("configured-seed".to_string()),
            ..CredentialConfig::default()
        })
        .unwrap();
        manager.initialize(None);
        let now = Utc::now();
        let token = manager.sign_at(claims(now, 60), now).unwrap();
        let unkeyed = strip_kid(&token, b"configured-seed");
        assert!(manager.verify_at(&unkeyed, now).is_ok());
    }

    #[test]
    fn test_rotation_keeps_exactly_one_active_secret() {
        let manager = manager();
        manager.initialize(None);
        let mut now = Utc::now();

        for _ in 0..5 {
            now += ChronoDuration::minutes(20);
            manager.rotate_at(now);
            let active: Vec<_> = manager
                .export_metadata()
                .into_iter()
                .filter(|m| m.is_active)
                .collect();
            assert_eq!(active.len(), 1);
            assert_eq!(Some(active[0].id.clone()), manager.active_secret_id());
        }
    }

    #[test]
    fn test_tokens_signed_before_rotation_still_verify() {
        let manager = manager();
        let first = manager.initialize(None);
        let t0 = Utc::now();
        let token = manager.sign_at(claims(t0, 10_000), t0).unwrap();

        let t1 = t0 + ChronoDuration::minutes(61);
        let second = manager.rotate_at(t1);
        assert_ne!(first, second);

        let retired = manager
            .export_metadata()
            .into_iter()
            .find(|m| m.id == first)
            .unwrap();
        assert!(!retired.is_active);
        assert_eq!(retired.rotated_at, Some(t1));

        assert_eq!(manager.verify_at(&token, t1).unwrap().sub, "u1");
    }

    #[test]
    fn test_expired_kid_secret_rejects_signature() {
        let manager = manager();
        manager.initialize(None);
        let t0 = Utc::now();
        let token = manager.sign_at(claims(t0, 100_000), t0).unwrap();

        // Retire before expiry so the secret is still retained when checked.
        manager.rotate_at(t0 + ChronoDuration::minutes(30));
        let after_expiry = t0 + ChronoDuration::hours(3);

        let err = credential_error(manager.verify_at(&token, after_expiry).unwrap_err());
        match err {
            CredentialError::InvalidSignature(msg) => assert!(msg.contains("expired")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rotation_evicts_retired_expired_secrets() {
        let manager = manager();
        let first = manager.initialize(None);
        let t0 = Utc::now();

        manager.rotate_at(t0 + ChronoDuration::minutes(30));
        assert_eq!(manager.secret_count(), 2);

        // First secret expired at t0 + 2h; the second lives until t0 + 2h30m.
        manager.rotate_at(t0 + ChronoDuration::minutes(130));
        let ids: Vec<SecretId> = manager.export_metadata().into_iter().map(|m| m.id).collect();
        assert!(!ids.contains(&first));
        assert_eq!(manager.secret_count(), 2);
    }

    #[test]
    fn test_unkeyed_token_searches_all_live_secrets() {
        let manager = manager();
        manager.initialize(Some(b"old-key"));
        let t0 = Utc::now();
        let token = manager.sign_at(claims(t0, 10_000), t0).unwrap();
        manager.rotate_at(t0 + ChronoDuration::minutes(5));

        let unkeyed = strip_kid(&token, b"old-key");
        assert!(manager.verify_at(&unkeyed, t0 + ChronoDuration::minutes(6)).is_ok());

        let forged = strip_kid(&token, b"never-issued");
        let err = credential_error(
            manager
                .verify_at(&forged, t0 + ChronoDuration::minutes(6))
                .unwrap_err(),
        );
        assert!(matches!(err, CredentialError::InvalidSignature(_)));
    }

    #[test]
    fn test_should_rotate_after_interval() {
        let manager = manager();
        assert!(manager.should_rotate());
        let t0 = Utc::now();
        manager.initialize_at(None, t0);

        assert!(!manager.should_rotate_at(t0 + ChronoDuration::minutes(59)));
        assert!(manager.should_rotate_at(t0 + ChronoDuration::minutes(61)));
        assert!(manager.rotate_if_due_at(t0 + ChronoDuration::minutes(30)).is_none());
        assert!(manager.rotate_if_due_at(t0 + ChronoDuration::minutes(61)).is_some());
    }

    #[test]
    fn test_issue_fills_expiry_jti_and_session() {
        let manager = manager();
        manager.initialize(None);
        let now = Utc::now();

        let token = manager
            .issue_at("u7", Duration::from_secs(900), Some("sess-1"), now)
            .unwrap();
        let claims = manager.verify_at(&token, now).unwrap();
        assert_eq!(claims.sub, "u7");
        assert_eq!(claims.exp, now.timestamp() + 900);
        assert_eq!(claims.sid.as_deref(), Some("sess-1"));
        assert!(!claims.jti.is_empty());
    }

    #[test]
    fn test_initialize_replaces_existing_secrets() {
        let manager = manager();
        manager.initialize(None);
        manager.rotate();
        assert_eq!(manager.secret_count(), 2);

        manager.initialize(None);
        assert_eq!(manager.secret_count(), 1);
    }

    #[test]
    fn test_new_rejects_lifetime_shorter_than_rotation() {
        let err = CredentialManager::new(CredentialConfig {
            rotation_interval: Duration::from_secs(7200),
            secret_lifetime: Duration::from_secs(3600),
            ..CredentialConfig::default()
        })
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
        assert!(err.to_string().contains("secret_lifetime"));

        let err = CredentialManager::new(CredentialConfig {
            rotation_interval: Duration::ZERO,
            ..CredentialConfig::default()
        })
        .unwrap_err();
        assert!(err.to_string().contains("rotation_interval"));
    }

    #[test]
    fn test_config_durations_are_human_readable() {
        let config: CredentialConfig = serde_json::from_str(
            r#"{"rotation_interval": "30m", "secret_lifetime": "2h", "algorithm": "HS384"}"#,
        )
        .unwrap();
        assert_eq!(config.rotation_interval, Duration::from_secs(1800));
        assert_eq!(config.algorithm, SigningAlgorithm::Hs384);

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["secret_lifetime"], "2h");

        let schema = serde_json::to_value(schemars::schema_for!(CredentialConfig)).unwrap();
        assert_eq!(schema["properties"]["rotation_interval"]["type"], "string");
    }
}
