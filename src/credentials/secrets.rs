//! Signing secrets and HMAC primitives.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha384, Sha512};
use std::fmt;

use crate::types::{Error, Result, SecretId};

/// HMAC algorithm used to sign credentials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum SigningAlgorithm {
    #[default]
    #[serde(rename = "HS256")]
    Hs256,
    #[serde(rename = "HS384")]
    Hs384,
    #[serde(rename = "HS512")]
    Hs512,
}

macro_rules! hmac_sign {
    ($digest:ty, $key:expr, $data:expr) => {{
        let mut mac = Hmac::<$digest>::new_from_slice($key)
            .map_err(|e| Error::internal(format!("hmac key rejected: {}", e)))?;
        mac.update($data);
        mac.finalize().into_bytes().to_vec()
    }};
}

macro_rules! hmac_verify {
    ($digest:ty, $key:expr, $data:expr, $signature:expr) => {{
        match Hmac::<$digest>::new_from_slice($key) {
            Ok(mut mac) => {
                mac.update($data);
                mac.verify_slice($signature).is_ok()
            }
            Err(_) => false,
        }
    }};
}

impl SigningAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            SigningAlgorithm::Hs256 => "HS256",
            SigningAlgorithm::Hs384 => "HS384",
            SigningAlgorithm::Hs512 => "HS512",
        }
    }

    /// Generated key length in bytes (the digest output size).
    pub fn key_len(self) -> usize {
        match self {
            SigningAlgorithm::Hs256 => 32,
            SigningAlgorithm::Hs384 => 48,
            SigningAlgorithm::Hs512 => 64,
        }
    }

    pub fn sign(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        Ok(match self {
            SigningAlgorithm::Hs256 => hmac_sign!(Sha256, key, data),
            SigningAlgorithm::Hs384 => hmac_sign!(Sha384, key, data),
            SigningAlgorithm::Hs512 => hmac_sign!(Sha512, key, data),
        })
    }

    /// Constant-time signature check.
    pub fn verify(self, key: &[u8], data: &[u8], signature: &[u8]) -> bool {
        match self {
            SigningAlgorithm::Hs256 => hmac_verify!(Sha256, key, data, signature),
            SigningAlgorithm::Hs384 => hmac_verify!(Sha384, key, data, signature),
            SigningAlgorithm::Hs512 => hmac_verify!(Sha512, key, data, signature),
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secret key material plus its lifecycle.
///
/// Inactive, non-expired secrets are kept only to verify credentials issued
/// before a rotation.
#[derive(Clone)]
pub struct SigningSecret {
    pub id: SecretId,
    material: Vec<u8>,
    pub algorithm: SigningAlgorithm,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}

impl SigningSecret {
    /// Fresh active secret with random material.
    pub fn generate(
        algorithm: SigningAlgorithm,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        let mut material = vec![0u8; algorithm.key_len()];
        OsRng.fill_bytes(&mut material);
        Self::from_material(material, algorithm, now, lifetime)
    }

    /// Active secret built from caller-provided material.
    pub fn from_material(
        material: Vec<u8>,
        algorithm: SigningAlgorithm,
        now: DateTime<Utc>,
        lifetime: chrono::Duration,
    ) -> Self {
        Self {
            id: SecretId::new(),
            material,
            algorithm,
            created_at: now,
            expires_at: now + lifetime,
            rotated_at: None,
            is_active: true,
        }
    }

    pub(crate) fn material(&self) -> &[u8] {
        &self.material
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Eligible for removal: retired and past its expiry.
    pub fn is_evictable_at(&self, now: DateTime<Utc>) -> bool {
        !self.is_active && self.is_expired_at(now)
    }

    pub fn metadata(&self) -> SecretMetadata {
        SecretMetadata {
            id: self.id.clone(),
            algorithm: self.algorithm,
            created_at: self.created_at,
            expires_at: self.expires_at,
            rotated_at: self.rotated_at,
            is_active: self.is_active,
        }
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningSecret")
            .field("id", &self.id)
            .field("material", &"<redacted>")
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("rotated_at", &self.rotated_at)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Exportable view of a secret. Never carries key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretMetadata {
    pub id: SecretId,
    pub algorithm: SigningAlgorithm,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_at: Option<DateTime<Utc>>,
    pub is_active: bool,
}
