//! Three-segment credential wire format.
//!
//! `base64url(header) . base64url(payload) . base64url(hmac(header.payload))`,
//! all segments unpadded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::secrets::{SigningAlgorithm, SigningSecret};
use crate::types::{CredentialError, Result, SecretId};

pub const TOKEN_TYPE: &str = "JWT";

/// Token header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    pub alg: SigningAlgorithm,
    pub typ: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<SecretId>,
}

/// Session credential claims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    /// Issued-at, unix seconds. Stamped at signing.
    #[serde(default)]
    pub iat: i64,
    /// Expiry, unix seconds.
    pub exp: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Signing secret id. Stamped at signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<SecretId>,
    /// Application-defined claims.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Claims {
    pub fn new(sub: impl Into<String>, exp: i64, jti: impl Into<String>) -> Self {
        Self {
            sub: sub.into(),
            iat: 0,
            exp,
            jti: jti.into(),
            sid: None,
            kid: None,
            extra: Map::new(),
        }
    }

    pub fn with_session(mut self, sid: impl Into<String>) -> Self {
        self.sid = Some(sid.into());
        self
    }

    pub fn with_claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extra.insert(name.into(), value);
        self
    }
}

/// Decoded but unverified token.
#[derive(Debug, Clone)]
pub(crate) struct DecodedToken {
    pub header: TokenHeader,
    pub claims: Claims,
    pub signing_input: String,
    /// `None` when the segment is not valid base64url; such a token can never verify.
    pub signature: Option<Vec<u8>>,
}

impl DecodedToken {
    pub fn verifies_with(&self, secret: &SigningSecret) -> bool {
        match &self.signature {
            Some(signature) => {
                self.header.alg == secret.algorithm
                    && secret.algorithm.verify(
                        secret.material(),
                        self.signing_input.as_bytes(),
                        signature,
                    )
            }
            None => false,
        }
    }
}

pub(crate) fn encode(header: &TokenHeader, claims: &Claims, secret: &SigningSecret) -> Result<String> {
    let header_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?);
    let payload_segment = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}.{}", header_segment, payload_segment);
    let signature = secret
        .algorithm
        .sign(secret.material(), signing_input.as_bytes())?;
    Ok(format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature)
    ))
}

pub(crate) fn decode(token: &str) -> std::result::Result<DecodedToken, CredentialError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return Err(CredentialError::InvalidFormat(
            "expected three non-empty segments".to_string(),
        ));
    }

    let header: TokenHeader = decode_segment(parts[0], "header")?;
    let claims: Claims = decode_segment(parts[1], "payload")?;

    Ok(DecodedToken {
        header,
        claims,
        signing_input: format!("{}.{}", parts[0], parts[1]),
        signature: URL_SAFE_NO_PAD.decode(parts[2]).ok(),
    })
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &str,
    name: &str,
) -> std::result::Result<T, CredentialError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| CredentialError::InvalidFormat(format!("{} is not base64url: {}", name, e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CredentialError::InvalidFormat(format!("{} is not valid JSON: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn secret() -> SigningSecret {
        SigningSecret::from_material(
            b"token-test-key".to_vec(),
            SigningAlgorithm::Hs256,
            Utc::now(),
            chrono::Duration::hours(1),
        )
    }

    fn header(secret: &SigningSecret) -> TokenHeader {
        TokenHeader {
            alg: secret.algorithm,
            typ: TOKEN_TYPE.to_string(),
            kid: Some(secret.id.clone()),
        }
    }

    #[test]
    fn test_encoded_token_has_unpadded_segments() {
        let secret = secret();
        let claims = Claims::new("u1", 4_102_444_800, "jti-1").with_claim("role", json!("admin"));
        let token = encode(&header(&secret), &claims, &secret).unwrap();

        let segments: Vec<&str> = token.split('.').collect();
        assert_eq!(segments.len(), 3);
        assert!(!token.contains('='));
        assert!(!token.contains('+') && !token.contains('/'));

        let header_json: Value =
            serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segments[0]).unwrap()).unwrap();
        assert_eq!(header_json["alg"], "HS256");
        assert_eq!(header_json["typ"], "JWT");
        assert_eq!(header_json["kid"], secret.id.as_str());
    }

    #[test]
    fn test_decode_recovers_claims_and_extra_fields() {
        let secret = secret();
        let claims = Claims::new("u1", 4_102_444_800, "jti-1")
            .with_session("sess-9")
            .with_claim("role", json!("admin"));
        let token = encode(&header(&secret), &claims, &secret).unwrap();

        let decoded = decode(&token).unwrap();
        assert_eq!(decoded.claims, claims);
        assert!(decoded.verifies_with(&secret));
    }

    #[test]
    fn test_decode_rejects_missing_segments() {
        for bad in ["", "a.b", "a..c", "a.b.c.d", ".b.c"] {
            assert!(matches!(
                decode(bad),
                Err(CredentialError::InvalidFormat(_))
            ));
        }
    }

    #[test]
    fn test_decode_rejects_non_json_header() {
        let garbage = URL_SAFE_NO_PAD.encode(b"not json");
        let token = format!("{}.{}.sig", garbage, garbage);
        match decode(&token) {
            Err(CredentialError::InvalidFormat(msg)) => assert!(msg.contains("header")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_undecodable_signature_never_verifies() {
        let secret = secret();
        let token = encode(&header(&secret), &Claims::new("u1", 1, "j"), &secret).unwrap();
        let (input, _) = token.rsplit_once('.').unwrap();
        let decoded = decode(&format!("{}.%%%", input)).unwrap();
        assert!(decoded.signature.is_none());
        assert!(!decoded.verifies_with(&secret));
    }

    #[test]
    fn test_algorithm_mismatch_never_verifies() {
        let secret = secret();
        let mut hdr = header(&secret);
        let token = encode(&hdr, &Claims::new("u1", 1, "j"), &secret).unwrap();
        let mut decoded = decode(&token).unwrap();
        hdr.alg = SigningAlgorithm::Hs512;
        decoded.header = hdr;
        assert!(!decoded.verifies_with(&secret));
    }
}
