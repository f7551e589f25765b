//! Signed OAuth State Blobs
//!
//! The authorization redirect carries an opaque `state` parameter that must
//! survive the round trip through the provider untouched. We encode the
//! initiating user and provider into it and sign it, so the callback can be
//! tied back to the user without server-side session state, and a forged or
//! replayed-late callback is rejected.
//!
//! Format: `base64url(claims_json) . base64url(hmac_sha256(secret, payload))`

use crate::error::{AuthError, Result};
use crate::types::{ProviderKind, UserId};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// How long a state blob stays valid after issuance
const STATE_TTL_SECS: i64 = 600;

#[derive(Debug, Serialize, Deserialize)]
struct StateClaims {
    user_id: String,
    provider: String,
    issued_at: i64,
}

fn sign(secret: &str, payload: &str) -> String {
    // HMAC-SHA256 takes keys of any length, so construction cannot fail
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
}

/// Encode a signed state blob binding `user_id` to an authorization attempt
/// against `provider`.
pub fn encode_state(secret: &str, user_id: UserId, provider: ProviderKind) -> String {
    let claims = StateClaims {
        user_id: user_id.to_string(),
        provider: provider.as_str().to_string(),
        issued_at: Utc::now().timestamp(),
    };
    // StateClaims cannot fail to serialize
    let json = serde_json::to_string(&claims).unwrap_or_default();
    let payload = URL_SAFE_NO_PAD.encode(json);
    let signature = sign(secret, &payload);
    format!("{}.{}", payload, signature)
}

/// Validate a state blob returned on the OAuth callback.
///
/// Rejects blobs with a bad signature, blobs older than the TTL, and blobs
/// issued for a different provider than the callback claims.
pub fn validate_state(secret: &str, blob: &str, expected: ProviderKind) -> Result<UserId> {
    let (payload, signature) = blob
        .split_once('.')
        .ok_or_else(|| AuthError::InvalidState("malformed blob".to_string()))?;

    if sign(secret, payload) != signature {
        return Err(AuthError::InvalidState("signature mismatch".to_string()));
    }

    let json = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AuthError::InvalidState("payload is not base64url".to_string()))?;
    let claims: StateClaims = serde_json::from_slice(&json)
        .map_err(|_| AuthError::InvalidState("payload is not valid claims".to_string()))?;

    let age = Utc::now().timestamp() - claims.issued_at;
    if age < 0 || age > STATE_TTL_SECS {
        return Err(AuthError::StateExpired);
    }

    if claims.provider != expected.as_str() {
        return Err(AuthError::StateProviderMismatch {
            expected: expected.as_str().to_string(),
            actual: claims.provider,
        });
    }

    UserId::from_string(&claims.user_id)
        .map_err(|_| AuthError::InvalidState("user id is not a UUID".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-signing-secret";

    #[test]
    fn test_round_trip() {
        let user = UserId::new();
        let blob = encode_state(SECRET, user, ProviderKind::Dropbox);
        let recovered = validate_state(SECRET, &blob, ProviderKind::Dropbox).unwrap();
        assert_eq!(recovered, user);
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let blob = encode_state(SECRET, UserId::new(), ProviderKind::Dropbox);
        let (payload, signature) = blob.split_once('.').unwrap();
        let mut bytes = URL_SAFE_NO_PAD.decode(payload).unwrap();
        bytes[0] ^= 0x01;
        let forged = format!("{}.{}", URL_SAFE_NO_PAD.encode(bytes), signature);
        assert!(matches!(
            validate_state(SECRET, &forged, ProviderKind::Dropbox),
            Err(AuthError::InvalidState(_))
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let blob = encode_state(SECRET, UserId::new(), ProviderKind::Dropbox);
        assert!(matches!(
            validate_state("other-secret", &blob, ProviderKind::Dropbox),
            Err(AuthError::InvalidState(_))
        ));
    }

    #[test]
    fn test_signature_is_keyed_mac_not_prefix_hash() {
        use sha2::Digest;
        let payload = URL_SAFE_NO_PAD.encode(b"{}");
        let mut hasher = Sha256::new();
        hasher.update(SECRET.as_bytes());
        hasher.update(b".");
        hasher.update(payload.as_bytes());
        let prefix_hash = URL_SAFE_NO_PAD.encode(hasher.finalize());
        assert_ne!(sign(SECRET, &payload), prefix_hash);
    }

    #[test]
    fn test_provider_mismatch_rejected() {
        let blob = encode_state(SECRET, UserId::new(), ProviderKind::Dropbox);
        assert!(matches!(
            validate_state(SECRET, &blob, ProviderKind::OneDrive),
            Err(AuthError::StateProviderMismatch { .. })
        ));
    }

    #[test]
    fn test_expired_blob_rejected() {
        // Hand-build a blob with an issued_at beyond the TTL
        let claims = StateClaims {
            user_id: UserId::new().to_string(),
            provider: "dropbox".to_string(),
            issued_at: Utc::now().timestamp() - STATE_TTL_SECS - 5,
        };
        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(&claims).unwrap());
        let blob = format!("{}.{}", payload, sign(SECRET, &payload));
        assert!(matches!(
            validate_state(SECRET, &blob, ProviderKind::Dropbox),
            Err(AuthError::StateExpired)
        ));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validate_state(SECRET, "not-a-state", ProviderKind::Dropbox).is_err());
        assert!(validate_state(SECRET, "a.b", ProviderKind::Dropbox).is_err());
    }
}
