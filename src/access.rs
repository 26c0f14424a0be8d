//! Access tokens and the gated resource catalog.
//!
//! A token is `base64url(claims) "." mac`, where `mac` is the keyed digest of
//! the canonical claims `{sessionId, chainHash, trustScore, issuedAt,
//! expiresAt}` under the server token secret. Verifying a token recomputes the
//! MAC and checks expiry; there is no revocation list.

use crate::error::AccessError;
use crate::hashing::keyed_digest;
use crate::state::ClientState;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::info;

/// Lifetime of an access token.
pub const ACCESS_TOKEN_TTL_MS: u64 = 5 * 60 * 1000;
/// Threshold for gated resources without a tier.
pub const DEFAULT_TRUST_THRESHOLD: u32 = 50;
/// Threshold of the advanced tier.
pub const ADVANCED_TRUST_THRESHOLD: u32 = 60;
/// Threshold of the supreme tier.
pub const SUPREME_TRUST_THRESHOLD: u32 = 70;
/// Threshold of the legendary tier.
pub const LEGENDARY_TRUST_THRESHOLD: u32 = 80;

/// Claims bound into an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// Session the token was issued to.
    pub session_id: String,
    /// Client chain head at issue time.
    pub chain_hash: String,
    /// Trust score at issue time.
    pub trust_score: u32,
    /// Issue time in milliseconds since the Unix epoch.
    pub issued_at: u64,
    /// Expiry in milliseconds since the Unix epoch.
    pub expires_at: u64,
}

impl TokenClaims {
    fn canonical(&self) -> String {
        json!({
            "sessionId": self.session_id,
            "chainHash": self.chain_hash,
            "trustScore": self.trust_score,
            "issuedAt": self.issued_at,
            "expiresAt": self.expires_at,
        })
        .to_string()
    }
}

/// Issues and checks access tokens under one secret.
#[derive(Debug, Clone)]
pub struct TokenAuthority {
    secret: String,
    ttl_ms: u64,
}

impl TokenAuthority {
    /// Authority signing with `secret`; tokens live for `ttl_ms`.
    pub fn new(secret: impl Into<String>, ttl_ms: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_ms,
        }
    }

    /// Issues a token for `state` as of `now`.
    pub fn issue(&self, state: &ClientState, now: u64) -> (String, TokenClaims) {
        let claims = TokenClaims {
            session_id: state.client_id.clone(),
            chain_hash: state.last_chain_hash.clone(),
            trust_score: state.trust_score,
            issued_at: now,
            expires_at: now.saturating_add(self.ttl_ms),
        };
        let canonical = claims.canonical();
        let mac = keyed_digest(&canonical, &self.secret);
        info!(session = %claims.session_id, expires_at = claims.expires_at, "issued access token");
        (format!("{}.{mac}", BASE64.encode(canonical)), claims)
    }

    /// Checks the MAC and expiry of `token`.
    pub fn verify(&self, token: &str, now: u64) -> Result<TokenClaims, AccessError> {
        let (encoded, mac) = token.split_once('.').ok_or(AccessError::InvalidToken)?;
        let raw = BASE64
            .decode(encoded)
            .map_err(|_| AccessError::InvalidToken)?;
        let claims: TokenClaims =
            serde_json::from_slice(&raw).map_err(|_| AccessError::InvalidToken)?;
        if keyed_digest(&claims.canonical(), &self.secret) != mac {
            return Err(AccessError::InvalidToken);
        }
        if now > claims.expires_at {
            return Err(AccessError::TokenExpired);
        }
        Ok(claims)
    }
}

/// A catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct GatedResource {
    /// Resource identifier.
    pub id: String,
    /// Minimum trust score, or `None` for an ungated resource.
    pub min_trust: Option<u32>,
    /// Payload delivered on grant.
    pub data: Value,
}

/// A grant produced by [`ResourceCatalog::authorize`].
#[derive(Debug, Clone, PartialEq)]
pub struct Grant<'a> {
    /// Granted resource.
    pub resource: &'a GatedResource,
    /// Expiry of the authorising token, for gated resources.
    pub valid_until: Option<u64>,
}

/// Fixed catalog of resources and their trust thresholds.
#[derive(Debug, Clone, Default)]
pub struct ResourceCatalog {
    resources: HashMap<String, GatedResource>,
}

impl ResourceCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference catalog: one public entry plus one entry per trust tier.
    pub fn reference() -> Self {
        let mut catalog = Self::new();
        catalog.insert("public.status", None, json!({"status": "ok"}));
        for (id, threshold) in [
            ("tier.standard", DEFAULT_TRUST_THRESHOLD),
            ("tier.advanced", ADVANCED_TRUST_THRESHOLD),
            ("tier.supreme", SUPREME_TRUST_THRESHOLD),
            ("tier.legendary", LEGENDARY_TRUST_THRESHOLD),
        ] {
            catalog.insert(id, Some(threshold), json!({"tier": id, "minTrust": threshold}));
        }
        catalog
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, id: &str, min_trust: Option<u32>, data: Value) {
        self.resources.insert(
            id.to_string(),
            GatedResource {
                id: id.to_string(),
                min_trust,
                data,
            },
        );
    }

    /// Looks up an entry.
    pub fn get(&self, id: &str) -> Option<&GatedResource> {
        self.resources.get(id)
    }

    /// Decides a resource request.
    ///
    /// Ungated resources are always granted. Gated ones need a valid token
    /// issued to `session_id` and a current trust score at or above the
    /// resource threshold.
    pub fn authorize(
        &self,
        tokens: &TokenAuthority,
        resource_id: &str,
        session_id: &str,
        access_token: &str,
        trust_score: u32,
        now: u64,
    ) -> Result<Grant<'_>, AccessError> {
        let resource = self
            .get(resource_id)
            .ok_or_else(|| AccessError::UnknownResource(resource_id.to_string()))?;
        let Some(required) = resource.min_trust else {
            return Ok(Grant {
                resource,
                valid_until: None,
            });
        };
        let claims = tokens.verify(access_token, now)?;
        if claims.session_id != session_id {
            return Err(AccessError::SessionMismatch);
        }
        if trust_score < required {
            return Err(AccessError::InsufficientTrust {
                required,
                actual: trust_score,
            });
        }
        Ok(Grant {
            resource,
            valid_until: Some(claims.expires_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(trust: u32) -> ClientState {
        ClientState::with_trust("session-1", "1.0.0", trust)
    }

    #[test]
    fn token_round_trip() {
        let authority = TokenAuthority::new("secret", ACCESS_TOKEN_TTL_MS);
        let (token, claims) = authority.issue(&state(55), 1_000);
        assert_eq!(claims.expires_at, 1_000 + ACCESS_TOKEN_TTL_MS);
        assert_eq!(authority.verify(&token, 2_000), Ok(claims));
    }

    #[test]
    fn token_expires() {
        let authority = TokenAuthority::new("secret", 10);
        let (token, _) = authority.issue(&state(55), 100);
        assert!(authority.verify(&token, 110).is_ok());
        assert_eq!(authority.verify(&token, 111), Err(AccessError::TokenExpired));
    }

    #[test]
    fn forged_claims_are_rejected() {
        let authority = TokenAuthority::new("secret", ACCESS_TOKEN_TTL_MS);
        let (token, claims) = authority.issue(&state(55), 0);
        let (_, mac) = token.split_once('.').unwrap();
        let mut boosted = claims;
        boosted.trust_score = 100;
        let forged = format!("{}.{mac}", BASE64.encode(boosted.canonical()));
        assert_eq!(authority.verify(&forged, 1), Err(AccessError::InvalidToken));
        assert_eq!(authority.verify("garbage", 1), Err(AccessError::InvalidToken));
        let other = TokenAuthority::new("other", ACCESS_TOKEN_TTL_MS);
        assert_eq!(other.verify(&token, 1), Err(AccessError::InvalidToken));
    }

    #[test]
    fn thresholds_gate_tiers() {
        let authority = TokenAuthority::new("secret", ACCESS_TOKEN_TTL_MS);
        let catalog = ResourceCatalog::reference();
        let (token, _) = authority.issue(&state(65), 0);
        let grant = catalog
            .authorize(&authority, "tier.advanced", "session-1", &token, 65, 1)
            .unwrap();
        assert_eq!(grant.resource.id, "tier.advanced");
        assert_eq!(grant.valid_until, Some(ACCESS_TOKEN_TTL_MS));
        let err = catalog
            .authorize(&authority, "tier.supreme", "session-1", &token, 65, 1)
            .unwrap_err();
        assert_eq!(
            err,
            AccessError::InsufficientTrust {
                required: SUPREME_TRUST_THRESHOLD,
                actual: 65
            }
        );
        assert!(err.to_string().contains("complete more challenges"));
    }

    #[test]
    fn ungated_needs_no_token() {
        let authority = TokenAuthority::new("secret", ACCESS_TOKEN_TTL_MS);
        let catalog = ResourceCatalog::reference();
        let grant = catalog
            .authorize(&authority, "public.status", "anyone", "", 0, 0)
            .unwrap();
        assert_eq!(grant.valid_until, None);
    }

    #[test]
    fn token_is_bound_to_session() {
        let authority = TokenAuthority::new("secret", ACCESS_TOKEN_TTL_MS);
        let catalog = ResourceCatalog::reference();
        let (token, _) = authority.issue(&state(90), 0);
        assert_eq!(
            catalog.authorize(&authority, "tier.standard", "session-2", &token, 90, 1),
            Err(AccessError::SessionMismatch)
        );
        assert_eq!(
            catalog.authorize(&authority, "tier.unknown", "session-1", &token, 90, 1),
            Err(AccessError::UnknownResource("tier.unknown".to_string()))
        );
    }
}
