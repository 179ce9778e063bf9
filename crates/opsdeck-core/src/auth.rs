// ── Identity verification ──
//
// Duplex endpoints take a bearer token in the query string. The
// authentication layer is a collaborator: it either vouches for an
// identity or it doesn't. `JwtVerifier` is the HS256 implementation.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CoreError;
use crate::model::Identity;

/// Turns an opaque token into a verified identity.
pub trait IdentityVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Option<Identity>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Username.
    sub: String,
    /// Numeric user id.
    uid: u64,
    /// Expiry, seconds since the epoch.
    exp: i64,
}

/// HS256 JSON Web Token verifier and issuer.
pub struct JwtVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &SecretString) -> Self {
        let bytes = secret.expose_secret().as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding: EncodingKey::from_secret(bytes),
            decoding: DecodingKey::from_secret(bytes),
            validation,
        }
    }

    /// Mint a token for `identity`, valid for `ttl`.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, CoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| CoreError::Config { message: format!("token TTL out of range: {e}") })?;
        let claims = Claims {
            sub: identity.username.clone(),
            uid: identity.user_id,
            exp: (Utc::now() + ttl).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| CoreError::Internal(format!("failed to sign token: {e}")))
    }
}

impl IdentityVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Option<Identity> {
        match decode::<Claims>(token, &self.decoding, &self.validation) {
            Ok(data) => Some(Identity {
                user_id: data.claims.uid,
                username: data.claims.sub,
            }),
            Err(e) => {
                debug!(error = %e, "rejected identity token");
                None
            }
        }
    }
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier").finish_non_exhaustive()
    }
}
