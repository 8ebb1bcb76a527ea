//! Signed session tokens.
//!
//! Format: `base64url(user).unix-seconds.base64url(sha256(data || secret))`.
//! The secret is generated per process, so tokens do not survive restarts.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{AuthError, Result};

const TOKEN_TTL: Duration = Duration::from_secs(86_400 * 7);

pub struct TokenSigner {
    secret: [u8; 32],
}

impl Default for TokenSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSigner {
    /// A signer with a fresh random secret.
    #[must_use]
    pub fn new() -> Self {
        use rand::RngCore;
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    fn signature(&self, data: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(data.as_bytes());
        hasher.update(self.secret);
        URL_SAFE_NO_PAD.encode(hasher.finalize())
    }

    #[must_use]
    pub fn sign(&self, user: &str) -> String {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        let data = format!("{}.{timestamp}", URL_SAFE_NO_PAD.encode(user));
        let signature = self.signature(&data);
        format!("{data}.{signature}")
    }

    /// Verify a token and return the user it names. The signature check is
    /// constant-time; expired and malformed tokens are rejected.
    pub fn verify(&self, token: &str) -> Result<String> {
        let parts: Vec<&str> = token.split('.').collect();
        let [user_b64, timestamp_raw, signature] = parts.as_slice() else {
            return Err(AuthError::NotAuthorized("invalid token format".to_owned()));
        };
        let user_bytes = URL_SAFE_NO_PAD
            .decode(*user_b64)
            .map_err(|_| AuthError::NotAuthorized("invalid user encoding".to_owned()))?;
        let user = String::from_utf8(user_bytes)
            .map_err(|_| AuthError::NotAuthorized("invalid user encoding".to_owned()))?;
        let timestamp: u64 = timestamp_raw
            .parse()
            .map_err(|_| AuthError::NotAuthorized("invalid timestamp".to_owned()))?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        if now.saturating_sub(timestamp) > TOKEN_TTL.as_secs() {
            return Err(AuthError::NotAuthorized("token expired".to_owned()));
        }

        let data = format!("{user_b64}.{timestamp_raw}");
        let expected = self.signature(&data);
        let matches: bool = expected.as_bytes().ct_eq(signature.as_bytes()).into();
        if !matches {
            return Err(AuthError::NotAuthorized("invalid signature".to_owned()));
        }
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_round_trip() {
        let signer = TokenSigner::new();
        let token = signer.sign("alice");
        assert_eq!(signer.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn tampered_and_malformed_tokens_fail() {
        let signer = TokenSigner::new();
        let token = signer.sign("alice");
        assert!(signer.verify(&format!("{token}added")).is_err());
        assert!(signer.verify("invalid.token.parts").is_err());
        assert!(signer.verify("nodots").is_err());

        // another signer's token does not verify
        let other = TokenSigner::new();
        assert!(other.verify(&token).is_err());
    }

    #[test]
    fn forged_timestamp_invalidates_signature() {
        let signer = TokenSigner::new();
        let token = signer.sign("alice");
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = "0";
        assert!(signer.verify(&parts.join(".")).is_err());
    }
}
