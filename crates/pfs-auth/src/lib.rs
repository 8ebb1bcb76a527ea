#![forbid(unsafe_code)]
//! Credential verification and session tokens.
//!
//! Stored passwords come in three forms, selected by prefix:
//!
//! - `argon2id:` followed by a PHC string
//!   (`$argon2id$v=V$m=M,t=T,p=P$salt$hash`, raw-standard base64): the hash
//!   is recomputed over the presented password with the encoded parameters
//!   and compared in constant time.
//! - `sha256:` followed by the lowercase hex digest.
//! - anything else is compared as plaintext, retained for operator
//!   convenience.
//!
//! SSH public keys verify by parsing each stored authorized-key line and
//! comparing wire-form key data with the presented key.

use argon2::{Algorithm, Argon2, Params, Version};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

mod token;

pub use token::TokenSigner;

// Re-exported so callers name key types without a direct dependency.
pub use ssh_key;

/// Errors from the login gate. `NotAuthorized` maps to "ask for credentials
/// again"; `PermissionDenied` to "this principal may not enter at all".
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

const ARGON2ID_PREFIX: &str = "argon2id:";
const SHA256_PREFIX: &str = "sha256:";

/// Verify a presented password against its stored form.
#[must_use]
pub fn verify_password(stored: &str, presented: &str) -> bool {
    if let Some(encoded) = stored.strip_prefix(ARGON2ID_PREFIX) {
        return verify_argon2id(encoded, presented);
    }
    if let Some(expected_hex) = stored.strip_prefix(SHA256_PREFIX) {
        let digest = Sha256::digest(presented.as_bytes());
        let actual_hex = hex::encode(digest);
        return actual_hex.as_bytes().ct_eq(expected_hex.as_bytes()).into();
    }
    stored == presented
}

/// Recompute Argon2id with the parameters carried in the PHC string. Any
/// malformed field fails closed.
fn verify_argon2id(encoded: &str, password: &str) -> bool {
    let fields: Vec<&str> = encoded.split('$').collect();
    // ["", "argon2id", "v=19", "m=..,t=..,p=..", salt, hash]
    if fields.len() != 6 || fields[1] != "argon2id" {
        return false;
    }
    let Some(version) = fields[2]
        .strip_prefix("v=")
        .and_then(|raw| raw.parse::<u32>().ok())
        .and_then(|raw| Version::try_from(raw).ok())
    else {
        return false;
    };
    let Some((memory, iterations, parallelism)) = parse_params(fields[3]) else {
        return false;
    };
    let Some(salt) = decode_b64(fields[4]) else {
        return false;
    };
    let Some(expected) = decode_b64(fields[5]) else {
        return false;
    };
    let Ok(params) = Params::new(memory, iterations, parallelism, Some(expected.len())) else {
        return false;
    };
    let argon = Argon2::new(Algorithm::Argon2id, version, params);
    let mut actual = vec![0u8; expected.len()];
    if argon
        .hash_password_into(password.as_bytes(), &salt, &mut actual)
        .is_err()
    {
        return false;
    }
    actual.ct_eq(&expected).into()
}

fn parse_params(field: &str) -> Option<(u32, u32, u32)> {
    let mut memory = None;
    let mut iterations = None;
    let mut parallelism = None;
    for part in field.split(',') {
        let (key, value) = part.split_once('=')?;
        let value = value.parse::<u32>().ok()?;
        match key {
            "m" => memory = Some(value),
            "t" => iterations = Some(value),
            "p" => parallelism = Some(value),
            _ => return None,
        }
    }
    Some((memory?, iterations?, parallelism?))
}

fn decode_b64(field: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine as _;
    STANDARD_NO_PAD.decode(field).ok()
}

/// Produce a stored-form Argon2id credential for a new password, using the
/// recommended interactive-login parameters (m=65536, t=3, p=4).
#[must_use]
pub fn hash_password_argon2id(password: &str) -> String {
    use base64::engine::general_purpose::STANDARD_NO_PAD;
    use base64::Engine as _;
    use rand::RngCore;

    let mut salt = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt);
    let params = Params::new(65536, 3, 4, Some(32)).expect("fixed argon2 parameters");
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut hash = [0u8; 32];
    argon
        .hash_password_into(password.as_bytes(), &salt, &mut hash)
        .expect("argon2 with fixed parameters");
    format!(
        "argon2id:$argon2id$v={}$m=65536,t=3,p=4${}${}",
        Version::V0x13 as u32,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(hash)
    )
}

/// Produce a stored-form SHA-256 credential.
#[must_use]
pub fn hash_password_sha256(password: &str) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(password.as_bytes())))
}

/// Parse one authorized-key line, rejecting garbage early.
pub fn parse_authorized_key(line: &str) -> Result<ssh_key::PublicKey> {
    ssh_key::PublicKey::from_openssh(line.trim())
        .map_err(|err| AuthError::NotAuthorized(format!("invalid public key: {err}")))
}

/// True when `presented` matches any stored authorized-key line. Stored
/// lines that fail to parse abort verification, matching the behavior of
/// the config validator that should have rejected them.
pub fn verify_public_key(stored: &[String], presented: &ssh_key::PublicKey) -> Result<bool> {
    for line in stored {
        let key = parse_authorized_key(line)?;
        if key.key_data() == presented.key_data() {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plaintext_comparison() {
        assert!(verify_password("password", "password"));
        assert!(!verify_password("password", "wrong"));
    }

    #[test]
    fn sha256_comparison() {
        // echo -n "password" | sha256sum
        let stored = "sha256:5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8";
        assert!(verify_password(stored, "password"));
        assert!(!verify_password(stored, "wrong"));
    }

    #[test]
    fn argon2id_known_vector() {
        // argon2.IDKey([]byte("password"), []byte("saltsalt"), t=2, m=16, p=1, 16)
        use base64::engine::general_purpose::STANDARD_NO_PAD;
        use base64::Engine as _;

        let params = Params::new(16, 2, 1, Some(16)).unwrap();
        let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let mut hash = [0u8; 16];
        argon
            .hash_password_into(b"password", b"saltsalt", &mut hash)
            .unwrap();
        let stored = format!(
            "argon2id:$argon2id$v=19$m=16,t=2,p=1${}${}",
            STANDARD_NO_PAD.encode(b"saltsalt"),
            STANDARD_NO_PAD.encode(hash)
        );

        assert!(verify_password(&stored, "password"));
        assert!(!verify_password(&stored, "wrong"));
    }

    #[test]
    fn malformed_argon2id_fails_closed() {
        assert!(!verify_password("argon2id:invalid", "password"));
        assert!(!verify_password("argon2id:$argon2id$v=19$m=16$x$y", "password"));
        assert!(!verify_password(
            "argon2id:$argon2id$v=19$m=16,t=2,p=1$!!!$!!!",
            "password"
        ));
    }

    #[test]
    fn generated_hashes_verify() {
        let argon = hash_password_argon2id("hunter2");
        assert!(argon.starts_with("argon2id:$argon2id$v=19$"));
        assert!(verify_password(&argon, "hunter2"));
        assert!(!verify_password(&argon, "hunter3"));

        let sha = hash_password_sha256("hunter2");
        assert!(verify_password(&sha, "hunter2"));
        assert!(!verify_password(&sha, "hunter3"));
    }

    #[test]
    fn public_key_matching() {
        let ed25519 = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIFRNSVWXuZVMNO7L14V/eGVKKiTS0JkIZGPko5W9ht+V test@example";
        let other = "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIIJFz2M4mFk9lKfvzrGg9739QX9rFFqbBraf9lgVlkYr other@example";

        let presented = parse_authorized_key(ed25519).unwrap();
        assert!(verify_public_key(&[ed25519.to_owned()], &presented).unwrap());
        // comments are ignored; only key data matters
        let same_key_new_comment = ed25519.replace("test@example", "renamed@example");
        assert!(verify_public_key(&[same_key_new_comment], &presented).unwrap());
        assert!(!verify_public_key(&[other.to_owned()], &presented).unwrap());
        assert!(verify_public_key(&["not a key".to_owned()], &presented).is_err());
    }
}
