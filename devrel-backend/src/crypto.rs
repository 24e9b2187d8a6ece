//! Secrets at rest, token hashing and password hashing
//!
//! Ciphertexts are stored as `v1:<base64 nonce>:<base64 ciphertext+tag>`.
//! API tokens are only ever persisted as their SHA-256 digest.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};

const NONCE_SIZE: usize = 12;
const CIPHERTEXT_VERSION: &str = "v1";

/// Prefix carried by every API token so leaked tokens are easy to spot
pub const API_TOKEN_PREFIX: &str = "dtk_";

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("malformed ciphertext")]
    Malformed,
    #[error("unsupported ciphertext version '{0}'")]
    UnsupportedVersion(String),
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed (wrong key or tampered data)")]
    Decrypt,
    #[error("password hashing failed: {0}")]
    Password(String),
}

/// AES-256-GCM cipher for secrets stored in the database
#[derive(Clone)]
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::Encrypt)?;

        Ok(format!(
            "{}:{}:{}",
            CIPHERTEXT_VERSION,
            BASE64.encode(nonce_bytes),
            BASE64.encode(ciphertext)
        ))
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CryptoError> {
        let mut parts = encoded.splitn(3, ':');
        let (version, nonce, ciphertext) = match (parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(n), Some(c)) => (v, n, c),
            _ => return Err(CryptoError::Malformed),
        };
        if version != CIPHERTEXT_VERSION {
            return Err(CryptoError::UnsupportedVersion(version.to_string()));
        }

        let nonce = BASE64.decode(nonce).map_err(|_| CryptoError::Malformed)?;
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Malformed);
        }
        let ciphertext = BASE64.decode(ciphertext).map_err(|_| CryptoError::Malformed)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext.as_ref())
            .map_err(|_| CryptoError::Decrypt)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
    }
}

/// Generate a new bearer token: prefix + 32 random bytes as hex
pub fn generate_api_token() -> String {
    format!("{}{}", API_TOKEN_PREFIX, random_hex(32))
}

/// Random opaque session token
pub fn generate_session_token() -> String {
    random_hex(32)
}

pub fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// SHA-256 hex digest used to look tokens up without storing them
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub fn hash_password(password: &str) -> Result<String, CryptoError> {
    let mut salt_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| CryptoError::Password(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CryptoError::Password(e.to_string()))
}

pub fn verify_password(password: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Verify a hex HMAC-SHA256 signature, accepting an optional `sha256=` prefix
pub fn verify_hmac_sha256(secret: &str, body: &[u8], signature: &str) -> bool {
    let signature = signature.trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature);
    let Ok(expected) = hex::decode(signature) else {
        return false;
    };

    let Ok(mut mac) = <Hmac<Sha256> as Mac>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
