//! Password-sealed envelopes.
//!
//! Key: PBKDF2-HMAC-SHA256, 250 000 rounds, over the password and a random
//! 16-byte salt. Cipher: AES-256-GCM with a random 12-byte nonce.
//!
//! Wire format (standard base64 with padding):
//!   [ salt (16 bytes) | nonce (12 bytes) | ciphertext + tag (16 bytes) ]
//!
//! Everything needed to open an envelope except the password travels inside it.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;
pub const PBKDF2_ROUNDS: u32 = 250_000;
const KEY_LEN: usize = 32;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope encryption failed")]
    Encryption,

    /// Wrong password, truncated or tampered blob. Deliberately opaque.
    #[error("could not decrypt secret")]
    Decryption,
}

/// Encrypt `plaintext` under a key derived from `password`.
/// Every call draws a fresh salt and nonce.
pub fn seal(plaintext: &str, password: &str) -> Result<String, EnvelopeError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut salt);
    OsRng.fill_bytes(&mut nonce);

    let key = derive_key(password, &salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| EnvelopeError::Encryption)?;

    let mut out = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(out))
}

/// Reverse `seal`. Any failure, including a malformed blob, is reported as
/// `EnvelopeError::Decryption`.
pub fn open(blob: &str, password: &str) -> Result<Zeroizing<String>, EnvelopeError> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|_| EnvelopeError::Decryption)?;
    if bytes.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(EnvelopeError::Decryption);
    }
    let (salt, rest) = bytes.split_at(SALT_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);

    let key = derive_key(password, salt);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EnvelopeError::Decryption)?,
    );

    let text = std::str::from_utf8(&plaintext).map_err(|_| EnvelopeError::Decryption)?;
    Ok(Zeroizing::new(text.to_owned()))
}

fn derive_key(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, key.as_mut_slice());
    key
}
