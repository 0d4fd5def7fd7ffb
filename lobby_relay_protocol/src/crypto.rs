// Handshake encryption.
//
// The handshake body is sealed with AES-256-GCM under the user's long-term
// symmetric key, with the 96-bit nonce carried in the clear in the frame and
// no associated data. Successful decryption is the only proof that the
// sender holds the user's key. Stored keys travel base64-encoded (standard
// alphabet, with padding); `decode_key` turns that into raw key bytes.
//
// Relayed payloads are never touched by this module.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::framing::NONCE_SIZE;

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("key is not valid base64")]
    KeyEncoding,
    #[error("key has wrong length: {0} bytes (expected {KEY_SIZE})")]
    KeyLength(usize),
    #[error("authenticated encryption failed")]
    Seal,
    #[error("authenticated decryption failed")]
    Open,
}

/// Decode a base64 key into raw AES-256 key bytes.
pub fn decode_key(encoded: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let raw = STANDARD
        .decode(encoded.trim())
        .map_err(|_| CryptoError::KeyEncoding)?;
    <[u8; KEY_SIZE]>::try_from(raw.as_slice()).map_err(|_| CryptoError::KeyLength(raw.len()))
}

/// Encode raw key bytes the way credential stores hold them.
pub fn encode_key(key: &[u8; KEY_SIZE]) -> String {
    STANDARD.encode(key)
}

/// Encrypt `plaintext`; the result is ciphertext followed by the GCM tag.
pub fn seal(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Seal)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptoError::Seal)
}

/// Verify and decrypt `ciphertext` (tag included).
pub fn open(
    key: &[u8; KEY_SIZE],
    nonce: &[u8; NONCE_SIZE],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CryptoError::Open)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Open)
}
