//! Anonymous public-key encryption compatible with libsodium's `crypto_box_seal`,
//! which is what the platform expects for Actions secret values.
//!
//! A fresh ephemeral key pair is drawn for every call and discarded afterwards, so
//! two seals of the same plaintext never produce the same bytes. Only the holder of
//! the repository's private key can open the result.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use crypto_box::{aead::OsRng, PublicKey};

use crate::error::EncryptionError;

pub const KEY_LEN: usize = 32;

pub fn seal(public_key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, EncryptionError> {
    let key: [u8; KEY_LEN] = public_key
        .try_into()
        .map_err(|_| EncryptionError::InvalidKeyLength(public_key.len()))?;

    PublicKey::from(key)
        .seal(&mut OsRng, plaintext)
        .map_err(|_| EncryptionError::Seal)
}

/// Seal against a base64 public key as returned by the platform and encode the
/// ciphertext the way the platform stores it.
pub fn seal_base64(public_key: &str, plaintext: &[u8]) -> Result<String, EncryptionError> {
    let key = STANDARD
        .decode(public_key.trim())
        .map_err(|e| EncryptionError::InvalidKeyEncoding(e.to_string()))?;

    Ok(STANDARD.encode(seal(&key, plaintext)?))
}
