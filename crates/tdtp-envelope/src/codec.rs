//! Envelope encryption codec (§3.6/§4.7): AES-256-GCM over
//! `[2B version=0x0100][1B algo=0x01][16B packageUUID][12B nonce][ciphertext‖16B tag]`.
//! The version+algo bytes double as the `0x01 0x00 0x01` magic prefix (§6).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use tdtp_core::error::{Result, TdtpError};
use uuid::Uuid;

const SUBSYSTEM: &str = "envelope";

const VERSION: [u8; 2] = [0x01, 0x00];
const ALGO_AES_256_GCM: u8 = 0x01;
const UUID_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const HEADER_LEN: usize = VERSION.len() + 1 + UUID_LEN + NONCE_LEN;

pub type EnvelopeKey = [u8; 32];

/// Encrypts `plaintext` under `key`, binding `package_uuid` into the header
/// (not the AEAD associated data — the UUID must be readable without the
/// key, per §4.7's `ExtractUUID`). A fresh nonce is drawn per call.
pub fn encrypt(key: &EnvelopeKey, plaintext: &[u8], package_uuid: Uuid) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| TdtpError::integrity(SUBSYSTEM, format!("encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    blob.extend_from_slice(&VERSION);
    blob.push(ALGO_AES_256_GCM);
    blob.extend_from_slice(package_uuid.as_bytes());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypts a blob produced by [`encrypt`]. AEAD authentication failure is
/// the single "invalid-or-tampered" error (§4.7); no lower-level detail is
/// surfaced, by construction of AES-GCM.
pub fn decrypt(key: &EnvelopeKey, blob: &[u8]) -> Result<(Uuid, Vec<u8>)> {
    let (uuid, nonce, ciphertext) = parse_header(blob)?;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| TdtpError::integrity(SUBSYSTEM, "envelope is invalid or tampered"))?;
    Ok((uuid, plaintext))
}

/// Reads the package UUID from the header without needing the key.
pub fn extract_uuid(blob: &[u8]) -> Result<Uuid> {
    let (uuid, _, _) = parse_header(blob)?;
    Ok(uuid)
}

fn parse_header(blob: &[u8]) -> Result<(Uuid, &[u8], &[u8])> {
    if blob.len() < HEADER_LEN {
        return Err(TdtpError::validation(SUBSYSTEM, "envelope blob shorter than its fixed header"));
    }
    if blob[0..2] != VERSION {
        return Err(TdtpError::validation(SUBSYSTEM, "unrecognized envelope version"));
    }
    if blob[2] != ALGO_AES_256_GCM {
        return Err(TdtpError::validation(SUBSYSTEM, "unrecognized envelope algorithm"));
    }

    let uuid_bytes: [u8; UUID_LEN] = blob[3..3 + UUID_LEN].try_into().expect("slice length checked above");
    let uuid = Uuid::from_bytes(uuid_bytes);
    let nonce = &blob[3 + UUID_LEN..HEADER_LEN];
    let ciphertext = &blob[HEADER_LEN..];
    Ok((uuid, nonce, ciphertext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> EnvelopeKey {
        [7u8; 32]
    }

    #[test]
    fn round_trips_plaintext_and_uuid() {
        let key = test_key();
        let uuid = Uuid::new_v4();
        let blob = encrypt(&key, b"hello tdtp", uuid).unwrap();
        let (decoded_uuid, plaintext) = decrypt(&key, &blob).unwrap();
        assert_eq!(decoded_uuid, uuid);
        assert_eq!(plaintext, b"hello tdtp");
    }

    #[test]
    fn extract_uuid_does_not_need_the_key() {
        let key = test_key();
        let uuid = Uuid::new_v4();
        let blob = encrypt(&key, b"payload", uuid).unwrap();
        assert_eq!(extract_uuid(&blob).unwrap(), uuid);
    }

    #[test]
    fn same_plaintext_twice_yields_different_ciphertexts() {
        let key = test_key();
        let uuid = Uuid::new_v4();
        let a = encrypt(&key, b"same plaintext", uuid).unwrap();
        let b = encrypt(&key, b"same plaintext", uuid).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let key = test_key();
        let uuid = Uuid::new_v4();
        let mut blob = encrypt(&key, b"payload", uuid).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(decrypt(&key, &blob).is_err());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let uuid = Uuid::new_v4();
        let blob = encrypt(&test_key(), b"payload", uuid).unwrap();
        assert!(decrypt(&[9u8; 32], &blob).is_err());
    }
}
