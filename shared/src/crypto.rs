//! At-rest sealing for persisted credentials.
//!
//! Envelope layout (little endian):
//!
//! ```text
//! magic[8] | version u32 | alg u8 | key_id u32 | nonce[24] | ciphertext | tag[16]
//! ```

use aead::{AeadInPlace, KeyInit};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use secrecy::{ExposeSecret, Secret};
use thiserror::Error;
use zeroize::Zeroize;

const ENVELOPE_MAGIC: [u8; 8] = *b"MGWSEAL1";
const CURRENT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 41;
const TAG_SIZE: usize = 16;
const NONCE_SIZE: usize = 24;
pub const KEY_SIZE: usize = 32;
const MAX_AAD_FIELD: usize = 256;
/// A session is a user record and a token; anything larger is not ours.
pub const MAX_SEALED_SIZE: usize = 256 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SealError {
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("key id 0 is reserved")]
    ReservedKeyId,

    #[error("randomness unavailable")]
    RandomUnavailable,

    #[error("payload too large: {size} > {max}")]
    TooLarge { size: usize, max: usize },

    #[error("aad field {field} too large")]
    AadFieldTooLarge { field: &'static str },

    #[error("encryption failed")]
    EncryptionFailed,

    #[error("malformed envelope")]
    Malformed,

    #[error("unsupported envelope version {0}")]
    UnsupportedVersion(u32),

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(u8),

    #[error("sealed with key {found}, expected {expected}")]
    WrongKey { expected: u32, found: u32 },

    #[error("authentication failed")]
    AuthenticationFailed,
}

pub trait RandomProvider: Send + Sync {
    fn fill(&self, out: &mut [u8]) -> Result<(), SealError>;
}

pub struct OsRng;

impl RandomProvider for OsRng {
    fn fill(&self, out: &mut [u8]) -> Result<(), SealError> {
        getrandom::getrandom(out).map_err(|_| SealError::RandomUnavailable)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
enum AlgId {
    XChaCha20Poly1305 = 1,
}

/// Seals and opens byte payloads under a single device key.
pub struct Sealer<R: RandomProvider = OsRng> {
    key_id: u32,
    key: Secret<[u8; KEY_SIZE]>,
    rng: R,
}

impl Sealer<OsRng> {
    pub fn new(key_id: u32, key_bytes: &[u8]) -> Result<Self, SealError> {
        Self::with_rng(key_id, key_bytes, OsRng)
    }

    /// Fresh random device key, for first launch.
    pub fn generate_key() -> Result<Secret<[u8; KEY_SIZE]>, SealError> {
        let mut key = [0u8; KEY_SIZE];
        OsRng.fill(&mut key)?;
        let secret = Secret::new(key);
        key.zeroize();
        Ok(secret)
    }
}

impl<R: RandomProvider> Sealer<R> {
    pub fn with_rng(key_id: u32, key_bytes: &[u8], rng: R) -> Result<Self, SealError> {
        if key_id == 0 {
            return Err(SealError::ReservedKeyId);
        }
        if key_bytes.len() != KEY_SIZE {
            return Err(SealError::InvalidKeyLength {
                expected: KEY_SIZE,
                actual: key_bytes.len(),
            });
        }

        let mut k = [0u8; KEY_SIZE];
        k.copy_from_slice(key_bytes);
        let key = Secret::new(k);
        k.zeroize();

        Ok(Self { key_id, key, rng })
    }

    #[must_use]
    pub const fn key_id(&self) -> u32 {
        self.key_id
    }

    fn cipher(&self) -> XChaCha20Poly1305 {
        XChaCha20Poly1305::new(Key::from_slice(self.key.expose_secret()))
    }

    pub fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, SealError> {
        let total_len = HEADER_SIZE + plaintext.len() + TAG_SIZE;
        if total_len > MAX_SEALED_SIZE {
            return Err(SealError::TooLarge {
                size: total_len,
                max: MAX_SEALED_SIZE,
            });
        }

        let mut nonce = [0u8; NONCE_SIZE];
        self.rng.fill(&mut nonce)?;

        let mut out = vec![0u8; total_len];
        out[0..8].copy_from_slice(&ENVELOPE_MAGIC);
        out[8..12].copy_from_slice(&CURRENT_VERSION.to_le_bytes());
        out[12] = AlgId::XChaCha20Poly1305 as u8;
        out[13..17].copy_from_slice(&self.key_id.to_le_bytes());
        out[17..HEADER_SIZE].copy_from_slice(&nonce);

        let pt_end = HEADER_SIZE + plaintext.len();
        out[HEADER_SIZE..pt_end].copy_from_slice(plaintext);

        let tag = self
            .cipher()
            .encrypt_in_place_detached(XNonce::from_slice(&nonce), aad, &mut out[HEADER_SIZE..pt_end])
            .map_err(|_| SealError::EncryptionFailed)?;
        out[pt_end..].copy_from_slice(&tag);

        Ok(out)
    }

    pub fn open(&self, envelope: &[u8], aad: &[u8]) -> Result<Vec<u8>, SealError> {
        if envelope.len() < HEADER_SIZE + TAG_SIZE || envelope[0..8] != ENVELOPE_MAGIC {
            return Err(SealError::Malformed);
        }
        if envelope.len() > MAX_SEALED_SIZE {
            return Err(SealError::TooLarge {
                size: envelope.len(),
                max: MAX_SEALED_SIZE,
            });
        }

        let version = read_u32(&envelope[8..12])?;
        if version != CURRENT_VERSION {
            return Err(SealError::UnsupportedVersion(version));
        }
        if envelope[12] != AlgId::XChaCha20Poly1305 as u8 {
            return Err(SealError::UnsupportedAlgorithm(envelope[12]));
        }
        let key_id = read_u32(&envelope[13..17])?;
        if key_id != self.key_id {
            return Err(SealError::WrongKey {
                expected: self.key_id,
                found: key_id,
            });
        }

        let nonce = &envelope[17..HEADER_SIZE];
        let body = &envelope[HEADER_SIZE..];
        let ct_len = body.len() - TAG_SIZE;
        let mut buffer = body[..ct_len].to_vec();

        if self
            .cipher()
            .decrypt_in_place_detached(XNonce::from_slice(nonce), aad, &mut buffer, body[ct_len..].into())
            .is_err()
        {
            buffer.zeroize();
            return Err(SealError::AuthenticationFailed);
        }

        Ok(buffer)
    }
}

fn read_u32(bytes: &[u8]) -> Result<u32, SealError> {
    bytes
        .try_into()
        .map(u32::from_le_bytes)
        .map_err(|_| SealError::Malformed)
}

/// Length-prefixed AAD binding a sealed blob to its store and schema.
pub fn build_aad(store_name: &str, schema_version: u32) -> Result<Vec<u8>, SealError> {
    if store_name.len() > MAX_AAD_FIELD {
        return Err(SealError::AadFieldTooLarge { field: "store_name" });
    }
    let mut aad = Vec::with_capacity(2 + store_name.len() + 4);
    aad.extend_from_slice(&(store_name.len() as u16).to_le_bytes());
    aad.extend_from_slice(store_name.as_bytes());
    aad.extend_from_slice(&schema_version.to_le_bytes());
    Ok(aad)
}
