//! Single-shot AES-256-GCM encryption of whole files
//!
//! Payload layout:
//! ```text
//! ciphertext = AES-256-GCM(key, iv, plaintext) || 16-byte tag
//! iv         = 12 random bytes, stored next to the ciphertext in the share record
//! algorithm  = "AES-GCM"
//! ```
//!
//! Every call to [`encrypt`] draws a fresh key and a fresh IV, so a `(key, iv)`
//! pair is never reused.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use fdrive_core::types::DEFAULT_MIME_TYPE;
use fdrive_core::{FdriveError, FdriveResult};

use crate::keys::{decode_lenient_base64, fill_random, generate_file_key, FileKey};
use crate::{IV_SIZE, TAG_SIZE};

/// Tag persisted for the single-shot format
pub const AES_GCM: &str = "AES-GCM";
/// Tag persisted for the chunked stream format
pub const AES_GCM_STREAM: &str = "AES-GCM-STREAM";

/// Encryption formats this build understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Whole file in one AEAD message
    AesGcm,
    /// Fixed-size AEAD frames, see [`crate::stream`]
    AesGcmStream,
}

impl Algorithm {
    pub fn as_tag(&self) -> &'static str {
        match self {
            Algorithm::AesGcm => AES_GCM,
            Algorithm::AesGcmStream => AES_GCM_STREAM,
        }
    }

    /// Parse a persisted algorithm tag. Unknown tags are rejected, not guessed.
    pub fn from_tag(tag: &str) -> FdriveResult<Self> {
        match tag {
            AES_GCM => Ok(Algorithm::AesGcm),
            AES_GCM_STREAM => Ok(Algorithm::AesGcmStream),
            other => Err(FdriveError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Output of [`encrypt`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedPayload {
    /// Ciphertext with the GCM tag appended
    pub ciphertext: Vec<u8>,
    pub iv: Vec<u8>,
    pub algorithm: String,
}

impl EncryptedPayload {
    /// Reassemble a payload from a fetched blob and the record's iv/algorithm.
    pub fn from_record_parts(
        ciphertext: Vec<u8>,
        iv_b64: &str,
        algorithm: Option<&str>,
    ) -> FdriveResult<Self> {
        Ok(Self {
            ciphertext,
            iv: decode_iv(iv_b64)?,
            algorithm: algorithm.unwrap_or(AES_GCM).to_string(),
        })
    }

    pub fn iv_base64(&self) -> String {
        STANDARD.encode(&self.iv)
    }
}

/// Plaintext recovered by [`decrypt`], tagged with the caller-supplied MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Encrypt `plaintext` under a brand-new key and IV.
///
/// The key is returned to the caller and is not persisted or sent anywhere by
/// this function. Memory use is about twice the input size; use
/// [`crate::stream`] for files that do not fit.
pub fn encrypt(plaintext: &[u8]) -> FdriveResult<(EncryptedPayload, FileKey)> {
    let key = generate_file_key()?;
    let iv = generate_iv()?;

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&iv), plaintext)
        .map_err(|_| {
            FdriveError::MalformedInput("plaintext too large for a single AES-GCM message".into())
        })?;

    debug!(
        plaintext_bytes = plaintext.len(),
        ciphertext_bytes = ciphertext.len(),
        "encrypted payload"
    );

    Ok((
        EncryptedPayload {
            ciphertext,
            iv: iv.to_vec(),
            algorithm: AES_GCM.to_string(),
        },
        key,
    ))
}

/// Decrypt a single-shot payload.
///
/// - unknown algorithm tag → `UnsupportedAlgorithm`
/// - iv not 12 bytes, or ciphertext shorter than a tag → `MalformedInput`
/// - tag mismatch (wrong key or tampering, indistinguishable) → `Integrity`
///
/// No plaintext is returned unless the tag verifies.
pub fn decrypt(
    payload: &EncryptedPayload,
    key: &FileKey,
    mime_type: &str,
) -> FdriveResult<DecryptedFile> {
    match Algorithm::from_tag(&payload.algorithm)? {
        Algorithm::AesGcm => {}
        Algorithm::AesGcmStream => {
            return Err(FdriveError::UnsupportedAlgorithm(format!(
                "{} payloads must be decrypted with the stream decoder",
                AES_GCM_STREAM
            )))
        }
    }

    if payload.iv.len() != IV_SIZE {
        return Err(FdriveError::MalformedInput(format!(
            "iv has {} bytes (expected {IV_SIZE})",
            payload.iv.len()
        )));
    }
    if payload.ciphertext.len() < TAG_SIZE {
        return Err(FdriveError::MalformedInput(format!(
            "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
            payload.ciphertext.len()
        )));
    }

    let cipher = Aes256Gcm::new(key.as_bytes().into());
    let bytes = cipher
        .decrypt(Nonce::from_slice(&payload.iv), payload.ciphertext.as_ref())
        .map_err(|_| FdriveError::Integrity)?;

    let mime_type = if mime_type.trim().is_empty() {
        DEFAULT_MIME_TYPE.to_string()
    } else {
        mime_type.to_string()
    };

    Ok(DecryptedFile { bytes, mime_type })
}

/// Fresh random 96-bit IV
pub fn generate_iv() -> FdriveResult<[u8; IV_SIZE]> {
    let mut iv = [0u8; IV_SIZE];
    fill_random(&mut iv)?;
    Ok(iv)
}

/// Decode a base64 IV. Length is checked by the decryptors, not here.
pub fn decode_iv(iv_b64: &str) -> FdriveResult<Vec<u8>> {
    decode_lenient_base64(iv_b64)
}
