//! fdrive-crypto: client-side file encryption for fdrive
//!
//! Every uploaded file gets its own random 256-bit key. The key never leaves
//! the client except inside a share link's URL fragment.
//!
//! Formats:
//! ```text
//! AES-GCM         whole file, one AEAD message (key, iv=random 96-bit)
//! AES-GCM-STREAM  fixed-size frames, per-frame random nonce,
//!                 AAD = iv || chunk_size || chunk_index || final
//! ```

pub mod cipher;
pub mod keys;
pub mod stream;

pub use cipher::{decrypt, encrypt, Algorithm, DecryptedFile, EncryptedPayload};
pub use keys::{ensure_crypto_available, generate_file_key, FileKey};
pub use stream::{decrypt_bytes, decrypt_file, encrypt_bytes, encrypt_file, StreamSummary};

use fdrive_core::FdriveResult;

/// Size of a file key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Default plaintext chunk size for the stream format (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Decrypt a payload in whichever format its algorithm tag names.
pub fn decrypt_payload(
    payload: &EncryptedPayload,
    key: &FileKey,
    mime_type: &str,
) -> FdriveResult<DecryptedFile> {
    match Algorithm::from_tag(&payload.algorithm)? {
        Algorithm::AesGcm => cipher::decrypt(payload, key, mime_type),
        Algorithm::AesGcmStream => stream::decrypt_bytes(payload, key, mime_type),
    }
}
