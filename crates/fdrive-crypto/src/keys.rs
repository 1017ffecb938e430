//! Per-file keys, randomness, and the base64 form keys travel in

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use fdrive_core::{FdriveError, FdriveResult};

use crate::KEY_SIZE;

/// A per-file 256-bit AES key. Zeroized on drop.
///
/// There is no `Serialize`/`Deserialize`: a key can only come from local
/// memory (generation, the device cache, a link fragment, or manual entry),
/// never from a record or any other network response.
#[derive(Clone, PartialEq, Eq)]
pub struct FileKey {
    bytes: [u8; KEY_SIZE],
}

impl FileKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Build a key from raw bytes; anything but 32 bytes is malformed.
    pub fn from_slice(bytes: &[u8]) -> FdriveResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(FdriveError::MalformedInput(format!(
                "key has wrong size: {} bytes (expected {KEY_SIZE})",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self::from_bytes(key))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Standard padded base64 of the raw key.
    pub fn to_base64(&self) -> SecretString {
        SecretString::from(STANDARD.encode(self.bytes))
    }

    /// Parse a base64 key, tolerating what link processors and copy/paste do to it.
    pub fn from_base64(encoded: &str) -> FdriveResult<Self> {
        let mut raw = decode_lenient_base64(encoded)?;
        let key = Self::from_slice(&raw);
        raw.zeroize();
        key
    }

    pub fn from_secret(encoded: &SecretString) -> FdriveResult<Self> {
        Self::from_base64(encoded.expose_secret())
    }
}

impl Drop for FileKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for FileKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 256-bit file key from the OS RNG.
pub fn generate_file_key() -> FdriveResult<FileKey> {
    let mut bytes = [0u8; KEY_SIZE];
    fill_random(&mut bytes)?;
    let key = FileKey::from_bytes(bytes);
    bytes.zeroize();
    Ok(key)
}

/// Fill `buf` from the OS RNG. A missing RNG means no encryption at all.
pub fn fill_random(buf: &mut [u8]) -> FdriveResult<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| FdriveError::CryptoUnavailable(format!("OS random source failed: {e}")))
}

/// Check the platform can produce randomness before any upload or decrypt.
pub fn ensure_crypto_available() -> FdriveResult<()> {
    let mut probe = [0u8; 1];
    fill_random(&mut probe)
}

/// Decode base64 accepting whitespace-mangled `+`, url-safe alphabet, and
/// missing padding.
pub fn decode_lenient_base64(value: &str) -> FdriveResult<Vec<u8>> {
    let mut normalized: String = value
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("+")
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let missing = normalized.len() % 4;
    if missing != 0 {
        normalized.extend(std::iter::repeat('=').take(4 - missing));
    }

    let decoded = STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| FdriveError::MalformedInput(format!("invalid base64: {e}")));
    normalized.zeroize();
    decoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_generation() {
        let k1 = generate_file_key().unwrap();
        let k2 = generate_file_key().unwrap();
        assert_ne!(k1.as_bytes(), k2.as_bytes(), "random keys must differ");
    }

    #[test]
    fn test_base64_roundtrip() {
        let key = generate_file_key().unwrap();
        let encoded = key.to_base64();
        assert_eq!(encoded.expose_secret().len(), 44);
        let decoded = FileKey::from_secret(&encoded).unwrap();
        assert_eq!(decoded, key);
    }

    #[test]
    fn test_plus_mangled_to_space() {
        // "Afv7+/v7..." so no `+` sits at either end
        let mut bytes = [0xFB; KEY_SIZE];
        bytes[0] = 0x01;
        let key = FileKey::from_bytes(bytes);
        let encoded = key.to_base64().expose_secret().to_string();
        assert!(encoded.contains('+'));
        let mangled = encoded.replace('+', " ");
        assert_eq!(FileKey::from_base64(&mangled).unwrap(), key);
    }

    #[test]
    fn test_url_safe_and_unpadded() {
        let key = FileKey::from_bytes([0xFF; KEY_SIZE]);
        let url_safe = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(key.as_bytes());
        assert_eq!(FileKey::from_base64(&url_safe).unwrap(), key);
    }

    #[test]
    fn test_wrong_length_is_malformed() {
        let short = STANDARD.encode([1u8; 16]);
        assert!(matches!(
            FileKey::from_base64(&short),
            Err(FdriveError::MalformedInput(_))
        ));
        assert!(matches!(
            FileKey::from_base64("%%%not-base64%%%"),
            Err(FdriveError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_debug_is_redacted() {
        let key = FileKey::from_bytes([7u8; KEY_SIZE]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("7, 7"));
    }

    #[test]
    fn test_crypto_available() {
        assert!(ensure_crypto_available().is_ok());
    }
}
