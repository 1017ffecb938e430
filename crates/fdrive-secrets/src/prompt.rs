//! Interactive key entry for when neither the link nor the cache has a key

use fdrive_core::{FdriveError, FdriveResult};
use fdrive_crypto::FileKey;
use zeroize::Zeroize;

use crate::link::normalize_manual_key;

/// Ask for a decryption key on the terminal without echoing it.
///
/// Blank input is `Ok(None)`.
pub fn prompt_for_key(prompt: &str) -> FdriveResult<Option<FileKey>> {
    let mut entered = rpassword::prompt_password(prompt)
        .map_err(|e| FdriveError::KeyUnavailable(format!("reading key from terminal: {e}")))?;
    let key = normalize_manual_key(&entered);
    entered.zeroize();
    key
}
