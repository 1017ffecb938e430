use thiserror::Error;

pub type FdriveResult<T> = Result<T, FdriveError>;

/// Why the access gate refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The owner revoked the link
    Revoked,
    /// `expiresAt` is in the past
    Expired,
    /// The link is active but its permission does not cover the action
    Permission,
}

impl std::fmt::Display for DenyReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DenyReason::Revoked => "link revoked",
            DenyReason::Expired => "link expired",
            DenyReason::Permission => "permission does not cover the requested action",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum FdriveError {
    #[error("cryptography unavailable: {0}")]
    CryptoUnavailable(String),

    /// Authentication tag mismatch. Deliberately carries no detail: a wrong key
    /// and tampered ciphertext must look the same.
    #[error("decryption failed")]
    Integrity,

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("no decryption key available for file {0}")]
    KeyUnavailable(String),

    #[error("access denied: {0}")]
    AccessDenied(DenyReason),

    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FdriveError {
    /// Short text safe to show to whoever holds the link.
    ///
    /// `Integrity` and `MalformedInput` share one message so a caller cannot
    /// tell a wrong key from tampering or corruption.
    pub fn user_message(&self) -> &'static str {
        match self {
            FdriveError::CryptoUnavailable(_) => "Encryption is not available on this device.",
            FdriveError::Integrity | FdriveError::MalformedInput(_) => {
                "Unable to decrypt file. Please verify your key."
            }
            FdriveError::UnsupportedAlgorithm(_) => {
                "This file uses an unsupported encryption format."
            }
            FdriveError::KeyUnavailable(_) => "A decryption key is required to open this file.",
            FdriveError::AccessDenied(DenyReason::Revoked) => {
                "The owner has revoked access to this file."
            }
            FdriveError::AccessDenied(DenyReason::Expired) => {
                "This share link has expired and is no longer available."
            }
            FdriveError::AccessDenied(DenyReason::Permission) => {
                "This link does not allow that action."
            }
            FdriveError::TooLarge { .. } => "File is too large to upload.",
            FdriveError::NotFound(_) => "This shared file does not exist.",
            FdriveError::Config(_) => "Invalid configuration.",
            FdriveError::Storage(_) | FdriveError::Io(_) | FdriveError::Other(_) => {
                "Unable to load shared file. Please try again later."
            }
        }
    }

    /// True when the right response is to ask the user for a (corrected) key.
    pub fn needs_key_prompt(&self) -> bool {
        matches!(self, FdriveError::Integrity | FdriveError::KeyUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integrity_and_malformed_look_identical_to_users() {
        let a = FdriveError::Integrity;
        let b = FdriveError::MalformedInput("iv has 7 bytes".into());
        assert_eq!(a.user_message(), b.user_message());
        assert!(!b.user_message().contains("iv"));
    }

    #[test]
    fn integrity_display_has_no_detail() {
        assert_eq!(FdriveError::Integrity.to_string(), "decryption failed");
    }

    #[test]
    fn key_prompt_only_for_key_problems() {
        assert!(FdriveError::Integrity.needs_key_prompt());
        assert!(FdriveError::KeyUnavailable("abc".into()).needs_key_prompt());
        assert!(!FdriveError::AccessDenied(DenyReason::Revoked).needs_key_prompt());
        assert!(!FdriveError::MalformedInput("x".into()).needs_key_prompt());
    }
}
