use serde::{Deserialize, Deserializer, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{FdriveError, FdriveResult};

/// Milliseconds since the Unix epoch, the unit `expiresAt` and `createdAt` persist in.
pub type TimestampMs = u64;

pub const ONE_DAY_MS: u64 = 24 * 60 * 60 * 1000;
pub const SEVEN_DAYS_MS: u64 = 7 * ONE_DAY_MS;

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Current wall-clock time in milliseconds.
pub fn now_ms() -> TimestampMs {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// What a share link lets its holder do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    View,
    Download,
    #[default]
    ViewDownload,
}

impl SharePermission {
    pub fn as_str(&self) -> &'static str {
        match self {
            SharePermission::View => "view",
            SharePermission::Download => "download",
            SharePermission::ViewDownload => "view_download",
        }
    }

    pub fn allows_view(&self) -> bool {
        matches!(self, SharePermission::View | SharePermission::ViewDownload)
    }

    pub fn allows_download(&self) -> bool {
        matches!(self, SharePermission::Download | SharePermission::ViewDownload)
    }
}

impl std::fmt::Display for SharePermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SharePermission {
    type Err = FdriveError;

    fn from_str(s: &str) -> FdriveResult<Self> {
        match s.trim() {
            "view" => Ok(SharePermission::View),
            "download" => Ok(SharePermission::Download),
            "view_download" => Ok(SharePermission::ViewDownload),
            other => Err(FdriveError::MalformedInput(format!(
                "unknown share permission '{other}' (expected view, download or view_download)"
            ))),
        }
    }
}

/// Relative expiry choices offered to the owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpiryOption {
    #[serde(rename = "24h")]
    Hours24,
    #[serde(rename = "7d")]
    Days7,
    #[serde(rename = "never")]
    Never,
}

impl ExpiryOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryOption::Hours24 => "24h",
            ExpiryOption::Days7 => "7d",
            ExpiryOption::Never => "never",
        }
    }

    /// Lifetime of the link, `None` for never
    pub fn duration_ms(&self) -> Option<u64> {
        match self {
            ExpiryOption::Hours24 => Some(ONE_DAY_MS),
            ExpiryOption::Days7 => Some(SEVEN_DAYS_MS),
            ExpiryOption::Never => None,
        }
    }
}

impl std::fmt::Display for ExpiryOption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExpiryOption {
    type Err = FdriveError;

    fn from_str(s: &str) -> FdriveResult<Self> {
        match s.trim() {
            "24h" => Ok(ExpiryOption::Hours24),
            "7d" => Ok(ExpiryOption::Days7),
            "never" => Ok(ExpiryOption::Never),
            other => Err(FdriveError::MalformedInput(format!(
                "unknown expiry option '{other}' (expected 24h, 7d or never)"
            ))),
        }
    }
}

/// Derived shareability of a record. Never stored: it depends on the clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShareStatus {
    Active,
    Expired,
    Revoked,
}

impl std::fmt::Display for ShareStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ShareStatus::Active => "Active",
            ShareStatus::Expired => "Expired",
            ShareStatus::Revoked => "Revoked",
        };
        f.write_str(s)
    }
}

/// Metadata document describing a shared file.
///
/// Field names match the persisted camelCase documents. Every field has a
/// default so a record read mid-update, or written by an older client, still
/// evaluates safely: absent or `null` `isRevoked` is `false`, absent `expiresAt`
/// is never.
///
/// The decryption key is intentionally not a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ShareRecord {
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub file_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub file_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub file_size: u64,
    /// Blob store capability for the (possibly encrypted) bytes
    #[serde(deserialize_with = "null_as_default")]
    pub file_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub storage_path: String,
    #[serde(deserialize_with = "null_as_default")]
    pub owner_id: String,
    pub short_url: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub share_permission: SharePermission,
    pub expires_at: Option<TimestampMs>,
    #[serde(deserialize_with = "null_as_default")]
    pub is_revoked: bool,
    #[serde(deserialize_with = "null_as_default")]
    pub is_encrypted: bool,
    #[serde(alias = "encryptionAlgorithm")]
    pub algorithm: Option<String>,
    /// Base64 IV / stream identifier
    pub iv: Option<String>,
    pub original_file_name: Option<String>,
    pub original_file_type: Option<String>,
    pub original_file_size: Option<u64>,
    pub created_at: Option<TimestampMs>,
}

/// `null` reads as the type's default, like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl Default for ShareRecord {
    fn default() -> Self {
        Self {
            id: String::new(),
            file_name: "Untitled".into(),
            file_type: DEFAULT_MIME_TYPE.into(),
            file_size: 0,
            file_url: String::new(),
            storage_path: String::new(),
            owner_id: String::new(),
            short_url: None,
            share_permission: SharePermission::default(),
            expires_at: None,
            is_revoked: false,
            is_encrypted: false,
            algorithm: None,
            iv: None,
            original_file_name: None,
            original_file_type: None,
            original_file_size: None,
            created_at: None,
        }
    }
}

impl ShareRecord {
    /// Name shown to link holders: original name, then stored name.
    pub fn display_name(&self) -> &str {
        self.original_file_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(Some(self.file_name.as_str()).filter(|n| !n.is_empty()))
            .unwrap_or("Untitled")
    }

    /// MIME type of the plaintext
    pub fn display_type(&self) -> &str {
        self.original_file_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .or(Some(self.file_type.as_str()).filter(|t| !t.is_empty()))
            .unwrap_or(DEFAULT_MIME_TYPE)
    }

    /// Plaintext size in bytes
    pub fn display_size(&self) -> u64 {
        self.original_file_size.unwrap_or(self.file_size)
    }
}

/// Partial update written back to the record store. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub share_permission: Option<SharePermission>,
    /// `Some(None)` clears the expiry
    pub expires_at: Option<Option<TimestampMs>>,
    pub is_revoked: Option<bool>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        self.share_permission.is_none() && self.expires_at.is_none() && self.is_revoked.is_none()
    }

    pub fn apply_to(&self, record: &mut ShareRecord) {
        if let Some(permission) = self.share_permission {
            record.share_permission = permission;
        }
        if let Some(expires_at) = self.expires_at {
            record.expires_at = expires_at;
        }
        if let Some(revoked) = self.is_revoked {
            record.is_revoked = revoked;
        }
    }
}

/// Human-readable size: B below 1 KiB, KB below 1 MiB, MB above.
pub fn format_file_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.2} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.2} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

/// Coarse category for listings
pub fn file_type_label(mime: &str) -> &'static str {
    if mime.starts_with("image/") {
        "Image"
    } else if mime.starts_with("video/") {
        "Video"
    } else if mime == "application/pdf" {
        "PDF"
    } else if mime.contains("document") {
        "Doc"
    } else {
        "Other"
    }
}
