use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration (loaded from fdrive.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FdriveConfig {
    pub share: ShareConfig,
    pub storage: StorageConfig,
    pub keys: KeysConfig,
    pub upload: UploadConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    /// Origin used to build `<base_url>/share/<id>` links
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "memory", "fs" or "s3"
    pub backend: String,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Refuse plaintext HTTP endpoints instead of warning
    pub enforce_tls: bool,
    /// Prefix for encrypted blobs
    pub blob_prefix: String,
    /// Prefix for share record documents
    pub record_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// Cache file keys on this device (default: true)
    pub enabled: bool,
    /// JSON key cache path
    pub store_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Largest accepted plaintext in MiB (default: 200)
    pub max_file_size_mb: u64,
    /// Files at or above this size use the chunked stream format
    pub stream_threshold_mb: u64,
    /// Plaintext chunk size for the stream format in KiB
    pub chunk_size_kib: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".into(),
        }
    }
}

impl ShareConfig {
    /// `base_url` without trailing slashes
    pub fn normalized_base_url(&self) -> &str {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            "http://localhost:3000"
        } else {
            trimmed
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/fdrive/store"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "fdrive".into(),
            enforce_tls: false,
            blob_prefix: "file-upload".into(),
            record_prefix: "uploadedFile".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_path: PathBuf::from("~/.local/share/fdrive/keys.json"),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: 200,
            stream_threshold_mb: 64,
            chunk_size_kib: 64,
        }
    }
}

impl UploadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }

    pub fn stream_threshold_bytes(&self) -> u64 {
        self.stream_threshold_mb.saturating_mul(1024 * 1024)
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_kib.max(1) * 1024
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
