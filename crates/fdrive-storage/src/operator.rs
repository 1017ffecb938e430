//! OpenDAL Operator factory for fdrive storage backends

use anyhow::{Context, Result};
use opendal::Operator;

use fdrive_core::config::{expand_tilde, StorageConfig};

/// S3 credentials, kept out of the config file
#[derive(Clone, Default)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`, or `None` when unset.
    pub fn from_env() -> Option<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default();
        if access_key_id.is_empty() {
            return None;
        }
        Some(Self {
            access_key_id,
            secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
        })
    }
}

/// In-process operator, used by tests and throwaway sessions
pub fn memory_operator() -> Result<Operator> {
    finish(opendal::services::Memory::default())
}

/// Build an OpenDAL Operator for an S3-compatible endpoint
///
/// Path-style addressing (the opendal 0.55 default) works with SeaweedFS and
/// MinIO as well as AWS.
pub fn s3_operator(cfg: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);
    finish(builder).context("creating OpenDAL S3 operator")
}

/// Local directory backend
pub fn fs_operator(root: &std::path::Path) -> Result<Operator> {
    let root = expand_tilde(root);
    std::fs::create_dir_all(&root)
        .with_context(|| format!("creating storage root: {}", root.display()))?;
    let builder = opendal::services::Fs::default().root(&root.to_string_lossy());
    finish(builder).context("creating OpenDAL fs operator")
}

/// Build the operator `storage.backend` names.
///
/// For S3, if `enforce_tls` is true and the endpoint uses HTTP this returns an
/// error; otherwise a warning is logged for non-HTTPS endpoints.
pub fn build_from_config(storage: &StorageConfig, creds: Option<&S3Credentials>) -> Result<Operator> {
    match storage.backend.as_str() {
        "memory" => memory_operator(),
        "fs" => fs_operator(&storage.root),
        "s3" => {
            if storage.endpoint.starts_with("http://") {
                if storage.enforce_tls {
                    anyhow::bail!(
                        "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                         Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                        storage.endpoint
                    );
                }
                tracing::warn!(
                    endpoint = %storage.endpoint,
                    "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted. \
                     Set storage.enforce_tls = true and use HTTPS in production."
                );
            }
            let creds = creds.context(
                "S3 backend needs credentials: set AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
            )?;
            s3_operator(storage, creds)
        }
        other => anyhow::bail!("unknown storage backend '{other}' (expected memory, fs or s3)"),
    }
}

fn finish<B: opendal::Builder>(builder: B) -> Result<Operator> {
    let op = Operator::new(builder)?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}
