//! Share engine: the upload path and the gated access path
//!
//!   - `upload`: size cap → encrypt → blob put → record insert → cache key
//!   - `share_link`: active check → key from cache or owner → link with fragment
//!   - `open_shared`: authorize → resolve key → re-read + authorize → fetch → decrypt
//!   - `download_owned`: owner download, no share gating
//!   - `update_settings` / `toggle_revoke`: owner mutations written as partial patches
//!
//! Nothing here ever sends a key to the record or blob store.

use rand::distributions::Alphanumeric;
use rand::Rng;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use fdrive_core::access::{self, AccessAction};
use fdrive_core::config::{FdriveConfig, ShareConfig, UploadConfig};
use fdrive_core::types::{now_ms, DEFAULT_MIME_TYPE};
use fdrive_core::{
    ExpiryOption, FdriveError, FdriveResult, SharePermission, ShareRecord, ShareStatus,
    TimestampMs,
};
use fdrive_crypto::cipher::AES_GCM;
use fdrive_crypto::{
    decrypt_payload, encrypt, encrypt_bytes, ensure_crypto_available, Algorithm, DecryptedFile,
    EncryptedPayload, FileKey,
};
use fdrive_secrets::{decode_link_fragment, link_for_record, KeyCustody};
use fdrive_storage::{BlobStore, OpendalBlobStore, OpendalRecordStore, RecordStore};

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Wall clock in milliseconds since the Unix epoch
pub type Clock = Arc<dyn Fn() -> TimestampMs + Send + Sync>;

/// Length of generated file ids
pub const FILE_ID_LEN: usize = 20;

/// Owner id used when the caller has none
pub const ANONYMOUS_OWNER: &str = "anonymous";

/// Collaborators and settings shared by every engine operation
#[derive(Clone)]
pub struct ShareContext {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub custody: KeyCustody,
    pub share: ShareConfig,
    pub upload: UploadConfig,
    pub blob_prefix: String,
    clock: Clock,
}

impl ShareContext {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        custody: KeyCustody,
        config: &FdriveConfig,
    ) -> Self {
        Self {
            records,
            blobs,
            custody,
            share: config.share.clone(),
            upload: config.upload.clone(),
            blob_prefix: config.storage.blob_prefix.trim_matches('/').to_string(),
            clock: Arc::new(now_ms),
        }
    }

    /// Blob and record stores over one OpenDAL operator.
    pub fn from_operator(op: opendal::Operator, custody: KeyCustody, config: &FdriveConfig) -> Self {
        let records = Arc::new(OpendalRecordStore::new(op.clone(), &config.storage.record_prefix));
        let blobs = Arc::new(OpendalBlobStore::new(op));
        Self::new(records, blobs, custody, config)
    }

    /// Replace the wall clock, for tests that need to move time.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn now(&self) -> TimestampMs {
        (self.clock)()
    }

    async fn load(&self, id: &str) -> FdriveResult<ShareRecord> {
        self.records
            .get(id)
            .await?
            .ok_or_else(|| FdriveError::NotFound(format!("file {id}")))
    }
}

/// Result of uploading a single file
#[derive(Debug)]
pub struct UploadResult {
    pub record: ShareRecord,
    /// Share link with the key in its fragment
    pub link: String,
    /// Also cached on this device; returned for callers that distribute it another way
    pub key: FileKey,
    pub algorithm: Algorithm,
}

/// Where the key for an `open_shared` came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Fragment,
    Cache,
    Manual,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Fragment => f.write_str("link"),
            KeySource::Cache => f.write_str("device cache"),
            KeySource::Manual => f.write_str("manual entry"),
        }
    }
}

/// What the link holder asked for
#[derive(Debug, Clone, Copy)]
pub struct OpenRequest<'a> {
    pub file_id: &'a str,
    /// URL fragment of the link that was followed, if any
    pub fragment: Option<&'a str>,
    pub manual_key: Option<&'a FileKey>,
    pub action: AccessAction,
}

/// Plaintext handed back to the link holder
#[derive(Debug)]
pub struct OpenedFile {
    pub record: ShareRecord,
    pub file: DecryptedFile,
    /// `None` for files stored unencrypted
    pub key_source: Option<KeySource>,
}

/// Snapshot of a record's share state at one instant
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub record: ShareRecord,
    pub status: ShareStatus,
    pub can_view: bool,
    pub can_download: bool,
    pub expiry_option: ExpiryOption,
    pub key_cached: bool,
}

/// Encrypt and store a file, create its share record, and cache its key.
pub async fn upload(
    ctx: &ShareContext,
    owner_id: &str,
    file_name: &str,
    mime_type: &str,
    bytes: &[u8],
    progress: Option<&ProgressFn>,
) -> FdriveResult<UploadResult> {
    if file_name.trim().is_empty() {
        return Err(FdriveError::MalformedInput("file name is empty".into()));
    }
    let size = bytes.len() as u64;
    let limit = ctx.upload.max_file_size_bytes();
    if size > limit {
        return Err(FdriveError::TooLarge { size, limit });
    }
    ensure_crypto_available()?;

    if let Some(cb) = progress {
        cb(0, size, "encrypting");
    }
    let (payload, key) = if size >= ctx.upload.stream_threshold_bytes() {
        encrypt_bytes(bytes, ctx.upload.chunk_size_bytes())?
    } else {
        encrypt(bytes)?
    };
    let algorithm = Algorithm::from_tag(&payload.algorithm)?;
    let iv = payload.iv_base64();

    let file_id = generate_file_id();
    let owner = if owner_id.trim().is_empty() {
        ANONYMOUS_OWNER
    } else {
        owner_id.trim()
    };
    let storage_path = format!(
        "{}/{owner}/{file_id}-{}.enc",
        ctx.blob_prefix,
        sanitize_file_name(file_name)
    );

    if let Some(cb) = progress {
        cb(size / 2, size, "uploading");
    }
    let file_url = ctx.blobs.put(&storage_path, payload.ciphertext).await?;

    let mime = if mime_type.trim().is_empty() {
        DEFAULT_MIME_TYPE
    } else {
        mime_type.trim()
    };
    let record = ShareRecord {
        id: file_id.clone(),
        file_name: file_name.to_string(),
        file_type: mime.to_string(),
        file_size: size,
        file_url,
        storage_path,
        owner_id: owner.to_string(),
        short_url: Some(fdrive_secrets::share_url(
            ctx.share.normalized_base_url(),
            &file_id,
        )),
        share_permission: SharePermission::ViewDownload,
        expires_at: None,
        is_revoked: false,
        is_encrypted: true,
        algorithm: Some(algorithm.as_tag().to_string()),
        iv: Some(iv),
        original_file_name: Some(file_name.to_string()),
        original_file_type: Some(mime.to_string()),
        original_file_size: Some(size),
        created_at: Some(ctx.now()),
    };
    if let Err(e) = ctx.records.insert(&record).await {
        warn!(
            id = %file_id,
            storage_path = %record.storage_path,
            "record insert failed, ciphertext blob left orphaned: {e}"
        );
        return Err(e);
    }
    ctx.custody.put(&file_id, &key);

    if let Some(cb) = progress {
        cb(size, size, "done");
    }
    info!(
        id = %file_id,
        bytes = size,
        algorithm = %algorithm,
        "uploaded encrypted file"
    );

    let link = link_for_record(&ctx.share, &record, Some(&key));
    Ok(UploadResult {
        record,
        link,
        key,
        algorithm,
    })
}

/// Read a local file and [`upload`] it under its file name.
pub async fn upload_path(
    ctx: &ShareContext,
    owner_id: &str,
    path: &Path,
    mime_type: Option<&str>,
    progress: Option<&ProgressFn>,
) -> FdriveResult<UploadResult> {
    let meta = tokio::fs::metadata(path).await?;
    let limit = ctx.upload.max_file_size_bytes();
    if meta.len() > limit {
        return Err(FdriveError::TooLarge {
            size: meta.len(),
            limit,
        });
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mime = mime_type
        .map(str::to_string)
        .unwrap_or_else(|| guess_mime_type(&name).to_string());
    let bytes = tokio::fs::read(path).await?;
    upload(ctx, owner_id, &name, &mime, &bytes, progress).await
}

/// Owner side: produce a shareable link for an active record.
///
/// Encrypted records need `manual_key` or the key from this device's cache.
/// A manual key is not checked here, so it is not cached either.
pub async fn share_link(
    ctx: &ShareContext,
    file_id: &str,
    manual_key: Option<&FileKey>,
) -> FdriveResult<String> {
    let record = ctx.load(file_id).await?;
    access::ensure_active(&record, ctx.now())?;

    if !record.is_encrypted {
        return Ok(link_for_record(&ctx.share, &record, None));
    }

    let key = match manual_key {
        Some(manual) => manual.clone(),
        None => ctx
            .custody
            .get(file_id)
            .ok_or_else(|| FdriveError::KeyUnavailable(file_id.to_string()))?,
    };
    Ok(link_for_record(&ctx.share, &record, Some(&key)))
}

/// Link holder side: gate, resolve the key, fetch and decrypt.
///
/// The record is read and authorized twice: once before asking for a key and
/// again immediately before the ciphertext fetch, so a link revoked or expired
/// in between is refused without downloading anything.
pub async fn open_shared(ctx: &ShareContext, req: OpenRequest<'_>) -> FdriveResult<OpenedFile> {
    let record = ctx.load(req.file_id).await?;
    access::authorize(&record, req.action, ctx.now())?;

    if !record.is_encrypted {
        let record = ctx.load(req.file_id).await?;
        access::authorize(&record, req.action, ctx.now())?;
        let bytes = ctx.blobs.get(&record.file_url).await?;
        debug!(id = %record.id, bytes = bytes.len(), "served unencrypted file");
        return Ok(OpenedFile {
            file: DecryptedFile {
                bytes,
                mime_type: record.display_type().to_string(),
            },
            record,
            key_source: None,
        });
    }

    ensure_crypto_available()?;
    check_decryptable(&record)?;
    let (key, source) = resolve_key(ctx, req.file_id, req.fragment, req.manual_key)?;

    let record = ctx.load(req.file_id).await?;
    access::authorize(&record, req.action, ctx.now())?;
    let file = fetch_and_decrypt(ctx, &record, &key).await?;

    if source == KeySource::Manual {
        ctx.custody.put(req.file_id, &key);
    }
    info!(
        id = %record.id,
        action = %req.action,
        key_source = %source,
        bytes = file.bytes.len(),
        "opened shared file"
    );
    Ok(OpenedFile {
        record,
        file,
        key_source: Some(source),
    })
}

/// Owner download: no share gating. `manual_key` wins over the cache and is
/// cached once it decrypts.
pub async fn download_owned(
    ctx: &ShareContext,
    file_id: &str,
    manual_key: Option<&FileKey>,
) -> FdriveResult<OpenedFile> {
    let record = ctx.load(file_id).await?;
    if !record.is_encrypted {
        let bytes = ctx.blobs.get(&record.file_url).await?;
        return Ok(OpenedFile {
            file: DecryptedFile {
                bytes,
                mime_type: record.display_type().to_string(),
            },
            record,
            key_source: None,
        });
    }

    ensure_crypto_available()?;
    check_decryptable(&record)?;
    let (key, source) = match manual_key {
        Some(manual) => (manual.clone(), KeySource::Manual),
        None => ctx
            .custody
            .get(file_id)
            .map(|key| (key, KeySource::Cache))
            .ok_or_else(|| FdriveError::KeyUnavailable(file_id.to_string()))?,
    };
    let file = fetch_and_decrypt(ctx, &record, &key).await?;
    if source == KeySource::Manual {
        ctx.custody.put(file_id, &key);
    }
    Ok(OpenedFile {
        record,
        file,
        key_source: Some(source),
    })
}

/// Owner mutation: set permission and expiry, and re-activate the link.
pub async fn update_settings(
    ctx: &ShareContext,
    file_id: &str,
    permission: SharePermission,
    expiry: ExpiryOption,
) -> FdriveResult<ShareRecord> {
    let mut record = ctx.load(file_id).await?;
    let was_revoked = record.is_revoked;
    let patch = access::apply_settings(&mut record, permission, expiry, ctx.now());
    ctx.records.update(file_id, &patch).await?;
    if was_revoked {
        warn!(id = file_id, "updating share settings re-activated a revoked link");
    }
    info!(id = file_id, permission = %permission, expiry = %expiry, "share settings updated");
    Ok(record)
}

/// Owner mutation: flip the revoke flag.
pub async fn toggle_revoke(ctx: &ShareContext, file_id: &str) -> FdriveResult<ShareRecord> {
    let mut record = ctx.load(file_id).await?;
    let patch = access::toggle_revoke(&mut record);
    ctx.records.update(file_id, &patch).await?;
    info!(id = file_id, revoked = record.is_revoked, "share revoke toggled");
    Ok(record)
}

/// Current share state, evaluated now.
pub async fn share_status(ctx: &ShareContext, file_id: &str) -> FdriveResult<StatusReport> {
    let record = ctx.load(file_id).await?;
    let now = ctx.now();
    Ok(StatusReport {
        status: access::status(&record, now),
        can_view: access::can_view(&record, now),
        can_download: access::can_download(&record, now),
        expiry_option: access::infer_expiry_option(record.expires_at, now),
        key_cached: ctx.custody.contains(file_id),
        record,
    })
}

/// Manual entry → link fragment → device cache.
///
/// The cache goes last: a stale entry must never shadow a key the user
/// supplied.
fn resolve_key(
    ctx: &ShareContext,
    file_id: &str,
    fragment: Option<&str>,
    manual_key: Option<&FileKey>,
) -> FdriveResult<(FileKey, KeySource)> {
    if let Some(key) = manual_key {
        return Ok((key.clone(), KeySource::Manual));
    }
    if let Some(key) = fragment.and_then(decode_link_fragment) {
        return Ok((key, KeySource::Fragment));
    }
    if let Some(key) = ctx.custody.get(file_id) {
        return Ok((key, KeySource::Cache));
    }
    Err(FdriveError::KeyUnavailable(file_id.to_string()))
}

/// Reject records that can never decrypt before spending a key prompt or a fetch.
fn check_decryptable(record: &ShareRecord) -> FdriveResult<()> {
    if record.iv.as_deref().map_or(true, |iv| iv.trim().is_empty()) {
        return Err(FdriveError::MalformedInput(format!(
            "encrypted file {} has no iv",
            record.id
        )));
    }
    Algorithm::from_tag(record.algorithm.as_deref().unwrap_or(AES_GCM))?;
    Ok(())
}

async fn fetch_and_decrypt(
    ctx: &ShareContext,
    record: &ShareRecord,
    key: &FileKey,
) -> FdriveResult<DecryptedFile> {
    check_decryptable(record)?;
    let iv = record.iv.as_deref().unwrap_or_default();
    let ciphertext = ctx.blobs.get(&record.file_url).await?;
    let payload = EncryptedPayload::from_record_parts(ciphertext, iv, record.algorithm.as_deref())?;
    decrypt_payload(&payload, key, record.display_type())
}

/// Random 20-character alphanumeric id
pub fn generate_file_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(FILE_ID_LEN)
        .map(char::from)
        .collect()
}

/// Keep `[A-Za-z0-9._-]`, replace everything else with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// MIME type from a file extension, for uploads that did not state one.
pub fn guess_mime_type(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "txt" | "log" | "md" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "zip" => "application/zip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        _ => DEFAULT_MIME_TYPE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_shape() {
        let a = generate_file_id();
        let b = generate_file_id();
        assert_eq!(a.len(), FILE_ID_LEN);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("report 2024 (final).pdf"), "report_2024__final_.pdf");
        assert_eq!(sanitize_file_name("ok-name_1.txt"), "ok-name_1.txt");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_file_name("résumé.doc"), "r_sum_.doc");
    }

    #[test]
    fn test_guess_mime_type() {
        assert_eq!(guess_mime_type("photo.JPG"), "image/jpeg");
        assert_eq!(guess_mime_type("notes.txt"), "text/plain");
        assert_eq!(guess_mime_type("archive"), DEFAULT_MIME_TYPE);
    }

    #[test]
    fn test_check_decryptable() {
        let mut record = ShareRecord {
            id: "x".into(),
            is_encrypted: true,
            ..Default::default()
        };
        assert!(matches!(
            check_decryptable(&record),
            Err(FdriveError::MalformedInput(_))
        ));

        record.iv = Some("AAAAAAAAAAAAAAAA".into());
        assert!(check_decryptable(&record).is_ok());

        record.algorithm = Some("ROT13".into());
        assert!(matches!(
            check_decryptable(&record),
            Err(FdriveError::UnsupportedAlgorithm(_))
        ));
    }
}
