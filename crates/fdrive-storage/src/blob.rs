//! Blob store collaborator: opaque bytes by path

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use tracing::debug;

use fdrive_core::{FdriveError, FdriveResult};

/// Put/get of (usually encrypted) file bytes.
///
/// The url returned by `put` is a capability: callers store it and hand it
/// back to `get` without interpreting it.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> FdriveResult<String>;
    async fn get(&self, url: &str) -> FdriveResult<Vec<u8>>;
}

/// Blob store over any OpenDAL operator; the url is the object path.
#[derive(Clone)]
pub struct OpendalBlobStore {
    op: Operator,
}

impl OpendalBlobStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn put(&self, path: &str, bytes: Vec<u8>) -> FdriveResult<String> {
        let len = bytes.len();
        self.op
            .write(path, bytes)
            .await
            .map_err(|e| storage_error("writing", path, e))?;
        debug!(path, bytes = len, "stored blob");
        Ok(path.to_string())
    }

    async fn get(&self, url: &str) -> FdriveResult<Vec<u8>> {
        let buf = self
            .op
            .read(url)
            .await
            .map_err(|e| storage_error("reading", url, e))?;
        debug!(path = url, bytes = buf.len(), "fetched blob");
        Ok(buf.to_vec())
    }
}

pub(crate) fn storage_error(action: &str, path: &str, e: opendal::Error) -> FdriveError {
    if e.kind() == ErrorKind::NotFound {
        FdriveError::NotFound(path.to_string())
    } else {
        FdriveError::Storage(format!("{action} {path}: {e}"))
    }
}
