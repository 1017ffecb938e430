//! Record store collaborator: share records keyed by file id
//!
//! Records are camelCase JSON documents at `<prefix>/<id>.json`. Updates merge
//! only the touched fields into the stored document, so fields this crate
//! does not model survive. Concurrent updates are last write wins.

use async_trait::async_trait;
use opendal::{ErrorKind, Operator};
use serde_json::{Map, Value};
use tracing::debug;

use fdrive_core::{FdriveError, FdriveResult, RecordPatch, ShareRecord};

use crate::blob::storage_error;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// `Ok(None)` when no record exists for `id`
    async fn get(&self, id: &str) -> FdriveResult<Option<ShareRecord>>;
    /// Write only the fields set in `patch`. Missing records are `NotFound`.
    async fn update(&self, id: &str, patch: &RecordPatch) -> FdriveResult<()>;
    /// Create or replace a record; used by the upload path only.
    async fn insert(&self, record: &ShareRecord) -> FdriveResult<()>;
}

#[derive(Clone)]
pub struct OpendalRecordStore {
    op: Operator,
    prefix: String,
}

impl OpendalRecordStore {
    pub fn new(op: Operator, prefix: &str) -> Self {
        Self {
            op,
            prefix: prefix.trim_matches('/').to_string(),
        }
    }

    fn doc_path(&self, id: &str) -> FdriveResult<String> {
        if id.is_empty() || id.contains('/') || id.contains("..") {
            return Err(FdriveError::MalformedInput(format!("invalid file id: {id:?}")));
        }
        Ok(format!("{}/{id}.json", self.prefix))
    }

    async fn read_doc(&self, path: &str) -> FdriveResult<Option<Map<String, Value>>> {
        let buf = match self.op.read(path).await {
            Ok(buf) => buf,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("reading", path, e)),
        };
        match serde_json::from_slice::<Value>(&buf.to_vec()) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(_) => Err(FdriveError::MalformedInput(format!("{path} is not a JSON object"))),
            Err(e) => Err(FdriveError::MalformedInput(format!("parsing {path}: {e}"))),
        }
    }

    async fn write_doc(&self, path: &str, doc: &Value) -> FdriveResult<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| FdriveError::Storage(format!("serializing {path}: {e}")))?;
        self.op
            .write(path, bytes)
            .await
            .map_err(|e| storage_error("writing", path, e))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for OpendalRecordStore {
    async fn get(&self, id: &str) -> FdriveResult<Option<ShareRecord>> {
        let path = self.doc_path(id)?;
        let Some(mut doc) = self.read_doc(&path).await? else {
            return Ok(None);
        };
        // The id is the document key, whatever the body says
        doc.insert("id".into(), Value::String(id.to_string()));
        let record = serde_json::from_value(Value::Object(doc))
            .map_err(|e| FdriveError::MalformedInput(format!("decoding {path}: {e}")))?;
        Ok(Some(record))
    }

    async fn update(&self, id: &str, patch: &RecordPatch) -> FdriveResult<()> {
        let path = self.doc_path(id)?;
        let mut doc = self
            .read_doc(&path)
            .await?
            .ok_or_else(|| FdriveError::NotFound(format!("record {id}")))?;

        if let Some(permission) = patch.share_permission {
            doc.insert("sharePermission".into(), Value::String(permission.as_str().into()));
        }
        if let Some(expires_at) = patch.expires_at {
            doc.insert(
                "expiresAt".into(),
                expires_at.map(Value::from).unwrap_or(Value::Null),
            );
        }
        if let Some(revoked) = patch.is_revoked {
            doc.insert("isRevoked".into(), Value::Bool(revoked));
        }

        self.write_doc(&path, &Value::Object(doc)).await?;
        debug!(id, ?patch, "updated record");
        Ok(())
    }

    async fn insert(&self, record: &ShareRecord) -> FdriveResult<()> {
        let path = self.doc_path(&record.id)?;
        let doc = serde_json::to_value(record)
            .map_err(|e| FdriveError::Storage(format!("serializing {path}: {e}")))?;
        self.write_doc(&path, &doc).await?;
        debug!(id = %record.id, "inserted record");
        Ok(())
    }
}
