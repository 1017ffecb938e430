//! fdrive-core: share record model, access control, config schema, error taxonomy

pub mod access;
pub mod config;
pub mod error;
pub mod types;

pub use access::{authorize, can_download, can_view, status, AccessAction};
pub use error::{DenyReason, FdriveError, FdriveResult};
pub use types::{
    now_ms, ExpiryOption, RecordPatch, SharePermission, ShareRecord, ShareStatus, TimestampMs,
};
