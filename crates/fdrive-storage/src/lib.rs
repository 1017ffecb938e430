//! fdrive-storage: OpenDAL-backed blob and record stores
//!
//! Both stores are untrusted: blobs hold ciphertext and records hold metadata,
//! neither ever holds a file key.

pub mod blob;
pub mod health;
pub mod operator;
pub mod records;

pub use blob::{BlobStore, OpendalBlobStore};
pub use health::check_health;
pub use operator::{build_from_config, memory_operator, S3Credentials};
pub use records::{OpendalRecordStore, RecordStore};
