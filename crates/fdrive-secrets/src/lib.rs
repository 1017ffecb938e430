//! fdrive-secrets: where file keys live outside the cipher
//!
//! Key sources, in the order the access path consults them:
//!   1. the share link fragment (`#k=...`)
//!   2. this device's key cache (`file-drive-encryption-keys-v1`)
//!   3. manual entry by the person holding the link
//!
//! The record store is never a key source.

pub mod custody;
pub mod kv;
pub mod link;
pub mod prompt;

pub use custody::{KeyCustody, STORAGE_KEY};
pub use kv::{DisabledKv, JsonFileKv, KvStore, MemoryKv};
pub use link::{
    decode_link, decode_link_fragment, encode_link, link_for_record, normalize_manual_key,
    parse_share_link, share_url, ParsedLink,
};
pub use prompt::prompt_for_key;
