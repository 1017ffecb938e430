//! fdrive-share: upload and access orchestration over the cipher, key custody,
//! access control, and the blob/record stores

pub mod engine;

pub use engine::{
    download_owned, open_shared, share_link, share_status, toggle_revoke, update_settings,
    upload, upload_path, KeySource, OpenRequest, OpenedFile, ShareContext, StatusReport,
    UploadResult,
};
