//! Share access control
//!
//! A record is `Revoked`, `Expired` or `Active`, evaluated against the clock on
//! every call:
//!
//! ```text
//! isRevoked                       → Revoked
//! expiresAt = Some(t) && now > t  → Expired
//! otherwise                       → Active
//! ```
//!
//! Link holders can only view/download while `Active`. The owner can move a
//! record back and forth: `toggle_revoke` flips the flag, `apply_settings`
//! rewrites permission + expiry and always clears `isRevoked`. Reapplying
//! settings therefore re-activates a revoked link. That asymmetry is a product
//! decision and is kept as is.
//!
//! Gating runs strictly before any ciphertext is fetched or decrypted.

use tracing::debug;

use crate::error::{DenyReason, FdriveError, FdriveResult};
use crate::types::{
    ExpiryOption, RecordPatch, SharePermission, ShareRecord, ShareStatus, TimestampMs, ONE_DAY_MS,
};

/// What the link holder is trying to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessAction {
    View,
    Download,
}

impl std::fmt::Display for AccessAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccessAction::View => f.write_str("view"),
            AccessAction::Download => f.write_str("download"),
        }
    }
}

/// Current status of a record at `now`.
pub fn status(record: &ShareRecord, now: TimestampMs) -> ShareStatus {
    if record.is_revoked {
        return ShareStatus::Revoked;
    }
    match record.expires_at {
        Some(t) if now > t => ShareStatus::Expired,
        _ => ShareStatus::Active,
    }
}

pub fn can_view(record: &ShareRecord, now: TimestampMs) -> bool {
    status(record, now) == ShareStatus::Active && record.share_permission.allows_view()
}

pub fn can_download(record: &ShareRecord, now: TimestampMs) -> bool {
    status(record, now) == ShareStatus::Active && record.share_permission.allows_download()
}

/// Fail-fast gate: `Ok(())` only if the record is active and its permission
/// covers `action`.
pub fn authorize(record: &ShareRecord, action: AccessAction, now: TimestampMs) -> FdriveResult<()> {
    ensure_active(record, now)?;

    let allowed = match action {
        AccessAction::View => record.share_permission.allows_view(),
        AccessAction::Download => record.share_permission.allows_download(),
    };
    if !allowed {
        debug!(
            id = %record.id,
            action = %action,
            permission = %record.share_permission,
            "access denied: permission"
        );
        return Err(FdriveError::AccessDenied(DenyReason::Permission));
    }
    Ok(())
}

/// Error unless the record is `Active`. Also guards link creation on the owner side.
pub fn ensure_active(record: &ShareRecord, now: TimestampMs) -> FdriveResult<()> {
    match status(record, now) {
        ShareStatus::Active => Ok(()),
        ShareStatus::Revoked => {
            debug!(id = %record.id, "access denied: revoked");
            Err(FdriveError::AccessDenied(DenyReason::Revoked))
        }
        ShareStatus::Expired => {
            debug!(id = %record.id, expires_at = ?record.expires_at, "access denied: expired");
            Err(FdriveError::AccessDenied(DenyReason::Expired))
        }
    }
}

/// Absolute expiry for a relative option anchored at `now`.
pub fn expiry_timestamp(option: ExpiryOption, now: TimestampMs) -> Option<TimestampMs> {
    option.duration_ms().map(|d| now.saturating_add(d))
}

/// Best guess of which option produced `expires_at`, used to pre-fill the
/// settings form: none → never, at most a day left → 24h, else 7d.
pub fn infer_expiry_option(expires_at: Option<TimestampMs>, now: TimestampMs) -> ExpiryOption {
    match expires_at {
        None | Some(0) => ExpiryOption::Never,
        Some(t) => {
            let remaining = t as i128 - now as i128;
            if remaining <= ONE_DAY_MS as i128 {
                ExpiryOption::Hours24
            } else {
                ExpiryOption::Days7
            }
        }
    }
}

/// Owner update: set permission, recompute expiry from `now`, and clear the
/// revoke flag.
///
/// Returns the patch to persist; `record` is updated in place.
pub fn apply_settings(
    record: &mut ShareRecord,
    permission: SharePermission,
    expiry: ExpiryOption,
    now: TimestampMs,
) -> RecordPatch {
    let patch = RecordPatch {
        share_permission: Some(permission),
        expires_at: Some(expiry_timestamp(expiry, now)),
        is_revoked: Some(false),
    };
    patch.apply_to(record);
    debug!(
        id = %record.id,
        permission = %permission,
        expiry = %expiry,
        "share settings applied"
    );
    patch
}

/// Owner update: flip `isRevoked`. Permission and expiry are untouched.
pub fn toggle_revoke(record: &mut ShareRecord) -> RecordPatch {
    let patch = RecordPatch {
        is_revoked: Some(!record.is_revoked),
        ..Default::default()
    };
    patch.apply_to(record);
    debug!(id = %record.id, revoked = record.is_revoked, "revoke toggled");
    patch
}
