use thiserror::Error;

/// Failure taxonomy for the profile store and its sync payloads.
///
/// Everything here is recoverable at the sync-channel boundary: a rejected
/// payload or a failed persistence attempt leaves the store untouched and
/// never prevents a later attempt.
#[derive(Debug, Error)]
pub enum ProfileError {
    /// A sync file or HTTP body failed schema validation.  The whole payload
    /// is rejected; nothing reaches the store.
    #[error("invalid sync payload: {0}")]
    Validation(String),

    /// An operation referenced a profile id that does not exist.
    #[error("profile not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Malformed JSON.  Treated the same as `Validation` for propagation.
    #[error("malformed JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// The redb database refused an operation (corruption, version skew,
    /// failed commit).
    #[error("profile storage failure: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ProfileError>;

/// Collapse the redb error zoo into [`ProfileError::Storage`].
pub(crate) fn storage_err(err: impl std::fmt::Display) -> ProfileError {
    ProfileError::Storage(err.to_string())
}
