//! Error types for the vaporfs engine.
//!
//! Every engine operation fails with one of a closed set of kinds, surfaced
//! as [`FsError`]. The FUSE adapter maps these onto POSIX errno values via
//! [`FsError::to_errno()`]; in-process callers match on the variant.

use thiserror::Error;

/// Unified error type for all engine operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("not a symlink: {0}")]
    NotASymlink(String),

    #[error("bad path: {0}")]
    BadPath(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FsError {
    /// Convert this error into a POSIX errno suitable for FUSE replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::NotADirectory(_) => libc::ENOTDIR,
            Self::IsADirectory(_) => libc::EISDIR,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
            Self::NotASymlink(_) | Self::BadPath(_) | Self::InvalidArgument(_) => libc::EINVAL,
        }
    }
}

/// Result alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;
