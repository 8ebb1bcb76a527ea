#![forbid(unsafe_code)]
//! Error types for poolfs.
//!
//! Defines `VfsError` and a `Result<T>` alias used throughout the workspace.
//! Includes errno and HTTP status mappings for the protocol adapters.

use thiserror::Error;

/// Unified error type for all poolfs filesystem operations.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A destructive operation would take a mount point with it.
    #[error("{path}: directory contains a mount point")]
    MountConflict { path: String },

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("not a directory: {0}")]
    NotDirectory(String),

    #[error("is a directory: {0}")]
    IsDirectory(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    /// Paged directory read past the last entry.
    #[error("end of directory stream")]
    EndOfDirectory,
}

impl VfsError {
    /// True when the error means "the path does not exist", including
    /// not-found I/O errors propagated verbatim from a backend.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Convert this error into a POSIX errno suitable for SFTP status replies.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::NotFound(_) => libc::ENOENT,
            Self::AlreadyExists(_) => libc::EEXIST,
            Self::PermissionDenied(_) => libc::EACCES,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::MountConflict { .. } => libc::EBUSY,
            Self::NotSupported(_) => libc::ENOSYS,
            Self::NotDirectory(_) => libc::ENOTDIR,
            Self::IsDirectory(_) => libc::EISDIR,
            Self::NotEmpty(_) => libc::ENOTEMPTY,
            Self::EndOfDirectory => libc::ENODATA,
        }
    }

    /// Convert this error into an HTTP status code for the WebDAV layer.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::PermissionDenied(_) => 403,
            Self::InvalidArgument(_) => 400,
            Self::AlreadyExists(_)
            | Self::MountConflict { .. }
            | Self::NotDirectory(_)
            | Self::IsDirectory(_)
            | Self::NotEmpty(_) => 409,
            Self::NotSupported(_) => 501,
            Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound => 404,
            Self::Io(err) if err.kind() == std::io::ErrorKind::PermissionDenied => 403,
            Self::Io(_) | Self::EndOfDirectory => 500,
        }
    }
}

impl From<VfsError> for std::io::Error {
    fn from(err: VfsError) -> Self {
        use std::io::ErrorKind;
        match err {
            VfsError::Io(inner) => inner,
            VfsError::NotFound(_) => Self::new(ErrorKind::NotFound, err.to_string()),
            VfsError::AlreadyExists(_) => Self::new(ErrorKind::AlreadyExists, err.to_string()),
            VfsError::PermissionDenied(_) => {
                Self::new(ErrorKind::PermissionDenied, err.to_string())
            }
            VfsError::InvalidArgument(_) | VfsError::NotSupported(_) => {
                Self::new(ErrorKind::InvalidInput, err.to_string())
            }
            VfsError::EndOfDirectory => Self::new(ErrorKind::UnexpectedEof, err.to_string()),
            _ => Self::other(err.to_string()),
        }
    }
}

/// Result alias using `VfsError`.
pub type Result<T> = std::result::Result<T, VfsError>;
