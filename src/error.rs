//! Error types for the store and the filesystem handlers.

use thiserror::Error;

/// The persistence engine could not serve a request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("store connection lock poisoned")]
    Poisoned,
    #[error("stored {0} out of range: {1}")]
    OutOfRange(&'static str, i64),
}

/// Failure of a single filesystem operation.
///
/// Resolution failures stay distinct from `StoreUnavailable` so callers never
/// confuse "no such event" with "storage broken".
#[derive(Debug, Error)]
pub enum FsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("invalid file handle {0}")]
    InvalidHandle(u64),
    #[error("is a directory")]
    IsADirectory,
    #[error("not a directory")]
    NotADirectory,
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
}

impl FsError {
    /// POSIX errno reported to the kernel.
    #[cfg_attr(not(feature = "fuse"), allow(dead_code))]
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::PermissionDenied => libc::EACCES,
            FsError::InvalidHandle(_) => libc::EBADF,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::StoreUnavailable(_) => libc::EIO,
        }
    }
}
