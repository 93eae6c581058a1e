use crate::kv::KvError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy carried in every typed RPC response. The last two members
/// are client-side: `DeadlineExceeded` when a request's deadline lapses at
/// the RPC layer, `Cancelled` when the attached-client session abandons a
/// request in flight. Handlers never return them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    Exists,
    #[error("directory not empty")]
    NotEmpty,
    #[error("not a directory")]
    NotDirectory,
    #[error("is a directory")]
    IsDirectory,
    #[error("not a symlink")]
    NotSymlink,
    #[error("no such extended attribute")]
    XattrNotFound,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name too long")]
    NameTooLong,
    #[error("i/o error")]
    Io,
    #[error("cancelled")]
    Cancelled,
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl FsError {
    pub fn to_errno(self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::Exists => libc::EEXIST,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NotDirectory => libc::ENOTDIR,
            FsError::IsDirectory => libc::EISDIR,
            FsError::NotSymlink => libc::EINVAL,
            FsError::XattrNotFound => libc::ENODATA,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::NameTooLong => libc::ENAMETOOLONG,
            FsError::Io => libc::EIO,
            FsError::Cancelled => libc::EINTR,
            FsError::DeadlineExceeded => libc::ETIMEDOUT,
        }
    }
}

impl From<KvError> for FsError {
    fn from(_: KvError) -> Self {
        FsError::Io
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_mapping() {
        assert_eq!(FsError::NotFound.to_errno(), libc::ENOENT);
        assert_eq!(FsError::NotEmpty.to_errno(), libc::ENOTEMPTY);
        assert_eq!(FsError::Io.to_errno(), libc::EIO);
        assert_eq!(FsError::XattrNotFound.to_errno(), libc::ENODATA);
    }
}
