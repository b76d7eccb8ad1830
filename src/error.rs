use thiserror::Error;

/// Error taxonomy for directory-tree operations.
///
/// These map to POSIX errno values at the kernel-adapter boundary via
/// [`TreeError::to_errno`]; the tree itself never interprets an errno.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("inode not found: {ino}")]
    NotFound { ino: u64 },

    #[error("name not found: {parent}/{name}")]
    NameNotFound { parent: u64, name: String },

    #[error("not a directory: {ino}")]
    NotADirectory { ino: u64 },

    #[error("is a directory: {ino}")]
    IsDirectory { ino: u64 },

    #[error("directory not empty: {ino}")]
    NotEmpty { ino: u64 },

    #[error("entry already exists with a different type: {parent}/{name}")]
    TypeMismatch { parent: u64, name: String },

    #[error("operation not supported: {op}")]
    NotSupported { op: String },

    #[error("readdir continuation with no cached buffer for handle {fh}")]
    NoHandleBuffer { fh: u64 },

    #[error("invalid argument: {msg}")]
    InvalidArgument { msg: String },

    #[error("backend dispatch failed: {0}")]
    Dispatch(String),

    #[error("backend reported failure: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, TreeError>;

impl TreeError {
    /// Maps this error to the POSIX errno a kernel adapter would report to
    /// the calling process.
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            TreeError::NotFound { .. } => ENOENT,
            TreeError::NameNotFound { .. } => ENOENT,
            TreeError::NotADirectory { .. } => ENOTDIR,
            TreeError::IsDirectory { .. } => EISDIR,
            TreeError::NotEmpty { .. } => ENOTEMPTY,
            TreeError::TypeMismatch { .. } => ENOTSUP,
            TreeError::NotSupported { .. } => ENOSYS,
            TreeError::NoHandleBuffer { .. } => EIO,
            TreeError::InvalidArgument { .. } => EINVAL,
            TreeError::Dispatch(_) => EIO,
            TreeError::Remote(_) => EIO,
        }
    }
}
