//! The error taxonomy returned by every user-visible `toyfs` operation.
//!
//! Every variant here corresponds to a negative errno the VFS shim expects
//! back across the ioctl boundary. Internal invariant violations (pool
//! corruption, a missing inode-table member, lock misuse) are never
//! represented as `Error` values: they `panic!`, matching the "abort the
//! process" rule for programming errors.

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    #[error("no such file or directory")]
    NoEnt,

    #[error("directory not empty")]
    NotEmpty,

    #[error("no space left on device")]
    NoSpace,

    #[error("cannot allocate memory")]
    NoMem,

    #[error("invalid argument")]
    Inval,

    #[error("file too large")]
    FileBig,

    #[error("is a directory")]
    IsDir,

    #[error("operation not supported")]
    NotSupported,

    #[error("file exists")]
    Exists,
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// The negative errno value the shim's callback table expects.
    pub const fn as_errno(self) -> i32 {
        match self {
            Error::NoEnt => -2,
            Error::NoMem => -12,
            Error::Exists => -17,
            Error::NotSupported => -95,
            Error::IsDir => -21,
            Error::Inval => -22,
            Error::FileBig => -27,
            Error::NoSpace => -28,
            Error::NotEmpty => -39,
        }
    }
}
