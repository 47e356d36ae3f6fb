use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::digest::TreeError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown hash algorithm: '{0}' (available: sha256, sha512)")]
    UnknownHashAlgorithm(String),
    #[error("invalid block size: '{0}'")]
    InvalidBlockSize(String),
    #[error("invalid salt: '{0}' (expected a non-empty hex string)")]
    InvalidSalt(String),
    #[error("no files specified")]
    NoFiles,

    #[error("can't open '{}' for reading", .path.display())]
    Open { path: PathBuf, source: io::Error },
    #[error("can't get size of '{}'", .path.display())]
    FileSize { path: PathBuf, source: io::Error },
    #[error("failed to compute digest of '{}'", .path.display())]
    Compute { path: PathBuf, source: TreeError },
    #[error("failed to write output")]
    Output(#[from] io::Error),
}

impl Error {
    /// Whether this is a problem with the invocation rather than with a file.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            Error::UnknownHashAlgorithm(_) | Error::InvalidBlockSize(_) | Error::InvalidSalt(_) | Error::NoFiles
        )
    }

    /// Process exit status for this error: 2 for usage errors, 1 for everything else.
    pub fn exit_code(&self) -> u8 {
        if self.is_usage() { 2 } else { 1 }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
