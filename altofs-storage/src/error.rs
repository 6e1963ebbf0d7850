use altofs_types::{Rda, Vda};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid disk geometry")]
    InvalidGeometry,

    #[error("virtual disk address {0} out of range")]
    VdaOutOfRange(Vda),

    #[error("real disk address {0} does not map to a valid page")]
    BadRda(Rda),

    #[error("no free pages remain")]
    DiskFull,

    #[error("file not found")]
    FileNotFound,

    #[error("name {0:?} does not resolve under this directory")]
    NameNotFound(String),

    #[error("path {0:?} is malformed")]
    BadPath(String),

    #[error("leader page is missing or unreadable")]
    BadLeaderPage,

    #[error("directory entry is corrupt")]
    BadDirEntry,

    #[error("attempted to read or write past the end of file")]
    EndOfFile,

    #[error("file is open read-only")]
    ReadOnly,

    #[error("directory has no room for a new entry")]
    DirectoryFull,

    #[error("a file by that name already exists")]
    AlreadyExists,

    #[error("cursor is in a latched error state: {0}")]
    Latched(String),

    #[error("unrecognized disk image format")]
    UnknownImageFormat,

    #[error("disk image is truncated or malformed: {0}")]
    CorruptImage(&'static str),

    #[error("{0} integrity violation(s) found during check")]
    IntegrityViolations(usize),
}

impl Error {
    /// Builds the latched copy of this error stored in an open-file cursor.
    ///
    /// Used when the original, possibly non-`Clone` error (e.g. an
    /// [`std::io::Error`]) is returned by value but a record of it must
    /// also remain on the cursor.
    #[must_use]
    pub fn as_latched(&self) -> Error {
        Error::Latched(self.to_string())
    }
}
