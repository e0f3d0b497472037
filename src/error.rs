use std::fmt;

use crate::types::{PageId, Rid};

/// Every fallible operation in the core returns one of these kinds.
#[derive(Debug)]
pub enum Error {
    PageNotExist(PageId),
    IndexEntryNotFound,
    RecordNotFound(Rid),
    BufferPoolExhausted,
    TxnAborted,
    LockTimeout,
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::PageNotExist(pid) => write!(f, "page does not exist: {:?}", pid),
            Error::IndexEntryNotFound => write!(f, "index entry not found"),
            Error::RecordNotFound(rid) => write!(f, "record not found: {:?}", rid),
            Error::BufferPoolExhausted => write!(f, "buffer pool exhausted, no victim frame available"),
            Error::TxnAborted => write!(f, "transaction aborted, lock acquisition refused"),
            Error::LockTimeout => write!(f, "lock acquisition timed out"),
            Error::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
