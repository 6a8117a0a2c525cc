use crate::format::HeaderErr;
use thiserror::Error;

/// `Result` where the `Err` variant is always [`StreamErr`].
pub type StreamResult<T> = std::result::Result<T, StreamErr>;

#[derive(Error, Debug)]
pub enum StreamErr {
    #[error("IO Error: {0}")]
    IoError(#[source] std::io::Error),
    #[error("Unexpected end of stream: the container might be truncated.")]
    Truncated,
    #[error("Frame length {size} exceeds the configured maximum of {max} bytes.")]
    OversizedLength { size: u64, max: u64 },
    #[error("No frame marker found within {scanned} bytes.")]
    SyncFailed { scanned: u64 },
    #[error("Header Error: {0}")]
    Header(#[source] HeaderErr),
    #[error("Reader already failed: {0}")]
    Poisoned(ErrKind),
}

/// Coarse classification of a [`StreamErr`]. This is what a reader remembers
/// as its last error, which is also how a failed reader is told apart from a
/// merely exhausted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrKind {
    Io,
    Truncated,
    OversizedLength,
    SyncFailed,
    Header,
}

impl StreamErr {
    pub fn kind(&self) -> ErrKind {
        match self {
            Self::IoError(_) => ErrKind::Io,
            Self::Truncated => ErrKind::Truncated,
            Self::OversizedLength { .. } => ErrKind::OversizedLength,
            Self::SyncFailed { .. } => ErrKind::SyncFailed,
            Self::Header(_) => ErrKind::Header,
            Self::Poisoned(kind) => *kind,
        }
    }
}

impl std::fmt::Display for ErrKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Self::Io => "IO Error",
                Self::Truncated => "Truncated",
                Self::OversizedLength => "Oversized Length",
                Self::SyncFailed => "Sync Failed",
                Self::Header => "Header Error",
            }
        )
    }
}
