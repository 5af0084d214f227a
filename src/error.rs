use std::io;

use crate::probe::ProbeState;

/// Errors returned while opening or reading a [`crate::LazyStream`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server did not confirm `Accept-Ranges: bytes`.  Nothing can be fetched lazily; fall
    /// back to downloading the whole object.
    #[error("range request is not supported by the server")]
    RangeUnsupported,

    /// The negotiation response carried no usable `Content-Length`.
    #[error("server did not report the object length")]
    MissingLength,

    /// The server answered with an unexpected HTTP status.
    #[error("request failed with HTTP status {0}")]
    Status(u16),

    /// The server answered a ranged request with the complete object.
    #[error("server ignored the range header and sent the complete object")]
    FullResponse,

    /// The `Content-Range` of a partial response does not describe the requested range.
    #[error("unexpected Content-Range: {0}")]
    ContentRange(String),

    /// The body of a partial response ended before the requested range was complete.
    #[error("range body ended early: expected {expected} bytes, received {received}")]
    ShortBody {
        /// The size of the requested range.
        expected: u64,
        /// The number of bytes the body contained.
        received: u64,
    },

    /// The archive directory could not be parsed even with the whole object mirrored.
    #[error("corrupt archive")]
    CorruptArchive(#[source] anyhow::Error),

    /// The configured chunk size was zero.
    #[error("chunk size must be non-zero")]
    ZeroChunkSize,

    /// An operation was attempted in a state which does not allow it.
    #[error("operation not allowed while the stream is {0:?}")]
    State(ProbeState),

    /// The HTTP client failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Reading or writing the mirror failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Recovers an `Error` that travelled through an `io::Error` (for example out of a
    /// [`std::io::Read`] call made by a directory parser).  Other I/O errors become
    /// [`Error::Io`].
    #[must_use]
    pub fn from_io(err: io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<Self>()) {
            return Self::Io(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<Self>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(inner)) => Self::Io(io::Error::new(kind, inner)),
            None => Self::Io(kind.into()),
        }
    }

    /// Wraps the error for an [`std::io`] interface, undoing [`Error::from_io`].  The kind of a
    /// wrapped [`Error::Io`] is kept.
    #[must_use]
    pub fn into_io(self) -> io::Error {
        let kind = match &self {
            Self::Io(err) => err.kind(),
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}
