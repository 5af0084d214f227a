use std::io::{self, Read, Seek};

use tracing::debug;

use crate::{Error, LazyStream, RangeTransport, stream::Stay};

/// How far a [`LazyStream`] has got in opening.
///
/// `Unopened → Negotiating → Probing → Ready`, with `Failed` reachable from `Negotiating` and
/// `Probing`.  A stream can only be read while `Probing` or `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// Nothing has been requested yet.
    Unopened,
    /// The metadata request is in flight.
    Negotiating,
    /// The length is known and trailing chunks are being fetched until the directory parses.
    Probing,
    /// The directory parsed; the stream is ready for its consumer.
    Ready,
    /// Negotiation or probing failed.  Terminal.
    Failed,
}

/// Why an archive directory could not be parsed.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// The data doesn't (yet) look like a valid directory.  While probing, this means "try again
    /// with more of the object mirrored".
    #[error(transparent)]
    Malformed(anyhow::Error),

    /// Reading the stream failed.  This is never retried.
    #[error(transparent)]
    Io(io::Error),
}

impl From<io::Error> for DirectoryError {
    /// Failures of the stream itself (a fetch, the mirror) stay I/O errors.  Running off the end
    /// of the data, or being asked to seek somewhere nonsensical, is the parser's view of a
    /// directory that doesn't add up.
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Self::Io(err);
        }
        match err.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::InvalidData
            | io::ErrorKind::InvalidInput => Self::Malformed(err.into()),
            _ => Self::Io(err),
        }
    }
}

/// An archive directory which can be parsed from a seekable byte stream.
///
/// This is what [`LazyStream::probe`] looks for at the end of the object.  Parsers may seek and
/// read anywhere; the stream fetches whatever they touch.
pub trait Directory: Sized {
    /// Parses the directory from `reader`.  The reader's position on entry is unspecified.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError::Malformed`] if the data isn't a valid directory and
    /// [`DirectoryError::Io`] if reading fails.
    fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self, DirectoryError>;
}

impl<T: RangeTransport> LazyStream<T> {
    /// Asks the server for the length of the object and whether it accepts range requests, and
    /// sizes the mirror accordingly.  Returns the length.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::RangeUnsupported`] if the server doesn't confirm `Accept-Ranges:
    /// bytes`, [`Error::MissingLength`] without a `Content-Length`, or with the transport's
    /// error.  The stream is then `Failed` and can't be probed.
    pub fn negotiate(&mut self) -> Result<u64, Error> {
        self.expect_state(ProbeState::Unopened)?;
        self.state = ProbeState::Negotiating;

        let result = self.try_negotiate();
        self.state = if result.is_ok() {
            ProbeState::Probing
        } else {
            ProbeState::Failed
        };
        result
    }

    fn try_negotiate(&mut self) -> Result<u64, Error> {
        let head = self.fetcher.transport_mut().head()?;
        debug!(length = ?head.length, accept_ranges = ?head.accept_ranges, "negotiated");

        if !head.supports_ranges() {
            return Err(Error::RangeUnsupported);
        }
        let length = head.length.ok_or(Error::MissingLength)?;

        self.mirror.truncate(Some(length))?;
        self.length = length;
        Ok(length)
    }

    /// Fetches successively larger trailing windows of the object (one more `chunk_size` each
    /// time) until `D` parses.  The cursor is left where it was.
    ///
    /// For a well-formed archive the directory sits at the very end, so this usually takes one
    /// or two fetches whatever the size of the object.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::CorruptArchive`] if `D` still doesn't parse with the whole object
    /// mirrored, or with the error of a failed fetch.  The stream is then `Failed`.
    pub fn probe<D: Directory>(&mut self) -> Result<D, Error> {
        self.expect_state(ProbeState::Probing)?;

        let result = self.try_probe();
        self.state = if result.is_ok() {
            ProbeState::Ready
        } else {
            ProbeState::Failed
        };
        result
    }

    fn try_probe<D: Directory>(&mut self) -> Result<D, Error> {
        let chunk_size = self.chunk_size as u64;
        let mut start = self.length.saturating_sub(chunk_size);

        loop {
            if let Some(end) = self.length.checked_sub(1) {
                self.download(start, end)?;
            }

            let attempt = {
                let mut stay = Stay::new(self)?;
                D::parse(&mut *stay)
            };

            match attempt {
                Ok(directory) => {
                    debug!(start, "directory found");
                    return Ok(directory);
                }
                Err(DirectoryError::Malformed(err)) if start > 0 => {
                    debug!(start, error = %err, "directory not found yet");
                }
                Err(DirectoryError::Malformed(err)) => return Err(Error::CorruptArchive(err)),
                Err(DirectoryError::Io(err)) => return Err(Error::from_io(err)),
            }

            start = start.saturating_sub(chunk_size);
        }
    }

    fn expect_state(&self, expected: ProbeState) -> Result<(), Error> {
        if self.state == expected {
            Ok(())
        } else {
            Err(Error::State(self.state))
        }
    }
}
