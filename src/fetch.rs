use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::{Error, Interval, RangeTransport};

/// Copies ranges of the remote object into the mirror, one ranged request per range.
#[derive(Debug)]
pub struct RangeFetcher<T> {
    transport: T,
    chunk_size: usize,
    requests: u64,
    received: u64,
}

impl<T: RangeTransport> RangeFetcher<T> {
    /// A fetcher which streams response bodies in increments of `chunk_size` bytes.
    #[must_use]
    pub const fn new(transport: T, chunk_size: usize) -> Self {
        Self {
            transport,
            chunk_size,
            requests: 0,
            received: 0,
        }
    }

    /// The underlying transport.
    pub const fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// How many ranged requests have been issued.
    #[must_use]
    pub const fn requests(&self) -> u64 {
        self.requests
    }

    /// How many body bytes have been written to the mirror.
    #[must_use]
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Requests `range` and writes the body into `mirror` at `range.start`.  The position of
    /// `mirror` is left after the last byte written.
    ///
    /// # Errors
    ///
    /// Fails if the request fails, the body is shorter than the range, or the mirror can't be
    /// written.  Nothing is retried.
    pub fn fetch<W: Write + Seek>(&mut self, mirror: &mut W, range: Interval) -> Result<(), Error> {
        let expected = range.len();
        debug!(start = range.start, end = range.end, "fetching range");

        self.requests += 1;
        let mut body = self.transport.get_range(range)?.take(expected);

        mirror.seek(SeekFrom::Start(range.start))?;
        let mut buf = vec![0; self.chunk_size];
        let mut received = 0;
        loop {
            let n = match body.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            mirror.write_all(&buf[..n])?;
            received += n as u64;
            self.received += n as u64;
        }

        if received < expected {
            return Err(Error::ShortBody { expected, received });
        }
        Ok(())
    }
}
