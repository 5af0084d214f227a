use std::{
    io::{self, Read, Seek, SeekFrom},
    ops::{Deref, DerefMut},
    path::Path,
};

use tracing::trace;

use crate::{
    Error, Interval, IntervalTracker, MirrorKind, ProbeState, RangeFetcher, RangeTransport,
    SparseMirror,
};

/// The default read-ahead and body increment: 10 KiB.
pub const CONTENT_CHUNK_SIZE: usize = 10 * 1024;

/// Tunables for a [`LazyStream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// The minimum size of every ranged fetch, the size of each probing step, and the increment
    /// in which response bodies are copied into the mirror.
    pub chunk_size: usize,
    /// Where fetched bytes are kept.
    pub mirror: MirrorKind,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            chunk_size: CONTENT_CHUNK_SIZE,
            mirror: MirrorKind::TempFile,
        }
    }
}

/// Saves the position of a stream and seeks back to it when dropped, whichever way the scope
/// is left.
pub(crate) struct Stay<'a, S: Seek> {
    inner: &'a mut S,
    position: u64,
}

impl<'a, S: Seek> Stay<'a, S> {
    pub(crate) fn new(inner: &'a mut S) -> io::Result<Self> {
        let position = inner.stream_position()?;
        Ok(Self { inner, position })
    }
}

impl<S: Seek> Deref for Stay<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.inner
    }
}

impl<S: Seek> DerefMut for Stay<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.inner
    }
}

impl<S: Seek> Drop for Stay<'_, S> {
    fn drop(&mut self) {
        // nowhere to report a failure from here; the next read on a broken mirror fails anyway
        let _ = self.inner.seek(SeekFrom::Start(self.position));
    }
}

/// A read-only, seekable view of a remote object which only downloads what is read.
///
/// Every read first makes sure that a window of at least `chunk_size` bytes around the cursor
/// is present in the local mirror, fetching the missing parts with range requests, and then
/// reads from the mirror.  Seeking is free.
///
/// A stream is opened in two steps, [`LazyStream::negotiate`] and [`LazyStream::probe`], or in
/// one with [`LazyStream::open`].  It is meant for a single reader: wrap it in a lock if it must
/// be shared between threads.
#[derive(Debug)]
pub struct LazyStream<T> {
    pub(crate) fetcher: RangeFetcher<T>,
    pub(crate) tracker: IntervalTracker,
    pub(crate) mirror: SparseMirror,
    pub(crate) length: u64,
    pub(crate) chunk_size: usize,
    pub(crate) state: ProbeState,
}

impl<T: RangeTransport> LazyStream<T> {
    /// The opening mode of the stream, in the spirit of `fopen()`: always read-only binary.
    pub const MODE: &'static str = "rb";
    /// Whether the stream can be read.
    pub const READABLE: bool = true;
    /// Whether the stream can seek.
    pub const SEEKABLE: bool = true;
    /// Whether the stream can be written.
    pub const WRITABLE: bool = false;

    /// Creates an unopened stream.  No request is made until [`LazyStream::negotiate`].
    ///
    /// # Errors
    ///
    /// Fails if `options.chunk_size` is zero or the mirror can't be created.
    pub fn new(transport: T, options: Options) -> Result<Self, Error> {
        if options.chunk_size == 0 {
            return Err(Error::ZeroChunkSize);
        }

        Ok(Self {
            fetcher: RangeFetcher::new(transport, options.chunk_size),
            tracker: IntervalTracker::new(),
            mirror: SparseMirror::new(options.mirror)?,
            length: 0,
            chunk_size: options.chunk_size,
            state: ProbeState::Unopened,
        })
    }

    /// Negotiates with the server and probes for the archive directory `D`, returning the ready
    /// stream together with the parsed directory.
    ///
    /// # Errors
    ///
    /// See [`LazyStream::negotiate`] and [`LazyStream::probe`].
    pub fn open<D: crate::Directory>(transport: T, options: Options) -> Result<(Self, D), Error> {
        let mut stream = Self::new(transport, options)?;
        stream.negotiate()?;
        let directory = stream.probe()?;
        Ok((stream, directory))
    }

    /// The total length of the remote object (zero before negotiation).
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.length
    }

    /// True if the remote object is empty (or not negotiated yet).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// How far opening has progressed.
    #[must_use]
    pub const fn state(&self) -> ProbeState {
        self.state
    }

    /// The byte ranges present in the mirror.
    #[must_use]
    pub fn intervals(&self) -> &[Interval] {
        self.tracker.intervals()
    }

    /// The number of ranged requests issued so far.
    #[must_use]
    pub const fn fetch_count(&self) -> u64 {
        self.fetcher.requests()
    }

    /// The number of bytes downloaded so far.
    #[must_use]
    pub const fn fetched_bytes(&self) -> u64 {
        self.fetcher.received()
    }

    /// The path of the temporary file backing the mirror, if any.
    #[must_use]
    pub fn mirror_path(&self) -> Option<&Path> {
        self.mirror.path()
    }

    /// Resizes the mirror without moving the cursor; see [`SparseMirror::truncate`].
    ///
    /// # Errors
    ///
    /// Fails if the mirror can't be resized.
    pub fn truncate(&mut self, size: Option<u64>) -> io::Result<u64> {
        self.mirror.truncate(size)
    }

    /// Makes sure `[start, end]` (clipped to the object) is mirrored, without moving the
    /// cursor.
    ///
    /// # Errors
    ///
    /// Fails if the stream isn't open or a fetch fails.
    pub fn prefetch(&mut self, start: u64, end: u64) -> Result<(), Error> {
        self.check_readable()?;
        match self.length.checked_sub(1) {
            Some(last) if start <= last => self.download(start, end.min(last)),
            _ => Ok(()),
        }
    }

    /// Closes the stream, deleting the mirror.
    ///
    /// # Errors
    ///
    /// Fails if the mirror's temporary file can't be removed.
    pub fn close(self) -> io::Result<()> {
        self.mirror.close()
    }

    pub(crate) fn check_readable(&self) -> Result<(), Error> {
        match self.state {
            ProbeState::Probing | ProbeState::Ready => Ok(()),
            state => Err(Error::State(state)),
        }
    }

    /// Fetches whatever is missing from `[start, end]`.  Each gap is recorded only once its
    /// fetch has succeeded.
    pub(crate) fn download(&mut self, start: u64, end: u64) -> Result<(), Error> {
        let Self {
            fetcher,
            tracker,
            mirror,
            ..
        } = self;

        let gaps = tracker.missing(start, end);
        if gaps.is_empty() {
            trace!(start, end, "already mirrored");
            return Ok(());
        }

        let mut mirror = Stay::new(mirror)?;
        for gap in gaps {
            fetcher.fetch(&mut *mirror, gap)?;
            tracker.insert(gap.start, gap.end);
        }
        Ok(())
    }

    /// The read-ahead window for reading `size` bytes at `position`: at least `chunk_size`
    /// bytes, pulled back so that it ends no later than the end of the object.
    fn window(&self, position: u64, size: usize) -> (u64, u64) {
        let size = (size as u64).max(self.chunk_size as u64);
        let stop = position.saturating_add(size).min(self.length);
        (stop.saturating_sub(size), stop - 1)
    }
}

impl<T: RangeTransport> Read for LazyStream<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_readable().map_err(Error::into_io)?;

        let position = self.mirror.stream_position()?;
        if buf.is_empty() || position >= self.length {
            return Ok(0);
        }

        let (start, end) = self.window(position, buf.len());
        self.download(start, end).map_err(Error::into_io)?;
        self.mirror.read(buf)
    }

    fn read_to_end(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.check_readable().map_err(Error::into_io)?;

        let position = self.mirror.stream_position()?;
        if position < self.length {
            self.download(position, self.length - 1)
                .map_err(Error::into_io)?;
        }
        self.mirror.read_to_end(buf)
    }
}

impl<T: RangeTransport> Seek for LazyStream<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.mirror.seek(pos)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::io::Cursor;

    use super::*;
    use crate::testing::Remote;

    fn negotiated(len: usize, chunk_size: usize) -> (LazyStream<Remote>, Vec<u8>) {
        #[allow(clippy::cast_possible_truncation)]
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut stream = LazyStream::new(
            Remote::new(data.clone()),
            Options {
                chunk_size,
                mirror: MirrorKind::Memory,
            },
        )
        .unwrap();
        assert_eq!(stream.negotiate().unwrap(), len as u64);
        (stream, data)
    }

    fn fetches(stream: &mut LazyStream<Remote>) -> Vec<(u64, u64)> {
        stream
            .fetcher
            .transport_mut()
            .fetches()
            .borrow()
            .iter()
            .map(|range| (range.start, range.end))
            .collect()
    }

    #[test]
    fn reads_fetch_a_window_of_at_least_one_chunk() {
        let (mut stream, data) = negotiated(100 * 1024, 1024);
        let mut buf = [0; 10];

        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[..10]);
        assert_eq!(fetches(&mut stream), [(0, 1023)]);

        // the window always reaches a full chunk past the cursor
        stream.seek(SeekFrom::Start(500)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[500..510]);
        assert_eq!(fetches(&mut stream), [(0, 1023), (1024, 1523)]);

        stream.seek(SeekFrom::Start(1020)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[1020..1030]);
        assert_eq!(
            fetches(&mut stream),
            [(0, 1023), (1024, 1523), (1524, 2043)]
        );
        assert_eq!(stream.intervals(), [Interval::new(0, 2043)]);
        assert_eq!(stream.stream_position().unwrap(), 1030);
    }

    #[test]
    fn large_reads_fetch_everything_they_need_at_once() {
        let (mut stream, data) = negotiated(10_000, 100);
        let mut buf = vec![0; 3000];
        stream.seek(SeekFrom::Start(2000)).unwrap();
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(buf, data[2000..5000]);
        assert_eq!(fetches(&mut stream), [(2000, 4999)]);
    }

    #[test]
    fn window_is_pulled_back_from_the_end() {
        let (mut stream, data) = negotiated(5000, 1024);
        stream.seek(SeekFrom::End(-5)).unwrap();

        let mut buf = [0; 100];
        assert_eq!(stream.read(&mut buf).unwrap(), 5);
        assert_eq!(buf[..5], data[4995..]);
        assert_eq!(fetches(&mut stream), [(3976, 4999)]);

        // at the end: nothing to read, nothing to fetch
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
        assert_eq!(stream.fetch_count(), 1);
    }

    #[test]
    fn read_to_end_fetches_the_rest_once() {
        let (mut stream, data) = negotiated(5000, 1024);
        stream.prefetch(4000, 4999).unwrap();
        stream.seek(SeekFrom::Start(1000)).unwrap();

        let mut rest = vec![];
        assert_eq!(stream.read_to_end(&mut rest).unwrap(), 4000);
        assert_eq!(rest, data[1000..]);
        assert_eq!(fetches(&mut stream), [(4000, 4999), (1000, 3999)]);
    }

    #[test]
    fn prefetch_keeps_the_cursor_and_clips_to_the_object() {
        let (mut stream, _) = negotiated(5000, 1024);
        stream.seek(SeekFrom::Start(123)).unwrap();
        stream.prefetch(4500, 9999).unwrap();
        stream.prefetch(6000, 7000).unwrap();
        assert_eq!(stream.stream_position().unwrap(), 123);
        assert_eq!(fetches(&mut stream), [(4500, 4999)]);
    }

    #[test]
    fn reading_requires_negotiation() {
        let mut stream = LazyStream::new(Remote::new(vec![1; 10]), Options::default()).unwrap();
        let err = stream.read(&mut [0; 4]).unwrap_err();
        assert!(matches!(
            Error::from_io(err),
            Error::State(ProbeState::Unopened)
        ));
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let options = Options {
            chunk_size: 0,
            ..Options::default()
        };
        assert!(matches!(
            LazyStream::new(Remote::new(vec![]), options),
            Err(Error::ZeroChunkSize)
        ));
    }

    #[test]
    fn states_only_move_forward() {
        let (mut stream, _) = negotiated(10, 4);
        assert_eq!(stream.state(), ProbeState::Probing);
        assert!(matches!(
            stream.negotiate(),
            Err(Error::State(ProbeState::Probing))
        ));
    }

    #[test]
    fn mirror_properties() {
        assert_eq!(LazyStream::<Remote>::MODE, "rb");
        assert!(LazyStream::<Remote>::READABLE);
        assert!(LazyStream::<Remote>::SEEKABLE);
        assert!(!LazyStream::<Remote>::WRITABLE);

        let stream = LazyStream::new(Remote::new(vec![]), Options::default()).unwrap();
        let path = stream.mirror_path().unwrap().to_owned();
        assert!(path.exists());
        stream.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn stay_restores_position_on_every_exit() {
        let mut cursor = Cursor::new(vec![0u8; 64]);
        cursor.seek(SeekFrom::Start(10)).unwrap();

        {
            let mut stay = Stay::new(&mut cursor).unwrap();
            stay.seek(SeekFrom::Start(50)).unwrap();
        }
        assert_eq!(cursor.stream_position().unwrap(), 10);

        fn seek_and_fail(cursor: &mut Cursor<Vec<u8>>) -> io::Result<()> {
            let mut stay = Stay::new(cursor)?;
            stay.seek(SeekFrom::End(-1))?;
            Err(io::Error::other("boom"))
        }
        assert!(seek_and_fail(&mut cursor).is_err());
        assert_eq!(cursor.stream_position().unwrap(), 10);
    }

    #[test]
    fn default_options() {
        let options = Options::default();
        assert_eq!(options.chunk_size, 10 * 1024);
        assert_eq!(options.mirror, MirrorKind::TempFile);
    }
}
