//! Random access to remote archives over HTTP range requests.
//!
//! A [`LazyStream`] presents a remote object as a seekable [`std::io::Read`] without downloading
//! it.  Bytes are fetched with range requests as they are read and kept in a local
//! [`SparseMirror`]; an [`IntervalTracker`] remembers what is already there so nothing is
//! fetched twice.  When opened, the stream fetches the end of the object one chunk at a time
//! until an archive [`Directory`] (a ZIP central directory, or a zstd:chunked manifest) parses,
//! which for a well-formed archive takes one or two requests whatever its size.
//!
//! ```ignore
//! use lazy_archive::{HttpTransport, LazyStream, Options, ZipDirectory};
//!
//! # fn main() -> anyhow::Result<()> {
//! let url = "https://example.com/package.whl".parse()?;
//! let (stream, directory): (_, ZipDirectory) =
//!     LazyStream::open(HttpTransport::new(url), Options::default())?;
//! for name in directory.names() {
//!     println!("{name}");
//! }
//! println!("{} bytes fetched", stream.fetched_bytes());
//! # Ok(())
//! # }
//! ```
mod archive;
pub mod chunked;
mod error;
mod fetch;
mod interval;
mod mirror;
mod probe;
mod stream;
mod transport;

#[cfg(test)]
mod testing;

pub use self::archive::ZipDirectory;
pub use self::chunked::ChunkedLayout;
pub use self::error::Error;
pub use self::fetch::RangeFetcher;
pub use self::interval::{Interval, IntervalTracker};
pub use self::mirror::{MirrorKind, SparseMirror};
pub use self::probe::{Directory, DirectoryError, ProbeState};
pub use self::stream::{CONTENT_CHUNK_SIZE, LazyStream, Options};
pub use self::transport::{Head, HttpTransport, RangeTransport};
