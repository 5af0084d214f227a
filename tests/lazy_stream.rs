//! Opening and reading remote archives through an in-memory transport.
#![allow(clippy::unwrap_used)]

use std::{
    cell::RefCell,
    io::{Cursor, Read, Seek, SeekFrom, Write},
    rc::Rc,
};

use lazy_archive::{
    Directory, DirectoryError, Error, Head, Interval, LazyStream, MirrorKind, Options, ProbeState,
    RangeTransport, ZipDirectory,
};
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

#[derive(Debug, Default)]
struct Log {
    heads: usize,
    ranges: Vec<(u64, u64)>,
}

#[derive(Debug)]
struct Server {
    data: Vec<u8>,
    accept_ranges: Option<&'static str>,
    /// Ranged requests starting below this offset fail with a 503.
    broken_below: u64,
    log: Rc<RefCell<Log>>,
}

impl Server {
    fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            accept_ranges: Some("bytes"),
            broken_below: 0,
            log: Rc::default(),
        }
    }
}

impl RangeTransport for Server {
    type Body = Cursor<Vec<u8>>;

    fn head(&mut self) -> Result<Head, Error> {
        self.log.borrow_mut().heads += 1;
        Ok(Head {
            length: Some(self.data.len() as u64),
            accept_ranges: self.accept_ranges.map(str::to_owned),
        })
    }

    #[allow(clippy::cast_possible_truncation)]
    fn get_range(&mut self, range: Interval) -> Result<Self::Body, Error> {
        self.log.borrow_mut().ranges.push((range.start, range.end));
        if range.start < self.broken_below {
            return Err(Error::Status(503));
        }
        let slice = &self.data[range.start as usize..=range.end as usize];
        Ok(Cursor::new(slice.to_vec()))
    }
}

fn options(chunk_size: usize) -> Options {
    Options {
        chunk_size,
        mirror: MirrorKind::Memory,
    }
}

/// A stored (uncompressed) archive with a large payload followed by a small directory.
fn wheel() -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(vec![]));
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);

    writer.start_file("demo/__init__.py", stored).unwrap();
    #[allow(clippy::cast_possible_truncation)]
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i * 7 % 256) as u8).collect();
    writer.write_all(&payload).unwrap();

    writer
        .start_file("demo-1.0.dist-info/top_level.txt", stored)
        .unwrap();
    writer.write_all(b"demo\n").unwrap();

    writer.finish().unwrap().into_inner()
}

/// Accepts anything, so opening costs exactly one tail fetch.
#[derive(Debug)]
struct Anything;

impl Directory for Anything {
    fn parse<R: Read + Seek>(_reader: &mut R) -> Result<Self, DirectoryError> {
        Ok(Self)
    }
}

/// Parses only if the object ends with `0xAA`.
#[derive(Debug)]
struct EndsWithMarker;

impl Directory for EndsWithMarker {
    fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self, DirectoryError> {
        reader.seek(SeekFrom::End(-1))?;
        let mut byte = [0];
        reader.read_exact(&mut byte)?;
        if byte[0] == 0xAA {
            Ok(Self)
        } else {
            Err(DirectoryError::Malformed(anyhow::anyhow!("no marker")))
        }
    }
}

fn ranges(log: &Rc<RefCell<Log>>) -> Vec<(u64, u64)> {
    log.borrow().ranges.clone()
}

#[test]
fn directory_at_the_end_costs_one_chunk() {
    let data = wheel();
    let len = data.len() as u64;
    let server = Server::new(data);
    let log = Rc::clone(&server.log);

    let (stream, directory): (_, ZipDirectory) =
        LazyStream::open(server, options(10 * 1024)).unwrap();

    assert_eq!(
        directory.names(),
        ["demo-1.0.dist-info/top_level.txt", "demo/__init__.py"]
    );
    assert_eq!(ranges(&log), [(len - 10 * 1024, len - 1)]);
    assert_eq!(log.borrow().heads, 1);
    assert_eq!(stream.state(), ProbeState::Ready);
    assert_eq!(stream.len(), len);
    assert_eq!(stream.fetched_bytes(), 10 * 1024);
}

#[test]
fn extracting_one_entry_fetches_only_its_neighbourhood() {
    let data = wheel();
    let len = data.len() as u64;
    let server = Server::new(data);
    let log = Rc::clone(&server.log);

    let (stream, directory): (_, ZipDirectory) =
        LazyStream::open(server, options(10 * 1024)).unwrap();
    let name = directory
        .find(|name| name.ends_with("/top_level.txt"))
        .unwrap()
        .to_owned();

    let mut archive = stream.into_zip().unwrap();
    let mut contents = String::new();
    archive
        .by_name(&name)
        .unwrap()
        .read_to_string(&mut contents)
        .unwrap();
    assert_eq!(contents, "demo\n");

    // the big payload at the front was never requested
    assert!(ranges(&log).iter().all(|&(start, _)| start >= len - 20 * 1024));
}

#[test]
fn server_without_range_support_is_rejected_before_any_fetch() {
    let mut server = Server::new(wheel());
    server.accept_ranges = None;
    let log = Rc::clone(&server.log);

    let err = LazyStream::open::<ZipDirectory>(server, options(1024)).unwrap_err();

    assert!(matches!(err, Error::RangeUnsupported));
    assert_eq!(log.borrow().heads, 1);
    assert!(ranges(&log).is_empty());
}

#[test]
fn failed_negotiation_precludes_probing() {
    let mut server = Server::new(wheel());
    server.accept_ranges = Some("none");
    let mut stream = LazyStream::new(server, options(1024)).unwrap();

    assert!(matches!(stream.negotiate(), Err(Error::RangeUnsupported)));
    assert_eq!(stream.state(), ProbeState::Failed);
    assert!(matches!(
        stream.probe::<ZipDirectory>(),
        Err(Error::State(ProbeState::Failed))
    ));
}

#[test]
fn overlapping_prefetches_never_refetch() {
    let server = Server::new(vec![0; 1000]);
    let log = Rc::clone(&server.log);
    let (mut stream, _) = LazyStream::open::<Anything>(server, options(10)).unwrap();
    assert_eq!(ranges(&log), [(990, 999)]);

    stream.prefetch(0, 9).unwrap();
    stream.prefetch(5, 14).unwrap();
    stream.prefetch(5, 14).unwrap();

    assert_eq!(ranges(&log)[1..], [(0, 9), (10, 14)]);
    assert_eq!(
        stream.intervals(),
        [Interval::new(0, 14), Interval::new(990, 999)]
    );
}

#[test]
fn adjacent_and_disjoint_prefetches() {
    let server = Server::new(vec![0; 1000]);
    let log = Rc::clone(&server.log);
    let (mut stream, _) = LazyStream::open::<Anything>(server, options(10)).unwrap();

    stream.prefetch(0, 9).unwrap();
    stream.prefetch(10, 19).unwrap();
    stream.prefetch(100, 109).unwrap();

    assert_eq!(ranges(&log)[1..], [(0, 9), (10, 19), (100, 109)]);
    assert_eq!(
        stream.intervals(),
        [
            Interval::new(0, 19),
            Interval::new(100, 109),
            Interval::new(990, 999)
        ]
    );
}

#[test]
fn trailing_marker_is_found_in_the_first_chunk() {
    let server = Server::new(vec![0xAA; 250]);
    let log = Rc::clone(&server.log);

    let (stream, _) = LazyStream::open::<EndsWithMarker>(server, options(100)).unwrap();

    assert_eq!(ranges(&log), [(150, 249)]);
    assert_eq!(stream.fetch_count(), 1);
}

#[test]
fn parsers_fetch_whatever_they_read() {
    #[derive(Debug)]
    struct WholeObject;

    impl Directory for WholeObject {
        fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self, DirectoryError> {
            let mut all = vec![];
            reader.seek(SeekFrom::Start(0))?;
            reader.read_to_end(&mut all)?;
            if all.len() == 250 {
                Ok(Self)
            } else {
                Err(DirectoryError::Malformed(anyhow::anyhow!("short read")))
            }
        }
    }

    let server = Server::new(vec![0; 250]);
    let log = Rc::clone(&server.log);

    let (stream, _) = LazyStream::open::<WholeObject>(server, options(100)).unwrap();

    assert_eq!(ranges(&log), [(150, 249), (0, 149)]);
    assert_eq!(stream.intervals(), [Interval::new(0, 249)]);
}

#[test]
fn unparseable_object_fails_after_mirroring_everything() {
    let server = Server::new(vec![0x55; 250]);
    let log = Rc::clone(&server.log);
    let mut stream = LazyStream::new(server, options(100)).unwrap();
    stream.negotiate().unwrap();

    let err = stream.probe::<EndsWithMarker>().unwrap_err();

    assert!(matches!(err, Error::CorruptArchive(_)));
    assert_eq!(stream.state(), ProbeState::Failed);
    // [150, 249], then [50, 149], then [0, 49]: each byte exactly once
    assert_eq!(ranges(&log), [(150, 249), (50, 149), (0, 49)]);
    assert_eq!(stream.intervals(), [Interval::new(0, 249)]);
}

#[test]
fn directory_running_past_the_end_is_corrupt() {
    let mut writer = ZipWriter::new(Cursor::new(vec![]));
    let stored = FileOptions::default().compression_method(CompressionMethod::Stored);
    writer.start_file("demo/data.bin", stored).unwrap();
    writer.write_all(&[0x33; 5000]).unwrap();
    let mut data = writer.finish().unwrap().into_inner();

    // claim a 64 KiB file name in the central directory header
    let header = data
        .windows(4)
        .position(|window| window == b"PK\x01\x02")
        .unwrap();
    data[header + 28..header + 30].copy_from_slice(&[0xff, 0xff]);

    let len = data.len() as u64;
    let server = Server::new(data);
    let log = Rc::clone(&server.log);
    let mut stream = LazyStream::new(server, options(1024)).unwrap();
    stream.negotiate().unwrap();

    let err = stream.probe::<ZipDirectory>().unwrap_err();

    assert!(matches!(err, Error::CorruptArchive(_)), "{err:?}");
    assert_eq!(stream.state(), ProbeState::Failed);
    // the name read pulled in the rest of the object; later steps fetched nothing
    assert_eq!(ranges(&log), [(len - 1024, len - 1), (0, len - 1025)]);
    assert_eq!(stream.intervals(), [Interval::new(0, len - 1)]);
}

#[test]
fn not_a_zip_is_corrupt() {
    let err = LazyStream::open::<ZipDirectory>(Server::new(vec![7; 3000]), options(1024))
        .unwrap_err();
    assert!(matches!(err, Error::CorruptArchive(_)));
}

#[test]
fn empty_object_is_corrupt_without_fetching() {
    let server = Server::new(vec![]);
    let log = Rc::clone(&server.log);
    let err = LazyStream::open::<ZipDirectory>(server, options(1024)).unwrap_err();
    assert!(matches!(err, Error::CorruptArchive(_)));
    assert!(ranges(&log).is_empty());
}

#[test]
fn transport_failure_while_probing_is_not_retried() {
    let mut server = Server::new(wheel());
    server.broken_below = u64::MAX;
    let log = Rc::clone(&server.log);

    let err = LazyStream::open::<ZipDirectory>(server, options(1024)).unwrap_err();

    assert!(matches!(err, Error::Status(503)));
    assert_eq!(ranges(&log).len(), 1);
}

#[test]
fn transport_failure_while_reading_keeps_cursor_and_bookkeeping() {
    let data = wheel();
    let mut server = Server::new(data.clone());
    server.broken_below = 4096;
    let log = Rc::clone(&server.log);
    let (mut stream, _) = LazyStream::open::<Anything>(server, options(1024)).unwrap();
    let before = stream.intervals().to_vec();

    stream.seek(SeekFrom::Start(100)).unwrap();
    let err = stream.read(&mut [0; 16]).unwrap_err();

    assert!(matches!(Error::from_io(err), Error::Status(503)));
    assert_eq!(stream.stream_position().unwrap(), 100);
    assert_eq!(stream.intervals(), before);
    assert_eq!(ranges(&log).len(), 2);

    // bytes past the broken region are still readable
    let mut buf = [0; 16];
    stream.seek(SeekFrom::Start(5000)).unwrap();
    stream.read_exact(&mut buf).unwrap();
    assert_eq!(buf, data[5000..5016]);
}

#[test]
fn probing_restores_the_cursor() {
    let server = Server::new(wheel());
    let mut stream = LazyStream::new(server, options(4096)).unwrap();
    stream.negotiate().unwrap();
    stream.seek(SeekFrom::Start(42)).unwrap();

    stream.probe::<ZipDirectory>().unwrap();

    assert_eq!(stream.stream_position().unwrap(), 42);
}

#[test]
fn temp_file_mirror_is_removed_on_close() {
    let (stream, _): (_, ZipDirectory) = LazyStream::open(
        Server::new(wheel()),
        Options {
            chunk_size: 2048,
            mirror: MirrorKind::TempFile,
        },
    )
    .unwrap();

    let path = stream.mirror_path().unwrap().to_owned();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), stream.len());
    stream.close().unwrap();
    assert!(!path.exists());
}
