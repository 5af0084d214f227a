//! Lists the contents of a remote archive without downloading it
//!
//! Prints the directory as JSON on stdout, or with `--extract`, the contents of one entry.
//! Set `RUST_LOG=lazy_archive=debug` to watch the range requests go by.

use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use lazy_archive::{
    CONTENT_CHUNK_SIZE, ChunkedLayout, HttpTransport, LazyStream, MirrorKind, Options,
    ZipDirectory,
    chunked::Chunk,
};
use reqwest::Url;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    /// A ZIP archive (wheels, jars...)
    Zip,
    /// A zstd:chunked container image layer
    Chunked,
}

#[derive(Parser, Debug)]
struct Args {
    /// The URL of the archive
    url: Url,

    /// Minimum size of each range request, in bytes
    #[arg(long, default_value_t = CONTENT_CHUNK_SIZE)]
    chunk_size: usize,

    /// The kind of archive
    #[arg(long, value_enum, default_value_t = Format::Zip)]
    format: Format,

    /// Write the named ZIP entry to stdout instead of listing
    #[arg(long)]
    extract: Option<String>,

    /// Keep fetched bytes in memory rather than a temporary file
    #[arg(long)]
    memory: bool,
}

#[derive(Serialize)]
struct Fetches {
    length: u64,
    requests: u64,
    bytes: u64,
}

#[derive(Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
enum Report {
    Zip {
        entries: Vec<String>,
        comment: String,
        fetches: Fetches,
    },
    Chunked {
        files: usize,
        inline_bytes: usize,
        content_bytes: u64,
        fetches: Fetches,
    },
}

fn fetches(stream: &LazyStream<HttpTransport>) -> Fetches {
    Fetches {
        length: stream.len(),
        requests: stream.fetch_count(),
        bytes: stream.fetched_bytes(),
    }
}

fn report_zip(directory: &ZipDirectory, fetches: Fetches) -> Report {
    Report::Zip {
        entries: directory.names().to_vec(),
        comment: String::from_utf8_lossy(directory.comment()).into_owned(),
        fetches,
    }
}

fn report_chunked(layout: &ChunkedLayout, fetches: Fetches) -> Report {
    let inline_bytes = layout
        .chunks
        .iter()
        .map(|chunk| match chunk {
            Chunk::Inline(data) => data.len(),
            Chunk::External(_) => 0,
        })
        .sum();

    Report::Chunked {
        files: layout.references().count(),
        inline_bytes,
        content_bytes: layout.content_len(),
        fetches,
    }
}

fn extract(stream: LazyStream<HttpTransport>, name: &str) -> Result<()> {
    let mut archive = stream.into_zip()?;
    let mut entry = archive
        .by_name(name)
        .with_context(|| format!("No entry named {name:?}"))?;
    let mut stdout = io::stdout().lock();
    io::copy(&mut entry, &mut stdout)?;
    stdout.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let options = Options {
        chunk_size: args.chunk_size,
        mirror: if args.memory {
            MirrorKind::Memory
        } else {
            MirrorKind::TempFile
        },
    };
    let transport = HttpTransport::new(args.url.clone());

    let context = || format!("Unable to open {}", args.url);

    let report = match (args.format, &args.extract) {
        (Format::Zip, Some(name)) => {
            let (stream, _) =
                LazyStream::open::<ZipDirectory>(transport, options).with_context(context)?;
            return extract(stream, name);
        }
        (Format::Zip, None) => {
            let (stream, directory) =
                LazyStream::open::<ZipDirectory>(transport, options).with_context(context)?;
            let report = report_zip(&directory, fetches(&stream));
            stream.close()?;
            report
        }
        (Format::Chunked, Some(_)) => bail!("--extract only works with --format zip"),
        (Format::Chunked, None) => {
            let (stream, layout) =
                LazyStream::open::<ChunkedLayout>(transport, options).with_context(context)?;
            let report = report_chunked(&layout, fetches(&stream));
            stream.close()?;
            report
        }
    };

    serde_json::to_writer_pretty(io::stdout().lock(), &report)?;
    println!();
    Ok(())
}
