//! Prints the top-level modules of Python packages without downloading their wheels
//!
//! Each argument is a requirement (`requests`, `numpy>=2`), the URL of a wheel, or the path of a
//! local wheel.  Requirements resolve to the newest matching wheel on the package index.  The
//! output is a JSON object mapping each package name to the lines of its `top_level.txt`.

mod package;
mod simple_api;

use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, Read, Seek},
    path::Path,
    thread,
};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use lazy_archive::{
    CONTENT_CHUNK_SIZE, Directory, HttpTransport, LazyStream, MirrorKind, Options, ZipDirectory,
};
use reqwest::{Url, blocking::Client};
use tracing::{debug, info_span};
use tracing_subscriber::EnvFilter;
use zip::ZipArchive;

use self::package::Location;

#[derive(Parser, Debug)]
struct Args {
    /// Requirements, wheel URLs or local wheel files
    #[arg(required = true)]
    locations: Vec<Location>,

    /// The simple repository requirements are resolved against
    #[arg(long, default_value = "https://pypi.org/simple/")]
    index_url: Url,

    /// Minimum size of each range request, in bytes
    #[arg(long, default_value_t = CONTENT_CHUNK_SIZE)]
    chunk_size: usize,
}

/// The lines of the first `*/top_level.txt` in the archive, or nothing if there isn't one.
fn top_level<R: Read + Seek>(
    mut archive: ZipArchive<R>,
    directory: &ZipDirectory,
) -> Result<Vec<String>> {
    let Some(name) = directory.find(|name| name.ends_with("/top_level.txt")) else {
        return Ok(vec![]);
    };
    let mut contents = String::new();
    archive.by_name(name)?.read_to_string(&mut contents)?;
    Ok(contents.lines().map(str::to_owned).collect())
}

fn remote(client: &Client, url: &Url, options: Options) -> Result<Vec<String>> {
    let transport = HttpTransport::with_client(client.clone(), url.clone());
    let (stream, directory) = LazyStream::open::<ZipDirectory>(transport, options)
        .with_context(|| format!("Unable to open {url}"))?;
    debug!(
        requests = stream.fetch_count(),
        bytes = stream.fetched_bytes(),
        "read the directory"
    );
    top_level(stream.into_zip()?, &directory)
}

fn local(path: &Path) -> Result<Vec<String>> {
    let mut file = File::open(path).with_context(|| format!("Unable to open {}", path.display()))?;
    let directory = ZipDirectory::parse(&mut file)?;
    top_level(ZipArchive::new(file)?, &directory)
}

fn extract(
    client: &Client,
    index: &Url,
    location: &Location,
    options: Options,
) -> Result<Vec<String>> {
    match location {
        Location::Requirement(requirement) => {
            let url = simple_api::find_wheel(client, index, requirement)?;
            debug!(%url, "resolved");
            remote(client, &url, options)
        }
        Location::Url(url) => remote(client, url, options),
        Location::Path(path) => local(path),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let options = Options {
        chunk_size: args.chunk_size,
        mirror: MirrorKind::TempFile,
    };
    let client = &Client::new();
    let index = &args.index_url;

    let results: Vec<_> = thread::scope(|scope| {
        let workers: Vec<_> = args
            .locations
            .iter()
            .map(|location| {
                scope.spawn(move || {
                    let _span = info_span!("extract", %location).entered();
                    extract(client, index, location, options)
                        .map(|lines| (location.package_name(), lines))
                        .with_context(|| format!("Failed on {location}"))
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| {
                worker
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("worker thread panicked")))
            })
            .collect()
    });

    let output = results.into_iter().collect::<Result<BTreeMap<_, _>>>()?;
    serde_json::to_writer_pretty(io::stdout().lock(), &output)?;
    println!();
    Ok(())
}
