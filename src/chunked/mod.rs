//! zstd:chunked layers.  The footer at the end of the file points at a zstd-compressed manifest
//! (a table of contents with the compressed range of every regular file) and a tar-split stream
//! (the tar headers and padding in between), which together describe the whole layer.
mod format;

use core::ops::Range;
use std::{
    collections::HashMap,
    io::{self, Read, Seek, SeekFrom, Write},
};

use anyhow::{Context, Result, anyhow, ensure};

use self::format::{Footer, FrameRef, Manifest, TarSplitEntry};
use crate::{Directory, DirectoryError};

/// A compressed range in a zstd:chunked file, with size and checksum information about the
/// uncompressed data at that range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentReference {
    /// The range itself, in bytes, in the compressed file.
    pub range: Range<u64>,

    /// The digest of the data at the range, after decompression.
    pub digest: String,

    /// The size of the data at the range, after decompression.
    pub size: u64,
}

/// A piece of the reconstructed layer: either literal bytes from the tar-split stream, or a
/// regular file stored elsewhere in the layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// The data appears directly.
    Inline(Box<[u8]>),
    /// The data is the decompressed content of the referenced range.
    External(ContentReference),
}

/// Where one of the metadata frames lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataReference {
    /// The compressed frame, in bytes, in the file.
    pub range: Range<u64>,

    /// The size of the frame after decompression.
    pub uncompressed_size: u64,
}

impl From<&FrameRef> for MetadataReference {
    fn from(frame: &FrameRef) -> Self {
        let start = frame.offset.get();
        Self {
            range: start..start.saturating_add(frame.compressed_len.get()),
            uncompressed_size: frame.uncompressed_len.get(),
        }
    }
}

/// The directory of a zstd:chunked layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedLayout {
    /// The manifest frame.
    pub manifest: MetadataReference,
    /// The tar-split frame.
    pub tarsplit: MetadataReference,
    /// The pieces of the uncompressed tar stream, in order.
    pub chunks: Vec<Chunk>,
}

fn decompress(frame: &[u8], reference: &MetadataReference) -> Result<Vec<u8>> {
    let data = zstd::decode_all(frame)?;
    ensure!(
        data.len() as u64 == reference.uncompressed_size,
        "metadata frame at {:?} decompressed to {} bytes, expected {}",
        reference.range,
        data.len(),
        reference.uncompressed_size
    );
    Ok(data)
}

/// Builds the chunk list from the decompressed manifest and tar-split.
fn decode_chunks(manifest: &[u8], tarsplit: &[u8]) -> Result<Vec<Chunk>> {
    let manifest: Manifest = serde_json::from_slice(manifest)?;
    ensure!(
        manifest.version == 1,
        "Incorrect zstd:chunked CRFS manifest version"
    );

    // Only regular files with content have all of these.
    let by_name: HashMap<String, ContentReference> = manifest
        .entries
        .into_iter()
        .filter_map(|entry| {
            let reference = ContentReference {
                range: entry.offset?..entry.end_offset?,
                digest: entry.digest?,
                size: entry.size?,
            };
            Some((entry.name, reference))
        })
        .collect();

    let mut chunks = vec![];
    for line in std::str::from_utf8(tarsplit)?.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let entry: TarSplitEntry = serde_json::from_str(line)?;
        match entry {
            TarSplitEntry {
                name: Some(name),
                size: Some(size),
                ..
            } if size > 0 => {
                let reference = by_name.get(&name).with_context(|| {
                    format!("Filename {name} in zstd:chunked tarsplit missing from manifest")
                })?;
                ensure!(size == reference.size, "size mismatch for {name}");
                chunks.push(Chunk::External(reference.clone()));
            }
            TarSplitEntry {
                payload: Some(payload),
                ..
            } => chunks.push(Chunk::Inline(payload)),
            _ => {}
        }
    }

    Ok(chunks)
}

fn read_range<R: Read + Seek>(reader: &mut R, range: &Range<u64>) -> io::Result<Vec<u8>> {
    let len = range
        .end
        .checked_sub(range.start)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "reversed range"))?;
    let len = usize::try_from(len).map_err(io::Error::other)?;
    let mut data = vec![0; len];
    reader.seek(SeekFrom::Start(range.start))?;
    reader.read_exact(&mut data)?;
    Ok(data)
}

impl ChunkedLayout {
    /// Every external reference, in layer order.  Useful for deciding what to prefetch.
    pub fn references(&self) -> impl Iterator<Item = &ContentReference> {
        self.chunks.iter().filter_map(|chunk| match chunk {
            Chunk::External(reference) => Some(reference),
            Chunk::Inline(_) => None,
        })
    }

    /// The total number of compressed bytes held by regular files.
    #[must_use]
    pub fn content_len(&self) -> u64 {
        self.references()
            .map(|reference| reference.range.end.saturating_sub(reference.range.start))
            .sum()
    }

    /// Reconstructs the uncompressed tar stream into `writer`, reading (and decompressing) the
    /// content of every regular file from `reader`.
    ///
    /// # Errors
    ///
    /// Fails if reading or writing fails, or if a file doesn't decompress to its recorded size.
    pub fn write_to<R: Read + Seek, W: Write>(&self, reader: &mut R, writer: &mut W) -> Result<()> {
        for chunk in &self.chunks {
            match chunk {
                Chunk::Inline(data) => writer.write_all(data)?,
                Chunk::External(reference) => {
                    let frame = read_range(reader, &reference.range)?;
                    let data = zstd::decode_all(&frame[..])?;
                    ensure!(
                        data.len() as u64 == reference.size,
                        "{} decompressed to {} bytes, expected {}",
                        reference.digest,
                        data.len(),
                        reference.size
                    );
                    writer.write_all(&data)?;
                }
            }
        }
        Ok(())
    }
}

impl Directory for ChunkedLayout {
    fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self, DirectoryError> {
        let length = reader.seek(SeekFrom::End(0))?;
        let metadata_end = length
            .checked_sub(Footer::SIZE as u64)
            .ok_or_else(|| DirectoryError::Malformed(anyhow!("too short for zstd:chunked")))?;

        let mut tail = [0; Footer::SIZE];
        reader.seek(SeekFrom::Start(metadata_end))?;
        reader.read_exact(&mut tail)?;
        let footer = Footer::from_tail(&tail)
            .ok_or_else(|| DirectoryError::Malformed(anyhow!("no zstd:chunked footer")))?;

        let manifest = MetadataReference::from(&footer.manifest);
        let tarsplit = MetadataReference::from(&footer.tarsplit);
        for reference in [&manifest, &tarsplit] {
            if reference.range.end > metadata_end {
                return Err(DirectoryError::Malformed(anyhow!(
                    "metadata frame {:?} overlaps the footer",
                    reference.range
                )));
            }
        }

        let manifest_frame = read_range(reader, &manifest.range)?;
        let tarsplit_frame = read_range(reader, &tarsplit.range)?;

        let chunks = decompress(&manifest_frame, &manifest)
            .and_then(|manifest_data| {
                let tarsplit_data = decompress(&tarsplit_frame, &tarsplit)?;
                decode_chunks(&manifest_data, &tarsplit_data)
            })
            .map_err(DirectoryError::Malformed)?;

        Ok(Self {
            manifest,
            tarsplit,
            chunks,
        })
    }
}
