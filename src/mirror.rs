use std::{
    io::{self, Cursor, Read, Seek, SeekFrom, Write},
    path::Path,
};

use tempfile::NamedTempFile;

/// Where the mirror keeps its bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MirrorKind {
    /// A named temporary file, deleted when the mirror is released.
    #[default]
    TempFile,
    /// A growable buffer in memory.
    Memory,
}

#[derive(Debug)]
enum Backing {
    File(NamedTempFile),
    Memory(Cursor<Vec<u8>>),
}

/// A local random-access copy of the remote object.
///
/// Only the ranges recorded by the [`crate::IntervalTracker`] hold meaningful data; everything
/// else is zero-filled (or a hole in the temporary file).  The mirror owns a cursor of its own,
/// which is the cursor of the stream built on top of it.
#[derive(Debug)]
pub struct SparseMirror {
    backing: Backing,
}

impl SparseMirror {
    /// Creates an empty mirror of the requested kind.
    ///
    /// # Errors
    ///
    /// Fails if the temporary file can't be created.
    pub fn new(kind: MirrorKind) -> io::Result<Self> {
        let backing = match kind {
            MirrorKind::TempFile => Backing::File(NamedTempFile::new()?),
            MirrorKind::Memory => Backing::Memory(Cursor::new(vec![])),
        };
        Ok(Self { backing })
    }

    /// The path of the backing file, if there is one.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(file) => Some(file.path()),
            Backing::Memory(_) => None,
        }
    }

    /// The current size of the mirror.
    ///
    /// # Errors
    ///
    /// Fails if the metadata of the backing file can't be read.
    pub fn size(&self) -> io::Result<u64> {
        match &self.backing {
            Backing::File(file) => Ok(file.as_file().metadata()?.len()),
            Backing::Memory(cursor) => Ok(cursor.get_ref().len() as u64),
        }
    }

    /// Resizes the mirror to `size` bytes, or to the current position if `size` is `None`.
    /// The position itself is left alone.  Returns the new size.
    ///
    /// # Errors
    ///
    /// Fails if the backing file can't be resized, or if `size` doesn't fit in memory.
    pub fn truncate(&mut self, size: Option<u64>) -> io::Result<u64> {
        let size = match size {
            Some(size) => size,
            None => self.stream_position()?,
        };
        match &mut self.backing {
            Backing::File(file) => file.as_file().set_len(size)?,
            Backing::Memory(cursor) => {
                let size = usize::try_from(size).map_err(io::Error::other)?;
                cursor.get_mut().resize(size, 0);
            }
        }
        Ok(size)
    }

    /// Releases the mirror, deleting the backing file.
    ///
    /// # Errors
    ///
    /// Fails if the backing file can't be removed.
    pub fn close(self) -> io::Result<()> {
        match self.backing {
            Backing::File(file) => file.close(),
            Backing::Memory(_) => Ok(()),
        }
    }
}

impl Read for SparseMirror {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.backing {
            Backing::File(file) => file.read(buf),
            Backing::Memory(cursor) => cursor.read(buf),
        }
    }
}

impl Write for SparseMirror {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.backing {
            Backing::File(file) => file.write(buf),
            Backing::Memory(cursor) => cursor.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.backing {
            Backing::File(file) => file.flush(),
            Backing::Memory(cursor) => cursor.flush(),
        }
    }
}

impl Seek for SparseMirror {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.backing {
            Backing::File(file) => file.seek(pos),
            Backing::Memory(cursor) => cursor.seek(pos),
        }
    }
}
