use std::io::{Read, Seek};

use ::zip::{ZipArchive, result::ZipError};

use crate::{Directory, DirectoryError, Error, LazyStream, ProbeState, RangeTransport};

impl From<ZipError> for DirectoryError {
    fn from(err: ZipError) -> Self {
        match err {
            ZipError::Io(err) => err.into(),
            other => Self::Malformed(other.into()),
        }
    }
}

/// The central directory of a ZIP archive: what a parser needs to list its entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZipDirectory {
    names: Vec<String>,
    comment: Vec<u8>,
}

impl ZipDirectory {
    /// The names of all entries, sorted.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The archive comment.
    #[must_use]
    pub fn comment(&self) -> &[u8] {
        &self.comment
    }

    /// The number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// True if the archive has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Finds the first entry whose name satisfies `predicate`.
    pub fn find(&self, predicate: impl Fn(&str) -> bool) -> Option<&str> {
        self.names
            .iter()
            .map(String::as_str)
            .find(|name| predicate(name))
    }
}

impl Directory for ZipDirectory {
    fn parse<R: Read + Seek>(reader: &mut R) -> Result<Self, DirectoryError> {
        let archive = ZipArchive::new(reader)?;

        let mut names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        names.sort_unstable();

        Ok(Self {
            names,
            comment: archive.comment().to_vec(),
        })
    }
}

impl<T: RangeTransport> LazyStream<T> {
    /// Hands a ready stream to a [`ZipArchive`], for reading entries.  Only the parts of the
    /// object holding the entries that are actually read get downloaded.
    ///
    /// # Errors
    ///
    /// Fails if the stream isn't ready or the archive can't be parsed.
    pub fn into_zip(self) -> Result<ZipArchive<Self>, Error> {
        if self.state != ProbeState::Ready {
            return Err(Error::State(self.state));
        }

        ZipArchive::new(self).map_err(|err| match DirectoryError::from(err) {
            DirectoryError::Io(err) => Error::from_io(err),
            DirectoryError::Malformed(err) => Error::CorruptArchive(err),
        })
    }
}
