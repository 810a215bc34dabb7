use bytes::Bytes;
use log::debug;
use std::fs::File;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{FormDataError, Result};

/// Where the body of a part comes from, along with its declared length
///
/// Sources are cheap to clone: in-memory bytes are reference counted and files are only a path.
/// Files are opened lazily when encoding and closed as soon as the reader is dropped.
#[derive(Debug, Clone)]
pub enum BodySource {
    /// Bytes held in memory
    Memory(Bytes),
    /// A file on disk, with the size that was reported when it was appended
    File {
        /// The path of the file
        path: PathBuf,
        /// The size of the file in bytes
        len: u64,
    },
}

impl BodySource {
    /// Construct a file source, checking the file exists and recording its size
    pub fn file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();

        let metadata = std::fs::metadata(&path).map_err(|err| {
            FormDataError::FileUnreachableOrIsDirectory {
                path: path.clone(),
                source: Some(Arc::new(err)),
            }
        })?;

        if metadata.is_dir() {
            return Err(FormDataError::FileUnreachableOrIsDirectory { path, source: None });
        }

        debug!("File source {} has {} bytes", path.display(), metadata.len());

        Ok(BodySource::File {
            path,
            len: metadata.len(),
        })
    }

    /// The declared length in bytes
    pub fn len(&self) -> u64 {
        match self {
            BodySource::Memory(bytes) => bytes.len() as u64,
            BodySource::File { len, .. } => *len,
        }
    }

    /// Whether the declared length is zero
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A short description used in errors and logs
    pub fn describe(&self) -> String {
        match self {
            BodySource::Memory(bytes) => format!("<{} bytes in memory>", bytes.len()),
            BodySource::File { path, .. } => path.display().to_string(),
        }
    }

    /// Open the source for reading
    pub fn open(&self) -> Result<SourceReader> {
        match self {
            BodySource::Memory(bytes) => Ok(SourceReader::Memory(Cursor::new(bytes.clone()))),
            BodySource::File { path, .. } => open_file(path).map(SourceReader::File),
        }
    }

    /// Read the whole source into memory, checking the declared length
    pub fn read_to_bytes(&self) -> Result<Bytes> {
        if let BodySource::Memory(bytes) = self {
            return Ok(bytes.clone());
        }

        let mut reader = self.open()?;
        let mut buf = Vec::with_capacity(self.len() as usize);

        reader
            .read_to_end(&mut buf)
            .map_err(|err| FormDataError::StreamReadFailed {
                name: self.describe(),
                source: Arc::new(err),
            })?;

        if buf.len() as u64 != self.len() {
            return Err(FormDataError::LengthMismatch {
                name: self.describe(),
                expected: self.len(),
                actual: buf.len() as u64,
            });
        }

        Ok(Bytes::from(buf))
    }
}

fn open_file(path: &Path) -> Result<File> {
    debug!("Opening file source {}", path.display());

    File::open(path).map_err(|err| FormDataError::StreamOpenFailed {
        name: path.display().to_string(),
        source: Arc::new(err),
    })
}

impl From<Bytes> for BodySource {
    fn from(bytes: Bytes) -> Self {
        BodySource::Memory(bytes)
    }
}

/// An open reader over a [`BodySource`]
///
/// Dropping the reader closes any underlying file.
pub enum SourceReader {
    /// Reading out of memory
    Memory(Cursor<Bytes>),
    /// Reading out of an open file
    File(File),
}

impl Read for SourceReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            SourceReader::Memory(cursor) => cursor.read(buf),
            SourceReader::File(file) => file.read(buf),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn memory_source_reads_back() {
        let source = BodySource::from(Bytes::from_static(b"Lorem Ipsum\n"));

        assert_eq!(source.len(), 12);

        let mut out = Vec::new();
        source.open().unwrap().read_to_end(&mut out).unwrap();

        assert_eq!(out, b"Lorem Ipsum\n");
    }

    #[test]
    fn file_source_records_size() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"dolphin\nwhale").unwrap();

        let source = BodySource::file(file.path()).unwrap();

        assert_eq!(source.len(), 13);
        assert_eq!(&source.read_to_bytes().unwrap()[..], b"dolphin\nwhale");
    }

    #[test]
    fn missing_file_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();

        let err = BodySource::file(dir.path().join("nope.txt")).unwrap_err();

        assert!(matches!(
            err,
            FormDataError::FileUnreachableOrIsDirectory { source: Some(_), .. }
        ));
    }

    #[test]
    fn directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();

        let err = BodySource::file(dir.path()).unwrap_err();

        assert!(matches!(
            err,
            FormDataError::FileUnreachableOrIsDirectory { source: None, .. }
        ));
    }

    #[test]
    fn truncated_file_is_a_length_mismatch() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"0123456789").unwrap();

        let source = BodySource::file(file.path()).unwrap();

        file.as_file().set_len(4).unwrap();

        let err = source.read_to_bytes().unwrap_err();

        assert!(matches!(
            err,
            FormDataError::LengthMismatch {
                expected: 10,
                actual: 4,
                ..
            }
        ));
    }
}
