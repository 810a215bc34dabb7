use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Convenience alias used throughout the crate
pub type Result<T, E = FormDataError> = std::result::Result<T, E>;

#[derive(Error, Debug, Clone)]
/// The Standard Error Type
///
/// The error is `Clone` so that a failure captured during `append` can be handed out again by every later `encode` or `write_to` call.
/// Underlying io errors are shared behind an `Arc` and are available via `source()`.
pub enum FormDataError {
    /// Given if a value that should be uploaded as a file points somewhere other than the local filesystem
    #[error("The URL `{0}` is not a file URL")]
    NotAFileReference(String),
    /// Given if a file value doesn't exist, is a directory or can't be inspected
    #[error("The file `{}` is unreachable or is a directory", .path.display())]
    FileUnreachableOrIsDirectory {
        /// The path that was checked
        path: PathBuf,
        /// The underlying io error, if there was one
        #[source]
        source: Option<Arc<io::Error>>,
    },
    /// Given if a body source could not be opened for reading
    #[error("Failed to open a stream for `{name}`")]
    StreamOpenFailed {
        /// Description of the source (usually the path)
        name: String,
        /// The underlying io error
        #[source]
        source: Arc<io::Error>,
    },
    /// Given if reading from a body source failed part way through
    #[error("Failed to read from the stream for `{name}`")]
    StreamReadFailed {
        /// Description of the source
        name: String,
        /// The underlying io error
        #[source]
        source: Arc<io::Error>,
    },
    /// Given if a body source produced a different number of bytes than it declared
    #[error("Length mismatch for `{name}`: expected {expected} bytes, read {actual}")]
    LengthMismatch {
        /// Description of the source
        name: String,
        /// The declared length
        expected: u64,
        /// The number of bytes actually drained
        actual: u64,
    },
    /// Given if writing into the output sink failed
    #[error("Failed to write to the output sink")]
    SinkWriteFailed(#[source] Arc<io::Error>),
    /// Given if the output file already exists
    #[error("The destination `{}` already exists", .0.display())]
    DestinationAlreadyExists(PathBuf),
    /// Given if the output path can't be written as a file
    #[error("The destination `{}` is not a valid file path", .0.display())]
    InvalidDestination(PathBuf),
    /// Given if the content type has no usable `boundary=` parameter
    #[error("The content type `{0}` has no multipart boundary")]
    MissingBoundary(String),
    /// Given if a value couldn't be turned into bytes (e.g. JSON that isn't an array or object)
    #[error("Unsupported value shape: {0}")]
    UnsupportedValueShape(String),
    /// Given if a header value contains bytes that are not allowed in a header
    #[error("Invalid value for the `{0}` header")]
    InvalidHeaderValue(String),
    /// Given if a custom encoder reported a failure
    #[error("Failed to encode a custom value: {0}")]
    EncodingFailed(String),
    /// Given if `write_to_cancellable` observed its cancel flag
    #[error("Writing was cancelled")]
    Cancelled,
    /// Given for other io failures against a destination
    #[error(transparent)]
    Io(Arc<io::Error>),
}

impl From<io::Error> for FormDataError {
    fn from(err: io::Error) -> Self {
        FormDataError::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn descriptions_name_the_failure() {
        let err = FormDataError::NotAFileReference("https://example.com/a.png".into());
        assert!(err.to_string().contains("file URL"));

        let err = FormDataError::MissingBoundary("multipart/form-data".into());
        assert!(err.to_string().contains("boundary"));

        let err = FormDataError::DestinationAlreadyExists(PathBuf::from("/tmp/out.bin"));
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn clones_share_the_io_source() {
        let err = FormDataError::SinkWriteFailed(Arc::new(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "pipe closed",
        )));

        let cloned = err.clone();

        let source = cloned.source().expect("should have a source");
        assert_eq!(source.to_string(), "pipe closed");
    }
}
