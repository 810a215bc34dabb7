use bytes::Bytes;
use log::debug;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::error::Error as StdError;
use std::path::{Path, PathBuf};

use crate::error::{FormDataError, Result};
use crate::mime_type::{mime_type_for_extension, mime_type_for_filename};
use crate::source::BodySource;

/// Characters left alone by `application/x-www-form-urlencoded`
const QUERY_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'*')
    .remove(b'-')
    .remove(b'.')
    .remove(b'_');

type AnyStdError = Box<dyn StdError + Send + Sync + 'static>;

/// A value that supplies its own serialization
pub trait EncodePart {
    /// Produce the bytes of the part body
    fn encode_part(&self) -> std::result::Result<Vec<u8>, AnyStdError>;
}

/// Anything that can be appended to a [`FormData`](crate::FormData)
///
/// Each variant is turned into a [`BodySource`] (plus an inferred filename and content type for files) at `append` time.
pub enum Value {
    /// Raw bytes
    Bytes(Bytes),
    /// Text, encoded as UTF-8
    Text(String),
    /// A file on the local filesystem
    File(PathBuf),
    /// A `file://` URL. Any other scheme fails with [`FormDataError::NotAFileReference`]
    FileUrl(String),
    /// Ordered key/value pairs, serialized as `k=v&k=v`
    Query(Vec<(String, String)>),
    /// A JSON array or object
    #[cfg(feature = "json")]
    Json(serde_json::Value),
    /// A value with its own serializer
    Custom(Box<dyn EncodePart>),
    /// A value that could not be interpreted, appending it records [`FormDataError::UnsupportedValueShape`]
    Unsupported(String),
}

impl Value {
    /// Construct a value from bytes
    pub fn bytes<B: Into<Bytes>>(bytes: B) -> Self {
        Value::Bytes(bytes.into())
    }

    /// Construct a value from text
    pub fn text<S: Into<String>>(text: S) -> Self {
        Value::Text(text.into())
    }

    /// Construct a value from a local file path
    pub fn file<P: Into<PathBuf>>(path: P) -> Self {
        Value::File(path.into())
    }

    /// Construct a value from a `file://` URL
    pub fn file_url<S: Into<String>>(url: S) -> Self {
        Value::FileUrl(url.into())
    }

    /// Construct a value from key/value pairs
    pub fn query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Value::Query(
            pairs
                .into_iter()
                .map(|(key, val)| (key.into(), val.into()))
                .collect(),
        )
    }

    /// Construct a value from anything serde can serialize
    #[cfg(feature = "json")]
    pub fn json<T: serde::Serialize + ?Sized>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(json) => Value::Json(json),
            Err(err) => Value::Unsupported(err.to_string()),
        }
    }

    /// Construct a value from a custom encoder
    pub fn custom<E: EncodePart + 'static>(encoder: E) -> Self {
        Value::Custom(Box::new(encoder))
    }

    /// Turn the value into a body source, inferring a filename and content type where possible
    pub fn into_descriptor(self) -> Result<Descriptor> {
        match self {
            Value::Bytes(bytes) => Ok(Descriptor::memory(bytes)),
            Value::Text(text) => Ok(Descriptor::memory(text.into_bytes())),
            Value::File(path) => Descriptor::file(path),
            Value::FileUrl(url) => Descriptor::file(file_url_to_path(&url)?),
            Value::Query(pairs) => Ok(Descriptor::memory(encode_query(&pairs).into_bytes())),
            #[cfg(feature = "json")]
            Value::Json(json) => {
                if !(json.is_array() || json.is_object()) {
                    return Err(FormDataError::UnsupportedValueShape(format!(
                        "expected a JSON array or object, found `{json}`"
                    )));
                }

                let bytes = serde_json::to_vec(&json)
                    .map_err(|err| FormDataError::UnsupportedValueShape(err.to_string()))?;

                Ok(Descriptor::memory(bytes))
            }
            Value::Custom(encoder) => {
                let bytes = encoder
                    .encode_part()
                    .map_err(|err| FormDataError::EncodingFailed(err.to_string()))?;

                Ok(Descriptor::memory(bytes))
            }
            Value::Unsupported(reason) => Err(FormDataError::UnsupportedValueShape(reason)),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Self {
        Value::Text(text.to_string())
    }
}

impl From<String> for Value {
    fn from(text: String) -> Self {
        Value::Text(text)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes.into())
    }
}

impl From<Bytes> for Value {
    fn from(bytes: Bytes) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<PathBuf> for Value {
    fn from(path: PathBuf) -> Self {
        Value::File(path)
    }
}

impl From<&Path> for Value {
    fn from(path: &Path) -> Self {
        Value::File(path.to_path_buf())
    }
}

/// The uniform form of a [`Value`]: a body source plus what could be inferred about it
#[derive(Debug, Clone)]
pub struct Descriptor {
    /// Where the body bytes come from
    pub source: BodySource,
    /// The filename inferred from the value (files only)
    pub filename: Option<String>,
    /// The content type inferred from the value (files only)
    pub content_type: Option<String>,
}

impl Descriptor {
    fn memory<B: Into<Bytes>>(bytes: B) -> Self {
        Descriptor {
            source: BodySource::Memory(bytes.into()),
            filename: None,
            content_type: None,
        }
    }

    fn file(path: PathBuf) -> Result<Self> {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string());

        let content_type = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(mime_type_for_extension);

        let source = BodySource::file(path)?;

        Ok(Descriptor {
            source,
            filename,
            content_type,
        })
    }

    /// Apply explicit overrides.
    ///
    /// The filename is the explicit one, else the inferred one.
    /// The content type is the explicit one, else the inferred one, else looked up from the resolved filename.
    pub fn resolve(
        self,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) -> (BodySource, Option<String>, Option<String>) {
        let filename = filename.map(str::to_string).or(self.filename);

        let content_type = content_type
            .map(str::to_string)
            .or(self.content_type)
            .or_else(|| filename.as_deref().map(mime_type_for_filename));

        (self.source, filename, content_type)
    }
}

fn encode_query(pairs: &[(String, String)]) -> String {
    let mut out = String::new();

    for (idx, (key, val)) in pairs.iter().enumerate() {
        if idx > 0 {
            out.push('&');
        }
        out.extend(utf8_percent_encode(key, QUERY_ESCAPE));
        out.push('=');
        out.extend(utf8_percent_encode(val, QUERY_ESCAPE));
    }

    out
}

/// `file:///tmp/a%20b.txt` -> `/tmp/a b.txt`. Only an empty or `localhost` host is accepted
fn file_url_to_path(url: &str) -> Result<PathBuf> {
    let not_a_file = || FormDataError::NotAFileReference(url.to_string());

    let scheme_end = url.find("://").ok_or_else(not_a_file)?;

    if !url[..scheme_end].eq_ignore_ascii_case("file") {
        return Err(not_a_file());
    }

    let rest = &url[scheme_end + 3..];
    let path_start = rest.find('/').ok_or_else(not_a_file)?;
    let host = &rest[..path_start];

    if !(host.is_empty() || host.eq_ignore_ascii_case("localhost")) {
        return Err(not_a_file());
    }

    let path = &rest[path_start..];
    let path = path.split(['?', '#']).next().unwrap_or(path);

    let decoded = percent_decode_str(path).decode_utf8_lossy();

    debug!("Resolved file URL {url} to {decoded}");

    Ok(PathBuf::from(decoded.into_owned()))
}
