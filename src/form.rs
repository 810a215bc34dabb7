use log::{debug, warn};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::boundary::{boundary_line, empty_ending, random_boundary, BoundaryKind};
use crate::error::{FormDataError, Result};
use crate::part::Part;
use crate::value::Value;

/// Above this many encoded bytes, prefer `write_to` over `encode`
pub const ENCODING_MEMORY_THRESHOLD: u64 = 10_000_000;

pub(crate) const DEFAULT_CHUNK_SIZE: usize = 1024;

/// The main `FormData` struct for building (and decoding) multipart/form-data bodies
///
/// Parts are appended with [`append`](FormData::append), which never fails directly: the first failure is remembered and returned by every later
/// `encode`/`write_to` call. Appending only needs `&self`, so a `FormData` can be shared between threads.
pub struct FormData {
    boundary: String,
    chunk_size: usize,
    store: Mutex<PartStore>,
}

// Parts and the deferred error sit behind the same lock so a reader never sees one updated without the other
#[derive(Default)]
struct PartStore {
    parts: Vec<Part>,
    deferred_error: Option<FormDataError>,
}

impl FormData {
    /// Construct an empty `FormData` with a random boundary
    pub fn new() -> Self {
        Self::with_boundary(random_boundary())
    }

    /// Construct an empty `FormData` with a given boundary
    pub fn with_boundary<I: Into<String>>(boundary: I) -> Self {
        FormData {
            boundary: boundary.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            store: Mutex::new(PartStore::default()),
        }
    }

    /// Set how many bytes are read from a body source at a time when encoding (default 1024)
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub(crate) fn get_chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Gets the boundary
    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// The value for the `Content-Type` header: `multipart/form-data; boundary=<boundary>`
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn lock(&self) -> MutexGuard<'_, PartStore> {
        // Every mutation is a single push or assignment so a poisoned store is still consistent
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a value under the field `name`
    ///
    /// Files get a filename and content type inferred from their path.
    pub fn append<V: Into<Value>>(&self, name: &str, value: V) {
        self.append_with(name, value, None, None);
    }

    /// Append a value under the field `name` with an explicit filename and/or content type
    ///
    /// Any failure (missing file, unsupported value...) is recorded and returned from the next `encode`/`write_to`.
    pub fn append_with<V: Into<Value>>(
        &self,
        name: &str,
        value: V,
        filename: Option<&str>,
        content_type: Option<&str>,
    ) {
        let value: Value = value.into();

        let part = value.into_descriptor().and_then(|descriptor| {
            let (source, filename, content_type) = descriptor.resolve(filename, content_type);
            Part::form_field(name, filename.as_deref(), content_type.as_deref(), source)
        });

        match part {
            Ok(part) => self.append_part(part),
            Err(err) => self.defer_error(name, err),
        }
    }

    /// Append an already constructed part
    pub fn append_part(&self, part: Part) {
        debug!("Appending part with {} bytes", part.len());
        self.lock().parts.push(part);
    }

    fn defer_error(&self, name: &str, err: FormDataError) {
        let mut store = self.lock();

        if store.deferred_error.is_none() {
            debug!("Deferring error for field `{name}`: {err}");
            store.deferred_error = Some(err);
        } else {
            warn!("Ignoring error for field `{name}` as one is already recorded: {err}");
        }
    }

    /// The error recorded by a failed `append`, if any
    pub fn deferred_error(&self) -> Option<FormDataError> {
        self.lock().deferred_error.clone()
    }

    /// A copy of the parts appended so far
    pub fn parts(&self) -> Vec<Part> {
        self.lock().parts.clone()
    }

    /// The number of parts
    pub fn len(&self) -> usize {
        self.lock().parts.len()
    }

    /// Whether there are no parts
    pub fn is_empty(&self) -> bool {
        self.lock().parts.is_empty()
    }

    /// The parts to encode, or the deferred error if an `append` failed
    pub(crate) fn snapshot(&self) -> Result<Vec<Part>> {
        let store = self.lock();

        if let Some(err) = &store.deferred_error {
            return Err(err.clone());
        }

        Ok(store.parts.clone())
    }

    /// The exact number of bytes `encode` would produce, using the declared lengths of the bodies
    pub fn content_length(&self) -> u64 {
        let parts = self.parts();

        if parts.is_empty() {
            return empty_ending(&self.boundary).len() as u64;
        }

        let initial = boundary_line(BoundaryKind::Initial, &self.boundary).len() as u64;
        let encapsulated = boundary_line(BoundaryKind::Encapsulated, &self.boundary).len() as u64;
        let ending = boundary_line(BoundaryKind::Final, &self.boundary).len() as u64;

        let delimiters = initial + encapsulated * (parts.len() as u64 - 1) + ending;

        parts.iter().fold(delimiters, |total, part| {
            total + part.header_bytes().len() as u64 + part.len()
        })
    }

    /// Whether the encoded body is larger than [`ENCODING_MEMORY_THRESHOLD`]
    pub fn exceeds_memory_threshold(&self) -> bool {
        self.content_length() > ENCODING_MEMORY_THRESHOLD
    }
}

impl Default for FormData {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FormData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let store = self.lock();

        f.debug_struct("FormData")
            .field("boundary", &self.boundary)
            .field("parts", &store.parts.len())
            .field("deferred_error", &store.deferred_error)
            .finish()
    }
}
