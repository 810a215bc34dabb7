use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::boundary::{boundary_line, empty_ending, BoundaryKind};
use crate::error::{FormDataError, Result};
use crate::form::{FormData, ENCODING_MEMORY_THRESHOLD};
use crate::part::Part;
use crate::source::SourceReader;

/// The encoded body of a [`FormData`], produced chunk by chunk
///
/// Header and boundary bytes are yielded as their own chunks, and bodies are read `chunk_size` bytes at a time so large files are never held in memory.
/// After an error is returned the iterator is finished and any open file is closed.
pub struct EncodedChunks {
    boundary: String,
    chunk_size: usize,
    items: VecDeque<Part>,
    state: Option<State>,
    written: u64,
}

enum State {
    WritingHeader { part: Part, is_first: bool },
    WritingBody(BodyState),
    Empty,
}

struct BodyState {
    part: Part,
    reader: SourceReader,
    read: u64,
}

impl EncodedChunks {
    fn new(boundary: &str, chunk_size: usize, parts: Vec<Part>) -> Self {
        let mut items: VecDeque<Part> = parts.into();

        let state = match items.pop_front() {
            Some(part) => State::WritingHeader {
                part,
                is_first: true,
            },
            None => State::Empty,
        };

        EncodedChunks {
            boundary: boundary.to_string(),
            chunk_size,
            items,
            state: Some(state),
            written: 0,
        }
    }

    /// The number of bytes produced so far
    pub fn written(&self) -> u64 {
        self.written
    }

    fn write_header(&self, part: &Part, is_first: bool) -> Bytes {
        let kind = if is_first {
            BoundaryKind::Initial
        } else {
            BoundaryKind::Encapsulated
        };

        let mut buf = BytesMut::new();

        buf.extend_from_slice(&boundary_line(kind, &self.boundary));
        buf.extend_from_slice(&part.header_bytes());

        buf.freeze()
    }

    fn read_body(&mut self, mut body: BodyState) -> Result<Option<Bytes>> {
        let mut buf = vec![0; self.chunk_size];

        let count = loop {
            match body.reader.read(&mut buf) {
                Ok(count) => break count,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(FormDataError::StreamReadFailed {
                        name: body.part.source().describe(),
                        source: Arc::new(err),
                    })
                }
            }
        };

        let expected = body.part.len();

        if count > 0 {
            body.read += count as u64;

            // Fail as soon as the source grows past what it declared
            if body.read > expected {
                return Err(length_mismatch(&body, expected));
            }

            trace!("Read {count} body bytes");
            buf.truncate(count);

            self.state = Some(State::WritingBody(body));
            return Ok(Some(Bytes::from(buf)));
        }

        if body.read != expected {
            return Err(length_mismatch(&body, expected));
        }

        debug!("Finished body of {} bytes", body.read);

        // Drop the reader here so files are closed before the next one is opened
        drop(body);

        match self.items.pop_front() {
            Some(part) => {
                self.state = Some(State::WritingHeader {
                    part,
                    is_first: false,
                });
                Ok(None)
            }
            None => {
                debug!("Writing final boundary");
                Ok(Some(boundary_line(BoundaryKind::Final, &self.boundary)))
            }
        }
    }

    fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let state = match self.state.take() {
                Some(state) => state,
                None => return Ok(None),
            };

            match state {
                State::Empty => {
                    debug!("Writing empty form");
                    return Ok(Some(empty_ending(&self.boundary)));
                }
                State::WritingHeader { part, is_first } => {
                    debug!("Writing Part Header for:{:?}", part.name());

                    let bytes = self.write_header(&part, is_first);
                    let reader = part.source().open()?;

                    self.state = Some(State::WritingBody(BodyState {
                        part,
                        reader,
                        read: 0,
                    }));

                    return Ok(Some(bytes));
                }
                State::WritingBody(body) => {
                    if let Some(bytes) = self.read_body(body)? {
                        return Ok(Some(bytes));
                    }
                }
            }
        }
    }
}

fn length_mismatch(body: &BodyState, expected: u64) -> FormDataError {
    FormDataError::LengthMismatch {
        name: body.part.source().describe(),
        expected,
        actual: body.read,
    }
}

impl Iterator for EncodedChunks {
    type Item = Result<Bytes>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_chunk() {
            Ok(Some(bytes)) => {
                self.written += bytes.len() as u64;
                Some(Ok(bytes))
            }
            Ok(None) => {
                debug!(
                    "No bytes to write, finished stream, total bytes:{}",
                    self.written
                );
                None
            }
            Err(err) => {
                self.state = None;
                Some(Err(err))
            }
        }
    }
}

/// A `Stream` over the encoded body, for handing to HTTP clients which want a streaming body
///
/// Every poll is immediately ready. File reads are blocking, so with file parts this should be driven from a context that allows blocking.
pub struct EncodedStream {
    chunks: EncodedChunks,
}

impl EncodedStream {
    /// The number of bytes produced so far
    pub fn written(&self) -> u64 {
        self.chunks.written()
    }
}

impl Stream for EncodedStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().chunks.next())
    }
}

impl FormData {
    /// Start encoding, returning the body as an iterator of chunks
    ///
    /// Fails straight away if a previous `append` recorded an error.
    pub fn chunks(&self) -> Result<EncodedChunks> {
        let parts = self.snapshot()?;

        Ok(EncodedChunks::new(
            self.boundary(),
            self.get_chunk_size(),
            parts,
        ))
    }

    /// Start encoding, returning the body as a `Stream` of chunks
    pub fn stream(&self) -> Result<EncodedStream> {
        Ok(EncodedStream {
            chunks: self.chunks()?,
        })
    }

    /// Encode the whole body into memory
    ///
    /// For bodies larger than [`ENCODING_MEMORY_THRESHOLD`] prefer [`write_to`](FormData::write_to).
    pub fn encode(&self) -> Result<Bytes> {
        let chunks = self.chunks()?;

        let capacity = self.content_length().min(ENCODING_MEMORY_THRESHOLD);
        let mut buf = BytesMut::with_capacity(capacity as usize);

        for chunk in chunks {
            buf.extend_from_slice(&chunk?);
        }

        Ok(buf.freeze())
    }

    /// Encode the body into `sink`, returning the number of bytes written
    ///
    /// Short writes are retried until the whole chunk is written, and the first sink error aborts encoding.
    pub fn write_to<W: Write + ?Sized>(&self, sink: &mut W) -> Result<u64> {
        self.write_chunks(sink, None)
    }

    /// Like [`write_to`](FormData::write_to) but checks `cancel` between chunks, failing with [`FormDataError::Cancelled`] once it is set
    pub fn write_to_cancellable<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        cancel: &AtomicBool,
    ) -> Result<u64> {
        self.write_chunks(sink, Some(cancel))
    }

    fn write_chunks<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        cancel: Option<&AtomicBool>,
    ) -> Result<u64> {
        let mut chunks = self.chunks()?;

        loop {
            if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
                debug!("Cancelled after {} bytes", chunks.written());
                return Err(FormDataError::Cancelled);
            }

            match chunks.next() {
                Some(chunk) => write_chunk(sink, &chunk?)?,
                None => break,
            }
        }

        sink.flush()
            .map_err(|err| FormDataError::SinkWriteFailed(Arc::new(err)))?;

        Ok(chunks.written())
    }

    /// Encode the body into a new file at `path`
    ///
    /// An existing file is never overwritten: this fails with [`FormDataError::DestinationAlreadyExists`] and leaves it alone.
    /// If encoding fails part way the partially written file is removed.
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> Result<u64> {
        let path = path.as_ref();

        if path.file_name().is_none() || path.is_dir() {
            return Err(FormDataError::InvalidDestination(path.to_path_buf()));
        }

        if path.exists() {
            return Err(FormDataError::DestinationAlreadyExists(path.to_path_buf()));
        }

        // Check for a deferred error before creating anything
        self.snapshot()?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|err| match err.kind() {
                ErrorKind::AlreadyExists => {
                    FormDataError::DestinationAlreadyExists(path.to_path_buf())
                }
                ErrorKind::NotFound => FormDataError::InvalidDestination(path.to_path_buf()),
                _ => FormDataError::from(err),
            })?;

        let mut writer = BufWriter::new(file);

        match self.write_to(&mut writer) {
            Ok(written) => {
                debug!("Wrote {written} bytes to {}", path.display());
                Ok(written)
            }
            Err(err) => {
                drop(writer);

                if let Err(remove_err) = std::fs::remove_file(path) {
                    warn!(
                        "Could not remove partial output {}: {remove_err}",
                        path.display()
                    );
                }

                Err(err)
            }
        }
    }
}

fn write_chunk<W: Write + ?Sized>(sink: &mut W, mut chunk: &[u8]) -> Result<()> {
    while !chunk.is_empty() {
        match sink.write(chunk) {
            Ok(0) => {
                return Err(FormDataError::SinkWriteFailed(Arc::new(io::Error::new(
                    ErrorKind::WriteZero,
                    "sink accepted no bytes",
                ))))
            }
            Ok(count) => chunk = &chunk[count..],
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(FormDataError::SinkWriteFailed(Arc::new(err))),
        }
    }

    Ok(())
}
