#![warn(missing_docs)]
//! # formdata-codec
//!
//! Build `multipart/form-data` bodies and parse them back.
//!
//! Values (text, bytes, files, query pairs, JSON or anything with its own encoder) are appended to a [`FormData`] by field name,
//! then encoded either fully in memory with [`FormData::encode`] or chunk by chunk into any [`std::io::Write`] with [`FormData::write_to`].
//! Files are only opened while they are being written out, and are read in small chunks, so large attachments don't need to fit in memory.
//!
//! `append` never fails directly. Instead the first failure is kept and returned from every later `encode`/`write_to` call, so a form can be built
//! up without checking each step:
//!
//! ```
//! use formdata_codec::{FormData, Value};
//!
//! let form = FormData::with_boundary("AaB03x");
//!
//! form.append("username", "john_doe");
//! form.append_with("avatar", Value::bytes(&b"\x89PNG"[..]), Some("me.png"), None);
//!
//! let body = form.encode().unwrap();
//! let text = String::from_utf8_lossy(&body);
//!
//! assert!(text.starts_with("--AaB03x\r\n"));
//! assert!(text.contains("name=\"username\"\r\n\r\njohn_doe"));
//! assert!(text.contains("Content-Type: image/png"));
//! assert!(text.ends_with("--AaB03x--\r\n"));
//!
//! let decoded = FormData::decode(body, &form.content_type()).unwrap();
//!
//! assert_eq!(decoded.len(), 2);
//! ```
//!
//! ## Features
//!
//! * `json` (default): `Value::json` for anything that implements `serde::Serialize`

mod boundary;
mod decoder;
mod encoder;
mod error;
mod form;
mod mime_type;
mod part;
mod source;
mod value;

pub use boundary::{boundary_line, random_boundary, BoundaryKind};
pub use decoder::extract_boundary;
pub use encoder::{EncodedChunks, EncodedStream};
pub use error::{FormDataError, Result};
pub use form::{FormData, ENCODING_MEMORY_THRESHOLD};
pub use mime_type::{mime_type_for_extension, mime_type_for_filename, OCTET_STREAM};
pub use part::Part;
pub use source::{BodySource, SourceReader};
pub use value::{Descriptor, EncodePart, Value};
