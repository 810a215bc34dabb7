use bytes::{Bytes, BytesMut};
use rand::{thread_rng, Rng};

const BOUNDARY_PREFIX: &str = "formdata.boundary.";

/// Which of the three delimiter lines to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryKind {
    /// `--boundary\r\n`, written before the first part
    Initial,
    /// `\r\n--boundary\r\n`, written between parts
    Encapsulated,
    /// `\r\n--boundary--\r\n`, written after the last part
    Final,
}

/// Generate a boundary of the form `formdata.boundary.<hex><hex>` from two random `u32`s
///
/// This gives 64 bits of randomness which is plenty to avoid accidentally colliding with user content, but is not meant as a security measure.
pub fn random_boundary() -> String {
    let mut rng = thread_rng();

    let first: u32 = rng.gen();
    let second: u32 = rng.gen();

    format!("{BOUNDARY_PREFIX}{first:08x}{second:08x}")
}

/// Render a delimiter line for `boundary`
pub fn boundary_line(kind: BoundaryKind, boundary: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(boundary.len() + 8);

    if kind != BoundaryKind::Initial {
        buf.extend_from_slice(b"\r\n");
    }

    buf.extend_from_slice(b"--");
    buf.extend_from_slice(boundary.as_bytes());

    if kind == BoundaryKind::Final {
        buf.extend_from_slice(b"--");
    }

    buf.extend_from_slice(b"\r\n");

    buf.freeze()
}

/// The terminator used when there are no parts at all: nothing precedes it, so there is no leading `\r\n`
pub(crate) fn empty_ending(boundary: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(boundary.len() + 6);

    buf.extend_from_slice(b"--");
    buf.extend_from_slice(boundary.as_bytes());
    buf.extend_from_slice(b"--\r\n");

    buf.freeze()
}
