use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use log::{debug, warn};
use memchr::memmem::{find, Finder};

use crate::error::{FormDataError, Result};
use crate::form::FormData;
use crate::part::Part;
use crate::source::BodySource;

/// Pull the `boundary` parameter out of a `Content-Type` value
///
/// The parameter name is matched case-insensitively and surrounding quotes are removed.
pub fn extract_boundary(content_type: &str) -> Result<String> {
    let missing = || FormDataError::MissingBoundary(content_type.to_string());

    // ASCII lowercasing keeps byte offsets the same
    let lowered = content_type.to_ascii_lowercase();

    let start = find(lowered.as_bytes(), b"boundary=").ok_or_else(missing)? + "boundary=".len();

    let rest = content_type[start..].trim_start();

    // A quoted boundary may itself contain `;`
    let value = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or_default(),
        None => rest.split(';').next().unwrap_or_default().trim(),
    };

    if value.is_empty() {
        return Err(missing());
    }

    Ok(value.to_string())
}

impl FormData {
    /// Parse a multipart/form-data body back into a `FormData`
    ///
    /// The boundary is taken from `content_type`. Parts whose headers can't be separated from their content are skipped,
    /// and part bodies are kept as raw bytes.
    pub fn decode<B: Into<Bytes>>(raw: B, content_type: &str) -> Result<FormData> {
        let boundary = extract_boundary(content_type)?;
        let raw = raw.into();

        let form = FormData::with_boundary(boundary.as_str());

        for part in split_parts(&raw, &boundary) {
            form.append_part(part);
        }

        debug!("Decoded {} parts", form.len());

        Ok(form)
    }
}

/// Find each part between delimiters.
///
/// The first delimiter is `--boundary`, as nothing precedes it, and every later one is `\r\n--boundary`.
fn split_parts(raw: &Bytes, boundary: &str) -> Vec<Part> {
    let opening = format!("--{boundary}");
    let delimiter = format!("\r\n--{boundary}");
    let finder = Finder::new(delimiter.as_bytes());

    let mut parts = Vec::new();

    let mut cursor = match find(raw, opening.as_bytes()) {
        Some(idx) => idx + opening.len(),
        None => {
            warn!("No boundary found in body");
            return parts;
        }
    };

    loop {
        if raw[cursor..].starts_with(b"--") {
            debug!("Reached final boundary");
            break;
        }

        // Skip to the end of the delimiter line
        let start = match find(&raw[cursor..], b"\r\n") {
            Some(idx) => cursor + idx + 2,
            None => break,
        };

        let end = match finder.find(&raw[start..]) {
            Some(idx) => start + idx,
            None => {
                warn!("Dropping part without closing boundary");
                break;
            }
        };

        if start < end {
            if let Some(part) = parse_part(raw.slice(start..end)) {
                parts.push(part);
            }
        }

        cursor = end + delimiter.len();
    }

    parts
}

fn parse_part(payload: Bytes) -> Option<Part> {
    let (header_end, content_start) = if payload.starts_with(b"\r\n") {
        (0, 2)
    } else {
        match find(&payload, b"\r\n\r\n") {
            Some(idx) => (idx, idx + 4),
            None => {
                debug!("Skipping part without a blank line after its headers");
                return None;
            }
        }
    };

    let headers = parse_headers(&payload[..header_end]);
    let content = payload.slice(content_start..);

    Some(Part::new(headers, BodySource::Memory(content)))
}

fn parse_headers(block: &[u8]) -> HeaderMap<HeaderValue> {
    let text = String::from_utf8_lossy(block);

    let mut headers = HeaderMap::new();

    for line in text.split("\r\n") {
        let (name, value) = match line.split_once(':') {
            Some(pair) => pair,
            None => continue,
        };

        let name = HeaderName::from_bytes(name.trim().as_bytes());
        let value = HeaderValue::from_bytes(value.trim().as_bytes());

        match (name, value) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => debug!("Skipping invalid header line:{line}"),
        }
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::CONTENT_TYPE;

    const INPUT: &[u8] = b"--AaB03x\r\n\
                Content-Disposition: form-data; name=\"file\"; filename=\"text.txt\"\r\n\
                Content-Type: text/plain\r\n\
                \r\n\
                Lorem Ipsum\n\r\n\
                --AaB03x\r\n\
                Content-Disposition: form-data; name=\"name1\"\r\n\
                \r\n\
                value1\r\n\
                --AaB03x\r\n\
                Content-Disposition: form-data; name=\"name2\"\r\n\
                \r\n\
                value2\r\n\
                --AaB03x--\r\n";

    #[test]
    fn reads_streams_and_fields() {
        let form = FormData::decode(INPUT, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        assert_eq!(parts.len(), 3);

        assert_eq!(parts[0].name().unwrap(), "file");
        assert_eq!(parts[0].filename().unwrap(), "text.txt");
        assert_eq!(parts[0].content_type(), Some("text/plain"));
        assert_eq!(&parts[0].read_to_bytes().unwrap()[..], b"Lorem Ipsum\n");

        assert_eq!(parts[1].name().unwrap(), "name1");
        assert_eq!(&parts[1].read_to_bytes().unwrap()[..], b"value1");

        assert_eq!(parts[2].name().unwrap(), "name2");
        assert_eq!(&parts[2].read_to_bytes().unwrap()[..], b"value2");
    }

    #[test]
    fn keeps_boundary() {
        let form = FormData::decode(INPUT, "multipart/form-data; boundary=AaB03x").unwrap();

        assert_eq!(form.boundary(), "AaB03x");
    }

    #[test]
    fn extracts_boundary() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=AaB03x").unwrap(),
            "AaB03x"
        );
        assert_eq!(
            extract_boundary("multipart/form-data; Boundary=\"Aa B03x\"; charset=utf-8").unwrap(),
            "Aa B03x"
        );
    }

    #[test]
    fn quoted_boundary_with_separator() {
        assert_eq!(
            extract_boundary("multipart/form-data; boundary=\"a;b\"; charset=utf-8").unwrap(),
            "a;b"
        );

        let input: &[u8] = b"--a;b\r\n\
                Content-Disposition: form-data; name=\"name1\"\r\n\
                \r\n\
                value1\r\n\
                --a;b--\r\n";

        let form = FormData::decode(input, "multipart/form-data; boundary=\"a;b\"").unwrap();

        assert_eq!(form.boundary(), "a;b");
        assert_eq!(form.len(), 1);
    }

    #[test]
    fn missing_boundary() {
        let err = FormData::decode(INPUT, "multipart/form-data").unwrap_err();

        assert!(err.to_string().contains("boundary"));
    }

    #[test]
    fn empty_boundary() {
        let err = FormData::decode(INPUT, "multipart/form-data; boundary=").unwrap_err();

        assert!(matches!(err, FormDataError::MissingBoundary(_)));

        let err = FormData::decode(INPUT, "multipart/form-data; boundary=\"\"").unwrap_err();

        assert!(matches!(err, FormDataError::MissingBoundary(_)));
    }

    #[test]
    fn empty_form() {
        let form = FormData::decode(&b"--AaB03x--\r\n"[..], "multipart/form-data; boundary=AaB03x")
            .unwrap();

        assert!(form.is_empty());
    }

    #[test]
    fn zero_read() {
        let input: &[u8] = b"----------------------------332056022174478975396798\r\n\
                Content-Disposition: form-data; name=\"file\"\r\n\
                Content-Type: application/octet-stream\r\n\
                \r\n\
                \r\n\
                \r\n\
                dolphin\n\
                whale\r\n\
                ----------------------------332056022174478975396798--\r\n";

        let form = FormData::decode(
            input,
            "multipart/form-data; boundary=--------------------------332056022174478975396798",
        )
        .unwrap();

        let parts = form.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].content_type(), Some("application/octet-stream"));
        assert_eq!(
            &parts[0].read_to_bytes().unwrap()[..],
            b"\r\n\r\ndolphin\nwhale"
        );
    }

    #[test]
    fn binary_content_is_kept() {
        let mut input = b"--AaB03x\r\n\
                Content-Disposition: form-data; name=\"blob\"\r\n\
                \r\n"
            .to_vec();
        let blob: Vec<u8> = (0..=255u8).chain([0xff, 0xfe, b'-', b'-']).collect();
        input.extend_from_slice(&blob);
        input.extend_from_slice(b"\r\n--AaB03x--\r\n");

        let form = FormData::decode(input, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        assert_eq!(&parts[0].read_to_bytes().unwrap()[..], &blob[..]);
    }

    #[test]
    fn boundary_text_inside_content_is_not_a_delimiter() {
        let input: &[u8] = b"--AaB03x\r\n\
                Content-Disposition: form-data; name=\"note\"\r\n\
                \r\n\
                see --AaB03x for details\r\n\
                --AaB03x--\r\n";

        let form = FormData::decode(input, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(
            &parts[0].read_to_bytes().unwrap()[..],
            b"see --AaB03x for details"
        );
    }

    #[test]
    fn skips_part_without_blank_line() {
        let input: &[u8] = b"--AaB03x\r\n\
                I am a bad header\r\n\
                --AaB03x\r\n\
                Content-Disposition: form-data; name=\"name1\"\r\n\
                \r\n\
                value1\r\n\
                --AaB03x--\r\n";

        let form = FormData::decode(input, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name().unwrap(), "name1");
    }

    #[test]
    fn ignores_header_lines_without_colon() {
        let input: &[u8] = b"--AaB03x\r\n\
                Content-Disposition: form-data; name=\"name1\"\r\n\
                not a header\r\n\
                X-Extra :  spaced out  \r\n\
                \r\n\
                value1\r\n\
                --AaB03x--\r\n";

        let form = FormData::decode(input, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        let headers = parts[0].headers();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-extra").unwrap(), "spaced out");
        assert!(headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn unfinished_part_is_dropped() {
        let input: &[u8] = b"--AaB03x\r\n\
                Content-Disposition: form-data; name=\"name1\"\r\n\
                \r\n\
                value1\r\n\
                --AaB03x\r\n\
                Content-Disposition: form-data; name=\"name2\"\r\n\
                \r\n\
                value2";

        let form = FormData::decode(input, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].name().unwrap(), "name1");
    }

    #[test]
    fn headerless_part() {
        let input: &[u8] = b"--AaB03x\r\n\
                \r\n\
                just content\r\n\
                --AaB03x--\r\n";

        let form = FormData::decode(input, "multipart/form-data; boundary=AaB03x").unwrap();

        let parts = form.parts();
        assert!(parts[0].headers().is_empty());
        assert_eq!(&parts[0].read_to_bytes().unwrap()[..], b"just content");
    }
}
