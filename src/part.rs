use bytes::{Bytes, BytesMut};
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_DISPOSITION, CONTENT_TYPE};
use log::debug;
use memchr::{memchr, memmem::find};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;

use crate::error::{FormDataError, Result};
use crate::source::BodySource;

/// A single named field of a `FormData`
///
/// A part is some headers (`Content-Disposition` and optionally `Content-Type`, but anything is allowed) plus a body source with a known length.
/// Header names are case-insensitive. When written out `Content-Disposition` comes first, followed by the other headers in `HeaderMap` iteration order.
#[derive(Debug, Clone)]
pub struct Part {
    headers: HeaderMap<HeaderValue>,
    source: BodySource,
}

impl Part {
    /// Construct a part from raw headers and a body source
    pub fn new(headers: HeaderMap<HeaderValue>, source: BodySource) -> Self {
        Part { headers, source }
    }

    /// Construct a `form-data` part with the given field name and optional filename/content type
    pub fn form_field(
        name: &str,
        filename: Option<&str>,
        content_type: Option<&str>,
        source: BodySource,
    ) -> Result<Self> {
        let mut disposition = String::from("form-data; name=\"");
        escape_param(name, &mut disposition);
        disposition.push('"');

        if let Some(filename) = filename {
            disposition.push_str("; filename=\"");
            escape_param(filename, &mut disposition);
            disposition.push('"');
        }

        let mut headers = HeaderMap::with_capacity(2);

        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_bytes(disposition.as_bytes())
                .map_err(|_| FormDataError::InvalidHeaderValue("Content-Disposition".into()))?,
        );

        if let Some(content_type) = content_type {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_bytes(content_type.as_bytes())
                    .map_err(|_| FormDataError::InvalidHeaderValue("Content-Type".into()))?,
            );
        }

        Ok(Part { headers, source })
    }

    /// Return the headers for the part
    pub fn headers(&self) -> &HeaderMap<HeaderValue> {
        &self.headers
    }

    /// Return the body source of the part
    pub fn source(&self) -> &BodySource {
        &self.source
    }

    /// The declared length of the body in bytes
    pub fn len(&self) -> u64 {
        self.source.len()
    }

    /// Whether the body is empty
    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Read the body fully into memory
    pub fn read_to_bytes(&self) -> Result<Bytes> {
        self.source.read_to_bytes()
    }

    /// Return the content type of the part, if present
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
    }

    /// Return the field name of the part, if present.
    /// The returned name will be utf8 percent-decoded
    pub fn name(&self) -> Option<Cow<'_, str>> {
        let disposition = self.disposition()?;
        get_dispo_param(disposition, "name")
    }

    /// Return the filename of the part, if present.
    /// `filename*` is preferred over `filename`, and the returned value will be utf8 percent-decoded
    pub fn filename(&self) -> Option<Cow<'_, str>> {
        let disposition = self.disposition()?;

        if let Some(filename) = get_dispo_param(disposition, "filename*") {
            return Some(strip_utf8_prefix(filename));
        }

        get_dispo_param(disposition, "filename")
    }

    fn disposition(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_DISPOSITION)
            .and_then(|val| std::str::from_utf8(val.as_bytes()).ok())
    }

    /// Render the header block: each header as `Name: Value\r\n`, then a blank line
    pub(crate) fn header_bytes(&self) -> Bytes {
        let mut buf = BytesMut::new();

        for value in self.headers.get_all(CONTENT_DISPOSITION) {
            write_header_line(&mut buf, &CONTENT_DISPOSITION, value);
        }

        for (name, value) in self
            .headers
            .iter()
            .filter(|(name, _)| **name != CONTENT_DISPOSITION)
        {
            write_header_line(&mut buf, name, value);
        }

        buf.extend_from_slice(b"\r\n");

        buf.freeze()
    }
}

fn write_header_line(buf: &mut BytesMut, name: &HeaderName, value: &HeaderValue) {
    buf.extend_from_slice(canonical_name(name).as_bytes());
    buf.extend_from_slice(b": ");
    buf.extend_from_slice(value.as_bytes());
    buf.extend_from_slice(b"\r\n");
}

/// Escape a quoted `Content-Disposition` parameter the way browsers do, plus `%` so percent-decoding gives the value back.
/// Anything else, including non-ASCII, is written as is.
fn escape_param(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            '"' => out.push_str("%22"),
            '\r' => out.push_str("%0D"),
            '\n' => out.push_str("%0A"),
            '%' => out.push_str("%25"),
            c => out.push(c),
        }
    }
}

/// `content-disposition` -> `Content-Disposition`
fn canonical_name(name: &HeaderName) -> String {
    let mut upper = true;

    name.as_str()
        .chars()
        .map(|c| {
            let out = if upper { c.to_ascii_uppercase() } else { c };
            upper = c == '-';
            out
        })
        .collect()
}

fn strip_utf8_prefix(string: Cow<str>) -> Cow<str> {
    if string.starts_with("UTF-8''") || string.starts_with("utf-8''") {
        let split = string.split_at(7).1;
        return Cow::from(split.to_owned());
    }

    string
}

/// Get a parameter from a `content-disposition` value, unescaping `\"` and percent encoding.
///
/// The parameter can't directly follow another token character, so `name` doesn't match inside `filename`.
fn get_dispo_param<'a>(input: &'a str, param: &str) -> Option<Cow<'a, str>> {
    debug!("dispo param:{input}, field `{param}`");

    let mut offset = 0;

    while let Some(found) = find(&input.as_bytes()[offset..], param.as_bytes()) {
        let start_idx = offset + found;
        offset = start_idx + param.len();

        let preceded_ok = input[..start_idx]
            .chars()
            .next_back()
            .map_or(true, |c| !(c.is_alphanumeric() || matches!(c, '-' | '_' | '*')));

        if !preceded_ok || !input[offset..].starts_with("=\"") {
            continue;
        }

        return quoted_value(&input[offset + 2..]);
    }

    None
}

fn quoted_value(mut snippet: &str) -> Option<Cow<'_, str>> {
    // Discontiguous once a `\"` is seen, so copy into a buffer from then on
    let mut escaped_buffer: Option<String> = None;

    while let Some(end) = memchr(b'"', snippet.as_bytes()) {
        if end > 0 && snippet.as_bytes()[end - 1] == b'\\' {
            let mut buffer = escaped_buffer.unwrap_or_default();

            buffer.push_str(&snippet[..end - 1]);
            buffer.push('"');

            escaped_buffer = Some(buffer);

            snippet = &snippet[end + 1..];
            continue;
        }

        return match escaped_buffer {
            Some(mut escaped) => {
                escaped.push_str(&snippet[..end]);

                if escaped.contains('%') {
                    let decoded_val = percent_decode_str(&escaped).decode_utf8_lossy();
                    return Some(Cow::Owned(decoded_val.into_owned()));
                }

                Some(Cow::Owned(escaped))
            }
            None => {
                let value = &snippet[..end];

                if value.contains('%') {
                    return Some(percent_decode_str(value).decode_utf8_lossy());
                }

                Some(Cow::Borrowed(value))
            }
        };
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(name: &str, filename: Option<&str>, content_type: Option<&str>) -> Part {
        Part::form_field(
            name,
            filename,
            content_type,
            BodySource::from(Bytes::from_static(b"")),
        )
        .unwrap()
    }

    #[test]
    fn writes_field_header() {
        let input: &[u8] = b"Content-Disposition: form-data; name=\"field_name\"\r\n\
                \r\n";

        assert_eq!(&part("field_name", None, None).header_bytes()[..], input);
    }

    #[test]
    fn writes_file_header() {
        let input: &[u8] = b"Content-Disposition: form-data; name=\"file\"; filename=\"test.txt\"\r\n\
                Content-Type: text/plain\r\n\
                \r\n";

        let bytes = part("file", Some("test.txt"), Some("text/plain")).header_bytes();

        assert_eq!(&bytes[..], input);
    }

    #[test]
    fn escapes_quotes_and_newlines() {
        let part = part("a\"b\r\nc", Some("my \"file\".txt"), None);

        let disposition = part.headers().get(CONTENT_DISPOSITION).unwrap();

        assert_eq!(
            disposition,
            "form-data; name=\"a%22b%0D%0Ac\"; filename=\"my %22file%22.txt\""
        );

        assert_eq!(part.name().unwrap(), "a\"b\r\nc");
        assert_eq!(part.filename().unwrap(), "my \"file\".txt");
    }

    #[test]
    fn keeps_non_ascii_filename() {
        let part = part("doc", Some("résumé.pdf"), None);

        assert_eq!(
            &part.header_bytes()[..],
            "Content-Disposition: form-data; name=\"doc\"; filename=\"résumé.pdf\"\r\n\r\n".as_bytes()
        );
        assert_eq!(part.filename().unwrap(), "résumé.pdf");
    }

    #[test]
    fn literal_percent_survives() {
        let part = part("100%20off", Some("50%.txt"), None);

        let disposition = part.headers().get(CONTENT_DISPOSITION).unwrap();

        assert_eq!(
            disposition,
            "form-data; name=\"100%2520off\"; filename=\"50%25.txt\""
        );
        assert_eq!(part.name().unwrap(), "100%20off");
        assert_eq!(part.filename().unwrap(), "50%.txt");
    }

    #[test]
    fn disposition_is_written_first() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static("form-data; name=\"late\""),
        );

        let part = Part::new(headers, BodySource::from(Bytes::new()));

        assert_eq!(
            &part.header_bytes()[..],
            b"Content-Disposition: form-data; name=\"late\"\r\n\
                Content-Type: text/plain\r\n\
                \r\n"
        );
    }

    #[test]
    fn rejects_bad_content_type() {
        let err = Part::form_field(
            "file",
            None,
            Some("text/plain\r\nX-Evil: 1"),
            BodySource::from(Bytes::new()),
        )
        .unwrap_err();

        assert!(matches!(err, FormDataError::InvalidHeaderValue(_)));
    }

    #[test]
    fn canonical_header_names() {
        assert_eq!(canonical_name(&CONTENT_DISPOSITION), "Content-Disposition");
        assert_eq!(
            canonical_name(&HeaderName::from_static("x-custom-header")),
            "X-Custom-Header"
        );
    }

    #[test]
    fn read_filename() {
        let input = "form-data; name=\"file\";\
                           filename=\"text%20.txt\";\
                           quoted=\"with a \\\" quote and another \\\" quote\";\
                           empty=\"\"\
                           percent_encoded=\"foo%20%3Cbar%3E\"\
                           ";
        let name = get_dispo_param(input, "name");
        let filename = get_dispo_param(input, "filename");
        let with_a_quote = get_dispo_param(input, "quoted");
        let empty = get_dispo_param(input, "empty");
        let percent_encoded = get_dispo_param(input, "percent_encoded");

        assert_eq!(name, Some(Cow::Borrowed("file")));
        assert_eq!(filename, Some(Cow::Borrowed("text .txt")));
        assert_eq!(
            with_a_quote,
            Some(Cow::Owned("with a \" quote and another \" quote".into()))
        );
        assert_eq!(empty, Some(Cow::Borrowed("")));
        assert_eq!(percent_encoded, Some(Cow::Borrowed("foo <bar>")));
    }

    #[test]
    fn name_does_not_match_inside_filename() {
        let input = "form-data; filename=\"a.txt\"; name=\"upload\"";

        assert_eq!(get_dispo_param(input, "name"), Some(Cow::Borrowed("upload")));
    }

    #[test]
    fn prefers_extended_filename() {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_DISPOSITION,
            HeaderValue::from_static(
                "form-data; name=\"file\"; filename=\"text.txt\"; filename*=\"UTF-8''aous%20.txt\"",
            ),
        );

        let part = Part::new(headers, BodySource::from(Bytes::new()));

        assert_eq!(part.filename().unwrap(), "aous .txt");
    }

    #[test]
    fn test_strip_lowercase_utf8() {
        let name: Cow<str> = Cow::Owned("utf-8''äöüß.txt".to_owned());

        assert_eq!(strip_utf8_prefix(name), "äöüß.txt");
    }
}
