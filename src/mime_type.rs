use std::path::Path;

/// The content type used when nothing better is known
pub const OCTET_STREAM: &str = "application/octet-stream";

/// Look up a content type from a file extension (without the leading `.`)
///
/// Unknown extensions map to `application/octet-stream`
pub fn mime_type_for_extension(extension: &str) -> String {
    mime_guess::from_ext(&extension.to_ascii_lowercase())
        .first_or_octet_stream()
        .to_string()
}

/// Look up a content type from the extension of a filename
pub fn mime_type_for_filename(filename: &str) -> String {
    match Path::new(filename).extension().and_then(|ext| ext.to_str()) {
        Some(extension) => mime_type_for_extension(extension),
        None => OCTET_STREAM.to_string(),
    }
}
