use encoding_rs::{Encoding, UTF_8};

use crate::error::{FlatXmlError, Result};

/// Streaming producer turning lines into XML chunks.
pub mod assembler;

/// Per-column value conversions (flat text <-> XML text).
pub mod converter;

/// Line to column splitting strategies.
pub mod extractor;

/// Lazy decoding of a byte stream into text lines.
pub mod line_source;

/// Resolves an encoding label (`utf-8`, `iso-8859-1`, `windows-1252`, ...).
///
/// `None` means UTF-8. Unknown labels are rejected immediately so that no
/// byte of output is ever produced with a bad encoding.
///
/// # Examples
///
/// ```
/// use flatxml::core::resolve_encoding;
///
/// assert_eq!(resolve_encoding(Some("latin1")).unwrap().name(), "windows-1252");
/// assert!(resolve_encoding(Some("klingon")).is_err());
/// ```
pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        None => Ok(UTF_8),
        Some(label) => Encoding::for_label(label.trim().as_bytes())
            .ok_or_else(|| FlatXmlError::Encoding(label.to_string())),
    }
}
