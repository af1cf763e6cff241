//! Character set lookup.
//!
//! Labels are resolved with the WHATWG rules implemented by `encoding_rs`, so
//! `"utf8"`, `"latin1"`, `"cp1252"`, `"shift_jis"` and friends are all
//! recognised.  Java-only names such as `IBM437` are not.

use encoding_rs::Encoding;

/// Resolves a character set label to an encoding.
///
/// Returns `None` when the label is not recognised.
pub fn resolve_charset(label: &str) -> Option<&'static Encoding> {
    Encoding::for_label(label.trim().as_bytes())
}
