//! The command buffer.
//!
//! A [`CommandBuffer`] accumulates the bytes of one print or serial job from
//! any mix of encodings.  Text is always converted with the buffer's current
//! character set; changing the character set affects later appends only.
//!
//! Every append either succeeds completely or leaves the buffer untouched.

pub mod charset;
pub mod hex;

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurposeConfig;
use base64::engine::{DecodePaddingMode, GeneralPurpose};
use base64::Engine as _;
use encoding_rs::{Encoding, EncoderResult};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::image::{ImageEncoder, ImageRequest};

pub use self::charset::resolve_charset;
pub use self::hex::parse_hex;

/// Base64 engine that accepts both padded and unpadded input.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors raised while appending to a [`CommandBuffer`].
#[derive(Debug, Error, PartialEq)]
pub enum BufferError {
    /// The base64 payload could not be decoded.
    #[error("invalid base64 payload: {0}")]
    Base64(String),

    /// The hexadecimal payload could not be decoded.
    #[error("invalid hex payload: {0}")]
    Hex(String),

    /// The image could not be converted to printer commands.
    #[error("invalid image payload: {0}")]
    Image(String),

    /// A JSON array payload was empty, malformed or of an unsupported type.
    #[error("empty command: {0}")]
    EmptyCommand(String),

    /// The requested character set label is not known.
    #[error("unknown character set: {0}")]
    UnknownCharset(String),
}

impl BufferError {
    /// Returns `true` for errors caused by undecodable payload bytes, as
    /// opposed to a structurally empty or unusable request.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, Self::Base64(_) | Self::Hex(_) | Self::Image(_))
    }
}

/// An ordered byte sequence destined for a printer or serial device.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandBuffer {
    bytes: Vec<u8>,
    charset: &'static Encoding,
}

impl Default for CommandBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandBuffer {
    /// Creates an empty buffer using UTF-8 for text conversions.
    pub fn new() -> Self {
        Self {
            bytes: Vec::new(),
            charset: encoding_rs::UTF_8,
        }
    }

    /// Creates an empty buffer using the character set named by `label`.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::UnknownCharset`] if the label is not recognised.
    pub fn with_charset(label: &str) -> Result<Self, BufferError> {
        let mut buffer = Self::new();
        buffer.set_charset(label)?;
        Ok(buffer)
    }

    /// The character set applied to text appends.
    pub fn charset(&self) -> &'static Encoding {
        self.charset
    }

    /// Switches the character set used by subsequent text appends.
    ///
    /// Bytes already in the buffer are not re-encoded.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::UnknownCharset`] and keeps the current character
    /// set if the label is not recognised.
    pub fn set_charset(&mut self, label: &str) -> Result<(), BufferError> {
        let encoding =
            resolve_charset(label).ok_or_else(|| BufferError::UnknownCharset(label.to_string()))?;
        if encoding != self.charset {
            debug!(from = self.charset.name(), to = encoding.name(), "charset changed");
        }
        self.charset = encoding;
        Ok(())
    }

    // ── Appends ───────────────────────────────────────────────────────────────

    /// Appends raw bytes.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        self.bytes.extend_from_slice(bytes);
        debug!(appended = bytes.len(), total = self.bytes.len(), "appended raw bytes");
        bytes.len()
    }

    /// Decodes base64 text and appends the result.
    ///
    /// Whitespace inside the text is ignored and padding is optional.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Base64`] without mutating the buffer if the
    /// text is not valid base64.
    pub fn append_base64(&mut self, text: &str) -> Result<usize, BufferError> {
        let compact: String = text.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        let decoded = LENIENT_BASE64
            .decode(compact)
            .map_err(|e| BufferError::Base64(e.to_string()))?;
        self.bytes.extend_from_slice(&decoded);
        debug!(appended = decoded.len(), total = self.bytes.len(), "appended base64 payload");
        Ok(decoded.len())
    }

    /// Decodes hexadecimal text (`"1B40"` or `"x1Bx40"`) and appends it.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Hex`] without mutating the buffer if the text
    /// is not valid hex.
    pub fn append_hex(&mut self, text: &str) -> Result<usize, BufferError> {
        let decoded = parse_hex(text)?;
        self.bytes.extend_from_slice(&decoded);
        debug!(appended = decoded.len(), total = self.bytes.len(), "appended hex payload");
        Ok(decoded.len())
    }

    /// Parses `json` as an array and appends it with [`append_json_values`].
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::EmptyCommand`] if the text is not a JSON array.
    ///
    /// [`append_json_values`]: Self::append_json_values
    pub fn append_json_array(&mut self, json: &str) -> Result<usize, BufferError> {
        let values: Vec<Value> = serde_json::from_str(json)
            .map_err(|e| BufferError::EmptyCommand(format!("malformed JSON array: {e}")))?;
        self.append_json_values(&values)
    }

    /// Appends a JSON array of byte values or of strings.
    ///
    /// The array type is taken from its first non-null element:
    ///
    /// - numbers are raw byte values; entries that are null, negative,
    ///   fractional or above 255 become `0x00` with a warning.
    /// - strings are encoded with the active character set; null entries
    ///   are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::EmptyCommand`] if the array is empty, holds
    /// only nulls, or starts with an element that is neither a number nor a
    /// string.
    pub fn append_json_values(&mut self, values: &[Value]) -> Result<usize, BufferError> {
        let first = values
            .iter()
            .find(|v| !v.is_null())
            .ok_or_else(|| BufferError::EmptyCommand("JSON array has no elements".to_string()))?;

        let decoded = match first {
            Value::Number(_) => values
                .iter()
                .enumerate()
                .map(|(index, value)| json_byte(index, value))
                .collect::<Vec<u8>>(),
            Value::String(_) => {
                let mut out = Vec::new();
                for (index, value) in values.iter().enumerate() {
                    match value {
                        Value::String(text) => out.extend_from_slice(&self.encode_text(text)),
                        other => warn!(index, value = %other, "skipping non-string entry in string array"),
                    }
                }
                out
            }
            other => {
                return Err(BufferError::EmptyCommand(format!(
                    "JSON arrays of {} are not supported",
                    json_type_name(other)
                )))
            }
        };

        self.bytes.extend_from_slice(&decoded);
        debug!(appended = decoded.len(), total = self.bytes.len(), "appended JSON array payload");
        Ok(decoded.len())
    }

    /// Encodes `text` with the active character set and appends it.
    pub fn append_text(&mut self, text: &str) -> usize {
        let encoded = self.encode_text(text);
        self.bytes.extend_from_slice(&encoded);
        debug!(
            appended = encoded.len(),
            total = self.bytes.len(),
            charset = self.charset.name(),
            "appended text"
        );
        encoded.len()
    }

    /// Rasterises an image with `encoder` and appends the printer commands.
    ///
    /// # Errors
    ///
    /// Returns [`BufferError::Image`] without mutating the buffer if the
    /// encoder rejects the image.
    pub fn append_image(
        &mut self,
        encoder: &dyn ImageEncoder,
        request: &ImageRequest<'_>,
    ) -> Result<usize, BufferError> {
        let encoded = encoder
            .encode(request)
            .map_err(|e| BufferError::Image(e.to_string()))?;
        self.bytes.extend_from_slice(&encoded);
        debug!(appended = encoded.len(), total = self.bytes.len(), "appended image payload");
        Ok(encoded.len())
    }

    // ── Charset helpers ───────────────────────────────────────────────────────

    /// Encodes `text` with the active character set without appending it.
    ///
    /// Each character the charset cannot represent becomes a single `?` and
    /// a warning is logged.  Charsets without an encoder (UTF-16) fall back
    /// to UTF-8.
    pub fn encode_text(&self, text: &str) -> Vec<u8> {
        let used = self.charset.output_encoding();
        if used != self.charset {
            debug!(requested = self.charset.name(), used = used.name(), "charset has no encoder, fell back");
        }
        if used == encoding_rs::UTF_8 {
            return text.as_bytes().to_vec();
        }

        let mut encoder = used.new_encoder();
        let mut encoded = Vec::with_capacity(text.len());
        let mut chunk = [0u8; 512];
        let mut rest = text;
        let mut unmappable = 0usize;
        loop {
            let (result, read, written) = encoder.encode_from_utf8_without_replacement(rest, &mut chunk, true);
            encoded.extend_from_slice(&chunk[..written]);
            rest = &rest[read..];
            match result {
                EncoderResult::InputEmpty => break,
                EncoderResult::OutputFull => {}
                EncoderResult::Unmappable(_) => {
                    unmappable += 1;
                    encoded.push(b'?');
                }
            }
        }
        if unmappable > 0 {
            warn!(charset = used.name(), unmappable, "text contains characters the charset cannot represent");
        }
        encoded
    }

    /// Decodes device output with the active character set.
    pub fn decode_text(&self, bytes: &[u8]) -> String {
        let (decoded, _, had_errors) = self.charset.decode(bytes);
        if had_errors {
            warn!(charset = self.charset.name(), "device output contains undecodable bytes");
        }
        decoded.into_owned()
    }

    // ── Inspection ────────────────────────────────────────────────────────────

    /// The buffered bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` if `marker` occurs anywhere in the buffer.
    ///
    /// An empty marker never matches.
    pub fn contains(&self, marker: &[u8]) -> bool {
        find(&self.bytes, marker, 0).is_some()
    }

    /// Empties the buffer, keeping the character set.
    pub fn clear(&mut self) {
        self.bytes.clear();
        debug!("buffer cleared");
    }
}

/// Finds the first occurrence of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn json_byte(index: usize, value: &Value) -> u8 {
    match value.as_u64().and_then(|n| u8::try_from(n).ok()) {
        Some(byte) => byte,
        None => {
            warn!(index, value = %value, "JSON byte entry is not in 0..=255, using 0");
            0
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "booleans",
        Value::Number(_) => "numbers",
        Value::String(_) => "strings",
        Value::Array(_) => "arrays",
        Value::Object(_) => "objects",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ── base64 ────────────────────────────────────────────────────────────────

    #[test]
    fn test_append_base64_decodes_exact_bytes() {
        // Arrange
        let mut buffer = CommandBuffer::new();
        let original = [0x1B, 0x40, 0x00, 0xFF, b'A'];
        let encoded = base64::engine::general_purpose::STANDARD.encode(original);

        // Act
        let appended = buffer.append_base64(&encoded).unwrap();

        // Assert
        assert_eq!(appended, original.len());
        assert_eq!(buffer.bytes(), &original);
    }

    #[test]
    fn test_append_base64_accepts_missing_padding_and_line_breaks() {
        let mut buffer = CommandBuffer::new();
        buffer.append_base64("SGVs\nbG8").unwrap();
        assert_eq!(buffer.bytes(), b"Hello");
    }

    #[test]
    fn test_append_base64_failure_leaves_buffer_unchanged() {
        // Arrange
        let mut buffer = CommandBuffer::new();
        buffer.append(b"keep");

        // Act
        let result = buffer.append_base64("not*base64");

        // Assert
        assert!(matches!(result, Err(BufferError::Base64(_))));
        assert_eq!(buffer.bytes(), b"keep");
    }

    // ── hex ───────────────────────────────────────────────────────────────────

    #[test]
    fn test_append_hex_accepts_both_forms() {
        let mut buffer = CommandBuffer::new();
        buffer.append_hex("1B40").unwrap();
        buffer.append_hex("x1Dx56").unwrap();
        assert_eq!(buffer.bytes(), &[0x1B, 0x40, 0x1D, 0x56]);
    }

    #[test]
    fn test_append_hex_failure_leaves_buffer_unchanged() {
        let mut buffer = CommandBuffer::new();
        buffer.append(b"A");
        assert!(buffer.append_hex("ZZ").is_err());
        assert_eq!(buffer.bytes(), b"A");
    }

    // ── JSON arrays ───────────────────────────────────────────────────────────

    #[test]
    fn test_append_json_array_of_integers_writes_raw_bytes() {
        let mut buffer = CommandBuffer::new();
        buffer.append_json_array("[27, 64, 10]").unwrap();
        assert_eq!(buffer.bytes(), &[27, 64, 10]);
    }

    #[test]
    fn test_append_json_array_out_of_range_and_null_become_zero() {
        // Arrange
        let mut buffer = CommandBuffer::new();

        // Act
        buffer
            .append_json_values(&[json!(65), json!(300), json!(null), json!(-1), json!(1.5)])
            .unwrap();

        // Assert
        assert_eq!(buffer.bytes(), &[65, 0, 0, 0, 0]);
    }

    #[test]
    fn test_append_json_array_of_strings_skips_nulls() {
        let mut buffer = CommandBuffer::new();
        buffer.append_json_values(&[json!("AB"), json!(null), json!("C")]).unwrap();
        assert_eq!(buffer.bytes(), b"ABC");
    }

    #[test]
    fn test_append_json_array_type_follows_first_non_null_element() {
        let mut buffer = CommandBuffer::new();
        buffer.append_json_values(&[json!(null), json!("X")]).unwrap();
        assert_eq!(buffer.bytes(), b"X");
    }

    #[test]
    fn test_append_json_array_rejects_empty_array() {
        let mut buffer = CommandBuffer::new();
        let result = buffer.append_json_array("[]");
        assert!(matches!(result, Err(BufferError::EmptyCommand(_))));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_append_json_array_rejects_malformed_json() {
        let mut buffer = CommandBuffer::new();
        assert!(matches!(
            buffer.append_json_array("[1, 2"),
            Err(BufferError::EmptyCommand(_))
        ));
    }

    #[test]
    fn test_append_json_array_rejects_object_elements() {
        let mut buffer = CommandBuffer::new();
        assert!(matches!(
            buffer.append_json_array(r#"[{"a":1}]"#),
            Err(BufferError::EmptyCommand(_))
        ));
    }

    // ── charset ───────────────────────────────────────────────────────────────

    #[test]
    fn test_append_text_uses_active_charset() {
        // Arrange
        let mut buffer = CommandBuffer::with_charset("windows-1252").unwrap();

        // Act
        buffer.append_text("é");

        // Assert
        assert_eq!(buffer.bytes(), &[0xE9]);
    }

    #[test]
    fn test_unmappable_characters_become_question_marks() {
        // Arrange
        let buffer = CommandBuffer::with_charset("windows-1252").unwrap();

        // Act
        let encoded = buffer.encode_text("€5 ☃ ok");

        // Assert
        assert_eq!(encoded, b"\x805 ? ok");
    }

    #[test]
    fn test_unmappable_in_multibyte_charset_is_one_question_mark() {
        let buffer = CommandBuffer::with_charset("Shift_JIS").unwrap();
        assert_eq!(buffer.encode_text("A\u{1F600}B"), b"A?B");
    }

    #[test]
    fn test_utf16_label_encodes_as_utf8() {
        let buffer = CommandBuffer::with_charset("UTF-16LE").unwrap();
        assert_eq!(buffer.encode_text("é"), "é".as_bytes());
    }

    #[test]
    fn test_set_charset_does_not_reencode_buffered_bytes() {
        // Arrange
        let mut buffer = CommandBuffer::new();
        buffer.append_text("é");

        // Act
        buffer.set_charset("latin1").unwrap();
        buffer.append_text("é");

        // Assert
        assert_eq!(buffer.bytes(), &[0xC3, 0xA9, 0xE9]);
    }

    #[test]
    fn test_set_charset_unknown_label_keeps_current_charset() {
        let mut buffer = CommandBuffer::with_charset("latin1").unwrap();
        let result = buffer.set_charset("no-such-charset");
        assert_eq!(result, Err(BufferError::UnknownCharset("no-such-charset".to_string())));
        assert_eq!(buffer.charset(), encoding_rs::WINDOWS_1252);
    }

    #[test]
    fn test_json_string_array_uses_active_charset() {
        let mut buffer = CommandBuffer::with_charset("windows-1252").unwrap();
        buffer.append_json_values(&[json!("ü")]).unwrap();
        assert_eq!(buffer.bytes(), &[0xFC]);
    }

    #[test]
    fn test_decode_text_round_trips_through_charset() {
        let buffer = CommandBuffer::with_charset("windows-1252").unwrap();
        assert_eq!(buffer.decode_text(&[0x4F, 0x4B, 0xE9]), "OKé");
    }

    // ── inspection ────────────────────────────────────────────────────────────

    #[test]
    fn test_clear_then_bytes_is_empty() {
        let mut buffer = CommandBuffer::new();
        buffer.append(b"data");
        buffer.clear();
        assert!(buffer.bytes().is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_contains_finds_marker_and_ignores_empty_marker() {
        let mut buffer = CommandBuffer::new();
        buffer.append(b"AAA<END>BBB");
        assert!(buffer.contains(b"<END>"));
        assert!(!buffer.contains(b"<NOPE>"));
        assert!(!buffer.contains(b""));
    }

    #[test]
    fn test_find_respects_start_offset() {
        assert_eq!(find(b"abab", b"ab", 0), Some(0));
        assert_eq!(find(b"abab", b"ab", 1), Some(2));
        assert_eq!(find(b"abab", b"ab", 3), None);
    }
}
