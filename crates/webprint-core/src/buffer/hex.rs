//! Hexadecimal payload parsing.
//!
//! Two spellings are accepted:
//!
//! ```text
//! 1B40          contiguous digit pairs
//! x1Bx40        every byte prefixed with `x` (also `\x1B\x40`)
//! ```
//!
//! Whitespace is ignored in both forms.

use super::BufferError;

/// Parses a hexadecimal command string into raw bytes.
///
/// # Errors
///
/// Returns [`BufferError::Hex`] when a digit is not hexadecimal, the
/// contiguous form has an odd number of digits, or an `x`-prefixed group is
/// longer than two digits.
///
/// # Examples
///
/// ```rust
/// use webprint_core::parse_hex;
///
/// assert_eq!(parse_hex("1B40").unwrap(), vec![0x1B, 0x40]);
/// assert_eq!(parse_hex("x1Bx40").unwrap(), vec![0x1B, 0x40]);
/// ```
pub fn parse_hex(text: &str) -> Result<Vec<u8>, BufferError> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace() && *c != '\\')
        .collect();

    if compact.contains(['x', 'X']) {
        compact
            .split(['x', 'X'])
            .filter(|group| !group.is_empty())
            .map(parse_group)
            .collect()
    } else {
        ::hex::decode(&compact).map_err(|e| BufferError::Hex(e.to_string()))
    }
}

fn parse_group(group: &str) -> Result<u8, BufferError> {
    if group.len() > 2 {
        return Err(BufferError::Hex(format!(
            "group '{group}' is longer than one byte"
        )));
    }
    u8::from_str_radix(group, 16)
        .map_err(|_| BufferError::Hex(format!("'{group}' is not a hexadecimal byte")))
}
