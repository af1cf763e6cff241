//! Serial line settings.
//!
//! Browsers send settings as loosely typed JSON: `"baud": 9600` and
//! `"baud": "9600"` are both common, parity may be a name or a numeric code,
//! and stop bits may be `1.5`.  [`LineSettingsRequest`] accepts all of these
//! and overlays them on a base [`LineSettings`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A setting value that could not be understood.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid serial setting {field}: '{value}'")]
pub struct SettingsError {
    pub field: &'static str,
    pub value: String,
}

impl SettingsError {
    fn new(field: &'static str, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    #[serde(rename = "5")]
    Five,
    #[serde(rename = "6")]
    Six,
    #[serde(rename = "7")]
    Seven,
    #[default]
    #[serde(rename = "8")]
    Eight,
}

impl FromStr for DataBits {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "5" => Ok(Self::Five),
            "6" => Ok(Self::Six),
            "7" => Ok(Self::Seven),
            "8" => Ok(Self::Eight),
            other => Err(SettingsError::new("databits", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    #[default]
    #[serde(rename = "1")]
    One,
    #[serde(rename = "1.5")]
    OnePointFive,
    #[serde(rename = "2")]
    Two,
}

impl FromStr for StopBits {
    type Err = SettingsError;

    /// Accepts `1`, `1.5` and `2`.  `3` is the legacy numeric code for 1.5.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" | "1.0" => Ok(Self::One),
            "1.5" | "3" => Ok(Self::OnePointFive),
            "2" | "2.0" => Ok(Self::Two),
            other => Err(SettingsError::new("stopbits", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = SettingsError;

    /// Accepts names, their initials, or the numeric codes `0`–`4`
    /// (none, odd, even, mark, space).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "n" | "0" => Ok(Self::None),
            "odd" | "o" | "1" => Ok(Self::Odd),
            "even" | "e" | "2" => Ok(Self::Even),
            "mark" | "m" | "3" => Ok(Self::Mark),
            "space" | "s" | "4" => Ok(Self::Space),
            _ => Err(SettingsError::new("parity", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    RtsCts,
    XonXoff,
}

impl FromStr for FlowControl {
    type Err = SettingsError;

    /// Accepts names or the numeric flow-control masks: `1`–`3` select
    /// hardware and `4`, `8`, `12` select software flow control.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "n" | "0" | "" => Ok(Self::None),
            "rtscts" | "rts/cts" | "r" | "hardware" | "1" | "2" | "3" => Ok(Self::RtsCts),
            "xonxoff" | "xon/xoff" | "x" | "software" | "4" | "8" | "12" => Ok(Self::XonXoff),
            _ => Err(SettingsError::new("flow", s)),
        }
    }
}

/// Complete line settings for one serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LineSettings {
    pub baud: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub flow_control: FlowControl,
}

impl Default for LineSettings {
    /// 9600 baud, 8 data bits, no parity, one stop bit, no flow control.
    fn default() -> Self {
        Self {
            baud: 9600,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            flow_control: FlowControl::None,
        }
    }
}

impl fmt::Display for LineSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = match self.data_bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        };
        let parity = match self.parity {
            Parity::None => 'N',
            Parity::Odd => 'O',
            Parity::Even => 'E',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        };
        let stop = match self.stop_bits {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        };
        write!(f, "{} {data}{parity}{stop}", self.baud)?;
        match self.flow_control {
            FlowControl::None => Ok(()),
            FlowControl::RtsCts => f.write_str(" rts/cts"),
            FlowControl::XonXoff => f.write_str(" xon/xoff"),
        }
    }
}

/// Line settings as sent by a client; every field is optional and may be a
/// number or a string.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct LineSettingsRequest {
    #[serde(default)]
    pub baud: Option<Value>,
    #[serde(default, alias = "dataBits")]
    pub databits: Option<Value>,
    #[serde(default, alias = "stopBits")]
    pub stopbits: Option<Value>,
    #[serde(default)]
    pub parity: Option<Value>,
    #[serde(default, alias = "flowControl")]
    pub flow: Option<Value>,
}

impl LineSettingsRequest {
    /// Returns `true` if no field was supplied.
    pub fn is_empty(&self) -> bool {
        [&self.baud, &self.databits, &self.stopbits, &self.parity, &self.flow]
            .iter()
            .all(|field| field.as_ref().map_or(true, Value::is_null))
    }

    /// Overlays the supplied fields on `base`.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] naming the first field that cannot be parsed.
    pub fn resolve(&self, base: &LineSettings) -> Result<LineSettings, SettingsError> {
        let mut settings = *base;

        if let Some(text) = field_text(&self.baud) {
            settings.baud = text
                .parse::<u32>()
                .ok()
                .filter(|baud| *baud > 0)
                .ok_or_else(|| SettingsError::new("baud", text.as_str()))?;
        }
        if let Some(text) = field_text(&self.databits) {
            settings.data_bits = text.parse()?;
        }
        if let Some(text) = field_text(&self.stopbits) {
            settings.stop_bits = text.parse()?;
        }
        if let Some(text) = field_text(&self.parity) {
            settings.parity = text.parse()?;
        }
        if let Some(text) = field_text(&self.flow) {
            settings.flow_control = text.parse()?;
        }

        Ok(settings)
    }
}

// ── Response framing ──────────────────────────────────────────────────────────

/// Markers that delimit a device's answer on the serial line.
///
/// With an `end` marker the bridge reads until the marker arrives instead of
/// waiting for the line to fall quiet.  Only the bytes between the markers
/// are reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseFrame {
    pub begin: Vec<u8>,
    pub end: Vec<u8>,
}

impl ResponseFrame {
    pub fn new(begin: impl Into<Vec<u8>>, end: impl Into<Vec<u8>>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
        }
    }

    /// Returns `true` if neither marker is set.
    pub fn is_empty(&self) -> bool {
        self.begin.is_empty() && self.end.is_empty()
    }

    /// Returns `true` once `received` holds a complete framed answer.
    /// Without an `end` marker an answer is never known to be complete.
    pub fn is_complete(&self, received: &[u8]) -> bool {
        !self.end.is_empty() && self.bounds(received).is_some_and(|(_, end)| end.is_some())
    }

    /// The answer inside the markers.
    ///
    /// A missing `begin` marker yields nothing; a missing `end` marker
    /// yields everything after `begin`.
    pub fn extract<'a>(&self, received: &'a [u8]) -> &'a [u8] {
        match self.bounds(received) {
            None => &[],
            Some((start, Some(end))) => &received[start..end],
            Some((start, None)) => &received[start..],
        }
    }

    /// Start of the body and, when found, the offset of the `end` marker.
    fn bounds(&self, received: &[u8]) -> Option<(usize, Option<usize>)> {
        let start = if self.begin.is_empty() {
            0
        } else {
            find(received, &self.begin)? + self.begin.len()
        };
        let end = if self.end.is_empty() {
            None
        } else {
            find(&received[start..], &self.end).map(|offset| start + offset)
        };
        Some((start, end))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Renders a loosely typed JSON field as text, treating null as absent.
fn field_text(field: &Option<Value>) -> Option<String> {
    match field.as_ref()? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(value: Value) -> LineSettingsRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_line_settings_are_9600_8n1() {
        let settings = LineSettings::default();
        assert_eq!(settings.to_string(), "9600 8N1");
    }

    #[test]
    fn test_resolve_accepts_numbers_and_strings() {
        // Arrange
        let req = request(json!({
            "baud": "19200", "databits": 7, "stopbits": 1.5, "parity": "even", "flow": "rtscts"
        }));

        // Act
        let settings = req.resolve(&LineSettings::default()).unwrap();

        // Assert
        assert_eq!(
            settings,
            LineSettings {
                baud: 19200,
                data_bits: DataBits::Seven,
                stop_bits: StopBits::OnePointFive,
                parity: Parity::Even,
                flow_control: FlowControl::RtsCts,
            }
        );
    }

    #[test]
    fn test_resolve_keeps_base_for_missing_and_null_fields() {
        let base = LineSettings { baud: 115200, ..LineSettings::default() };
        let settings = request(json!({ "parity": 1, "flow": null })).resolve(&base).unwrap();
        assert_eq!(settings.baud, 115200);
        assert_eq!(settings.parity, Parity::Odd);
        assert_eq!(settings.flow_control, FlowControl::None);
    }

    #[test]
    fn test_resolve_accepts_camel_case_aliases() {
        let settings = request(json!({ "dataBits": "5", "stopBits": "2", "flowControl": "xonxoff" }))
            .resolve(&LineSettings::default())
            .unwrap();
        assert_eq!(settings.data_bits, DataBits::Five);
        assert_eq!(settings.stop_bits, StopBits::Two);
        assert_eq!(settings.flow_control, FlowControl::XonXoff);
    }

    #[test]
    fn test_resolve_rejects_bad_baud() {
        let err = request(json!({ "baud": "fast" })).resolve(&LineSettings::default()).unwrap_err();
        assert_eq!(err, SettingsError::new("baud", "fast"));
        assert!(request(json!({ "baud": 0 })).resolve(&LineSettings::default()).is_err());
    }

    #[test]
    fn test_resolve_rejects_bad_data_bits() {
        let err = request(json!({ "databits": 9 })).resolve(&LineSettings::default()).unwrap_err();
        assert_eq!(err.field, "databits");
    }

    #[test]
    fn test_parity_accepts_numeric_codes() {
        assert_eq!("4".parse::<Parity>().unwrap(), Parity::Space);
        assert_eq!("M".parse::<Parity>().unwrap(), Parity::Mark);
        assert!("7".parse::<Parity>().is_err());
    }

    #[test]
    fn test_request_is_empty_when_all_fields_absent_or_null() {
        assert!(request(json!({})).is_empty());
        assert!(request(json!({ "baud": null })).is_empty());
        assert!(!request(json!({ "baud": 9600 })).is_empty());
    }

    // ── response framing ──────────────────────────────────────────────────────

    #[test]
    fn test_frame_extracts_body_between_markers() {
        // Arrange
        let frame = ResponseFrame::new(*b"\x02", *b"\x03");

        // Act
        let body = frame.extract(b"noise\x02 12.50 kg\x03\r\n");

        // Assert
        assert_eq!(body, b" 12.50 kg");
    }

    #[test]
    fn test_frame_is_complete_only_after_end_marker() {
        let frame = ResponseFrame::new(*b"[", *b"]");
        assert!(!frame.is_complete(b"[12"));
        assert!(!frame.is_complete(b"12]"), "end before begin does not count");
        assert!(frame.is_complete(b"x[12]"));
    }

    #[test]
    fn test_frame_without_begin_starts_at_first_byte() {
        let frame = ResponseFrame::new(Vec::new(), *b"\r");
        assert!(frame.is_complete(b"OK\r"));
        assert_eq!(frame.extract(b"OK\rjunk"), b"OK");
    }

    #[test]
    fn test_frame_without_end_is_never_complete() {
        let frame = ResponseFrame::new(*b">", Vec::new());
        assert!(!frame.is_complete(b">ready"));
        assert_eq!(frame.extract(b"..>ready"), b"ready");
    }

    #[test]
    fn test_frame_missing_begin_yields_nothing() {
        let frame = ResponseFrame::new(*b"<", *b">");
        assert_eq!(frame.extract(b"no markers"), b"");
    }

    #[test]
    fn test_empty_frame_passes_everything() {
        let frame = ResponseFrame::default();
        assert!(frame.is_empty());
        assert!(!frame.is_complete(b"abc"));
        assert_eq!(frame.extract(b"abc"), b"abc");
    }

    #[test]
    fn test_line_settings_deserialize_from_toml_style_names() {
        let settings: LineSettings = serde_json::from_value(json!({
            "baud": 4800, "data_bits": "7", "stop_bits": "2", "parity": "odd", "flow_control": "xonxoff"
        }))
        .unwrap();
        assert_eq!(settings.to_string(), "4800 7O2 xon/xoff");
    }
}
