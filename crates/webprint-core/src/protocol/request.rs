//! Request envelope and typed actions.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::image::{Density, PrinterLanguage};
use crate::serial::LineSettingsRequest;

/// Errors raised while turning a request body into a [`ClientRequest`].
#[derive(Debug, Error, PartialEq)]
pub enum RequestError {
    /// The body is not a JSON object.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// A required envelope field is absent or empty.
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    /// The action's payload fields have the wrong shape.
    #[error("invalid {action} request: {reason}")]
    InvalidPayload { action: String, reason: String },

    /// A print request named no printer, port or socket.
    #[error("no print target in request")]
    NoTarget,

    /// The `socket` field is not `host` or `host:port`.
    #[error("invalid socket address '{0}'")]
    InvalidSocket(String),
}

/// One parsed client request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientRequest {
    pub origin: String,
    /// Access token; empty when the client sent none.
    pub cookie: String,
    pub action: Action,
}

/// Every action a client can request.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Init,
    ListPrinters,
    ListPorts,
    OpenPort(OpenPortPayload),
    ClosePort(ClosePortPayload),
    PrintRaw(PrintRawPayload),
    PrintHtml(PrintHtmlPayload),
    /// An action name this bridge does not know.
    Unsupported(String),
}

impl Action {
    /// The wire name of the action.
    pub fn name(&self) -> &str {
        match self {
            Self::Init => "init",
            Self::ListPrinters => "listprinters",
            Self::ListPorts => "listports",
            Self::OpenPort(_) => "openport",
            Self::ClosePort(_) => "closeport",
            Self::PrintRaw(_) => "printraw",
            Self::PrintHtml(_) => "printhtml",
            Self::Unsupported(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OpenPortPayload {
    pub port: String,
    #[serde(default)]
    pub settings: Option<LineSettingsRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ClosePortPayload {
    #[serde(default)]
    pub port: Option<String>,
}

/// How the `data` field of a `printraw` request is encoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    #[default]
    Base64,
    Hex,
    Plain,
    Json,
    /// Base64 image file bytes, rasterised for the printer.
    Image,
}

/// The `data` field: usually a string, but `json` payloads may also be sent
/// as a literal array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum PayloadData {
    Text(String),
    Array(Vec<Value>),
}

impl PayloadData {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Array(values) => values.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrintRawPayload {
    #[serde(default)]
    pub data: Option<PayloadData>,
    #[serde(default)]
    pub format: PayloadFormat,
    #[serde(default)]
    pub printer: Option<String>,
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub socket: Option<String>,
    /// Character set label for text conversions.
    #[serde(default)]
    pub encoding: Option<String>,
    #[serde(default)]
    pub perspool: Option<usize>,
    #[serde(default)]
    pub endofdoc: Option<String>,
    /// Keep the buffer after sending so a later request can reprint it.
    #[serde(default)]
    pub persist: bool,
    #[serde(default)]
    pub lang: Option<PrinterLanguage>,
    #[serde(default)]
    pub density: Option<Density>,
    /// Spooler job title.
    #[serde(default, alias = "jobName")]
    pub jobname: Option<String>,
    /// Spooler copies; absent or zero prints once.
    #[serde(default)]
    pub copies: Option<u32>,
    /// Marker that opens a serial device's answer.
    #[serde(default, alias = "serialBegin")]
    pub serialbegin: Option<String>,
    /// Marker that closes a serial device's answer.
    #[serde(default, alias = "serialEnd")]
    pub serialend: Option<String>,
}

impl PrintRawPayload {
    /// Picks the destination: printer, then serial port, then socket.
    /// Blank fields count as absent.
    ///
    /// # Errors
    ///
    /// [`RequestError::NoTarget`] if none is present and
    /// [`RequestError::InvalidSocket`] if the socket address is malformed.
    pub fn target(&self) -> Result<PrintTarget, RequestError> {
        if let Some(printer) = non_blank(&self.printer) {
            return Ok(PrintTarget::Printer(printer.to_string()));
        }
        if let Some(port) = non_blank(&self.port) {
            return Ok(PrintTarget::SerialPort(port.to_string()));
        }
        if let Some(socket) = non_blank(&self.socket) {
            return socket.parse().map(PrintTarget::Socket);
        }
        Err(RequestError::NoTarget)
    }

    /// Returns `true` when the request carries no payload at all.
    pub fn has_data(&self) -> bool {
        self.data.as_ref().is_some_and(|data| !data.is_empty())
    }

    pub fn job_name(&self) -> Option<&str> {
        non_blank(&self.jobname)
    }

    pub fn copies(&self) -> u32 {
        self.copies.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PrintHtmlPayload {
    #[serde(default)]
    pub data: String,
    #[serde(default)]
    pub printer: Option<String>,
    #[serde(default, alias = "jobName")]
    pub jobname: Option<String>,
    #[serde(default)]
    pub copies: Option<u32>,
}

impl PrintHtmlPayload {
    pub fn printer(&self) -> Option<&str> {
        non_blank(&self.printer)
    }

    pub fn job_name(&self) -> Option<&str> {
        non_blank(&self.jobname)
    }

    pub fn copies(&self) -> u32 {
        self.copies.unwrap_or(1).max(1)
    }
}

/// Where a `printraw` payload is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintTarget {
    Printer(String),
    SerialPort(String),
    Socket(SocketAddress),
}

/// A `host` or `host:port` socket destination.  IPv6 hosts are written in
/// brackets: `[::1]:9100`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketAddress {
    pub host: String,
    pub port: Option<u16>,
}

impl SocketAddress {
    /// `host:port`, using `default_port` when none was given.
    pub fn to_connect_string(&self, default_port: u16) -> String {
        let port = self.port.unwrap_or(default_port);
        if self.host.contains(':') {
            format!("[{}]:{port}", self.host)
        } else {
            format!("{}:{port}", self.host)
        }
    }
}

impl FromStr for SocketAddress {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RequestError::InvalidSocket(s.to_string());
        let trimmed = s.trim();

        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
            match tail {
                "" => (host, None),
                _ => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match trimmed.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (trimmed, None),
            }
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = port
            .map(|p| p.parse::<u16>().ok().filter(|p| *p > 0).ok_or_else(invalid))
            .transpose()?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.port {
            Some(port) if self.host.contains(':') => write!(f, "[{}]:{port}", self.host),
            Some(port) => write!(f, "{}:{port}", self.host),
            None => f.write_str(&self.host),
        }
    }
}

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    a: Option<String>,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    cookie: Option<String>,
}

impl ClientRequest {
    /// Parses one request body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] if the body is not a JSON object, the `a` or
    /// `origin` field is missing, or the action's payload has the wrong
    /// shape.  Unknown actions are not an error; they parse to
    /// [`Action::Unsupported`].
    pub fn parse(body: &[u8]) -> Result<Self, RequestError> {
        let value: Value =
            serde_json::from_slice(body).map_err(|e| RequestError::Malformed(e.to_string()))?;
        let Value::Object(fields) = value else {
            return Err(RequestError::Malformed("body is not a JSON object".to_string()));
        };

        let envelope: Envelope = serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|e| RequestError::Malformed(e.to_string()))?;

        let name = envelope
            .a
            .filter(|a| !a.trim().is_empty())
            .ok_or(RequestError::MissingField("a"))?;
        let origin = envelope
            .origin
            .filter(|o| !o.trim().is_empty())
            .ok_or(RequestError::MissingField("origin"))?;

        let action = match name.trim().to_ascii_lowercase().as_str() {
            "init" => Action::Init,
            "listprinters" => Action::ListPrinters,
            "listports" => Action::ListPorts,
            "openport" => Action::OpenPort(payload("openport", fields)?),
            "closeport" => Action::ClosePort(payload("closeport", fields)?),
            "printraw" => Action::PrintRaw(payload("printraw", fields)?),
            "printhtml" => Action::PrintHtml(payload("printhtml", fields)?),
            _ => Action::Unsupported(name),
        };

        Ok(Self {
            origin,
            cookie: envelope.cookie.unwrap_or_default(),
            action,
        })
    }
}

fn payload<T: DeserializeOwned>(action: &str, fields: Map<String, Value>) -> Result<T, RequestError> {
    serde_json::from_value(Value::Object(fields)).map_err(|e| RequestError::InvalidPayload {
        action: action.to_string(),
        reason: e.to_string(),
    })
}

fn non_blank(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}
