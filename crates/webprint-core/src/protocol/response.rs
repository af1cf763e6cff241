//! The JSON object returned for every request.

use serde::{Deserialize, Serialize};

/// A response body.  Absent fields are omitted from the JSON, so an
/// acknowledged request with nothing to report serialises as `{}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
    /// A newly granted access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printers: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<String>>,
    /// Bytes read back from a serial device, decoded as text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ClientResponse {
    pub fn empty() -> Self {
        Self::default()
    }

    /// `{"ready": true}`, plus `cookie` when a grant was just issued.
    pub fn ready(cookie: Option<String>) -> Self {
        Self {
            ready: Some(true),
            cookie,
            ..Self::default()
        }
    }

    pub fn printers(printers: Vec<String>) -> Self {
        Self {
            printers: Some(printers),
            ..Self::default()
        }
    }

    pub fn ports(ports: Vec<String>) -> Self {
        Self {
            ports: Some(ports),
            ..Self::default()
        }
    }

    pub fn output(output: String) -> Self {
        Self {
            output: Some(output),
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
