//! Browser-facing request protocol.
//!
//! Every POST body is one JSON object.  The `a` field names the action, the
//! `origin` and `cookie` fields identify the calling site, and the remaining
//! fields are the action's payload:
//!
//! ```json
//! {"a": "printraw", "origin": "https://shop.example", "cookie": "…",
//!  "printer": "Receipt", "data": "G0A="}
//! ```
//!
//! Responses are one JSON object as well; see [`response::ClientResponse`].

pub mod request;
pub mod response;
