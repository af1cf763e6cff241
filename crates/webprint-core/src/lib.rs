//! # webprint-core
//!
//! Shared library for the WebPrint bridge containing the command buffer,
//! the auto-spool splitter, serial line settings, the browser-facing request
//! protocol and the image-to-printer-language encoders.
//!
//! This crate does no I/O of its own.  It never opens a socket, a serial port
//! or a printer queue; the `webprint-bridge` crate wires these types to the
//! real devices.
//!
//! # Architecture overview
//!
//! A web page talks to the bridge with small JSON requests.  Each request that
//! prints something carries a payload in one of several encodings (base64,
//! hex, a JSON array, plain text or an image).  This crate turns those
//! payloads into the exact byte sequence a device expects:
//!
//! - **`buffer`** – The [`CommandBuffer`]: an ordered byte sequence plus the
//!   character set used for every text-to-byte conversion.
//!
//! - **`spool`** – Splits one buffer into several print jobs at an
//!   end-of-document marker, so a receipt printer receives one job per ticket.
//!
//! - **`serial`** – Serial line settings (baud, data bits, stop bits, parity,
//!   flow control) and their lenient parsing from client requests.
//!
//! - **`protocol`** – The request envelope, the closed [`Action`] enum with
//!   typed payloads, and the [`ClientResponse`] returned to the page.
//!
//! - **`image`** – The [`ImageEncoder`] seam and an ESC/POS raster encoder.

pub mod buffer;
pub mod image;
pub mod protocol;
pub mod serial;
pub mod spool;

pub use self::buffer::{parse_hex, resolve_charset, BufferError, CommandBuffer};
pub use self::image::{Density, EscPosRasterEncoder, ImageEncoder, ImageError, ImageRequest, PrinterLanguage};
pub use protocol::request::{
    Action, ClientRequest, ClosePortPayload, OpenPortPayload, PayloadData, PayloadFormat,
    PrintHtmlPayload, PrintRawPayload, PrintTarget, RequestError, SocketAddress,
};
pub use protocol::response::ClientResponse;
pub use serial::{
    DataBits, FlowControl, LineSettings, LineSettingsRequest, Parity, ResponseFrame, SettingsError, StopBits,
};
pub use spool::{plan_jobs, split_at_marker, SpoolPlan, SpoolPolicy, SpoolSplit};
