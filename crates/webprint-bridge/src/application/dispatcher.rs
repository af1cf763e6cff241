//! Request dispatcher: one JSON request in, one JSON response out.
//!
//! # Flow
//!
//! ```text
//! body ──parse──► ClientRequest ──init──► consent protocol
//!                        │
//!                        └─ any other action ─► token check ─► route
//!                                                              ├─ listprinters / printhtml ─► PrintSpooler
//!                                                              ├─ listports / openport / closeport ─► SerialSession
//!                                                              └─ printraw ─► CommandBuffer ─► spool plan ─► sink
//! ```
//!
//! Every failure becomes a [`DispatchError`] and then the `error` field of
//! the response; nothing here terminates the connection.  Blocking work
//! (consent prompt, spooler commands, serial I/O) runs on the blocking pool
//! so it only holds up the request that caused it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info, warn};
use webprint_core::{
    plan_jobs, Action, BufferError, ClientRequest, ClientResponse, ClosePortPayload, CommandBuffer,
    ImageEncoder, ImageRequest, OpenPortPayload, PayloadData, PayloadFormat, PrintHtmlPayload,
    PrintRawPayload, PrintTarget, RequestError, ResponseFrame, SpoolPolicy,
};

use crate::application::access_control::{AccessControl, ConsentOutcome};
use crate::application::devices::{resolve_printer, DeviceError, JobOptions, PrintSpooler, SocketSink};
use crate::application::serial_session::{SerialBackend, SerialSession};
use crate::domain::BridgeConfig;

const INVALID_CREDENTIALS: &str = "Invalid authentication credentials provided.";
const ACCESS_REFUSED: &str = "Printer access has been denied for this site.";
const NO_TARGET: &str = "No printer specified in the request.";
const EMPTY_COMMAND: &str = "empty command";

// ── Error type ────────────────────────────────────────────────────────────────

/// Broad category of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Decode,
    BadRequest,
    AccessDenied,
    Device,
}

/// A request that could not be served.  The message is shown to the page.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The payload bytes could not be decoded.
    #[error("{0}")]
    Decode(String),

    /// The request is malformed or incomplete.
    #[error("{0}")]
    BadRequest(String),

    /// The site has no valid grant or the user refused consent.
    #[error("{0}")]
    AccessDenied(String),

    /// A printer, serial port or socket failed.
    #[error("{0}")]
    Device(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Decode(_) => ErrorKind::Decode,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::AccessDenied(_) => ErrorKind::AccessDenied,
            Self::Device(_) => ErrorKind::Device,
        }
    }

    fn not_allowed(origin: &str) -> Self {
        Self::AccessDenied(format!(
            "{origin} has not been allowed access to web print yet.\nTry refreshing the page."
        ))
    }

    fn print_failed(e: DeviceError) -> Self {
        Self::Device(format!("Failed to print: {e}"))
    }

    fn open_failed(e: DeviceError) -> Self {
        Self::Device(format!("Could not open serial port: {e}"))
    }
}

impl From<RequestError> for DispatchError {
    fn from(e: RequestError) -> Self {
        match e {
            RequestError::MissingField("origin") => Self::AccessDenied(INVALID_CREDENTIALS.to_string()),
            RequestError::NoTarget => Self::BadRequest(NO_TARGET.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<BufferError> for DispatchError {
    fn from(e: BufferError) -> Self {
        if e.is_decode_error() {
            Self::Decode(e.to_string())
        } else {
            Self::BadRequest(e.to_string())
        }
    }
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// The device collaborators a [`Dispatcher`] routes to.
#[derive(Clone)]
pub struct Devices {
    pub spooler: Arc<dyn PrintSpooler>,
    pub serial: Arc<dyn SerialBackend>,
    pub sockets: Arc<dyn SocketSink>,
    pub images: Arc<dyn ImageEncoder>,
}

/// Routes parsed requests to the access gate and the devices.
pub struct Dispatcher {
    config: Arc<BridgeConfig>,
    access: Arc<AccessControl>,
    spooler: Arc<dyn PrintSpooler>,
    serial: Arc<Mutex<SerialSession>>,
    sockets: Arc<dyn SocketSink>,
    images: Arc<dyn ImageEncoder>,
    /// Buffers kept after a `persist` print, per origin.
    retained: Mutex<HashMap<String, CommandBuffer>>,
}

impl Dispatcher {
    pub fn new(config: Arc<BridgeConfig>, access: Arc<AccessControl>, devices: Devices) -> Self {
        let session = SerialSession::new(devices.serial, config.serial_defaults, config.serial_read_timeout);
        Self {
            config,
            access,
            spooler: devices.spooler,
            serial: Arc::new(Mutex::new(session)),
            sockets: devices.sockets,
            images: devices.images,
            retained: Mutex::new(HashMap::new()),
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    /// Serves one request body, folding any failure into the response.
    pub async fn handle(&self, body: &[u8]) -> ClientResponse {
        match self.dispatch(body).await {
            Ok(response) => response,
            Err(e) => {
                debug!(kind = ?e.kind(), error = %e, "request failed");
                ClientResponse::error(e.to_string())
            }
        }
    }

    /// Serves one request body.
    ///
    /// # Errors
    ///
    /// Returns a [`DispatchError`] describing why the request was not served.
    pub async fn dispatch(&self, body: &[u8]) -> Result<ClientResponse, DispatchError> {
        let ClientRequest { origin, cookie, action } = ClientRequest::parse(body)?;
        debug!(action = action.name(), %origin, "dispatching request");

        if action != Action::Init && !self.access.is_allowed(&origin, &cookie) {
            warn!(%origin, action = action.name(), "request without a valid grant");
            return Err(DispatchError::not_allowed(&origin));
        }

        match action {
            Action::Init => self.init(origin, cookie).await,
            Action::ListPrinters => self.list_printers().await,
            Action::ListPorts => self.list_ports().await,
            Action::OpenPort(payload) => self.open_port(payload).await,
            Action::ClosePort(payload) => self.close_port(payload).await,
            Action::PrintRaw(payload) => self.print_raw(&origin, payload).await,
            Action::PrintHtml(payload) => self.print_html(payload).await,
            Action::Unsupported(name) => {
                warn!(action = %name, %origin, "ignoring unsupported action");
                Ok(ClientResponse::empty())
            }
        }
    }

    /// Closes the serial port, if one is open.
    pub fn close_serial(&self) {
        lock(&self.serial).close();
    }

    // ── Actions ───────────────────────────────────────────────────────────────

    async fn init(&self, origin: String, cookie: String) -> Result<ClientResponse, DispatchError> {
        let access = Arc::clone(&self.access);
        let outcome = run_blocking(move || access.request_access(&origin, &cookie))
            .await?
            .map_err(|e| DispatchError::Device(e.to_string()))?;

        match outcome {
            ConsentOutcome::AlreadyAllowed => Ok(ClientResponse::ready(None)),
            ConsentOutcome::Granted(token) => Ok(ClientResponse::ready(Some(token))),
            ConsentOutcome::Denied => Err(DispatchError::AccessDenied(ACCESS_REFUSED.to_string())),
        }
    }

    async fn list_printers(&self) -> Result<ClientResponse, DispatchError> {
        let spooler = Arc::clone(&self.spooler);
        let printers = run_blocking(move || spooler.list_printers())
            .await?
            .map_err(|e| DispatchError::Device(format!("Could not list printers: {e}")))?;
        Ok(ClientResponse::printers(printers))
    }

    async fn list_ports(&self) -> Result<ClientResponse, DispatchError> {
        let serial = Arc::clone(&self.serial);
        let ports = run_blocking(move || lock(&serial).list_ports())
            .await?
            .map_err(|e| DispatchError::Device(format!("Could not list serial ports: {e}")))?;
        Ok(ClientResponse::ports(ports))
    }

    async fn open_port(&self, payload: OpenPortPayload) -> Result<ClientResponse, DispatchError> {
        let OpenPortPayload { port, settings } = payload;
        if port.trim().is_empty() {
            return Err(DispatchError::BadRequest("No serial port specified in the request.".to_string()));
        }

        let serial = Arc::clone(&self.serial);
        run_blocking(move || {
            let mut session = lock(&serial);
            let settings = settings
                .filter(|s| !s.is_empty())
                .map(|s| s.resolve(&session.preset()))
                .transpose()
                .map_err(|e| DispatchError::BadRequest(e.to_string()))?;
            session.open(&port, settings).map_err(DispatchError::open_failed)
        })
        .await??;
        Ok(ClientResponse::empty())
    }

    async fn close_port(&self, payload: ClosePortPayload) -> Result<ClientResponse, DispatchError> {
        let requested = payload.port.filter(|p| !p.trim().is_empty());
        let serial = Arc::clone(&self.serial);
        run_blocking(move || {
            let mut session = lock(&serial);
            let matches = match (&requested, session.open_port()) {
                (None, _) => true,
                (Some(wanted), Some(open)) => wanted == open,
                (Some(_), None) => false,
            };
            if matches {
                session.close();
            } else {
                debug!(port = ?requested, "closeport for a port that is not open");
            }
        })
        .await?;
        Ok(ClientResponse::empty())
    }

    async fn print_html(&self, payload: PrintHtmlPayload) -> Result<ClientResponse, DispatchError> {
        let requested = payload
            .printer()
            .ok_or_else(|| DispatchError::BadRequest(NO_TARGET.to_string()))?
            .to_string();
        if payload.data.trim().is_empty() {
            return Err(DispatchError::BadRequest(EMPTY_COMMAND.to_string()));
        }

        let job = JobOptions::new(payload.job_name(), payload.copies());
        let spooler = Arc::clone(&self.spooler);
        run_blocking(move || {
            let printer = find_printer(spooler.as_ref(), &requested)?;
            spooler.print_html(&printer, &job, &payload.data)?;
            info!(%printer, bytes = payload.data.len(), "HTML job sent");
            Ok::<_, DeviceError>(())
        })
        .await?
        .map_err(DispatchError::print_failed)?;
        Ok(ClientResponse::empty())
    }

    async fn print_raw(&self, origin: &str, payload: PrintRawPayload) -> Result<ClientResponse, DispatchError> {
        let target = payload.target()?;
        let (mut buffer, was_retained) = self.take_buffer(origin)?;

        if let Some(label) = payload.encoding.as_deref().filter(|l| !l.trim().is_empty()) {
            if let Err(e) = buffer.set_charset(label) {
                warn!(error = %e, charset = buffer.charset().name(), "keeping current charset");
            }
        }

        let filled = if payload.has_data() {
            self.fill(&mut buffer, &payload)
        } else if buffer.is_empty() {
            Err(DispatchError::BadRequest(EMPTY_COMMAND.to_string()))
        } else {
            debug!(bytes = buffer.len(), "reprinting retained buffer");
            Ok(())
        };
        if let Err(e) = filled {
            if was_retained {
                self.retain(origin, buffer);
            }
            return Err(e);
        }

        let policy = self
            .config
            .spool
            .overridden(payload.perspool, payload.endofdoc.as_deref());

        let (buffer, sent) = match target {
            PrintTarget::Printer(requested) => {
                let job = JobOptions::new(payload.job_name(), payload.copies());
                let spooler = Arc::clone(&self.spooler);
                run_blocking(move || {
                    let sent = send_to_spooler(spooler.as_ref(), &requested, &job, &buffer, &policy);
                    (buffer, sent.map(|()| None))
                })
                .await?
            }
            PrintTarget::SerialPort(port) => {
                let frame = ResponseFrame::new(
                    payload.serialbegin.as_deref().map(|m| buffer.encode_text(m)).unwrap_or_default(),
                    payload.serialend.as_deref().map(|m| buffer.encode_text(m)).unwrap_or_default(),
                );
                let serial = Arc::clone(&self.serial);
                run_blocking(move || {
                    let sent = send_to_serial(&serial, &port, frame, &buffer, &policy);
                    (buffer, sent.map(Some))
                })
                .await?
            }
            PrintTarget::Socket(address) => {
                let addr = address.to_connect_string(self.config.default_socket_port);
                let sent = self.send_to_socket(&addr, &buffer, &policy).await;
                (buffer, sent.map(|()| None))
            }
        };

        if payload.persist {
            self.retain(origin, buffer);
        }

        Ok(match sent? {
            Some(output) => ClientResponse::output(output),
            None => ClientResponse::empty(),
        })
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    /// The retained buffer of `origin`, or a fresh one.  The flag tells
    /// whether the buffer was retained.
    fn take_buffer(&self, origin: &str) -> Result<(CommandBuffer, bool), DispatchError> {
        if let Some(buffer) = lock(&self.retained).remove(origin) {
            return Ok((buffer, true));
        }
        Ok((CommandBuffer::with_charset(&self.config.charset)?, false))
    }

    fn retain(&self, origin: &str, buffer: CommandBuffer) {
        debug!(origin, bytes = buffer.len(), "retaining buffer");
        lock(&self.retained).insert(origin.to_string(), buffer);
    }

    /// Appends the request payload in its declared format.
    fn fill(&self, buffer: &mut CommandBuffer, payload: &PrintRawPayload) -> Result<(), DispatchError> {
        let Some(data) = &payload.data else {
            return Ok(());
        };

        match (payload.format, data) {
            (PayloadFormat::Json, PayloadData::Array(values)) => buffer.append_json_values(values)?,
            (PayloadFormat::Json, PayloadData::Text(text)) => buffer.append_json_array(text)?,
            (_, PayloadData::Array(_)) => {
                return Err(DispatchError::BadRequest(
                    "array data requires format \"json\"".to_string(),
                ))
            }
            (PayloadFormat::Base64, PayloadData::Text(text)) => buffer.append_base64(text)?,
            (PayloadFormat::Hex, PayloadData::Text(text)) => buffer.append_hex(text)?,
            (PayloadFormat::Plain, PayloadData::Text(text)) => buffer.append_text(text),
            (PayloadFormat::Image, PayloadData::Text(text)) => {
                let mut file = CommandBuffer::new();
                file.append_base64(strip_data_url(text))?;
                let request = ImageRequest {
                    data: file.bytes(),
                    language: payload.lang.unwrap_or_default(),
                    density: payload.density.unwrap_or_default(),
                };
                buffer.append_image(self.images.as_ref(), &request)?
            }
        };
        Ok(())
    }

    async fn send_to_socket(
        &self,
        addr: &str,
        buffer: &CommandBuffer,
        policy: &SpoolPolicy,
    ) -> Result<(), DispatchError> {
        let jobs = plan_jobs(buffer, policy).jobs();
        for job in &jobs {
            self.sockets
                .send(addr, job)
                .await
                .map_err(DispatchError::print_failed)?;
        }
        info!(%addr, jobs = jobs.len(), bytes = buffer.len(), "raw job sent to socket");
        Ok(())
    }
}

fn send_to_spooler(
    spooler: &dyn PrintSpooler,
    requested: &str,
    job: &JobOptions,
    buffer: &CommandBuffer,
    policy: &SpoolPolicy,
) -> Result<(), DispatchError> {
    let printer = find_printer(spooler, requested).map_err(DispatchError::print_failed)?;
    let jobs = plan_jobs(buffer, policy).jobs();
    if jobs.len() > 1 {
        info!(jobs = jobs.len(), "auto-spooling into separate jobs");
    }
    for data in &jobs {
        spooler
            .print_raw(&printer, job, data)
            .map_err(DispatchError::print_failed)?;
    }
    info!(%printer, jobs = jobs.len(), bytes = buffer.len(), "raw job sent to printer");
    Ok(())
}

/// Sends every job over the serial port, opening it first if needed, and
/// returns the framed part of whatever the device answered.
fn send_to_serial(
    serial: &Mutex<SerialSession>,
    port: &str,
    frame: ResponseFrame,
    buffer: &CommandBuffer,
    policy: &SpoolPolicy,
) -> Result<String, DispatchError> {
    let mut session = lock(serial);
    if session.open_port() != Some(port) {
        session.open(port, None).map_err(DispatchError::open_failed)?;
    }
    session.set_response_frame(frame);

    let mut answer = Vec::new();
    for job in plan_jobs(buffer, policy).jobs() {
        session.append(job);
        session.send().map_err(DispatchError::print_failed)?;
        answer.extend_from_slice(session.output());
        session.clear_output();
    }
    Ok(buffer.decode_text(&answer))
}

fn find_printer(spooler: &dyn PrintSpooler, requested: &str) -> Result<String, DeviceError> {
    let printers = spooler.list_printers()?;
    resolve_printer(&printers, requested).ok_or_else(|| DeviceError::PrinterNotFound(requested.to_string()))
}

/// `data:image/png;base64,AAAA` → `AAAA`; anything else is returned as is.
fn strip_data_url(text: &str) -> &str {
    match text.trim_start().strip_prefix("data:") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
        None => text,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_blocking<T, F>(work: F) -> Result<T, DispatchError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| DispatchError::Device(format!("device worker failed: {e}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::consent::mock::FixedConsent;
    use crate::infrastructure::printing::mock::{RecordingSocketSink, RecordingSpooler};
    use crate::infrastructure::serial::mock::MockSerialBackend;
    use crate::infrastructure::storage::JsonGrantStore;
    use base64::Engine as _;
    use serde_json::{json, Value};
    use std::time::Duration;
    use webprint_core::{ImageError, LineSettings, Parity};

    const SITE: &str = "https://shop.example";

    /// Encoder that ignores the image and emits a fixed marker.
    struct FakeEncoder;

    impl ImageEncoder for FakeEncoder {
        fn encode(&self, request: &ImageRequest<'_>) -> Result<Vec<u8>, ImageError> {
            let mut out = b"IMG:".to_vec();
            out.extend_from_slice(request.data);
            Ok(out)
        }
    }

    struct Harness {
        dispatcher: Dispatcher,
        spooler: RecordingSpooler,
        serial: MockSerialBackend,
        sockets: RecordingSocketSink,
        consent: FixedConsent,
        _dir: tempfile::TempDir,
    }

    fn harness_with(consent: FixedConsent, config: BridgeConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonGrantStore::new(dir.path().join("webprint_acl.json")));
        let access = Arc::new(AccessControl::open(store, Arc::new(consent.clone())).unwrap());
        let spooler = RecordingSpooler::with_printers(&["Office Laser", "Receipt TM-T88"]);
        let serial = MockSerialBackend::with_ports(&["/dev/ttyUSB0", "/dev/ttyUSB1"]);
        let sockets = RecordingSocketSink::default();
        let devices = Devices {
            spooler: Arc::new(spooler.clone()),
            serial: Arc::new(serial.clone()),
            sockets: Arc::new(sockets.clone()),
            images: Arc::new(FakeEncoder),
        };
        Harness {
            dispatcher: Dispatcher::new(Arc::new(config), access, devices),
            spooler,
            serial,
            sockets,
            consent,
            _dir: dir,
        }
    }

    fn harness() -> Harness {
        harness_with(FixedConsent::allow(), BridgeConfig::default())
    }

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    fn b64(bytes: &[u8]) -> String {
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    async fn grant(h: &Harness) -> String {
        let response = h.dispatcher.handle(&body(json!({"a": "init", "origin": SITE}))).await;
        response.cookie.expect("new grant returns a cookie")
    }

    async fn send(h: &Harness, cookie: &str, mut request: Value) -> ClientResponse {
        request["origin"] = json!(SITE);
        request["cookie"] = json!(cookie);
        h.dispatcher.handle(&body(request)).await
    }

    // ── Envelope and authorization ────────────────────────────────────────────

    #[tokio::test]
    async fn test_missing_origin_is_invalid_credentials() {
        // Arrange
        let h = harness();

        // Act
        let result = h.dispatcher.dispatch(&body(json!({"a": "listprinters"}))).await;

        // Assert
        assert_eq!(result, Err(DispatchError::AccessDenied(INVALID_CREDENTIALS.to_string())));
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let h = harness();
        let err = h.dispatcher.dispatch(b"{not json").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_init_grants_token_once_then_reports_ready() {
        // Arrange
        let h = harness();

        // Act
        let cookie = grant(&h).await;
        let again = send(&h, &cookie, json!({"a": "init"})).await;

        // Assert
        assert_eq!(again.ready, Some(true));
        assert_eq!(again.cookie, None);
        assert_eq!(h.consent.asked(), vec![SITE.to_string()]);
    }

    #[tokio::test]
    async fn test_init_denied_by_user() {
        // Arrange
        let h = harness_with(FixedConsent::deny(), BridgeConfig::default());

        // Act
        let result = h.dispatcher.dispatch(&body(json!({"a": "init", "origin": SITE}))).await;

        // Assert
        assert_eq!(result, Err(DispatchError::AccessDenied(ACCESS_REFUSED.to_string())));
    }

    #[tokio::test]
    async fn test_wrong_cookie_is_denied_and_lists_nothing() {
        // Arrange
        let h = harness();
        grant(&h).await;

        // Act
        let response = send(&h, "forged", json!({"a": "listprinters"})).await;

        // Assert
        assert!(response.printers.is_none());
        assert_eq!(
            response.error.as_deref(),
            Some("https://shop.example has not been allowed access to web print yet.\nTry refreshing the page.")
        );
    }

    #[tokio::test]
    async fn test_unsupported_action_returns_empty_object() {
        let h = harness();
        let cookie = grant(&h).await;
        let response = send(&h, &cookie, json!({"a": "printpdf"})).await;
        assert_eq!(response, ClientResponse::empty());
    }

    // ── Listing ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_list_printers_and_ports() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        let printers = send(&h, &cookie, json!({"a": "listprinters"})).await;
        let ports = send(&h, &cookie, json!({"a": "listports"})).await;

        // Assert
        assert_eq!(printers.printers.unwrap(), vec!["Office Laser", "Receipt TM-T88"]);
        assert_eq!(ports.ports.unwrap(), vec!["/dev/ttyUSB0", "/dev/ttyUSB1"]);
    }

    // ── printraw ──────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_print_raw_base64_to_fuzzy_printer() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        let response = send(
            &h,
            &cookie,
            json!({"a": "printraw", "printer": "receipt", "data": b64(b"\x1B@Hello\n")}),
        )
        .await;

        // Assert
        assert!(!response.is_error(), "{response:?}");
        let jobs = h.spooler.raw_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target, "Receipt TM-T88");
        assert_eq!(jobs[0].data, b"\x1B@Hello\n");
    }

    #[tokio::test]
    async fn test_print_raw_job_name_and_copies_reach_spooler() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(&h, &cookie, json!({"a": "printraw", "printer": "receipt", "data": b64(b"x")})).await;
        send(
            &h,
            &cookie,
            json!({"a": "printraw", "printer": "receipt", "data": b64(b"y"), "jobname": "Order 7", "copies": 3}),
        )
        .await;

        // Assert
        let jobs = h.spooler.raw_jobs();
        assert_eq!(jobs[0].options, Some(JobOptions::default()));
        assert_eq!(jobs[0].options.as_ref().unwrap().name, "WebPrint");
        assert_eq!(jobs[1].options, Some(JobOptions::new(Some("Order 7"), 3)));
    }

    #[tokio::test]
    async fn test_print_raw_without_target_is_rejected() {
        let h = harness();
        let cookie = grant(&h).await;
        let response = send(&h, &cookie, json!({"a": "printraw", "data": b64(b"x")})).await;
        assert_eq!(response.error.as_deref(), Some(NO_TARGET));
    }

    #[tokio::test]
    async fn test_print_raw_unknown_printer_fails_to_print() {
        let h = harness();
        let cookie = grant(&h).await;
        let response = send(&h, &cookie, json!({"a": "printraw", "printer": "plotter", "data": b64(b"x")})).await;
        assert!(response.error.unwrap().starts_with("Failed to print:"));
    }

    #[tokio::test]
    async fn test_print_raw_invalid_base64_is_decode_error() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        let request = json!({"a": "printraw", "printer": "Office", "data": "!!!", "origin": SITE, "cookie": cookie});

        // Act
        let result = h.dispatcher.dispatch(&body(request)).await;

        // Assert
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Decode);
        assert!(h.spooler.raw_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_print_raw_empty_payload_is_bad_request() {
        let h = harness();
        let cookie = grant(&h).await;
        let response = send(&h, &cookie, json!({"a": "printraw", "printer": "Office"})).await;
        assert_eq!(response.error.as_deref(), Some(EMPTY_COMMAND));
    }

    #[tokio::test]
    async fn test_print_raw_auto_spools_with_request_overrides() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(
            &h,
            &cookie,
            json!({
                "a": "printraw", "printer": "Office", "format": "plain",
                "data": "AAA<END>BBB<END>CCC", "perspool": 2, "endofdoc": "<END>"
            }),
        )
        .await;

        // Assert
        let jobs: Vec<Vec<u8>> = h.spooler.raw_jobs().into_iter().map(|j| j.data).collect();
        assert_eq!(jobs, vec![b"AAA<END>".to_vec(), b"BBB<END>".to_vec()]);
    }

    #[tokio::test]
    async fn test_print_raw_json_array_and_charset() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(
            &h,
            &cookie,
            json!({
                "a": "printraw", "printer": "Office", "format": "json",
                "encoding": "windows-1252", "data": ["caf\u{e9}", "\n"]
            }),
        )
        .await;

        // Assert
        assert_eq!(h.spooler.raw_jobs()[0].data, b"caf\xE9\n");
    }

    #[tokio::test]
    async fn test_print_raw_unknown_charset_keeps_default() {
        let h = harness();
        let cookie = grant(&h).await;
        send(
            &h,
            &cookie,
            json!({"a": "printraw", "printer": "Office", "format": "plain", "encoding": "klingon", "data": "\u{e9}"}),
        )
        .await;
        assert_eq!(h.spooler.raw_jobs()[0].data, "\u{e9}".as_bytes());
    }

    #[tokio::test]
    async fn test_print_raw_image_goes_through_encoder() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        let data = format!("data:image/png;base64,{}", b64(b"PIXELS"));

        // Act
        send(&h, &cookie, json!({"a": "printraw", "printer": "Office", "format": "image", "data": data})).await;

        // Assert
        assert_eq!(h.spooler.raw_jobs()[0].data, b"IMG:PIXELS");
    }

    #[tokio::test]
    async fn test_persist_retains_buffer_for_reprint() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        send(
            &h,
            &cookie,
            json!({"a": "printraw", "printer": "Office", "format": "hex", "data": "1B40", "persist": true}),
        )
        .await;

        // Act
        let response = send(&h, &cookie, json!({"a": "printraw", "printer": "Office"})).await;

        // Assert
        assert!(!response.is_error(), "{response:?}");
        let jobs = h.spooler.raw_jobs();
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].data, b"\x1B\x40");
    }

    #[tokio::test]
    async fn test_without_persist_buffer_is_dropped() {
        let h = harness();
        let cookie = grant(&h).await;
        send(&h, &cookie, json!({"a": "printraw", "printer": "Office", "data": b64(b"x")})).await;
        let response = send(&h, &cookie, json!({"a": "printraw", "printer": "Office"})).await;
        assert_eq!(response.error.as_deref(), Some(EMPTY_COMMAND));
    }

    #[tokio::test]
    async fn test_print_raw_to_socket_uses_default_port() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(&h, &cookie, json!({"a": "printraw", "socket": "10.0.0.7", "data": b64(b"^XA^XZ")})).await;

        // Assert
        let jobs = h.sockets.jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target, "10.0.0.7:9100");
        assert_eq!(jobs[0].data, b"^XA^XZ");
    }

    #[tokio::test]
    async fn test_spooler_failure_is_reported() {
        let h = harness();
        let cookie = grant(&h).await;
        h.spooler.fail_jobs(true);
        let response = send(&h, &cookie, json!({"a": "printraw", "printer": "Office", "data": b64(b"x")})).await;
        assert_eq!(response.error.as_deref(), Some("Failed to print: spooler error: printer on fire"));
    }

    // ── Serial ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_open_port_applies_client_settings() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        let response = send(
            &h,
            &cookie,
            json!({"a": "openport", "port": "/dev/ttyUSB0", "settings": {"baud": "19200", "parity": "e"}}),
        )
        .await;

        // Assert
        assert!(!response.is_error(), "{response:?}");
        let opened = h.serial.opened_with("/dev/ttyUSB0").unwrap();
        assert_eq!(opened.baud, 19200);
        assert_eq!(opened.parity, Parity::Even);
    }

    #[tokio::test]
    async fn test_open_unknown_port_reports_serial_error() {
        let h = harness();
        let cookie = grant(&h).await;
        let response = send(&h, &cookie, json!({"a": "openport", "port": "COM9"})).await;
        assert!(response.error.unwrap().starts_with("Could not open serial port:"));
    }

    #[tokio::test]
    async fn test_open_second_port_closes_first() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(&h, &cookie, json!({"a": "openport", "port": "/dev/ttyUSB0"})).await;
        send(&h, &cookie, json!({"a": "openport", "port": "/dev/ttyUSB1"})).await;

        // Assert
        assert!(!h.serial.is_open("/dev/ttyUSB0"));
        assert!(h.serial.is_open("/dev/ttyUSB1"));
    }

    #[tokio::test]
    async fn test_print_raw_to_serial_returns_device_answer() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        h.serial.set_reply("/dev/ttyUSB0", b"OK\r\n");

        // Act
        let response = send(
            &h,
            &cookie,
            json!({"a": "printraw", "port": "/dev/ttyUSB0", "format": "plain", "data": "W\r"}),
        )
        .await;

        // Assert
        assert_eq!(response.output.as_deref(), Some("OK\r\n"));
        assert_eq!(h.serial.written("/dev/ttyUSB0"), b"W\r");
        assert_eq!(h.serial.opened_with("/dev/ttyUSB0"), Some(LineSettings::default()));
    }

    #[tokio::test]
    async fn test_print_raw_to_serial_keeps_text_between_markers() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        h.serial.set_reply("/dev/ttyUSB0", b"\x02  12.50 kg\x03\r\n");

        // Act
        let response = send(
            &h,
            &cookie,
            json!({
                "a": "printraw", "port": "/dev/ttyUSB0", "format": "plain", "data": "W\r",
                "serialBegin": "\u{2}", "serialEnd": "\u{3}"
            }),
        )
        .await;

        // Assert
        assert_eq!(response.output.as_deref(), Some("  12.50 kg"));
        assert_eq!(
            h.serial.read_frames("/dev/ttyUSB0"),
            vec![ResponseFrame::new(*b"\x02", *b"\x03")]
        );
    }

    #[tokio::test]
    async fn test_serial_markers_do_not_outlive_their_request() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        h.serial.set_reply("/dev/ttyUSB0", b"<A>");
        let framed = json!({
            "a": "printraw", "port": "/dev/ttyUSB0", "format": "plain", "data": "1",
            "serialbegin": "<", "serialend": ">"
        });
        let plain = json!({"a": "printraw", "port": "/dev/ttyUSB0", "format": "plain", "data": "2"});

        // Act
        let first = send(&h, &cookie, framed).await;
        let second = send(&h, &cookie, plain).await;

        // Assert
        assert_eq!(first.output.as_deref(), Some("A"));
        assert_eq!(second.output.as_deref(), Some("<A>"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_parallel_serial_requests_never_hold_two_ports() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        h.serial.set_read_delay(Duration::from_millis(20));
        let to = |port: &str| json!({"a": "printraw", "port": port, "format": "plain", "data": "x"});

        // Act
        let (a, b, c, d) = tokio::join!(
            send(&h, &cookie, to("/dev/ttyUSB0")),
            send(&h, &cookie, to("/dev/ttyUSB1")),
            send(&h, &cookie, to("/dev/ttyUSB0")),
            send(&h, &cookie, to("/dev/ttyUSB1")),
        );

        // Assert
        for response in [a, b, c, d] {
            assert_eq!(response.error, None);
        }
        assert_eq!(h.serial.peak_open(), 1);
        assert_eq!(
            h.serial.written("/dev/ttyUSB0").len() + h.serial.written("/dev/ttyUSB1").len(),
            4
        );
    }

    #[tokio::test]
    async fn test_close_port_only_closes_matching_port() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;
        send(&h, &cookie, json!({"a": "openport", "port": "/dev/ttyUSB0"})).await;

        // Act
        send(&h, &cookie, json!({"a": "closeport", "port": "/dev/ttyUSB1"})).await;
        let still_open = h.serial.is_open("/dev/ttyUSB0");
        send(&h, &cookie, json!({"a": "closeport"})).await;

        // Assert
        assert!(still_open);
        assert!(!h.serial.is_open("/dev/ttyUSB0"));
    }

    // ── printhtml ─────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_print_html_goes_to_named_printer() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(&h, &cookie, json!({"a": "printhtml", "printer": "office laser", "data": "<h1>Hi</h1>"})).await;

        // Assert
        let jobs = h.spooler.html_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target, "Office Laser");
        assert_eq!(jobs[0].data, b"<h1>Hi</h1>");
    }

    #[tokio::test]
    async fn test_print_html_carries_job_name_and_copies() {
        // Arrange
        let h = harness();
        let cookie = grant(&h).await;

        // Act
        send(
            &h,
            &cookie,
            json!({"a": "printhtml", "printer": "laser", "data": "<p>", "jobName": "Packing slip", "copies": 2}),
        )
        .await;

        // Assert
        let jobs = h.spooler.html_jobs();
        assert_eq!(jobs[0].options, Some(JobOptions::new(Some("Packing slip"), 2)));
    }

    #[tokio::test]
    async fn test_print_html_without_printer_is_rejected() {
        let h = harness();
        let cookie = grant(&h).await;
        let response = send(&h, &cookie, json!({"a": "printhtml", "data": "<p>"})).await;
        assert_eq!(response.error.as_deref(), Some(NO_TARGET));
    }

    #[test]
    fn test_strip_data_url() {
        assert_eq!(strip_data_url("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url("QUJD"), "QUJD");
    }
}
