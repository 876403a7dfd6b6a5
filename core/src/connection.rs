//! One HTTP exchange driven by a background worker and observed by polling.
//!
//! # Design
//! Everything that changes after creation lives in `Shared` behind a single
//! mutex. The host-facing getters, `pull` and `cancel` only take that lock
//! for a few field reads or a buffer copy, so they never wait on the
//! network: the worker releases the lock around every transport call and
//! re-takes it just to latch metadata or write one chunk.
//!
//! `send` runs the setup steps synchronously (opening the source and
//! destination files, assembling the request) and then spawns one worker
//! thread per connection. The worker reports progress solely by mutating
//! `Shared`; errors are latched there and force the state to `Cancelled`.

use std::fs::File;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, error, warn};

use crate::config::ClientConfig;
use crate::error::{ErrorKind, ERROR_DOMAIN};
use crate::http::{HeaderField, HttpMethod, OutgoingRequest, RequestBody, RequestOptions};
use crate::sink::{DestinationFile, Sink};
use crate::state::{ConnectionState, StateMachine};
use crate::status::AcceptableStatusSet;
use crate::buffer::TransferBuffers;
use crate::transport::{Phase, Transport};

/// Opaque handle given to the host. `0` is never a valid id.
pub type ConnectionId = u32;

/// Status assumed when the transport cannot report one.
const STATUS_ON_READ_FAILURE: u16 = 401;

/// Request body as configured by the host, before any file is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BodySource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Destination {
    path: PathBuf,
    resume: bool,
}

#[derive(Debug)]
struct RequestConfig {
    method: HttpMethod,
    url: String,
    timeout: Option<Duration>,
    cache_disabled: bool,
    headers: Vec<(String, String)>,
    body: Option<BodySource>,
    destination: Option<Destination>,
    follow_redirects: bool,
    max_redirects: Option<u32>,
    allow_invalid_certificates: bool,
    acceptable: AcceptableStatusSet,
}

#[derive(Debug)]
struct ResponseMeta {
    status: u16,
    headers: Vec<HeaderField>,
    expected_length: i64,
    bytes_read: u64,
    bytes_resumed: u64,
    dirty: bool,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            status: 0,
            headers: Vec::new(),
            expected_length: -1,
            bytes_read: 0,
            bytes_resumed: 0,
            dirty: false,
        }
    }
}

#[derive(Debug)]
struct Shared {
    machine: StateMachine,
    /// Set by `cancel` and by any latched failure; checked by the worker.
    cancelled: bool,
    request: RequestConfig,
    sink: Sink,
    response: ResponseMeta,
}

pub struct Connection {
    pub(crate) id: ConnectionId,
    transport: Arc<dyn Transport>,
    config: ClientConfig,
    shared: Mutex<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Replace the value of an existing header (case-insensitive) or append it.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: String) {
    match headers.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
        Some((_, v)) => *v = value,
        None => headers.push((name.to_string(), value)),
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(n, _)| n.eq_ignore_ascii_case(name))
}

/// Check the URL and return the error to latch when it cannot be used.
fn validate_url(url: &str) -> Result<(), ErrorKind> {
    let uri: ureq::http::Uri = url.parse().map_err(|_| ErrorKind::Allocation)?;
    match uri.scheme_str() {
        Some(scheme) if scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https") => {
            Ok(())
        }
        Some(_) => Err(ErrorKind::UnsupportedProtocol),
        None => Err(ErrorKind::Allocation),
    }
}

impl Connection {
    /// Create a connection in the `Initialized` state.
    ///
    /// An unknown method or an unusable URL does not fail construction: the
    /// error is latched and the connection starts out `Cancelled`, which the
    /// host discovers by polling. A non-zero `cache_policy` disables caching;
    /// a `timeout_secs` of zero or less means no timeout.
    pub fn new(
        method: &str,
        url: &str,
        cache_policy: i32,
        timeout_secs: f32,
        transport: Arc<dyn Transport>,
        config: ClientConfig,
    ) -> Self {
        let timeout = if timeout_secs > 0.0 {
            Duration::try_from_secs_f32(timeout_secs)
                .inspect_err(|e| warn!(timeout_secs, %e, "timeout out of range, not applying one"))
                .ok()
        } else {
            None
        };
        let mut machine = StateMachine::new();

        let parsed_method = method.parse::<HttpMethod>();
        let method_value = match &parsed_method {
            Ok(m) => *m,
            Err(e) => {
                error!(%e, "rejecting connection");
                machine.fail(ErrorKind::Allocation);
                HttpMethod::Get
            }
        };
        if parsed_method.is_ok() {
            if let Err(kind) = validate_url(url) {
                error!(url, error = %kind, "rejecting connection");
                machine.fail(kind);
            }
        }

        let request = RequestConfig {
            method: method_value,
            url: url.to_string(),
            timeout,
            cache_disabled: cache_policy != 0,
            headers: Vec::new(),
            body: None,
            destination: None,
            follow_redirects: true,
            max_redirects: None,
            allow_invalid_certificates: false,
            acceptable: AcceptableStatusSet::new(),
        };
        let cancelled = machine.error().is_some();

        Self {
            id: 0,
            transport,
            config,
            shared: Mutex::new(Shared {
                machine,
                cancelled,
                request,
                sink: Sink::Unset,
                response: ResponseMeta::default(),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // -----------------------------------------------------------------------
    // Configuration (only while `Initialized`)
    // -----------------------------------------------------------------------

    fn configure(&self, op: &'static str, apply: impl FnOnce(&mut RequestConfig)) -> bool {
        let mut shared = self.lock();
        if shared.machine.error().is_none()
            && shared.machine.change_state(ConnectionState::Initialized, true)
        {
            apply(&mut shared.request);
            return true;
        }
        warn!(
            connection = self.id,
            state = ?shared.machine.state(),
            "{op} ignored: connection is no longer configurable"
        );
        false
    }

    pub fn set_request_header(&self, name: &str, value: &str) -> bool {
        self.configure("set_request_header", |request| {
            set_header(&mut request.headers, name, value.to_string());
        })
    }

    /// Send HTTP basic credentials with the request.
    pub fn set_auth_credential(&self, user: &str, password: &str) -> bool {
        let token = BASE64.encode(format!("{user}:{password}"));
        self.configure("set_auth_credential", |request| {
            set_header(&mut request.headers, "Authorization", format!("Basic {token}"));
        })
    }

    /// Stream the request body from a file. Replaces any in-memory body.
    pub fn set_body_file(&self, path: impl Into<PathBuf>) -> bool {
        let path = path.into();
        self.configure("set_body_file", |request| {
            request.body = Some(BodySource::File(path));
        })
    }

    /// Send `bytes` as the request body. Replaces any body file.
    pub fn set_body_bytes(&self, bytes: Vec<u8>) -> bool {
        self.configure("set_body_bytes", |request| {
            request.body = Some(BodySource::Bytes(bytes));
        })
    }

    /// Write the response body to `path` instead of buffering it in memory.
    /// With `resume`, existing content is kept and only the missing range is
    /// requested.
    pub fn set_destination(&self, path: impl Into<PathBuf>, resume: bool) -> bool {
        let path = path.into();
        self.configure("set_destination", |request| {
            request.destination = Some(Destination { path, resume });
        })
    }

    pub fn add_acceptable_status_range(&self, from: i64, to: i64) -> bool {
        self.configure("add_acceptable_status_range", |request| {
            request.acceptable.add(from, to);
        })
    }

    /// A negative `max_count` keeps the configured default limit.
    pub fn set_follow_redirects(&self, allow: bool, max_count: i32) -> bool {
        self.configure("set_follow_redirects", |request| {
            request.follow_redirects = allow;
            request.max_redirects = u32::try_from(max_count).ok();
        })
    }

    pub fn set_allow_invalid_certificates(&self, allow: bool) -> bool {
        self.configure("set_allow_invalid_certificates", |request| {
            request.allow_invalid_certificates = allow;
        })
    }

    // -----------------------------------------------------------------------
    // Sending
    // -----------------------------------------------------------------------

    /// Run the setup steps and start the worker. Returns whether a worker was
    /// started; failures are latched on the connection.
    pub fn send(self: &Arc<Self>) -> bool {
        let request = {
            let mut shared = self.lock();
            match self.prepare(&mut shared) {
                Ok(Some(request)) => request,
                Ok(None) => return false,
                Err(kind) => {
                    self.fail_locked(&mut shared, kind);
                    return false;
                }
            }
        };

        let connection = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("urlclient-{}", self.id))
            .spawn(move || connection.run(request));
        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                true
            }
            Err(e) => {
                error!(connection = self.id, %e, "could not spawn worker");
                self.fail(ErrorKind::Allocation);
                false
            }
        }
    }

    fn advance(&self, shared: &mut Shared, next: ConnectionState) -> bool {
        if shared.machine.change_state(next, false) {
            debug!(connection = self.id, state = ?next, "state changed");
            return true;
        }
        warn!(
            connection = self.id,
            state = ?shared.machine.state(),
            target = ?next,
            "send aborted: transition refused"
        );
        false
    }

    fn prepare(&self, shared: &mut Shared) -> Result<Option<OutgoingRequest>, ErrorKind> {
        if shared.request.body.is_some() && !shared.request.method.allows_body() {
            warn!(
                connection = self.id,
                method = shared.request.method.as_str(),
                "request body ignored for this method"
            );
            shared.request.body = None;
        }

        let mut body = None;
        if shared.request.body.is_some() {
            if !self.advance(shared, ConnectionState::OpeningSourceFile) {
                return Ok(None);
            }
            body = match shared.request.body.take() {
                Some(BodySource::Bytes(bytes)) => Some(RequestBody::Bytes(bytes)),
                Some(BodySource::File(path)) => {
                    let file = File::open(&path).map_err(|e| {
                        error!(connection = self.id, path = %path.display(), %e, "cannot open source file");
                        ErrorKind::OpenSourceFile
                    })?;
                    Some(RequestBody::File(file))
                }
                None => None,
            };
        }

        if let Some(destination) = shared.request.destination.clone() {
            if !self.advance(shared, ConnectionState::OpeningDestinationFile) {
                return Ok(None);
            }
            let file = DestinationFile::open(&destination.path, destination.resume).map_err(|e| {
                error!(
                    connection = self.id,
                    path = %destination.path.display(),
                    %e,
                    "cannot open destination file"
                );
                ErrorKind::OpenDestinationFile
            })?;
            shared.sink = Sink::File(file);
        }

        if !self.advance(shared, ConnectionState::SendingRequest) {
            return Ok(None);
        }

        let mut headers = shared.request.headers.clone();
        if let Sink::File(file) = &shared.sink {
            if file.resume() && file.existing_len() > 0 {
                set_header(&mut headers, "Range", format!("bytes={}-", file.existing_len()));
            }
        }
        if shared.request.cache_disabled {
            if !has_header(&headers, "Cache-Control") {
                headers.push(("Cache-Control".to_string(), "no-cache".to_string()));
            }
            if !has_header(&headers, "Pragma") {
                headers.push(("Pragma".to_string(), "no-cache".to_string()));
            }
        }
        // One request per connection.
        if !has_header(&headers, "Connection") {
            headers.push(("Connection".to_string(), "close".to_string()));
        }
        if let Some(agent) = &self.config.user_agent {
            if !has_header(&headers, "User-Agent") {
                headers.push(("User-Agent".to_string(), agent.clone()));
            }
        }

        let max_redirects = if shared.request.follow_redirects {
            shared.request.max_redirects.unwrap_or(self.config.max_redirects)
        } else {
            0
        };
        let request = OutgoingRequest {
            method: shared.request.method,
            url: shared.request.url.clone(),
            headers,
            body,
            options: RequestOptions {
                timeout: shared.request.timeout,
                max_redirects,
                allow_invalid_certificates: shared.request.allow_invalid_certificates,
            },
        };

        if !self.advance(shared, ConnectionState::SentRequest) {
            return Ok(None);
        }
        if shared.request.destination.is_none() {
            shared.sink = Sink::Memory(TransferBuffers::new());
        }
        Ok(Some(request))
    }

    fn run(&self, request: OutgoingRequest) {
        debug!(connection = self.id, "worker started");
        let result = self.process_response(request);

        let mut shared = self.lock();
        if let Err(kind) = result {
            if shared.cancelled {
                debug!(connection = self.id, error = %kind, "error after cancellation ignored");
            } else {
                self.fail_locked(&mut shared, kind);
            }
        }
        if let Err(e) = shared.sink.close() {
            warn!(connection = self.id, %e, "closing destination failed");
        }
        debug!(connection = self.id, state = ?shared.machine.state(), "worker finished");
    }

    fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    fn process_response(&self, request: OutgoingRequest) -> Result<(), ErrorKind> {
        if self.is_cancelled() {
            return Ok(());
        }

        let mut response = self.transport.execute(request).map_err(|e| {
            error!(connection = self.id, %e, "request failed");
            e.kind(Phase::Connect)
        })?;

        if self.is_cancelled() {
            return Ok(());
        }

        let status = response.status().unwrap_or_else(|e| {
            warn!(connection = self.id, %e, "status unavailable, assuming {STATUS_ON_READ_FAILURE}");
            STATUS_ON_READ_FAILURE
        });
        let headers = response.headers().to_vec();
        let expected_length = response.expected_content_length();
        debug!(connection = self.id, status, expected_length, "response received");

        {
            let mut shared = self.lock();
            if shared.cancelled {
                return Ok(());
            }
            shared.response = ResponseMeta {
                status,
                headers,
                expected_length,
                bytes_read: 0,
                bytes_resumed: 0,
                dirty: true,
            };

            let Shared { sink, response: meta, .. } = &mut *shared;
            match sink {
                Sink::File(file) if file.resume() => {
                    if status == 416 {
                        warn!(connection = self.id, path = %file.path().display(), "invalid resume offset");
                        if let Err(e) = file.remove() {
                            warn!(connection = self.id, %e, "removing partial file failed");
                        }
                        return Err(ErrorKind::InvalidResumeOffset);
                    }
                    if status != 206 && file.existing_len() > 0 {
                        debug!(connection = self.id, status, "range ignored by server, restarting file");
                        file.restart().map_err(|e| {
                            error!(connection = self.id, %e, "cannot recreate destination file");
                            ErrorKind::CreateDestinationFile
                        })?;
                    }
                    meta.bytes_resumed = file.existing_len();
                }
                Sink::Memory(buffers) => buffers.reset_both(),
                _ => {}
            }

            shared.machine.change_state(ConnectionState::ReceivingData, true);
            if !shared.request.acceptable.is_acceptable(i64::from(status)) {
                warn!(connection = self.id, status, "status code not acceptable");
                return Err(ErrorKind::UnacceptableStatusCode);
            }
        }

        let mut chunk = vec![0u8; self.config.chunk_size];
        loop {
            let read = response.read_chunk(&mut chunk).map_err(|e| {
                error!(connection = self.id, %e, "reading response body failed");
                e.kind(Phase::Stream)
            })?;
            if read == 0 {
                break;
            }

            let mut shared = self.lock();
            if shared.cancelled {
                debug!(connection = self.id, "cancelled while streaming");
                return Ok(());
            }
            shared.sink.write(&chunk[..read]).map_err(|e| {
                error!(connection = self.id, %e, "writing response body failed");
                ErrorKind::OpenDestinationFile
            })?;
            shared.response.bytes_read += read as u64;
        }

        let mut shared = self.lock();
        shared.sink.close().map_err(|e| {
            error!(connection = self.id, %e, "flushing destination failed");
            ErrorKind::OpenDestinationFile
        })?;
        shared.machine.change_state(ConnectionState::Finished, false);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    /// Stop the exchange as soon as possible. Safe from any thread at any
    /// time; the destination file is closed before this returns.
    pub fn cancel(&self) {
        let mut shared = self.lock();
        shared.machine.force_cancel();
        shared.cancelled = true;
        if let Err(e) = shared.sink.close() {
            warn!(connection = self.id, %e, "closing destination on cancel failed");
        }
        debug!(connection = self.id, state = ?shared.machine.state(), "cancelled");
    }

    fn fail(&self, kind: ErrorKind) {
        let mut shared = self.lock();
        self.fail_locked(&mut shared, kind);
    }

    fn fail_locked(&self, shared: &mut Shared, kind: ErrorKind) {
        if shared.machine.fail(kind) {
            error!(connection = self.id, error = %kind, code = kind.code(), "connection failed");
        }
        shared.cancelled = true;
        if let Err(e) = shared.sink.close() {
            warn!(connection = self.id, %e, "closing destination failed");
        }
    }

    /// Block until the worker thread has exited. Not for host polling paths.
    pub fn join_worker(&self) {
        let handle = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(connection = self.id, "worker panicked");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Polling
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.lock().machine.state()
    }

    pub fn error(&self) -> Option<ErrorKind> {
        self.lock().machine.error()
    }

    /// `Some("")` while an error is latched, `None` otherwise.
    pub fn error_domain(&self) -> Option<&'static str> {
        self.error().map(|_| ERROR_DOMAIN)
    }

    /// `0` when no error is latched.
    pub fn error_code(&self) -> i64 {
        self.error().map(ErrorKind::code).unwrap_or(0)
    }

    pub fn error_description(&self) -> Option<&'static str> {
        self.error().map(ErrorKind::description)
    }

    pub fn status_code(&self) -> u16 {
        self.lock().response.status
    }

    pub fn header_count(&self) -> usize {
        self.lock().response.headers.len()
    }

    pub fn header_name(&self, index: usize) -> Option<String> {
        self.lock().response.headers.get(index).map(|h| h.name.clone())
    }

    /// Every value of the header at `index`, joined with `", "`.
    pub fn header_value(&self, index: usize) -> Option<String> {
        self.lock().response.headers.get(index).map(|h| h.value.clone())
    }

    pub fn header_values(&self, index: usize) -> Option<Vec<String>> {
        self.lock().response.headers.get(index).map(|h| h.values.clone())
    }

    /// Redirects are followed inside the transport and not counted.
    pub fn redirect_count(&self) -> i32 {
        -1
    }

    /// `-1` when unknown or when the body is compressed.
    pub fn expected_content_length(&self) -> i64 {
        self.lock().response.expected_length
    }

    pub fn bytes_read(&self) -> u64 {
        self.lock().response.bytes_read
    }

    pub fn bytes_resumed(&self) -> u64 {
        self.lock().response.bytes_resumed
    }

    /// Bytes buffered in memory and not yet pulled.
    pub fn pending_len(&self) -> u64 {
        self.lock().sink.buffered_len() as u64
    }

    /// Returns `true` once after each new response head, then `false`.
    pub fn check_and_reset_dirty(&self) -> bool {
        let mut shared = self.lock();
        std::mem::replace(&mut shared.response.dirty, false)
    }

    /// Move up to `dst.len()` buffered response bytes into `dst`.
    ///
    /// Returns `0` while the dirty flag is set: the host has to re-read the
    /// response metadata before it may consume the bytes that belong to it.
    pub fn pull(&self, dst: &mut [u8]) -> usize {
        let mut shared = self.lock();
        if shared.response.dirty {
            return 0;
        }
        shared
            .sink
            .buffers_mut()
            .map(|buffers| buffers.pull(dst))
            .unwrap_or(0)
    }
}
