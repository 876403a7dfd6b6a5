//! The HTTP client the pipeline delegates to.
//!
//! # Design
//! The connection never speaks HTTP itself. `Transport::execute` sends an
//! `OutgoingRequest` and returns a `ResponseStream` from which the pipeline
//! reads the status, headers and body in that order. The default
//! implementation wraps a blocking `ureq` agent built per request, with
//! status codes returned as data rather than errors. Tests substitute
//! scripted transports through the same trait.

use std::io::{self, Read};

use tracing::debug;
use ureq::http::HeaderMap;
use ureq::tls::TlsConfig;
use ureq::typestate::{WithBody, WithoutBody};
use ureq::{Agent, RequestBuilder, SendBody};

use crate::error::ErrorKind;
use crate::http::{group_headers, HeaderField, HttpMethod, OutgoingRequest, RequestBody};

/// Failures reported by a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("host lookup failed")]
    HostLookup,

    #[error("could not connect to host")]
    ConnectFailed,

    #[error("network unreachable")]
    NetworkUnreachable,

    #[error("timed out")]
    Timeout,

    #[error("connection lost")]
    ConnectionLost,

    #[error("too many redirects")]
    TooManyRedirects,

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("{0}")]
    Other(String),
}

/// Where in the exchange a transport error happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    Stream,
}

impl TransportError {
    /// Translate to the error kind latched on the connection. Unclassified
    /// failures count as connection setup errors while connecting and as
    /// timeouts once the body is streaming.
    pub fn kind(&self, phase: Phase) -> ErrorKind {
        match self {
            TransportError::HostLookup => ErrorKind::HostLookup,
            TransportError::ConnectFailed => ErrorKind::CannotConnectToHost,
            TransportError::NetworkUnreachable => ErrorKind::CannotConnectToInternet,
            TransportError::Timeout => ErrorKind::ConnectionTimeout,
            TransportError::ConnectionLost => ErrorKind::ConnectionLost,
            TransportError::TooManyRedirects => ErrorKind::TooManyRedirects,
            TransportError::UnsupportedProtocol(_) => ErrorKind::UnsupportedProtocol,
            TransportError::Other(_) => match phase {
                Phase::Connect => ErrorKind::InitConnection,
                Phase::Stream => ErrorKind::ConnectionTimeout,
            },
        }
    }
}

impl From<io::Error> for TransportError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TransportError::Timeout,
            io::ErrorKind::ConnectionRefused => TransportError::ConnectFailed,
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost,
            io::ErrorKind::NotConnected | io::ErrorKind::AddrNotAvailable => {
                TransportError::NetworkUnreachable
            }
            _ => TransportError::Other(err.to_string()),
        }
    }
}

impl From<ureq::Error> for TransportError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::HostNotFound => TransportError::HostLookup,
            ureq::Error::ConnectionFailed => TransportError::ConnectFailed,
            ureq::Error::Timeout(_) => TransportError::Timeout,
            ureq::Error::TooManyRedirects => TransportError::TooManyRedirects,
            ureq::Error::BadUri(uri) => TransportError::UnsupportedProtocol(uri),
            ureq::Error::Io(e) => TransportError::from(e),
            other => TransportError::Other(other.to_string()),
        }
    }
}

/// A response whose head has arrived and whose body can be pulled in chunks.
pub trait ResponseStream {
    /// The response status code. A failure here is not fatal to the pipeline.
    fn status(&self) -> Result<u16, TransportError>;

    fn headers(&self) -> &[HeaderField];

    /// Read the next body chunk into `buf`. `Ok(0)` marks the end of the body.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// First value of `name`, case-insensitive.
    fn header(&self, name: &str) -> Option<&str> {
        self.headers()
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
            .and_then(|field| field.values.first())
            .map(String::as_str)
    }

    /// Declared body length, or `-1` when unknown or when the body is
    /// content-encoded (the header then describes the wire size only).
    fn expected_content_length(&self) -> i64 {
        let encoded = self
            .header("content-encoding")
            .map(|encoding| !encoding.trim().eq_ignore_ascii_case("identity"))
            .unwrap_or(false);
        if encoded {
            return -1;
        }
        self.header("content-length")
            .and_then(|len| len.trim().parse::<i64>().ok())
            .filter(|len| *len >= 0)
            .unwrap_or(-1)
    }
}

/// Sends requests on behalf of connections. Shared by every worker thread.
pub trait Transport: Send + Sync {
    fn execute(&self, request: OutgoingRequest) -> Result<Box<dyn ResponseStream>, TransportError>;
}

/// `Transport` backed by a blocking `ureq` agent.
#[derive(Debug, Default, Clone)]
pub struct UreqTransport;

impl UreqTransport {
    pub fn new() -> Self {
        Self
    }

    fn agent(request: &OutgoingRequest) -> Agent {
        let timeout = request.options.timeout;
        let mut config = Agent::config_builder()
            .http_status_as_error(false)
            .max_redirects(request.options.max_redirects)
            // With redirects disabled the 3xx response itself is the result.
            .max_redirects_will_error(request.options.max_redirects > 0)
            .timeout_connect(timeout)
            .timeout_recv_response(timeout)
            .timeout_recv_body(timeout);
        if request.options.allow_invalid_certificates {
            config = config.tls_config(TlsConfig::builder().disable_verification(true).build());
        }
        config.build().new_agent()
    }
}

fn with_headers<B>(mut builder: RequestBuilder<B>, headers: &[(String, String)]) -> RequestBuilder<B> {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn call(
    builder: RequestBuilder<WithoutBody>,
    headers: &[(String, String)],
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    with_headers(builder, headers).call()
}

fn send(
    builder: RequestBuilder<WithBody>,
    headers: &[(String, String)],
    body: Option<RequestBody>,
) -> Result<ureq::http::Response<ureq::Body>, ureq::Error> {
    let builder = with_headers(builder, headers);
    match body {
        None => builder.send_empty(),
        Some(RequestBody::Bytes(bytes)) => builder.send(&bytes[..]),
        Some(RequestBody::File(mut file)) => builder.send(SendBody::from_reader(&mut file)),
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: OutgoingRequest) -> Result<Box<dyn ResponseStream>, TransportError> {
        let agent = Self::agent(&request);
        let OutgoingRequest {
            method,
            url,
            headers,
            body,
            ..
        } = request;
        let url = url.as_str();
        debug!(method = method.as_str(), url, "executing request");

        let response = match method {
            HttpMethod::Get => call(agent.get(url), &headers),
            HttpMethod::Head => call(agent.head(url), &headers),
            HttpMethod::Delete => call(agent.delete(url), &headers),
            HttpMethod::Options => call(agent.options(url), &headers),
            HttpMethod::Trace => call(agent.trace(url), &headers),
            HttpMethod::Post => send(agent.post(url), &headers, body),
            HttpMethod::Put => send(agent.put(url), &headers, body),
            HttpMethod::Patch => send(agent.patch(url), &headers, body),
        }?;

        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let reader = response.into_body().into_reader();
        Ok(Box::new(UreqResponse {
            status,
            headers,
            reader: Box::new(reader),
        }))
    }
}

fn collect_headers(map: &HeaderMap) -> Vec<HeaderField> {
    group_headers(map.iter().map(|(name, value)| {
        (
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        )
    }))
}

struct UreqResponse {
    status: u16,
    headers: Vec<HeaderField>,
    reader: Box<dyn Read>,
}

impl ResponseStream for UreqResponse {
    fn status(&self) -> Result<u16, TransportError> {
        Ok(self.status)
    }

    fn headers(&self) -> &[HeaderField] {
        &self.headers
    }

    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        loop {
            match self.reader.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}
