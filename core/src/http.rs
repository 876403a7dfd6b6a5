//! HTTP request and response values exchanged with the transport.
//!
//! # Design
//! These are plain owned data so they can move into the worker thread and
//! across the FFI boundary without lifetimes. The connection assembles an
//! `OutgoingRequest` while the host is still configuring it; the transport
//! turns it into a wire request and hands back response metadata as
//! `HeaderField`s.

use std::fs::File;
use std::str::FromStr;
use std::time::Duration;

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Trace => "TRACE",
        }
    }

    /// Whether the transport will transmit a request body for this method.
    pub fn allows_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

/// Returned when a method name is not one of the supported verbs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported http method: {0}")]
pub struct UnknownMethod(pub String);

impl FromStr for HttpMethod {
    type Err = UnknownMethod;

    /// Parse a method name. An empty name means GET.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let method = match s.trim().to_ascii_uppercase().as_str() {
            "" | "GET" => HttpMethod::Get,
            "HEAD" => HttpMethod::Head,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "PATCH" => HttpMethod::Patch,
            "DELETE" => HttpMethod::Delete,
            "OPTIONS" => HttpMethod::Options,
            "TRACE" => HttpMethod::Trace,
            _ => return Err(UnknownMethod(s.to_string())),
        };
        Ok(method)
    }
}

/// One response header name with every value received for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: String,
    /// All values joined with `", "`.
    pub value: String,
    pub values: Vec<String>,
}

impl HeaderField {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            value: values.join(", "),
            values,
        }
    }
}

/// Group `(name, value)` pairs by case-insensitive name, keeping the order in
/// which each name first appeared.
pub fn group_headers<I, N, V>(pairs: I) -> Vec<HeaderField>
where
    I: IntoIterator<Item = (N, V)>,
    N: Into<String>,
    V: Into<String>,
{
    let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
    for (name, value) in pairs {
        let name = name.into();
        match grouped.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, values)) => values.push(value.into()),
            None => grouped.push((name, vec![value.into()])),
        }
    }
    grouped
        .into_iter()
        .map(|(name, values)| HeaderField::new(name, values))
        .collect()
}

/// Where the request body comes from once the request is on its way.
#[derive(Debug)]
pub enum RequestBody {
    Bytes(Vec<u8>),
    File(File),
}

/// Transport knobs fixed at send time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Applied to connect, response and body reads. `None` waits forever.
    pub timeout: Option<Duration>,
    /// `0` disables redirect following.
    pub max_redirects: u32,
    pub allow_invalid_certificates: bool,
}

/// A fully assembled request, owned by the worker once sent.
#[derive(Debug)]
pub struct OutgoingRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub options: RequestOptions,
}

impl OutgoingRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}
