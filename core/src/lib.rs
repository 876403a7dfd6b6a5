//! Poll-driven HTTP connections for hosts that cannot block or take callbacks.
//!
//! # Overview
//! A host creates a connection through the [`Registry`], configures it, calls
//! `send` and from then on only polls: state, error, status, headers and
//! progress are plain getters, and response bytes are drained with `pull`
//! at whatever pace the host likes. A background worker per request does the
//! actual HTTP exchange through a [`Transport`].
//!
//! # Design
//! - One `Mutex` per connection guards everything the worker and the host
//!   share. Host calls never wait on network I/O.
//! - In-memory responses flow through a pair of buffers that swap roles
//!   instead of copying (`buffer`).
//! - File destinations can resume from a partial file; the file length is the
//!   only checkpoint.
//! - Failures latch a numeric [`ErrorKind`] and force the connection into
//!   `Cancelled`; nothing is returned as a Rust error to the host.
//! - The registry is an explicit value, not a global. The FFI crate hands it
//!   to C callers as an opaque pointer.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod http;
pub mod registry;
pub mod sink;
pub mod state;
pub mod status;
pub mod transport;

pub use config::ClientConfig;
pub use connection::{Connection, ConnectionId};
pub use error::{describe, ConfigError, ErrorKind, ERROR_DOMAIN};
pub use http::{HeaderField, HttpMethod};
pub use registry::Registry;
pub use state::ConnectionState;
pub use status::AcceptableStatusSet;
pub use transport::{ResponseStream, Transport, TransportError, UreqTransport};
