//! C-ABI wrapper around `urlclient-core`.
//!
//! # Overview
//! Exposes the poll-driven connection API through `extern "C"` functions so a
//! host with only a C FFI (a game engine plugin layer, typically) can create
//! connections, configure them, send them and poll them every frame without
//! ever blocking or receiving callbacks.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - The registry is an opaque `FfiRegistry` pointer owned by the caller;
//!   connections are addressed by the `u32` id it hands out.
//! - Calls on an unknown id or a null registry log a warning and return a
//!   fixed default: state `Unknown`, error domain `""`, error code `0`,
//!   description `"Unknown"`, expected length `-1`, redirect count `-1`,
//!   and zero or null for everything else.
//! - Strings returned to C are owned by the caller and released with
//!   `urlclient_free_string`.
//! - Logging goes through `tracing`. The first registry installs a stderr
//!   subscriber whose level `urlclient_set_debug` switches at runtime.

pub mod types;

use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, OnceLock};

use tracing::{error, warn};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload};
use urlclient_core::{ClientConfig, Connection, Registry};

use types::*;

const UNKNOWN_HANDLE_DOMAIN: &str = "";
const UNKNOWN_HANDLE_DESCRIPTION: &str = "Unknown";

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

type LevelHandle = reload::Handle<LevelFilter, tracing_subscriber::Registry>;

static LOG_LEVEL: OnceLock<Option<LevelHandle>> = OnceLock::new();

/// Install the stderr subscriber once. `None` when the host process already
/// set a global subscriber of its own.
fn log_level() -> Option<&'static LevelHandle> {
    LOG_LEVEL
        .get_or_init(|| {
            let (filter, handle) = reload::Layer::new(LevelFilter::WARN);
            let subscriber = tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr));
            tracing::subscriber::set_global_default(subscriber)
                .ok()
                .map(|()| handle)
        })
        .as_ref()
}

/// Switch library logging between `DEBUG` (enabled) and `WARN` (disabled).
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_debug(enabled: bool) {
    guarded((), || {
        let level = if enabled { LevelFilter::DEBUG } else { LevelFilter::WARN };
        if let Some(handle) = log_level() {
            if let Err(e) = handle.reload(level) {
                warn!(%e, "could not change log level");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|_| {
        error!("panic caught at the ffi boundary");
        fallback
    })
}

/// Run `f` on the connection `id`, or return `fallback` when the registry is
/// null, the id is unknown or `f` panics.
fn with_connection<T: Copy>(
    registry: *const FfiRegistry,
    id: u32,
    op: &'static str,
    fallback: T,
    f: impl FnOnce(&Arc<Connection>) -> T,
) -> T {
    guarded(fallback, || {
        if registry.is_null() {
            warn!(op, "null registry");
            return fallback;
        }
        let registry = unsafe { &*registry };
        match registry.inner.lookup(id) {
            Some(connection) => f(&connection),
            None => {
                warn!(connection = id, op, "unknown connection");
                fallback
            }
        }
    })
}

fn into_raw(registry: Registry) -> *mut FfiRegistry {
    log_level();
    Box::into_raw(Box::new(FfiRegistry { inner: registry }))
}

// ---------------------------------------------------------------------------
// Registry lifecycle
// ---------------------------------------------------------------------------

/// Create a registry configured from `URLCLIENT_*` environment variables.
///
/// Invalid variables are logged and the defaults used instead.
/// The caller must free the returned pointer with `urlclient_registry_free`.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_registry_new() -> *mut FfiRegistry {
    guarded(ptr::null_mut(), || {
        let config = ClientConfig::from_env().unwrap_or_else(|e| {
            warn!(%e, "ignoring invalid environment configuration");
            ClientConfig::default()
        });
        into_raw(Registry::new(config))
    })
}

/// Create a registry from a JSON configuration object.
///
/// A null `json` uses the defaults. Returns null if the JSON is invalid.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_registry_new_with_config(json: *const c_char) -> *mut FfiRegistry {
    guarded(ptr::null_mut(), || {
        if json.is_null() {
            return into_raw(Registry::new(ClientConfig::default()));
        }
        let Some(json) = (unsafe { read_str(json) }) else {
            warn!("configuration is not valid utf-8");
            return ptr::null_mut();
        };
        match ClientConfig::from_json(json) {
            Ok(config) => into_raw(Registry::new(config)),
            Err(e) => {
                warn!(%e, "rejecting configuration");
                ptr::null_mut()
            }
        }
    })
}

/// Free a registry, cancelling every connection it still holds.
/// Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_registry_free(registry: *mut FfiRegistry) {
    if !registry.is_null() {
        guarded((), || {
            drop(unsafe { Box::from_raw(registry) });
        });
    }
}

// ---------------------------------------------------------------------------
// Connection lifecycle
// ---------------------------------------------------------------------------

/// Create a connection and return its id, `0` on failure.
///
/// An unsupported method or URL still yields an id; the connection then
/// reports `Cancelled` with the corresponding error code. A non-zero
/// `cache_policy` disables caching; `timeout_seconds <= 0` means no timeout.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_create(
    registry: *const FfiRegistry,
    method: *const c_char,
    url: *const c_char,
    cache_policy: i32,
    timeout_seconds: f32,
) -> u32 {
    guarded(0, || {
        if registry.is_null() || url.is_null() {
            warn!("create called with null registry or url");
            return 0;
        }
        let registry = unsafe { &*registry };
        let method = unsafe { read_str(method) }.unwrap_or("");
        let url = unsafe { read_str(url) }.unwrap_or("");
        registry.inner.create(method, url, cache_policy, timeout_seconds)
    })
}

/// Cancel the connection if it is running and release its id.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_destroy(registry: *const FfiRegistry, id: u32) {
    guarded((), || {
        if !registry.is_null() {
            unsafe { &*registry }.inner.destroy(id);
        }
    })
}

/// Start the request on a background worker.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_send(registry: *const FfiRegistry, id: u32) {
    with_connection(registry, id, "send", (), |c| {
        c.send();
    })
}

/// Cancel the connection. Its id stays valid until destroyed.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_cancel(registry: *const FfiRegistry, id: u32) {
    with_connection(registry, id, "cancel", (), |c| c.cancel())
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------
// Each setter returns whether the value was applied. Setters are only honoured
// before `urlclient_send`.

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_request_header(
    registry: *const FfiRegistry,
    id: u32,
    name: *const c_char,
    value: *const c_char,
) -> bool {
    with_connection(registry, id, "set_request_header", false, |c| {
        match unsafe { (read_str(name), read_str(value)) } {
            (Some(name), Some(value)) => c.set_request_header(name, value),
            _ => false,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_auth_credential(
    registry: *const FfiRegistry,
    id: u32,
    user: *const c_char,
    password: *const c_char,
) -> bool {
    with_connection(registry, id, "set_auth_credential", false, |c| {
        match unsafe { (read_str(user), read_str(password)) } {
            (Some(user), Some(password)) => c.set_auth_credential(user, password),
            _ => false,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_request_body_file(
    registry: *const FfiRegistry,
    id: u32,
    path: *const c_char,
) -> bool {
    with_connection(registry, id, "set_request_body_file", false, |c| {
        match unsafe { read_str(path) } {
            Some(path) => c.set_body_file(path),
            None => false,
        }
    })
}

/// Copy `len` bytes from `data` as the request body.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_request_body_bytes(
    registry: *const FfiRegistry,
    id: u32,
    data: *const u8,
    len: usize,
) -> bool {
    with_connection(registry, id, "set_request_body_bytes", false, |c| {
        let bytes = if len == 0 {
            Vec::new()
        } else if data.is_null() {
            warn!(connection = id, len, "null body pointer");
            return false;
        } else {
            unsafe { std::slice::from_raw_parts(data, len) }.to_vec()
        };
        c.set_body_bytes(bytes)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_response_destination(
    registry: *const FfiRegistry,
    id: u32,
    path: *const c_char,
    resume: bool,
) -> bool {
    with_connection(registry, id, "set_response_destination", false, |c| {
        match unsafe { read_str(path) } {
            Some(path) => c.set_destination(path, resume),
            None => false,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_add_acceptable_status_range(
    registry: *const FfiRegistry,
    id: u32,
    from: i64,
    to: i64,
) -> bool {
    with_connection(registry, id, "add_acceptable_status_range", false, |c| {
        c.add_acceptable_status_range(from, to)
    })
}

/// `max_count < 0` keeps the registry's configured limit.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_allow_follow_redirects(
    registry: *const FfiRegistry,
    id: u32,
    allow: bool,
    max_count: i32,
) -> bool {
    with_connection(registry, id, "set_allow_follow_redirects", false, |c| {
        c.set_follow_redirects(allow, max_count)
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_set_allow_invalid_certificates(
    registry: *const FfiRegistry,
    id: u32,
    allow: bool,
) -> bool {
    with_connection(registry, id, "set_allow_invalid_certificates", false, |c| {
        c.set_allow_invalid_certificates(allow)
    })
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_state(registry: *const FfiRegistry, id: u32) -> FfiConnectionState {
    with_connection(registry, id, "get_state", FfiConnectionState::Unknown, |c| {
        c.state().into()
    })
}

/// `""` while an error is latched, null otherwise.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_error_domain(registry: *const FfiRegistry, id: u32) -> *mut c_char {
    with_connection(registry, id, "get_error_domain", Some(UNKNOWN_HANDLE_DOMAIN), |c| {
        c.error_domain()
    })
    .map(to_c_string)
    .unwrap_or(ptr::null_mut())
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_error_code(registry: *const FfiRegistry, id: u32) -> i64 {
    with_connection(registry, id, "get_error_code", 0, |c| c.error_code())
}

/// Description of the latched error, null when there is none.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_error_description(
    registry: *const FfiRegistry,
    id: u32,
) -> *mut c_char {
    with_connection(
        registry,
        id,
        "get_error_description",
        Some(UNKNOWN_HANDLE_DESCRIPTION),
        |c| c.error_description(),
    )
    .map(to_c_string)
    .unwrap_or(ptr::null_mut())
}

/// Description for any error code, null for `0` and unknown codes.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_describe_error(code: i64) -> *mut c_char {
    guarded(ptr::null_mut(), || {
        urlclient_core::describe(code)
            .map(to_c_string)
            .unwrap_or(ptr::null_mut())
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_status_code(registry: *const FfiRegistry, id: u32) -> i32 {
    with_connection(registry, id, "get_status_code", 0, |c| i32::from(c.status_code()))
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_response_header_count(registry: *const FfiRegistry, id: u32) -> u32 {
    with_connection(registry, id, "get_response_header_count", 0, |c| {
        u32::try_from(c.header_count()).unwrap_or(u32::MAX)
    })
}

/// Name of the response header at `index`, null when out of range.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_response_header_name(
    registry: *const FfiRegistry,
    id: u32,
    index: u32,
) -> *mut c_char {
    with_connection(registry, id, "get_response_header_name", ptr::null_mut(), |c| {
        c.header_name(index as usize)
            .map(|name| to_c_string(&name))
            .unwrap_or(ptr::null_mut())
    })
}

/// All values of the response header at `index`, joined with `", "`.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_response_header_value(
    registry: *const FfiRegistry,
    id: u32,
    index: u32,
) -> *mut c_char {
    with_connection(registry, id, "get_response_header_value", ptr::null_mut(), |c| {
        c.header_value(index as usize)
            .map(|value| to_c_string(&value))
            .unwrap_or(ptr::null_mut())
    })
}

/// Declared body length, `-1` when unknown or compressed.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_expected_content_length(registry: *const FfiRegistry, id: u32) -> i64 {
    with_connection(registry, id, "get_expected_content_length", -1, |c| {
        c.expected_content_length()
    })
}

/// Always `-1`: redirects are followed by the transport and not counted.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_redirect_count(registry: *const FfiRegistry, id: u32) -> i32 {
    with_connection(registry, id, "get_redirect_count", -1, |c| c.redirect_count())
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_bytes_read(registry: *const FfiRegistry, id: u32) -> u64 {
    with_connection(registry, id, "get_bytes_read", 0, |c| c.bytes_read())
}

#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_bytes_resumed(registry: *const FfiRegistry, id: u32) -> u64 {
    with_connection(registry, id, "get_bytes_resumed", 0, |c| c.bytes_resumed())
}

/// Bytes buffered in memory and not yet pulled.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_get_pending_length(registry: *const FfiRegistry, id: u32) -> u64 {
    with_connection(registry, id, "get_pending_length", 0, |c| c.pending_len())
}

/// `true` once after each new response head. Re-read status and headers
/// before pulling when this returns `true`.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_check_and_reset_dirty(registry: *const FfiRegistry, id: u32) -> bool {
    with_connection(registry, id, "check_and_reset_dirty", false, |c| {
        c.check_and_reset_dirty()
    })
}

/// Copy up to `capacity` received bytes into `buffer` and return the count.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_pull(
    registry: *const FfiRegistry,
    id: u32,
    buffer: *mut u8,
    capacity: usize,
) -> usize {
    with_connection(registry, id, "pull", 0, |c| {
        if buffer.is_null() || capacity == 0 {
            return 0;
        }
        let dst = unsafe { std::slice::from_raw_parts_mut(buffer, capacity) };
        c.pull(dst)
    })
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a C string returned by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn urlclient_free_string(s: *mut c_char) {
    if !s.is_null() {
        guarded((), || {
            drop(unsafe { std::ffi::CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
