//! `#[repr(C)]` types and C string helpers for the FFI boundary.
//!
//! # Design
//! The host never sees a Rust type other than the opaque `FfiRegistry`
//! pointer. Connection state crosses as a C enum with the fixed ordinals the
//! host already switches on; everything else is a plain integer or a C string
//! owned by the caller once returned.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use urlclient_core::{ConnectionState, Registry};

/// Opaque handle to a connection registry. C callers receive a pointer to
/// this from `urlclient_registry_new*` and pass it back into every call.
pub struct FfiRegistry {
    pub(crate) inner: Registry,
}

/// Connection lifecycle state as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiConnectionState {
    Unknown = 0,
    Initialized = 1,
    OpeningSourceFile = 2,
    OpeningDestinationFile = 3,
    SendingRequest = 4,
    SentRequest = 5,
    Authenticating = 6,
    ReceivingData = 7,
    Finished = 8,
    Cancelled = 9,
}

impl From<ConnectionState> for FfiConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Unknown => FfiConnectionState::Unknown,
            ConnectionState::Initialized => FfiConnectionState::Initialized,
            ConnectionState::OpeningSourceFile => FfiConnectionState::OpeningSourceFile,
            ConnectionState::OpeningDestinationFile => FfiConnectionState::OpeningDestinationFile,
            ConnectionState::SendingRequest => FfiConnectionState::SendingRequest,
            ConnectionState::SentRequest => FfiConnectionState::SentRequest,
            ConnectionState::Authenticating => FfiConnectionState::Authenticating,
            ConnectionState::ReceivingData => FfiConnectionState::ReceivingData,
            ConnectionState::Finished => FfiConnectionState::Finished,
            ConnectionState::Cancelled => FfiConnectionState::Cancelled,
        }
    }
}

/// Borrow a C string as `&str`. `None` for null or non-UTF-8 input.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Copy `s` into a caller-owned C string, freed with `urlclient_free_string`.
/// Null if `s` contains an interior NUL.
pub(crate) fn to_c_string(s: &str) -> *mut c_char {
    CString::new(s)
        .map(CString::into_raw)
        .unwrap_or(std::ptr::null_mut())
}
