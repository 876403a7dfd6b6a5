//! Error kinds latched on a connection.
//!
//! # Design
//! The host only ever sees a numeric code plus a description, so `ErrorKind`
//! is a flat enum whose discriminants are the wire ordinals. Code `0` means
//! "no error" and is represented as `Option::None` on the Rust side rather
//! than as a variant. Descriptions come from one fixed table indexed by code.

use std::fmt;

/// The first failure recorded for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i64)]
pub enum ErrorKind {
    Unknown = 1,
    Allocation = 2,
    InitConnection = 3,
    UnsupportedProtocol = 4,
    TooManyRedirects = 5,
    UnacceptableStatusCode = 6,
    InvalidResumeOffset = 7,
    OpenSourceFile = 8,
    OpenDestinationFile = 9,
    CreateDestinationFile = 10,
    HostLookup = 11,
    CannotConnectToHost = 12,
    CannotConnectToInternet = 13,
    ConnectionLost = 14,
    ConnectionTimeout = 15,
}

/// Error domain reported while an error is latched. Absent otherwise.
pub const ERROR_DOMAIN: &str = "";

/// Human readable descriptions, indexed by error code.
const DESCRIPTIONS: [Option<&str>; 16] = [
    None,
    Some("Unknown error"),
    Some("Could not allocate resource/memory"),
    Some("Could not initialize connection"),
    Some("Unsupported protocol detected"),
    Some("Too many redirects"),
    Some("Unacceptable status code error received."),
    Some("Attempt to use invalid resume offset"),
    Some("Could not open source file for reading"),
    Some("Could not open destination file for writing"),
    Some("Could not create destination file"),
    Some("Could not lookup hostname"),
    Some("Cannot connect to host"),
    Some("Cannot connect to internet"),
    Some("Connection to host was lost"),
    Some("Connection timed out"),
];

/// Look up the description for a numeric error code.
///
/// Returns `None` for `0` (no error) and for codes outside the table.
pub fn describe(code: i64) -> Option<&'static str> {
    ErrorKind::from_code(code).map(ErrorKind::description)
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::Unknown,
        ErrorKind::Allocation,
        ErrorKind::InitConnection,
        ErrorKind::UnsupportedProtocol,
        ErrorKind::TooManyRedirects,
        ErrorKind::UnacceptableStatusCode,
        ErrorKind::InvalidResumeOffset,
        ErrorKind::OpenSourceFile,
        ErrorKind::OpenDestinationFile,
        ErrorKind::CreateDestinationFile,
        ErrorKind::HostLookup,
        ErrorKind::CannotConnectToHost,
        ErrorKind::CannotConnectToInternet,
        ErrorKind::ConnectionLost,
        ErrorKind::ConnectionTimeout,
    ];

    /// Numeric code reported to the host.
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.code() == code)
    }

    pub fn description(self) -> &'static str {
        DESCRIPTIONS
            .get(self as usize)
            .copied()
            .flatten()
            .unwrap_or("Unknown error")
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

impl std::error::Error for ErrorKind {}

/// Errors raised while loading a `ClientConfig`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}
