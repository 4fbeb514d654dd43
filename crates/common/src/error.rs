//! Common error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Library already initialized")]
    AlreadyInitialized,

    #[error("Library not initialized")]
    NotInitialized,

    #[error("Invalid poll rate {0}s, expected 1-120 or 0 for the default")]
    InvalidPollRate(u8),

    #[error("Launcher handle is no longer valid")]
    InvalidHandle,

    #[error("Index {index} out of bounds (capacity {capacity})")]
    IndexOutOfBounds { index: usize, capacity: usize },

    #[error("Allocation failed")]
    AllocationFailed,

    #[error("Launcher registry full (capacity {capacity})")]
    RegistryFull { capacity: usize },

    #[error("Count is zero, nothing to remove")]
    CountZero,

    #[error("Launcher registry inconsistent: {0}")]
    Inconsistent(String),

    #[error("Launcher already open")]
    AlreadyOpen,

    #[error("Launcher not claimed")]
    Unclaimed,

    #[error("Launcher not found")]
    NotFound,

    #[error("No launchers detected")]
    NoLaunchers,

    #[error("Failed to start polling: {0}")]
    PollStartFailed(String),

    #[error("USB backend error: {0}")]
    Backend(String),

    #[error("USB backend failed to initialize: {0}")]
    BackendInitFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Stable numeric error codes
///
/// Values are part of the public surface and never renumbered. Gaps are
/// codes retired from earlier releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Ok = 0,
    Unclaimed = 3,
    AlreadyInitialized = 4,
    NotInitialized = 5,
    Backend = 6,
    InvalidPollRate = 7,
    PollStartFailed = 8,
    IndexOutOfBounds = 9,
    CountZero = 10,
    NotFound = 11,
    AllocationFailed = 12,
    Inconsistent = 13,
    InvalidHandle = 14,
    NoLaunchers = 16,
    AlreadyOpen = 17,
    RegistryFull = 18,
    BackendInitFailed = 19,
    Config = 20,
    Io = 21,
}

impl ErrorCode {
    /// Numeric value of the code
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(error_to_str(*self))
    }
}

impl Error {
    /// Stable code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::AlreadyInitialized => ErrorCode::AlreadyInitialized,
            Error::NotInitialized => ErrorCode::NotInitialized,
            Error::InvalidPollRate(_) => ErrorCode::InvalidPollRate,
            Error::InvalidHandle => ErrorCode::InvalidHandle,
            Error::IndexOutOfBounds { .. } => ErrorCode::IndexOutOfBounds,
            Error::AllocationFailed => ErrorCode::AllocationFailed,
            Error::RegistryFull { .. } => ErrorCode::RegistryFull,
            Error::CountZero => ErrorCode::CountZero,
            Error::Inconsistent(_) => ErrorCode::Inconsistent,
            Error::AlreadyOpen => ErrorCode::AlreadyOpen,
            Error::Unclaimed => ErrorCode::Unclaimed,
            Error::NotFound => ErrorCode::NotFound,
            Error::NoLaunchers => ErrorCode::NoLaunchers,
            Error::PollStartFailed(_) => ErrorCode::PollStartFailed,
            Error::Backend(_) => ErrorCode::Backend,
            Error::BackendInitFailed(_) => ErrorCode::BackendInitFailed,
            Error::Config(_) => ErrorCode::Config,
            Error::Io(_) => ErrorCode::Io,
        }
    }
}

/// Human-readable description of an error code
pub fn error_to_str(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::Ok => "OK",
        ErrorCode::Unclaimed => "Launcher was not claimed",
        ErrorCode::AlreadyInitialized => "Library was already initialized",
        ErrorCode::NotInitialized => "Library was not initialized",
        ErrorCode::Backend => "USB backend error",
        ErrorCode::InvalidPollRate => {
            "Invalid poll rate, use a value between 1 and 120 or 0 for the default"
        }
        ErrorCode::PollStartFailed => "Polling failed to start",
        ErrorCode::IndexOutOfBounds => "Index out of bounds",
        ErrorCode::CountZero => "Count was zero, nothing to remove",
        ErrorCode::NotFound => "Item not found",
        ErrorCode::AllocationFailed => "Allocation failed",
        ErrorCode::Inconsistent => {
            "Launcher registry is in an inconsistent state, this is a library bug"
        }
        ErrorCode::InvalidHandle => "Launcher handle was invalid or already released",
        ErrorCode::NoLaunchers => "No launchers were detected",
        ErrorCode::AlreadyOpen => "Launcher already open",
        ErrorCode::RegistryFull => "Launcher registry is full",
        ErrorCode::BackendInitFailed => "USB backend failed to initialize",
        ErrorCode::Config => "Configuration error",
        ErrorCode::Io => "IO error",
    }
}

/// Map a poisoned lock into a consistency error
///
/// A poisoned lock means a thread panicked mid-update, so the guarded state
/// can no longer be trusted.
pub fn poisoned<T>(what: &str) -> impl FnOnce(std::sync::PoisonError<T>) -> Error + '_ {
    move |_| Error::Inconsistent(format!("{} lock poisoned", what))
}
