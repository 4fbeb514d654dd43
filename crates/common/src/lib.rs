//! Common utilities for the launcher workspace
//!
//! This crate provides what the library and the `launcherctl` binary share:
//! the error type with its stable numeric codes, and tracing setup.

pub mod error;
pub mod logging;

pub use error::{Error, ErrorCode, Result, error_to_str};
pub use logging::setup_logging;
