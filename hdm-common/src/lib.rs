//! # HDM Common Library
//!
//! Shared code for the home document manager services:
//! - Common error type
//! - Bootstrap configuration loading and config-file resolution
//! - Tracing initialisation
//! - Compact date and fiscal-year helpers

pub mod config;
pub mod error;
pub mod logging;
pub mod time;

pub use error::{Error, Result};
