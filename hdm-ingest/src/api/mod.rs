//! HTTP API handlers
//!
//! Thin translation between requests and the pipeline: every handler maps
//! a `ProcessResult` or service error onto a status code and JSON body.

pub mod health;
pub mod trigger;
pub mod watch;
pub mod webhook;

pub use health::health_routes;
pub use trigger::trigger_routes;
pub use watch::watch_routes;
pub use webhook::webhook_routes;
