//! Terminal outcome of one pipeline attempt

use serde::Serialize;
use std::fmt;

/// Why an attempt resolved as skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another attempt for the same file is running in this process
    InFlight,
    /// The file is no longer in the inbox container
    NotInInbox,
    /// Persisted processed marker already set
    AlreadyProcessed,
    /// Persisted synced marker already set
    AlreadySynced,
    UnsupportedMimeType(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::InFlight => f.write_str("already being processed"),
            SkipReason::NotInInbox => f.write_str("not in inbox"),
            SkipReason::AlreadyProcessed => f.write_str("already processed"),
            SkipReason::AlreadySynced => f.write_str("already synced"),
            SkipReason::UnsupportedMimeType(mime) => write!(f, "unsupported media type {}", mime),
        }
    }
}

/// Outcome of `process_file`; never partially populated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    Processed,
    Skipped(SkipReason),
    Error(String),
}

impl ProcessResult {
    /// Wire name: PROCESSED / SKIPPED / ERROR
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessResult::Processed => "PROCESSED",
            ProcessResult::Skipped(_) => "SKIPPED",
            ProcessResult::Error(_) => "ERROR",
        }
    }

    /// Processed and Skipped count as success for callers
    pub fn is_success(&self) -> bool {
        !matches!(self, ProcessResult::Error(_))
    }

    pub fn is_processed(&self) -> bool {
        matches!(self, ProcessResult::Processed)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ProcessResult::Skipped(_))
    }
}

impl fmt::Display for ProcessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessResult::Processed => f.write_str("PROCESSED"),
            ProcessResult::Skipped(reason) => write!(f, "SKIPPED ({})", reason),
            ProcessResult::Error(msg) => write!(f, "ERROR ({})", msg),
        }
    }
}

impl Serialize for ProcessResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProcessResult::Processed).unwrap(),
            "\"PROCESSED\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessResult::Skipped(SkipReason::NotInInbox)).unwrap(),
            "\"SKIPPED\""
        );
        assert_eq!(
            serde_json::to_string(&ProcessResult::Error("boom".into())).unwrap(),
            "\"ERROR\""
        );
    }

    #[test]
    fn test_success_mapping() {
        assert!(ProcessResult::Processed.is_success());
        assert!(ProcessResult::Skipped(SkipReason::InFlight).is_success());
        assert!(!ProcessResult::Error("x".into()).is_success());
    }
}
