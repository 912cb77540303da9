//! In-process admission gate
//!
//! First layer of deduplication: at most one active attempt per file id
//! within this process. The persisted `hdm_processed` marker on the file
//! (checked by the pipeline after admission) is the authoritative layer
//! across instances and restarts; this set only avoids redundant work
//! when notifications for the same change arrive together.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Persisted file property set once processing has begun
pub const PROCESSED_PROPERTY: &str = "hdm_processed";

#[derive(Default)]
pub struct DeduplicationGate {
    /// file id → admission timestamp
    in_flight: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl DeduplicationGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit one attempt for `file_id`
    ///
    /// Returns `None` if an attempt for the same id is already active.
    /// The id is released when the returned guard is dropped.
    pub fn try_admit(&self, file_id: &str) -> Option<Admission> {
        let mut in_flight = lock(&self.in_flight);
        if in_flight.contains_key(file_id) {
            debug!(file_id, "Admission refused: attempt already in flight");
            return None;
        }
        in_flight.insert(file_id.to_string(), Utc::now());

        Some(Admission {
            file_id: file_id.to_string(),
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_in_flight(&self, file_id: &str) -> bool {
        lock(&self.in_flight).contains_key(file_id)
    }

    pub fn in_flight_count(&self) -> usize {
        lock(&self.in_flight).len()
    }
}

/// A poisoned set is still structurally valid; keep using it.
fn lock(
    set: &Mutex<HashMap<String, DateTime<Utc>>>,
) -> MutexGuard<'_, HashMap<String, DateTime<Utc>>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Active processing attempt; releases its file id on drop
#[derive(Debug)]
pub struct Admission {
    file_id: String,
    in_flight: Arc<Mutex<HashMap<String, DateTime<Utc>>>>,
}

impl Admission {
    pub fn file_id(&self) -> &str {
        &self.file_id
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.file_id);
        debug!(file_id = %self.file_id, "Admission released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_admission_refused() {
        let gate = DeduplicationGate::new();
        let first = gate.try_admit("f1");
        assert!(first.is_some());
        assert!(gate.try_admit("f1").is_none());
        assert!(gate.try_admit("f2").is_some());
    }

    #[test]
    fn test_drop_releases() {
        let gate = DeduplicationGate::new();
        {
            let admission = gate.try_admit("f1").unwrap();
            assert_eq!(admission.file_id(), "f1");
            assert!(gate.is_in_flight("f1"));
        }
        assert!(!gate.is_in_flight("f1"));
        assert!(gate.try_admit("f1").is_some());
    }

    #[test]
    fn test_release_on_early_return() {
        fn attempt(gate: &DeduplicationGate) -> Result<(), &'static str> {
            let _admission = gate.try_admit("f1").ok_or("busy")?;
            Err("download failed")
        }

        let gate = DeduplicationGate::new();
        assert!(attempt(&gate).is_err());
        assert_eq!(gate.in_flight_count(), 0);
    }

    #[test]
    fn test_concurrent_admission_exactly_one() {
        let gate = Arc::new(DeduplicationGate::new());
        let barrier = Arc::new(std::sync::Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Hold the admission until every thread has tried
                    let admission = gate.try_admit("same");
                    let admitted = admission.is_some();
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    admitted
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|a| *a)
            .count();
        assert_eq!(admitted, 1);
    }
}
