//! Event types for the provisioning record.
//!
//! Every state change during a provisioning run is appended to an
//! immutable log. The current state of a deployment is reconstructed
//! by replaying its events in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single event in the append-only provisioning log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The provisioning run this event belongs to
    pub run_id: Uuid,

    /// Step this event concerns, if any
    pub step: Option<String>,

    /// Type of event
    pub event_type: EventType,

    /// Declaration fingerprint: "{step}:{spec_hash}". A completed
    /// event with a matching fingerprint makes the step a no-op on
    /// re-apply.
    pub fingerprint: String,

    /// Human-readable summary (identifiers only, never secrets)
    pub summary: String,

    /// Status of the step/run after this event
    pub status: StepStatus,

    /// Time taken in milliseconds (for completed steps)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(
        run_id: Uuid,
        step: Option<String>,
        event_type: EventType,
        fingerprint: String,
        summary: String,
        status: StepStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            step,
            event_type,
            fingerprint,
            summary,
            status,
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: String) -> Self {
        self.error = Some(error);
        self
    }
}

/// Types of events that can occur during a provisioning run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A provisioning run has started
    RunStarted,

    /// A run reached OutputsPublished
    RunCompleted,

    /// A run failed; the partial record persists for re-apply
    RunFailed,

    /// A step has started applying its declaration
    StepStarted,

    /// A step's resource is ready and its handle recorded
    StepCompleted,

    /// A step was skipped because an identical declaration already
    /// completed (idempotent no-op)
    StepSkipped,

    /// A step failed; the whole run aborts
    StepFailed,
}

/// Status of a step or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not yet started
    #[default]
    Pending,

    /// Currently applying
    Running,

    /// Resource ready
    Completed,

    /// Reused from a previous run (fingerprint match)
    Skipped,

    /// Failed (with error)
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("zone".to_string()),
            EventType::StepStarted,
            "zone:abc123".to_string(),
            "Creating hosted zone example.com".to_string(),
            StepStatus::Running,
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::StepStarted);
        assert_eq!(parsed.status, StepStatus::Running);
        assert_eq!(parsed.fingerprint, "zone:abc123");
    }

    #[test]
    fn test_event_with_error() {
        let event = Event::new(
            Uuid::new_v4(),
            Some("apex_cert".to_string()),
            EventType::StepFailed,
            "apex_cert:abc".to_string(),
            "Validation wait failed".to_string(),
            StepStatus::Failed,
        )
        .with_error("Certificate for 'example.com' failed to validate within 600s".to_string());

        assert!(event.error.unwrap().contains("600s"));
    }
}
