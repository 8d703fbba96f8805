//! Deployment state and reconstruction from events.
//!
//! A Deployment represents one target topology (keyed by domain) and
//! its progress through the provisioning state machine:
//!
//! `Declared -> ZoneReady -> CertsValidated -> {DeliveryReady, ApiReady}
//!  -> BranchesReady -> PipelineWired -> OutputsPublished`, or terminal
//! `Failed`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::{Event, EventType, StepStatus};

/// Step names in the provisioning graph, as they appear in events
pub const STEP_ZONE: &str = "zone";
pub const STEP_APEX_CERT: &str = "apex_cert";
pub const STEP_API_CERT: &str = "api_cert";
pub const STEP_DELIVERY: &str = "delivery";
pub const STEP_API: &str = "api";
pub const STEP_PIPELINE: &str = "pipeline";
pub const STEP_OUTPUTS: &str = "outputs";

/// One provisioning run's view of a deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    /// Root domain this deployment targets
    pub domain: String,

    /// The most recent provisioning run
    pub run_id: Uuid,

    /// Current state machine position
    pub state: DeployState,

    /// When the latest run started
    pub started_at: DateTime<Utc>,

    /// When the latest run finished (if it has)
    pub completed_at: Option<DateTime<Utc>>,

    /// Status of each step (step name -> status)
    pub step_statuses: HashMap<String, StepStatus>,
}

impl Deployment {
    /// Create a freshly declared deployment
    pub fn new(domain: String, run_id: Uuid) -> Self {
        Self {
            domain,
            run_id,
            state: DeployState::Declared,
            started_at: Utc::now(),
            completed_at: None,
            step_statuses: HashMap::new(),
        }
    }

    /// Reconstruct deployment state from the event log
    pub fn from_events(domain: &str, events: &[Event]) -> Option<Self> {
        let first = events.first()?;

        let mut deployment = Self {
            domain: domain.to_string(),
            run_id: first.run_id,
            state: DeployState::Declared,
            started_at: first.timestamp,
            completed_at: None,
            step_statuses: HashMap::new(),
        };

        for event in events {
            deployment.apply_event(event);
        }

        Some(deployment)
    }

    /// Apply a single event to update deployment state
    pub fn apply_event(&mut self, event: &Event) {
        self.run_id = event.run_id;

        match event.event_type {
            EventType::RunStarted => {
                // A new run resets terminal state but keeps step history
                self.started_at = event.timestamp;
                self.completed_at = None;
                self.state = DeployState::Declared;
                self.recompute_state();
            }
            EventType::RunCompleted => {
                self.completed_at = Some(event.timestamp);
                self.state = DeployState::OutputsPublished;
            }
            EventType::RunFailed => {
                self.completed_at = Some(event.timestamp);
                self.state = DeployState::Failed {
                    error: event.error.clone().unwrap_or_default(),
                };
            }
            EventType::StepStarted => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Running);
                }
            }
            EventType::StepCompleted => {
                if let Some(ref step) = event.step {
                    self.step_statuses
                        .insert(step.clone(), StepStatus::Completed);
                }
                self.recompute_state();
            }
            EventType::StepSkipped => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Skipped);
                }
                self.recompute_state();
            }
            EventType::StepFailed => {
                if let Some(ref step) = event.step {
                    self.step_statuses.insert(step.clone(), StepStatus::Failed);
                }
            }
        }
    }

    /// Derive the furthest non-terminal state the step record supports
    fn recompute_state(&mut self) {
        if matches!(self.state, DeployState::Failed { .. } | DeployState::OutputsPublished) {
            return;
        }

        let done = |step: &str| {
            matches!(
                self.step_statuses.get(step),
                Some(StepStatus::Completed) | Some(StepStatus::Skipped)
            )
        };

        self.state = if done(STEP_OUTPUTS) {
            DeployState::OutputsPublished
        } else if done(STEP_PIPELINE) {
            DeployState::PipelineWired
        } else if done(STEP_DELIVERY) && done(STEP_API) {
            DeployState::BranchesReady
        } else if done(STEP_DELIVERY) {
            DeployState::DeliveryReady
        } else if done(STEP_API) {
            DeployState::ApiReady
        } else if done(STEP_APEX_CERT) && done(STEP_API_CERT) {
            DeployState::CertsValidated
        } else if done(STEP_ZONE) {
            DeployState::ZoneReady
        } else {
            DeployState::Declared
        };
    }

    /// Check if the latest run is still in progress
    pub fn is_running(&self) -> bool {
        self.completed_at.is_none()
    }

    /// Check if the deployment reached its terminal success state
    pub fn is_published(&self) -> bool {
        matches!(self.state, DeployState::OutputsPublished)
    }

    /// Check if a specific step is satisfied (completed or reused)
    pub fn is_step_done(&self, step: &str) -> bool {
        matches!(
            self.step_statuses.get(step),
            Some(StepStatus::Completed) | Some(StepStatus::Skipped)
        )
    }
}

/// Position in the provisioning state machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum DeployState {
    /// Declarations built, nothing applied yet
    Declared,

    /// Hosted zone exists
    ZoneReady,

    /// Both certificates reached the validated state
    CertsValidated,

    /// Bucket, distribution and apex record ready
    DeliveryReady,

    /// Handler, gateway and subdomain record ready
    ApiReady,

    /// Both branches ready, pipeline not yet wired
    BranchesReady,

    /// Pipeline declared with live parameters and exact grants
    PipelineWired,

    /// Terminal success: the OutputSet is readable
    OutputsPublished,

    /// Terminal failure: operator must correct input and re-apply
    Failed { error: String },
}

impl std::fmt::Display for DeployState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Declared => write!(f, "Declared"),
            Self::ZoneReady => write!(f, "ZoneReady"),
            Self::CertsValidated => write!(f, "CertsValidated"),
            Self::DeliveryReady => write!(f, "DeliveryReady"),
            Self::ApiReady => write!(f, "ApiReady"),
            Self::BranchesReady => write!(f, "BranchesReady"),
            Self::PipelineWired => write!(f, "PipelineWired"),
            Self::OutputsPublished => write!(f, "OutputsPublished"),
            Self::Failed { error } => write!(f, "Failed: {}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_completed(run_id: Uuid, step: &str) -> Event {
        Event::new(
            run_id,
            Some(step.to_string()),
            EventType::StepCompleted,
            format!("{step}:abc"),
            format!("{step} ready"),
            StepStatus::Completed,
        )
    }

    #[test]
    fn test_state_progression() {
        let run_id = Uuid::new_v4();
        let mut deployment = Deployment::new("example.com".to_string(), run_id);
        assert_eq!(deployment.state, DeployState::Declared);

        deployment.apply_event(&step_completed(run_id, STEP_ZONE));
        assert_eq!(deployment.state, DeployState::ZoneReady);

        deployment.apply_event(&step_completed(run_id, STEP_APEX_CERT));
        // One of two certificates is not enough
        assert_eq!(deployment.state, DeployState::ZoneReady);

        deployment.apply_event(&step_completed(run_id, STEP_API_CERT));
        assert_eq!(deployment.state, DeployState::CertsValidated);

        deployment.apply_event(&step_completed(run_id, STEP_DELIVERY));
        assert_eq!(deployment.state, DeployState::DeliveryReady);

        deployment.apply_event(&step_completed(run_id, STEP_API));
        assert_eq!(deployment.state, DeployState::BranchesReady);

        deployment.apply_event(&step_completed(run_id, STEP_PIPELINE));
        assert_eq!(deployment.state, DeployState::PipelineWired);

        deployment.apply_event(&step_completed(run_id, STEP_OUTPUTS));
        assert_eq!(deployment.state, DeployState::OutputsPublished);
    }

    #[test]
    fn test_failed_run_is_terminal() {
        let run_id = Uuid::new_v4();
        let mut deployment = Deployment::new("example.com".to_string(), run_id);

        deployment.apply_event(&step_completed(run_id, STEP_ZONE));
        deployment.apply_event(
            &Event::new(
                run_id,
                None,
                EventType::RunFailed,
                format!("{run_id}:complete"),
                "Run failed".to_string(),
                StepStatus::Failed,
            )
            .with_error("validation timeout".to_string()),
        );

        assert!(matches!(deployment.state, DeployState::Failed { .. }));
        assert!(!deployment.is_running());
    }

    #[test]
    fn test_skipped_steps_count_as_done() {
        let run_id = Uuid::new_v4();
        let mut deployment = Deployment::new("example.com".to_string(), run_id);

        deployment.apply_event(&Event::new(
            run_id,
            Some(STEP_ZONE.to_string()),
            EventType::StepSkipped,
            "zone:abc".to_string(),
            "Reusing hosted zone".to_string(),
            StepStatus::Skipped,
        ));

        assert!(deployment.is_step_done(STEP_ZONE));
        assert_eq!(deployment.state, DeployState::ZoneReady);
    }

    #[test]
    fn test_from_events_replays_in_order() {
        let run_id = Uuid::new_v4();
        let events = vec![
            Event::new(
                run_id,
                None,
                EventType::RunStarted,
                format!("{run_id}:start"),
                "Run started".to_string(),
                StepStatus::Running,
            ),
            step_completed(run_id, STEP_ZONE),
        ];

        let deployment = Deployment::from_events("example.com", &events).unwrap();
        assert_eq!(deployment.state, DeployState::ZoneReady);
        assert_eq!(deployment.run_id, run_id);
    }
}
