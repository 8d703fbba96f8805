//! Append-only provisioning record with file-based persistence.
//!
//! Each deployment (keyed by domain) gets a directory holding an
//! `events.jsonl` log plus one JSON file per resolved handle. The
//! record is what makes re-applying idempotent: a step whose
//! declaration fingerprint already completed is skipped and its
//! recorded handle reused.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::domain::{Event, EventType};

use super::graph::StepId;

/// File-based provisioning record using JSONL for events
pub struct StateStore {
    /// Directory for this deployment
    deployment_dir: PathBuf,

    /// Path to the events.jsonl file
    events_path: PathBuf,

    /// Directory holding recorded handles
    handles_dir: PathBuf,
}

impl StateStore {
    /// Create or open the record for a deployment
    pub async fn open(base_dir: &Path, domain: &str) -> Result<Self> {
        let deployment_dir = base_dir.join(domain);
        let handles_dir = deployment_dir.join("handles");

        fs::create_dir_all(&handles_dir).await.with_context(|| {
            format!("Failed to create handles directory: {}", handles_dir.display())
        })?;

        let events_path = deployment_dir.join("events.jsonl");

        Ok(Self {
            deployment_dir,
            events_path,
            handles_dir,
        })
    }

    /// Default base directory for all deployments (~/.sitewire/deployments)
    pub fn default_base_dir() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(home.join(".sitewire").join("deployments"))
    }

    pub fn deployment_dir(&self) -> &Path {
        &self.deployment_dir
    }

    /// Append an event to the log
    pub async fn append(&self, event: &Event) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.events_path)
            .await
            .with_context(|| {
                format!("Failed to open events file: {}", self.events_path.display())
            })?;

        let json = serde_json::to_string(event).context("Failed to serialize event")?;
        file.write_all(format!("{}\n", json).as_bytes())
            .await
            .context("Failed to write event")?;
        file.flush().await.context("Failed to flush event")?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<Event>> {
        if !self.events_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.events_path).await.with_context(|| {
            format!("Failed to open events file: {}", self.events_path.display())
        })?;

        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let event: Event = serde_json::from_str(&line)
                .with_context(|| format!("Failed to parse event: {}", line))?;
            events.push(event);
        }

        Ok(events)
    }

    /// Check whether the step's current state matches this exact
    /// declaration fingerprint.
    ///
    /// Only the step's most recent completed (or skipped) event is
    /// authoritative: the recorded handle always belongs to the latest
    /// apply, so a fingerprint that merely appeared earlier in the
    /// history must not suppress a re-apply.
    pub async fn is_step_completed(&self, step: StepId, fingerprint: &str) -> Result<bool> {
        let events = self.replay().await?;

        let latest = events.iter().rev().find(|e| {
            e.step.as_deref() == Some(step.as_str())
                && matches!(
                    e.event_type,
                    EventType::StepCompleted | EventType::StepSkipped
                )
        });

        Ok(latest.is_some_and(|e| e.fingerprint == fingerprint))
    }

    /// Record a step's resolved handle
    pub async fn record_handle<H: Serialize>(&self, step: StepId, handle: &H) -> Result<()> {
        let path = self.handle_path(step);
        let json = serde_json::to_string_pretty(handle)
            .with_context(|| format!("Failed to serialize handle for step '{}'", step))?;

        fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write handle: {}", path.display()))?;

        Ok(())
    }

    /// Load a previously recorded handle, if any
    pub async fn load_handle<H: DeserializeOwned>(&self, step: StepId) -> Result<Option<H>> {
        let path = self.handle_path(step);

        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read handle: {}", path.display()))?;

        let handle = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse handle: {}", path.display()))?;

        Ok(Some(handle))
    }

    fn handle_path(&self, step: StepId) -> PathBuf {
        self.handles_dir.join(format!("{}.json", step.as_str()))
    }
}

/// Fingerprint of a step's declaration: "{step}:{hash16}".
///
/// The hash covers the serialized declaration, so any attribute change
/// produces a new fingerprint and re-applies the step (and, through
/// their own fingerprints, its dependents).
pub fn fingerprint<S: Serialize>(step: StepId, spec: &S) -> Result<String> {
    let json = serde_json::to_string(spec)
        .with_context(|| format!("Failed to serialize declaration for step '{}'", step))?;
    Ok(format!("{}:{}", step.as_str(), hash_declaration(&json)))
}

/// Hash a serialized declaration (first 16 hex chars of SHA256)
pub fn hash_declaration(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}
