//! Core orchestration logic.
//!
//! This module contains:
//! - Graph: The explicit step dependency graph and its evaluator
//! - StateStore: Append-only provisioning record
//! - Provisioner: Main orchestration engine

pub mod graph;
pub mod provisioner;
pub mod state_store;

// Re-export commonly used types
pub use graph::{evaluation_waves, StepId};
pub use provisioner::{load_outputs, load_status, ApiHandles, DeliveryHandles, Provisioner};
pub use state_store::{fingerprint, hash_declaration, StateStore};
