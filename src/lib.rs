//! sitewire - provisioning orchestrator for a web-application hosting
//! topology
//!
//! Provisions and wires together a DNS zone, DNS-validated TLS
//! certificates, private object storage fronted by a CDN
//! distribution, a serverless HTTP API behind a custom subdomain, and
//! a two-stage continuous-deployment pipeline. The value is the
//! dependency graph between these resources: what each step requires
//! from prior steps, what it emits downstream, and the exact
//! permission grants the automated deployment needs.
//!
//! # Architecture
//!
//! The system is built around an explicit dependency graph and an
//! append-only record:
//! - Steps are evaluated in topological waves; the delivery and API
//!   branches apply concurrently
//! - Every state change is recorded as an immutable event
//! - Each step's declaration is fingerprinted, so re-applying an
//!   unchanged configuration is a no-op and a failed run converges on
//!   retry
//!
//! # Modules
//!
//! - `providers`: Control-plane adapters (aws CLI subprocess, in-memory)
//! - `core`: Orchestration logic (Graph, StateStore, Provisioner)
//! - `domain`: Data structures (declarations, handles, events, outputs)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Apply the topology
//! SITEWIRE_DOMAIN=example.com sitewire provision
//!
//! # Inspect a deployment
//! sitewire status example.com
//!
//! # Read the published outputs
//! sitewire outputs example.com
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod providers;

// Re-export main types at crate root for convenience
pub use crate::config::DeployConfig;
pub use crate::core::{Provisioner, StepId};
pub use crate::domain::{DeployState, Deployment, Event, EventType, OutputSet, ProvisionError};
pub use crate::providers::{AwsCliProvider, CloudProvider, MemoryProvider};
