//! Domain types for the sitewire orchestrator.
//!
//! This module contains the core data structures:
//! - Events: Immutable records of provisioning state changes
//! - Deployment: One target topology and its state machine position
//! - Resources: Declarations and live handles
//! - Outputs: The published OutputSet
//! - Error: The provisioning failure taxonomy

pub mod deployment;
pub mod error;
pub mod events;
pub mod outputs;
pub mod resources;

// Re-export commonly used types
pub use deployment::{DeployState, Deployment};
pub use error::ProvisionError;
pub use events::{Event, EventType, StepStatus};
pub use outputs::OutputSet;
pub use resources::{
    AliasTarget, BucketHandle, BucketSpec, BuildSpec, CertificateRequest, CertificateSpec,
    DistributionHandle, DistributionSpec, FunctionHandle, FunctionSpec, GatewayHandle, Grant,
    PipelineHandle, PipelineSpec, RecordSpec, RestApiSpec, SourceSpec, ValidatedCertificate,
    ZoneHandle, ZoneSpec,
};
