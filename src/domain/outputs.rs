//! The published OutputSet.
//!
//! A pure read of already-resolved identifiers; computed only after
//! every provisioner has succeeded.

use serde::{Deserialize, Serialize};

use super::resources::{BucketHandle, DistributionHandle, GatewayHandle, PipelineHandle};

/// The system's externally observable result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSet {
    /// Object-store name
    pub bucket: String,

    /// CDN distribution public domain
    pub distribution_url: String,

    /// CDN distribution identifier
    pub distribution_id: String,

    /// API invocation URL
    pub api: String,

    /// Deployment pipeline name
    pub pipeline: String,
}

impl OutputSet {
    /// Assemble the output set from the live handles of one run
    pub fn from_handles(
        bucket: &BucketHandle,
        distribution: &DistributionHandle,
        gateway: &GatewayHandle,
        pipeline: &PipelineHandle,
    ) -> Self {
        Self {
            bucket: bucket.name().to_string(),
            distribution_url: distribution.domain_name().to_string(),
            distribution_id: distribution.id().to_string(),
            api: gateway.invoke_url(),
            pipeline: pipeline.name().to_string(),
        }
    }
}

impl std::fmt::Display for OutputSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "bucket           = {}", self.bucket)?;
        writeln!(f, "distribution-url = {}", self.distribution_url)?;
        writeln!(f, "distribution-id  = {}", self.distribution_id)?;
        writeln!(f, "api              = {}", self.api)?;
        write!(f, "pipeline         = {}", self.pipeline)
    }
}
