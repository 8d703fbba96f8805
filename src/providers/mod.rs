//! Cloud control-plane providers.
//!
//! The orchestrator never talks to a control plane directly; it calls
//! a `CloudProvider`, which is the capability boundary. Two
//! implementations ship with the crate: a subprocess adapter driving
//! the `aws` CLI, and a deterministic in-memory provider used for
//! dry runs and tests.

pub mod aws_cli;
pub mod memory;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{
    BucketHandle, BucketSpec, CertificateRequest, CertificateSpec, DistributionHandle,
    DistributionSpec, FunctionHandle, FunctionSpec, GatewayHandle, Grant, PipelineHandle,
    PipelineSpec, RecordSpec, RestApiSpec, ValidatedCertificate, ZoneHandle, ZoneSpec,
};

pub use aws_cli::AwsCliProvider;
pub use memory::MemoryProvider;

/// One-shot, idempotent apply operations against an external control
/// plane.
///
/// Every `ensure_*` converges: if the resource already exists with the
/// declared shape, the call returns its handle without creating a
/// duplicate.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Human-readable provider name
    fn name(&self) -> &str;

    /// Deployment region for regional resources
    fn region(&self) -> &str;

    /// Create or reuse the hosted zone
    async fn ensure_zone(&self, spec: &ZoneSpec) -> Result<ZoneHandle>;

    /// Request a DNS-validated certificate and publish its challenge
    /// record in the zone
    async fn request_certificate(
        &self,
        spec: &CertificateSpec,
        zone: &ZoneHandle,
    ) -> Result<CertificateRequest>;

    /// Wait for the certificate to reach the validated state.
    ///
    /// Must not return before the out-of-band confirmation is
    /// observed; fails with `ProvisionError::ValidationTimeout` when
    /// the bounded wait elapses.
    async fn await_validation(
        &self,
        request: &CertificateRequest,
        timeout: Duration,
    ) -> Result<ValidatedCertificate>;

    /// Create or reuse the private site bucket for the domain
    async fn ensure_bucket(&self, spec: &BucketSpec, domain: &str) -> Result<BucketHandle>;

    /// Create or reuse the CDN distribution
    async fn ensure_distribution(&self, spec: &DistributionSpec) -> Result<DistributionHandle>;

    /// Upsert one alias record in the hosted zone
    async fn upsert_alias(&self, record: &RecordSpec) -> Result<()>;

    /// Create or reuse the stateless request handler for the domain
    async fn ensure_function(&self, spec: &FunctionSpec, domain: &str) -> Result<FunctionHandle>;

    /// Create or reuse the managed gateway routing all paths to the
    /// handler, bound to the custom subdomain
    async fn ensure_rest_api(
        &self,
        spec: &RestApiSpec,
        handler: &FunctionHandle,
    ) -> Result<GatewayHandle>;

    /// Attach one exact permission to the build role
    async fn grant(&self, grant: &Grant) -> Result<()>;

    /// Create or reuse the two-stage deployment pipeline
    async fn ensure_pipeline(&self, spec: &PipelineSpec) -> Result<PipelineHandle>;
}
