//! Deterministic in-memory provider.
//!
//! Backs dry runs and tests. Identifiers are derived by hashing the
//! declaration, so applying the same configuration twice yields the
//! same handles, and the recorded call log lets tests assert that a
//! converged re-apply performs no resource calls at all.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::state_store::hash_declaration;
use crate::domain::{
    BucketHandle, BucketSpec, CertificateRequest, CertificateSpec, DistributionHandle,
    DistributionSpec, FunctionHandle, FunctionSpec, GatewayHandle, Grant, PipelineHandle,
    PipelineSpec, ProvisionError, RecordSpec, RestApiSpec, ValidatedCertificate, ZoneHandle,
    ZoneSpec,
};

use super::CloudProvider;

/// In-memory provider with deterministic identifiers.
///
/// Clones share the call log, so a test can keep one clone and hand
/// the other to the orchestrator.
#[derive(Clone)]
pub struct MemoryProvider {
    region: String,
    account: String,
    calls: Arc<Mutex<Vec<String>>>,

    /// Simulated time for a certificate to validate; a value at or
    /// above the orchestrator's wait window forces a timeout
    validation_delay: Duration,

    /// Reject every permission grant (simulates taxonomy (d))
    fail_grant: bool,
}

impl MemoryProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
            account: "123456789012".to_string(),
            calls: Arc::new(Mutex::new(Vec::new())),
            validation_delay: Duration::ZERO,
            fail_grant: false,
        }
    }

    /// Make certificate validation take this long
    pub fn with_validation_delay(mut self, delay: Duration) -> Self {
        self.validation_delay = delay;
        self
    }

    /// Make every grant fail
    pub fn with_grant_failure(mut self) -> Self {
        self.fail_grant = true;
        self
    }

    /// All provider calls so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// Number of calls whose name starts with the given prefix
    pub fn call_count(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with(prefix))
            .count()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("call log poisoned").push(call);
    }

    fn hash_of<S: serde::Serialize>(spec: &S) -> String {
        hash_declaration(&serde_json::to_string(spec).expect("declaration serializes"))
    }
}

#[async_trait]
impl CloudProvider for MemoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn ensure_zone(&self, spec: &ZoneSpec) -> Result<ZoneHandle> {
        self.record(format!("ensure_zone:{}", spec.zone_name));
        Ok(ZoneHandle {
            id: format!("Z{}", Self::hash_of(spec).to_uppercase()),
            name: spec.zone_name.clone(),
        })
    }

    async fn request_certificate(
        &self,
        spec: &CertificateSpec,
        _zone: &ZoneHandle,
    ) -> Result<CertificateRequest> {
        self.record(format!("request_certificate:{}", spec.domain));
        Ok(CertificateRequest {
            arn: format!(
                "arn:aws:acm:{}:{}:certificate/{}",
                spec.region,
                self.account,
                Self::hash_of(spec)
            ),
            domain: spec.domain.clone(),
            region: spec.region.clone(),
        })
    }

    async fn await_validation(
        &self,
        request: &CertificateRequest,
        wait: Duration,
    ) -> Result<ValidatedCertificate> {
        self.record(format!("await_validation:{}", request.domain));

        if self.validation_delay >= wait {
            return Err(ProvisionError::ValidationTimeout {
                domain: request.domain.clone(),
                waited_seconds: wait.as_secs(),
            }
            .into());
        }

        Ok(ValidatedCertificate::new(
            request.arn.clone(),
            request.domain.clone(),
        ))
    }

    async fn ensure_bucket(&self, spec: &BucketSpec, domain: &str) -> Result<BucketHandle> {
        self.record(format!("ensure_bucket:{}", domain));
        let hash = Self::hash_of(&(spec, domain));
        Ok(BucketHandle::new(format!(
            "{}-site-{}",
            domain.replace('.', "-"),
            &hash[..8]
        )))
    }

    async fn ensure_distribution(&self, spec: &DistributionSpec) -> Result<DistributionHandle> {
        self.record(format!("ensure_distribution:{}", spec.domain_names.join(",")));
        let hash = Self::hash_of(spec);
        Ok(DistributionHandle::new(
            format!("E{}", hash[..12].to_uppercase()),
            format!("{}.cloudfront.net", &hash[..13]),
            self.account.clone(),
        ))
    }

    async fn upsert_alias(&self, record: &RecordSpec) -> Result<()> {
        self.record(format!("upsert_alias:{}", record.name));
        Ok(())
    }

    async fn ensure_function(&self, _spec: &FunctionSpec, domain: &str) -> Result<FunctionHandle> {
        self.record(format!("ensure_function:{}", domain));
        let name = format!("{}-handler", domain.replace('.', "-"));
        Ok(FunctionHandle {
            arn: format!(
                "arn:aws:lambda:{}:{}:function:{}",
                self.region, self.account, name
            ),
            name,
        })
    }

    async fn ensure_rest_api(
        &self,
        spec: &RestApiSpec,
        _handler: &FunctionHandle,
    ) -> Result<GatewayHandle> {
        self.record(format!("ensure_rest_api:{}", spec.domain_name));

        if !spec.certificate.covers(&spec.domain_name) {
            return Err(ProvisionError::Rejected {
                step: "api".to_string(),
                reason: format!(
                    "certificate covers '{}', gateway domain is '{}'",
                    spec.certificate.domain(),
                    spec.domain_name
                ),
            }
            .into());
        }

        let hash = Self::hash_of(spec);
        Ok(GatewayHandle::new(
            hash[..10].to_string(),
            self.region.clone(),
            spec.stage.clone(),
        ))
    }

    async fn grant(&self, grant: &Grant) -> Result<()> {
        self.record(format!("grant:{}", grant.describe()));

        if self.fail_grant {
            return Err(ProvisionError::PermissionGrant {
                grant: grant.describe(),
                reason: "grant rejected by provider".to_string(),
            }
            .into());
        }

        Ok(())
    }

    async fn ensure_pipeline(&self, spec: &PipelineSpec) -> Result<PipelineHandle> {
        self.record(format!("ensure_pipeline:{}", spec.name));
        Ok(PipelineHandle::new(spec.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_handles() {
        let provider = MemoryProvider::new("us-east-1");
        let spec = ZoneSpec {
            zone_name: "example.com".to_string(),
        };

        let a = provider.ensure_zone(&spec).await.unwrap();
        let b = provider.ensure_zone(&spec).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_call_log_is_shared_between_clones() {
        let provider = MemoryProvider::new("us-east-1");
        let clone = provider.clone();

        clone
            .ensure_zone(&ZoneSpec {
                zone_name: "example.com".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(provider.call_count("ensure_zone"), 1);
    }

    #[tokio::test]
    async fn test_validation_timeout_injection() {
        let provider =
            MemoryProvider::new("us-east-1").with_validation_delay(Duration::from_secs(700));

        let request = CertificateRequest {
            arn: "arn:aws:acm:us-east-1:123:certificate/x".to_string(),
            domain: "example.com".to_string(),
            region: "us-east-1".to_string(),
        };

        let err = provider
            .await_validation(&request, Duration::from_secs(600))
            .await
            .unwrap_err();

        let provision = err.downcast_ref::<ProvisionError>().unwrap();
        assert!(matches!(
            provision,
            ProvisionError::ValidationTimeout { .. }
        ));
    }
}
