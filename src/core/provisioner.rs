//! Main orchestrator for provisioning runs.
//!
//! Drives the dependency graph against a `CloudProvider`: zone first,
//! then both certificate validations concurrently, then the delivery
//! and API branches concurrently, then the pipeline, then the
//! OutputSet. Every step is fingerprinted and recorded so a re-apply
//! with an unchanged declaration is a no-op.

use std::future::Future;
use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::DeployConfig;
use crate::domain::{
    BucketHandle, BucketSpec, BuildSpec, CertificateSpec, Deployment, DistributionHandle,
    DistributionSpec, Event, EventType, FunctionHandle, FunctionSpec, GatewayHandle, Grant,
    OutputSet, PipelineHandle, PipelineSpec, RecordSpec, RestApiSpec, SourceSpec, StepStatus,
    ValidatedCertificate, ZoneHandle, ZoneSpec,
};
use crate::providers::CloudProvider;

use super::graph::{self, StepId};
use super::state_store::{fingerprint, StateStore};

/// Resolved handles for the static-site delivery branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryHandles {
    pub bucket: BucketHandle,
    pub distribution: DistributionHandle,
}

/// Resolved handles for the API branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiHandles {
    pub function: FunctionHandle,
    pub gateway: GatewayHandle,
}

/// Declaration fingerprinted for the delivery branch. Includes the
/// certificate identity so a re-issued certificate re-applies the
/// branch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliverySpec {
    pub domain: String,
    pub bucket: BucketSpec,
    pub certificate: ValidatedCertificate,
}

/// Declaration fingerprinted for the API branch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSpec {
    pub api_domain: String,
    pub function: FunctionSpec,
    pub certificate: ValidatedCertificate,
}

/// Provisioning orchestrator for one deployment
pub struct Provisioner<P: CloudProvider> {
    provider: P,
    store: StateStore,
    config: DeployConfig,
}

impl<P: CloudProvider> Provisioner<P> {
    /// Create an orchestrator for the configured deployment.
    ///
    /// Configuration is validated here, before any resource creation,
    /// and the step table is checked for structural ordering errors.
    pub async fn new(provider: P, config: DeployConfig) -> Result<Self> {
        config.validate()?;
        graph::evaluation_waves()?;

        let base_dir = config.state_base_dir()?;
        let store = StateStore::open(&base_dir, &config.domain).await?;

        Ok(Self {
            provider,
            store,
            config,
        })
    }

    /// Apply the whole topology and publish the OutputSet
    #[instrument(skip(self), fields(domain = %self.config.domain, provider = %self.provider.name()))]
    pub async fn apply(&self) -> Result<OutputSet> {
        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting provisioning run");

        let start_event = Event::new(
            run_id,
            None,
            EventType::RunStarted,
            format!("{}:start", run_id),
            format!("Provisioning '{}' started", self.config.domain),
            StepStatus::Running,
        );
        self.store.append(&start_event).await?;

        match self.apply_steps(run_id).await {
            Ok(outputs) => {
                let event = Event::new(
                    run_id,
                    None,
                    EventType::RunCompleted,
                    format!("{}:complete", run_id),
                    format!("Provisioning '{}' published outputs", self.config.domain),
                    StepStatus::Completed,
                );
                self.store.append(&event).await?;
                info!(%run_id, "Outputs published");
                Ok(outputs)
            }
            Err(e) => {
                let error_msg = e.to_string();
                error!(%run_id, error = %error_msg, "Provisioning run failed");

                let event = Event::new(
                    run_id,
                    None,
                    EventType::RunFailed,
                    format!("{}:complete", run_id),
                    format!("Provisioning '{}' failed", self.config.domain),
                    StepStatus::Failed,
                )
                .with_error(error_msg);
                self.store.append(&event).await?;

                Err(e)
            }
        }
    }

    /// Execute the graph waves in order
    async fn apply_steps(&self, run_id: Uuid) -> Result<OutputSet> {
        let domain = self.config.domain.clone();
        let api_domain = self.config.api_domain();

        // Wave 1: hosted zone
        let zone_spec = ZoneSpec {
            zone_name: domain.clone(),
        };
        let zone: ZoneHandle = self
            .run_step(
                run_id,
                StepId::Zone,
                &zone_spec,
                self.provider.ensure_zone(&zone_spec),
            )
            .await?;

        // Wave 2: both certificates, validated concurrently. The
        // validation wait is the principal blocking operation.
        let apex_spec = CertificateSpec::apex(&domain);
        let api_cert_spec = CertificateSpec::api(&api_domain, self.provider.region());

        let (apex_cert, api_cert) = tokio::try_join!(
            self.run_step(
                run_id,
                StepId::ApexCert,
                &apex_spec,
                self.validate_certificate(&apex_spec, &zone),
            ),
            self.run_step(
                run_id,
                StepId::ApiCert,
                &api_cert_spec,
                self.validate_certificate(&api_cert_spec, &zone),
            ),
        )?;

        // Wave 3: the two independent branches
        let delivery_spec = DeliverySpec {
            domain: domain.clone(),
            bucket: BucketSpec::site_defaults(),
            certificate: apex_cert,
        };
        let api_spec = ApiSpec {
            api_domain: api_domain.clone(),
            function: FunctionSpec::site_defaults(),
            certificate: api_cert,
        };

        let (delivery, api) = tokio::try_join!(
            self.run_step(
                run_id,
                StepId::Delivery,
                &delivery_spec,
                self.provision_delivery(&delivery_spec, &zone),
            ),
            self.run_step(
                run_id,
                StepId::Api,
                &api_spec,
                self.provision_api(&api_spec, &zone),
            ),
        )?;

        // Wave 4: pipeline, parameterized with the identifiers
        // resolved in this run
        let build = BuildSpec::site_defaults(
            &domain,
            &api.gateway,
            &delivery.distribution,
            &delivery.bucket,
        );
        let grants = vec![
            Grant::bucket_read_write(&build.role_name, &delivery.bucket),
            Grant::create_invalidation(&build.role_name, &delivery.distribution),
        ];
        let pipeline_spec = PipelineSpec {
            name: self.config.pipeline_name(),
            source: SourceSpec {
                owner: self.config.repo_owner.clone(),
                repo: self.config.repo_name.clone(),
                branch: self.config.branch.clone(),
                credential_ref: self.config.credential_ref.clone(),
            },
            build,
            grants,
        };
        let pipeline: PipelineHandle = self
            .run_step(
                run_id,
                StepId::Pipeline,
                &pipeline_spec,
                self.wire_pipeline(&pipeline_spec),
            )
            .await?;

        // Wave 5: a pure read of resolved identifiers
        let outputs = OutputSet::from_handles(
            &delivery.bucket,
            &delivery.distribution,
            &api.gateway,
            &pipeline,
        );
        let outputs = self
            .run_step(run_id, StepId::Outputs, &outputs, async {
                Ok(outputs.clone())
            })
            .await?;

        Ok(outputs)
    }

    /// Request a certificate and wait for it to validate. Only the
    /// returned `ValidatedCertificate` is accepted downstream.
    async fn validate_certificate(
        &self,
        spec: &CertificateSpec,
        zone: &ZoneHandle,
    ) -> Result<ValidatedCertificate> {
        let request = self.provider.request_certificate(spec, zone).await?;
        self.provider
            .await_validation(&request, self.config.cert_timeout())
            .await
    }

    /// Delivery branch: bucket, distribution, apex alias record
    async fn provision_delivery(
        &self,
        spec: &DeliverySpec,
        zone: &ZoneHandle,
    ) -> Result<DeliveryHandles> {
        let bucket = self
            .provider
            .ensure_bucket(&spec.bucket, &spec.domain)
            .await?;

        let distribution_spec =
            DistributionSpec::site_defaults(&spec.domain, &bucket, spec.certificate.clone());
        let distribution = self.provider.ensure_distribution(&distribution_spec).await?;

        let record = RecordSpec {
            name: spec.domain.clone(),
            zone_id: zone.id.clone(),
            target: distribution.alias_target(),
        };
        self.provider.upsert_alias(&record).await?;

        Ok(DeliveryHandles {
            bucket,
            distribution,
        })
    }

    /// API branch: handler, gateway, subdomain alias record
    async fn provision_api(&self, spec: &ApiSpec, zone: &ZoneHandle) -> Result<ApiHandles> {
        let function = self
            .provider
            .ensure_function(&spec.function, &spec.api_domain)
            .await?;

        let rest_api_spec = RestApiSpec {
            domain_name: spec.api_domain.clone(),
            certificate: spec.certificate.clone(),
            stage: "prod".to_string(),
        };
        let gateway = self
            .provider
            .ensure_rest_api(&rest_api_spec, &function)
            .await?;

        let record = RecordSpec {
            name: spec.api_domain.clone(),
            zone_id: zone.id.clone(),
            target: gateway.alias_target(),
        };
        self.provider.upsert_alias(&record).await?;

        Ok(ApiHandles { function, gateway })
    }

    /// Grant the build role its exact permissions, then declare the
    /// pipeline
    async fn wire_pipeline(&self, spec: &PipelineSpec) -> Result<PipelineHandle> {
        for grant in &spec.grants {
            self.provider.grant(grant).await?;
        }
        self.provider.ensure_pipeline(spec).await
    }

    /// Run one step: skip it if an identical declaration already
    /// completed, otherwise apply it and record the handle.
    async fn run_step<S, H, Fut>(
        &self,
        run_id: Uuid,
        step: StepId,
        spec: &S,
        apply: Fut,
    ) -> Result<H>
    where
        S: Serialize,
        H: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<H>>,
    {
        let fp = fingerprint(step, spec)?;

        if self.store.is_step_completed(step, &fp).await? {
            if let Some(handle) = self.store.load_handle(step).await? {
                info!(step = %step, "Declaration unchanged, reusing resource");
                let event = Event::new(
                    run_id,
                    Some(step.as_str().to_string()),
                    EventType::StepSkipped,
                    fp,
                    format!("Step '{}' reused from previous run", step),
                    StepStatus::Skipped,
                );
                self.store.append(&event).await?;
                return Ok(handle);
            }
            // Completed event without a recorded handle: fall through
            // and re-apply; the provider converges.
            warn!(step = %step, "Completed step has no recorded handle, re-applying");
        }

        let start_event = Event::new(
            run_id,
            Some(step.as_str().to_string()),
            EventType::StepStarted,
            fp.clone(),
            format!("Step '{}' applying", step),
            StepStatus::Running,
        );
        self.store.append(&start_event).await?;

        let step_start = Instant::now();
        match apply.await {
            Ok(handle) => {
                let duration_ms = step_start.elapsed().as_millis() as u64;
                self.store.record_handle(step, &handle).await?;

                let event = Event::new(
                    run_id,
                    Some(step.as_str().to_string()),
                    EventType::StepCompleted,
                    fp,
                    format!("Step '{}' completed in {}ms", step, duration_ms),
                    StepStatus::Completed,
                )
                .with_duration(duration_ms);
                self.store.append(&event).await?;

                Ok(handle)
            }
            Err(e) => {
                let duration_ms = step_start.elapsed().as_millis() as u64;
                error!(step = %step, error = %e, "Step failed");

                let event = Event::new(
                    run_id,
                    Some(step.as_str().to_string()),
                    EventType::StepFailed,
                    fp,
                    format!("Step '{}' failed: {}", step, e),
                    StepStatus::Failed,
                )
                .with_duration(duration_ms)
                .with_error(e.to_string());
                self.store.append(&event).await?;

                Err(e).with_context(|| format!("Step '{}' failed", step))
            }
        }
    }
}

/// Reconstruct a deployment's state from its record
pub async fn load_status(base_dir: &Path, domain: &str) -> Result<Option<Deployment>> {
    let store = StateStore::open(base_dir, domain).await?;
    let events = store.replay().await?;

    if events.is_empty() {
        return Ok(None);
    }

    Ok(Deployment::from_events(domain, &events))
}

/// Load the published OutputSet, if the deployment reached it
pub async fn load_outputs(base_dir: &Path, domain: &str) -> Result<Option<OutputSet>> {
    let store = StateStore::open(base_dir, domain).await?;
    store.load_handle(StepId::Outputs).await
}
