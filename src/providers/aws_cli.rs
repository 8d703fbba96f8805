//! AWS provider using subprocess mode, driving the `aws` CLI directly.
//!
//! Each operation shells out with a bounded per-call timeout and
//! parses the CLI's JSON output. Certificate validation is the one
//! long wait: it runs the ACM waiter under the caller-supplied
//! timeout and maps expiry to `ProvisionError::ValidationTimeout`.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio::time::timeout;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::{
    AliasTarget, BucketHandle, BucketSpec, CertificateRequest, CertificateSpec,
    DistributionHandle, DistributionSpec, FunctionHandle, FunctionSpec, GatewayHandle, Grant,
    PipelineHandle, PipelineSpec, ProvisionError, RecordSpec, RestApiSpec, ValidatedCertificate,
    ZoneHandle, ZoneSpec,
};

use super::CloudProvider;

/// Hosted zone id shared by every CDN distribution alias
const CLOUDFRONT_ALIAS_ZONE: &str = "Z2FDTNDATAQYW2";

/// AWS provider in subprocess mode
pub struct AwsCliProvider {
    /// Path to the aws binary (default: "aws")
    binary_path: String,

    /// Deployment region for regional resources
    region: String,

    /// Per-call timeout for everything except the validation wait
    call_timeout: Duration,

    /// Account id, fetched once from STS
    account: OnceCell<String>,
}

impl AwsCliProvider {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            binary_path: "aws".to_string(),
            region: region.into(),
            call_timeout: Duration::from_secs(120),
            account: OnceCell::new(),
        }
    }

    /// Use a custom binary path (for testing against a stub)
    pub fn with_binary_path(mut self, binary_path: impl Into<String>) -> Self {
        self.binary_path = binary_path.into();
        self
    }

    /// Run one aws CLI call and parse its JSON output
    async fn run(&self, args: &[&str]) -> Result<Value> {
        self.run_with_timeout(args, self.call_timeout).await
    }

    async fn run_with_timeout(&self, args: &[&str], call_timeout: Duration) -> Result<Value> {
        debug!(?args, "aws call");

        let child = Command::new(&self.binary_path)
            .args(args)
            .args(["--output", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn aws for '{}'", args.join(" ")))?;

        let output = timeout(call_timeout, child.wait_with_output())
            .await
            .with_context(|| format!("aws '{}' timed out after {:?}", args.join(" "), call_timeout))?
            .with_context(|| format!("Failed to wait for aws '{}'", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "aws '{}' failed with exit code {}: {}",
                args.join(" "),
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout).context("aws output is not valid UTF-8")?;
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&stdout)
            .with_context(|| format!("Failed to parse aws output for '{}'", args.join(" ")))
    }

    /// Account id via STS, cached for the provider's lifetime
    async fn account_id(&self) -> Result<String> {
        let account = self
            .account
            .get_or_try_init(|| async {
                let identity = self
                    .run(&["sts", "get-caller-identity"])
                    .await
                    .context("Failed to resolve account identity")?;
                str_field(&identity, "/Account")
            })
            .await?;
        Ok(account.clone())
    }

    /// Create the role the build and pipeline run as, returning its ARN.
    /// The role must exist before any policy can be attached to it.
    async fn ensure_build_role(&self, role_name: &str) -> Result<String> {
        let account = self.account_id().await?;

        let assume_role = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": {
                    "Service": ["codebuild.amazonaws.com", "codepipeline.amazonaws.com"]
                },
                "Action": "sts:AssumeRole"
            }]
        })
        .to_string();
        // create-role is idempotent enough here: an existing role only
        // fails the call and the arn below is deterministic
        let _ = self
            .run(&[
                "iam",
                "create-role",
                "--role-name",
                role_name,
                "--assume-role-policy-document",
                &assume_role,
            ])
            .await;

        Ok(format!("arn:aws:iam::{}:role/{}", account, role_name))
    }

    /// Publish the certificate's DNS challenge record in the zone
    async fn publish_challenge(
        &self,
        request_arn: &str,
        region: &str,
        zone: &ZoneHandle,
    ) -> Result<()> {
        // The challenge record appears on the certificate shortly
        // after the request; poll briefly for it.
        let mut record = None;
        for _ in 0..10 {
            let described = self
                .run(&[
                    "acm",
                    "describe-certificate",
                    "--certificate-arn",
                    request_arn,
                    "--region",
                    region,
                ])
                .await?;
            let challenge =
                described.pointer("/Certificate/DomainValidationOptions/0/ResourceRecord");
            if let Some(challenge) = challenge {
                record = Some(challenge.clone());
                break;
            }
            tokio::time::sleep(Duration::from_secs(3)).await;
        }
        let record =
            record.with_context(|| format!("No DNS challenge issued for {}", request_arn))?;

        let change_batch = json!({
            "Changes": [{
                "Action": "UPSERT",
                "ResourceRecordSet": {
                    "Name": str_field(&record, "/Name")?,
                    "Type": str_field(&record, "/Type")?,
                    "TTL": 300,
                    "ResourceRecords": [{ "Value": str_field(&record, "/Value")? }],
                }
            }]
        })
        .to_string();

        self.run(&[
            "route53",
            "change-resource-record-sets",
            "--hosted-zone-id",
            &zone.id,
            "--change-batch",
            &change_batch,
        ])
        .await?;

        Ok(())
    }
}

/// Extract a string field from CLI output by JSON pointer
fn str_field(value: &Value, pointer: &str) -> Result<String> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .with_context(|| format!("aws output missing field {}", pointer))
}

#[async_trait]
impl CloudProvider for AwsCliProvider {
    fn name(&self) -> &str {
        "aws-cli"
    }

    fn region(&self) -> &str {
        &self.region
    }

    async fn ensure_zone(&self, spec: &ZoneSpec) -> Result<ZoneHandle> {
        let listed = self
            .run(&[
                "route53",
                "list-hosted-zones-by-name",
                "--dns-name",
                &spec.zone_name,
                "--max-items",
                "1",
            ])
            .await?;

        let wanted = format!("{}.", spec.zone_name);
        if let Some(existing) = listed.pointer("/HostedZones/0") {
            if existing.pointer("/Name").and_then(Value::as_str) == Some(wanted.as_str()) {
                let id = str_field(existing, "/Id")?;
                info!(zone = %spec.zone_name, "Reusing hosted zone");
                return Ok(ZoneHandle {
                    id: id.trim_start_matches("/hostedzone/").to_string(),
                    name: spec.zone_name.clone(),
                });
            }
        }

        let reference = Uuid::new_v4().to_string();
        let created = self
            .run(&[
                "route53",
                "create-hosted-zone",
                "--name",
                &spec.zone_name,
                "--caller-reference",
                &reference,
            ])
            .await?;

        let id = str_field(&created, "/HostedZone/Id")?;
        Ok(ZoneHandle {
            id: id.trim_start_matches("/hostedzone/").to_string(),
            name: spec.zone_name.clone(),
        })
    }

    async fn request_certificate(
        &self,
        spec: &CertificateSpec,
        zone: &ZoneHandle,
    ) -> Result<CertificateRequest> {
        let requested = self
            .run(&[
                "acm",
                "request-certificate",
                "--domain-name",
                &spec.domain,
                "--validation-method",
                "DNS",
                "--region",
                &spec.region,
            ])
            .await?;
        let arn = str_field(&requested, "/CertificateArn")?;

        self.publish_challenge(&arn, &spec.region, zone).await?;

        Ok(CertificateRequest {
            arn,
            domain: spec.domain.clone(),
            region: spec.region.clone(),
        })
    }

    async fn await_validation(
        &self,
        request: &CertificateRequest,
        wait: Duration,
    ) -> Result<ValidatedCertificate> {
        info!(domain = %request.domain, "Waiting for certificate validation");

        let result = self
            .run_with_timeout(
                &[
                    "acm",
                    "wait",
                    "certificate-validated",
                    "--certificate-arn",
                    &request.arn,
                    "--region",
                    &request.region,
                ],
                wait,
            )
            .await;

        match result {
            Ok(_) => Ok(ValidatedCertificate::new(
                request.arn.clone(),
                request.domain.clone(),
            )),
            Err(_) => Err(ProvisionError::ValidationTimeout {
                domain: request.domain.clone(),
                waited_seconds: wait.as_secs(),
            }
            .into()),
        }
    }

    async fn ensure_bucket(&self, spec: &BucketSpec, domain: &str) -> Result<BucketHandle> {
        let name = format!("{}-site", domain.replace('.', "-"));

        let exists = self
            .run(&["s3api", "head-bucket", "--bucket", &name])
            .await
            .is_ok();

        if !exists {
            self.run(&["s3api", "create-bucket", "--bucket", &name, "--region", &self.region])
                .await?;
        }

        // Posture is re-asserted even when the bucket already exists
        let encryption = json!({
            "Rules": [{ "ApplyServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" } }]
        })
        .to_string();
        self.run(&[
            "s3api",
            "put-bucket-encryption",
            "--bucket",
            &name,
            "--server-side-encryption-configuration",
            &encryption,
        ])
        .await?;

        if spec.versioned {
            self.run(&[
                "s3api",
                "put-bucket-versioning",
                "--bucket",
                &name,
                "--versioning-configuration",
                "Status=Enabled",
            ])
            .await?;
        }

        self.run(&[
            "s3api",
            "put-public-access-block",
            "--bucket",
            &name,
            "--public-access-block-configuration",
            "BlockPublicAcls=true,IgnorePublicAcls=true,BlockPublicPolicy=true,RestrictPublicBuckets=true",
        ])
        .await?;

        Ok(BucketHandle::new(name))
    }

    async fn ensure_distribution(&self, spec: &DistributionSpec) -> Result<DistributionHandle> {
        let account = self.account_id().await?;

        // Reuse a distribution already serving these aliases
        let listed = self.run(&["cloudfront", "list-distributions"]).await?;
        if let Some(items) = listed
            .pointer("/DistributionList/Items")
            .and_then(Value::as_array)
        {
            for item in items {
                let aliases = item
                    .pointer("/Aliases/Items")
                    .and_then(Value::as_array)
                    .map(|a| {
                        a.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect::<Vec<_>>()
                    })
                    .unwrap_or_default();
                if aliases == spec.domain_names {
                    info!(domains = ?spec.domain_names, "Reusing distribution");
                    return Ok(DistributionHandle::new(
                        str_field(item, "/Id")?,
                        str_field(item, "/DomainName")?,
                        account,
                    ));
                }
            }
        }

        let config = json!({
            "CallerReference": Uuid::new_v4().to_string(),
            "Comment": spec.domain_names.join(","),
            "Enabled": true,
            "DefaultRootObject": spec.default_root_object,
            "HttpVersion": if spec.http2 { "http2" } else { "http1.1" },
            "Aliases": { "Quantity": spec.domain_names.len(), "Items": spec.domain_names },
            "ViewerCertificate": {
                "ACMCertificateArn": spec.certificate.arn(),
                "SSLSupportMethod": "sni-only",
                "MinimumProtocolVersion": "TLSv1.2_2021"
            },
            "Origins": {
                "Quantity": 1,
                "Items": [{
                    "Id": "site-bucket",
                    "DomainName": format!("{}.s3.{}.amazonaws.com", spec.origin_bucket, self.region),
                    "S3OriginConfig": { "OriginAccessIdentity": "" }
                }]
            },
            "DefaultCacheBehavior": {
                "TargetOriginId": "site-bucket",
                "ViewerProtocolPolicy": spec.viewer_protocol.as_str(),
                "Compress": spec.compress,
                "ForwardedValues": { "QueryString": false, "Cookies": { "Forward": "none" } },
                "MinTTL": 0
            },
            "CustomErrorResponses": {
                "Quantity": spec.error_remaps.len(),
                "Items": spec.error_remaps.iter().map(|remap| json!({
                    "ErrorCode": remap.http_status,
                    "ResponseCode": remap.response_status.to_string(),
                    "ResponsePagePath": remap.response_page_path,
                    "ErrorCachingMinTTL": 10
                })).collect::<Vec<_>>()
            }
        })
        .to_string();

        let created = self
            .run(&["cloudfront", "create-distribution", "--distribution-config", &config])
            .await?;

        Ok(DistributionHandle::new(
            str_field(&created, "/Distribution/Id")?,
            str_field(&created, "/Distribution/DomainName")?,
            account,
        ))
    }

    async fn upsert_alias(&self, record: &RecordSpec) -> Result<()> {
        let (dns_name, alias_zone) = match &record.target {
            AliasTarget::Distribution { domain_name, .. } => {
                (domain_name.clone(), CLOUDFRONT_ALIAS_ZONE.to_string())
            }
            AliasTarget::RestApi { rest_api_id, region } => {
                // Regional execute-api endpoints alias through the
                // zone of the gateway's regional domain
                let domain = self
                    .run(&[
                        "apigateway",
                        "get-domain-name",
                        "--domain-name",
                        &record.name,
                        "--region",
                        region,
                    ])
                    .await
                    .with_context(|| {
                        format!("No gateway domain for {} ({})", record.name, rest_api_id)
                    })?;
                (
                    str_field(&domain, "/distributionDomainName")?,
                    str_field(&domain, "/distributionHostedZoneId")
                        .unwrap_or_else(|_| CLOUDFRONT_ALIAS_ZONE.to_string()),
                )
            }
        };

        let change_batch = json!({
            "Changes": [{
                "Action": "UPSERT",
                "ResourceRecordSet": {
                    "Name": record.name,
                    "Type": "A",
                    "AliasTarget": {
                        "HostedZoneId": alias_zone,
                        "DNSName": dns_name,
                        "EvaluateTargetHealth": false
                    }
                }
            }]
        })
        .to_string();

        self.run(&[
            "route53",
            "change-resource-record-sets",
            "--hosted-zone-id",
            &record.zone_id,
            "--change-batch",
            &change_batch,
        ])
        .await?;

        Ok(())
    }

    async fn ensure_function(&self, spec: &FunctionSpec, domain: &str) -> Result<FunctionHandle> {
        let name = format!("{}-handler", domain.replace('.', "-"));

        if let Ok(existing) = self
            .run(&["lambda", "get-function", "--function-name", &name, "--region", &self.region])
            .await
        {
            info!(function = %name, "Reusing handler");
            return Ok(FunctionHandle {
                name,
                arn: str_field(&existing, "/Configuration/FunctionArn")?,
            });
        }

        let account = self.account_id().await?;
        let role_name = format!("{}-exec", name);
        let assume_role = json!({
            "Version": "2012-10-17",
            "Statement": [{
                "Effect": "Allow",
                "Principal": { "Service": "lambda.amazonaws.com" },
                "Action": "sts:AssumeRole"
            }]
        })
        .to_string();
        // create-role is idempotent enough here: an existing role only
        // fails the call and the arn below is deterministic
        let _ = self
            .run(&[
                "iam",
                "create-role",
                "--role-name",
                &role_name,
                "--assume-role-policy-document",
                &assume_role,
            ])
            .await;
        let role_arn = format!("arn:aws:iam::{}:role/{}", account, role_name);

        let zip = format!("fileb://{}.zip", spec.code_path);
        let created = self
            .run(&[
                "lambda",
                "create-function",
                "--function-name",
                &name,
                "--runtime",
                &spec.runtime,
                "--handler",
                &spec.handler,
                "--zip-file",
                &zip,
                "--role",
                &role_arn,
                "--region",
                &self.region,
            ])
            .await?;

        let retention = spec.log_retention_days.to_string();
        let log_group = format!("/aws/lambda/{}", name);
        self.run(&[
            "logs",
            "put-retention-policy",
            "--log-group-name",
            &log_group,
            "--retention-in-days",
            &retention,
            "--region",
            &self.region,
        ])
        .await?;

        Ok(FunctionHandle {
            name,
            arn: str_field(&created, "/FunctionArn")?,
        })
    }

    async fn ensure_rest_api(
        &self,
        spec: &RestApiSpec,
        handler: &FunctionHandle,
    ) -> Result<GatewayHandle> {
        // The platform rejects a domain binding whose certificate does
        // not cover the subdomain; catch it before the call
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

        let apis = self.run(&["apigateway", "get-rest-apis", "--region", &self.region]).await?;
        let existing = apis
            .pointer("/items")
            .and_then(Value::as_array)
            .and_then(|items| {
                items.iter().find(|item| {
                    item.pointer("/name").and_then(Value::as_str) == Some(spec.domain_name.as_str())
                })
            })
            .map(|item| str_field(item, "/id"))
            .transpose()?;

        let rest_api_id = match existing {
            Some(id) => {
                info!(api = %spec.domain_name, "Reusing gateway");
                id
            }
            None => {
                // Minimal proxy API: every path and method forwarded
                // to the handler
                let openapi = json!({
                    "openapi": "3.0.1",
                    "info": { "title": spec.domain_name, "version": "1" },
                    "paths": {
                        "/{proxy+}": {
                            "x-amazon-apigateway-any-method": {
                                "x-amazon-apigateway-integration": {
                                    "type": "aws_proxy",
                                    "httpMethod": "POST",
                                    "uri": format!(
                                        "arn:aws:apigateway:{}:lambda:path/2015-03-31/functions/{}/invocations",
                                        self.region, handler.arn
                                    )
                                }
                            }
                        }
                    }
                })
                .to_string();

                let imported = self
                    .run(&[
                        "apigateway",
                        "import-rest-api",
                        "--body",
                        &openapi,
                        "--region",
                        &self.region,
                    ])
                    .await?;
                let id = str_field(&imported, "/id")?;

                self.run(&[
                    "lambda",
                    "add-permission",
                    "--function-name",
                    &handler.name,
                    "--statement-id",
                    "apigateway-invoke",
                    "--action",
                    "lambda:InvokeFunction",
                    "--principal",
                    "apigateway.amazonaws.com",
                    "--region",
                    &self.region,
                ])
                .await?;

                self.run(&[
                    "apigateway",
                    "create-deployment",
                    "--rest-api-id",
                    &id,
                    "--stage-name",
                    &spec.stage,
                    "--region",
                    &self.region,
                ])
                .await?;

                let cert_arn = spec.certificate.arn();
                self.run(&[
                    "apigateway",
                    "create-domain-name",
                    "--domain-name",
                    &spec.domain_name,
                    "--certificate-arn",
                    cert_arn,
                    "--region",
                    &self.region,
                ])
                .await?;
                self.run(&[
                    "apigateway",
                    "create-base-path-mapping",
                    "--domain-name",
                    &spec.domain_name,
                    "--rest-api-id",
                    &id,
                    "--stage",
                    &spec.stage,
                    "--region",
                    &self.region,
                ])
                .await?;

                id
            }
        };

        Ok(GatewayHandle::new(
            rest_api_id,
            self.region.clone(),
            spec.stage.clone(),
        ))
    }

    async fn grant(&self, grant: &Grant) -> Result<()> {
        let (role_name, policy_name, document) = match grant {
            Grant::BucketReadWrite {
                role_name,
                bucket_arn,
                objects_arn,
            } => (
                role_name,
                "site-bucket-rw",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject", "s3:ListBucket"],
                        "Resource": [bucket_arn, objects_arn]
                    }]
                }),
            ),
            Grant::CreateInvalidation {
                role_name,
                distribution_arn,
            } => (
                role_name,
                "distribution-invalidate",
                json!({
                    "Version": "2012-10-17",
                    "Statement": [{
                        "Effect": "Allow",
                        "Action": ["cloudfront:CreateInvalidation"],
                        "Resource": [distribution_arn]
                    }]
                }),
            ),
        };

        self.ensure_build_role(role_name)
            .await
            .map_err(|e| {
                anyhow::Error::from(ProvisionError::PermissionGrant {
                    grant: grant.describe(),
                    reason: e.to_string(),
                })
            })?;

        let document = document.to_string();
        self.run(&[
            "iam",
            "put-role-policy",
            "--role-name",
            role_name,
            "--policy-name",
            policy_name,
            "--policy-document",
            &document,
        ])
        .await
        .map_err(|e| {
            anyhow::Error::from(ProvisionError::PermissionGrant {
                grant: grant.describe(),
                reason: e.to_string(),
            })
        })?;

        Ok(())
    }

    async fn ensure_pipeline(&self, spec: &PipelineSpec) -> Result<PipelineHandle> {
        let exists = self
            .run(&[
                "codepipeline",
                "get-pipeline",
                "--name",
                &spec.name,
                "--region",
                &self.region,
            ])
            .await
            .is_ok();

        if exists {
            info!(pipeline = %spec.name, "Reusing pipeline");
            return Ok(PipelineHandle::new(spec.name.clone()));
        }

        let role_arn = self.ensure_build_role(&spec.build.role_name).await?;

        // Build project first: the pipeline's second stage references
        // it by name
        let project = json!({
            "name": spec.build.role_name,
            "source": { "type": "CODEPIPELINE", "buildspec": spec.build.buildspec_path },
            "artifacts": { "type": "CODEPIPELINE" },
            "serviceRole": role_arn,
            "environment": {
                "type": "LINUX_CONTAINER",
                "image": spec.build.image,
                "computeType": "BUILD_GENERAL1_SMALL",
                "environmentVariables": spec.build.environment.iter().map(|(name, value)| json!({
                    "name": name, "value": value, "type": "PLAINTEXT"
                })).collect::<Vec<_>>()
            }
        })
        .to_string();
        self.run(&[
            "codebuild",
            "create-project",
            "--cli-input-json",
            &project,
            "--region",
            &self.region,
        ])
        .await?;

        // Credential stays a secret-store reference, resolved when the
        // pipeline runs
        let token_ref = format!("{{{{resolve:secretsmanager:{}}}}}", spec.source.credential_ref);
        let [source_stage, build_stage] = PipelineSpec::stage_names();
        let pipeline = json!({
            "pipeline": {
                "name": spec.name,
                "roleArn": role_arn,
                "artifactStore": { "type": "S3", "location": format!("{}-artifacts", spec.name) },
                "stages": [
                    {
                        "name": source_stage,
                        "actions": [{
                            "name": "GitHub_Source",
                            "actionTypeId": {
                                "category": "Source", "owner": "ThirdParty",
                                "provider": "GitHub", "version": "1"
                            },
                            "outputArtifacts": [{ "name": "SourceOutput" }],
                            "configuration": {
                                "Owner": spec.source.owner,
                                "Repo": spec.source.repo,
                                "Branch": spec.source.branch,
                                "OAuthToken": token_ref
                            }
                        }]
                    },
                    {
                        "name": build_stage,
                        "actions": [{
                            "name": "CodeBuild",
                            "actionTypeId": {
                                "category": "Build", "owner": "AWS",
                                "provider": "CodeBuild", "version": "1"
                            },
                            "inputArtifacts": [{ "name": "SourceOutput" }],
                            "configuration": { "ProjectName": spec.build.role_name }
                        }]
                    }
                ]
            }
        })
        .to_string();

        self.run(&[
            "codepipeline",
            "create-pipeline",
            "--cli-input-json",
            &pipeline,
            "--region",
            &self.region,
        ])
        .await?;

        Ok(PipelineHandle::new(spec.name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_identity() {
        let provider = AwsCliProvider::new("us-east-1");
        assert_eq!(provider.name(), "aws-cli");
        assert_eq!(provider.region(), "us-east-1");
    }

    #[test]
    fn test_custom_binary_path() {
        let provider = AwsCliProvider::new("us-east-1").with_binary_path("/custom/aws");
        assert_eq!(provider.binary_path, "/custom/aws");
    }

    #[test]
    fn test_str_field_pointer() {
        let value = json!({ "Distribution": { "Id": "E123" } });
        assert_eq!(str_field(&value, "/Distribution/Id").unwrap(), "E123");
        assert!(str_field(&value, "/Distribution/Missing").is_err());
    }

    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use crate::domain::{BuildSpec, SourceSpec};

    /// Shell stub standing in for the aws binary: records every call
    /// and answers with canned JSON
    fn stub_aws(temp: &TempDir) -> (String, PathBuf) {
        let log = temp.path().join("calls.log");
        let script = temp.path().join("aws");
        let body = format!(
            concat!(
                "#!/bin/sh\n",
                "echo \"$@\" >> {log}\n",
                "case \"$1 $2\" in\n",
                "  \"codepipeline get-pipeline\") exit 254 ;;\n",
                "  \"sts get-caller-identity\") echo '{{\"Account\":\"123456789012\"}}' ;;\n",
                "  *) echo '{{}}' ;;\n",
                "esac\n",
            ),
            log = log.display()
        );
        std::fs::write(&script, body).unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        (script.to_string_lossy().into_owned(), log)
    }

    #[tokio::test]
    async fn test_build_role_created_before_grants_and_pipeline() {
        let temp = TempDir::new().unwrap();
        let (script, log) = stub_aws(&temp);
        let provider = AwsCliProvider::new("us-east-1").with_binary_path(script);

        let bucket = BucketHandle::new("example-com-site".to_string());
        let dist = DistributionHandle::new(
            "E123".to_string(),
            "d1.cloudfront.net".to_string(),
            "123456789012".to_string(),
        );
        let gw = GatewayHandle::new(
            "abc".to_string(),
            "us-east-1".to_string(),
            "prod".to_string(),
        );

        provider
            .grant(&Grant::bucket_read_write("example.com-build", &bucket))
            .await
            .unwrap();

        let spec = PipelineSpec {
            name: "example.com-deploy".to_string(),
            source: SourceSpec {
                owner: "acme".to_string(),
                repo: "site".to_string(),
                branch: "main".to_string(),
                credential_ref: "github-token".to_string(),
            },
            build: BuildSpec::site_defaults("example.com", &gw, &dist, &bucket),
            grants: Vec::new(),
        };
        provider.ensure_pipeline(&spec).await.unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        let pos = |needle: &str| {
            lines
                .iter()
                .position(|l| l.contains(needle))
                .unwrap_or_else(|| panic!("no call containing '{}'", needle))
        };

        // The role must exist before any policy is attached to it
        assert!(
            pos("iam create-role --role-name example.com-build") < pos("iam put-role-policy")
        );

        // Project and pipeline reference the role by full ARN, not name
        assert!(calls.contains("arn:aws:iam::123456789012:role/example.com-build"));
        assert!(pos("codebuild create-project") < pos("codepipeline create-pipeline"));
    }
}
