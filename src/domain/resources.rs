//! Resource declarations and live handles.
//!
//! A *declaration* (`*Spec`) is the desired state of one resource,
//! immutable once built. A *handle* is returned by the cloud provider
//! after the resource exists and carries the live identifiers; all
//! cross-resource references (ARNs, URLs, alias targets) are computed
//! by accessor methods on handles, never interpolated by hand at the
//! call site.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// DNS zone
// ---------------------------------------------------------------------------

/// Declaration of the hosted DNS zone for the root domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneSpec {
    /// Zone name (the apex domain, e.g. "example.com")
    pub zone_name: String,
}

/// Live handle to a hosted zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneHandle {
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

/// Declaration of a DNS-validated TLS certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateSpec {
    /// Subject domain (apex or api subdomain)
    pub domain: String,

    /// Issuing region. The CDN only accepts certificates issued in
    /// us-east-1, so the apex certificate is pinned there regardless
    /// of the deployment region.
    pub region: String,
}

impl CertificateSpec {
    /// Certificate for the apex domain (always issued in us-east-1)
    pub fn apex(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            region: "us-east-1".to_string(),
        }
    }

    /// Certificate for the API subdomain, issued in the deployment region
    pub fn api(api_domain: &str, region: &str) -> Self {
        Self {
            domain: api_domain.to_string(),
            region: region.to_string(),
        }
    }
}

/// A requested certificate that has not yet validated.
///
/// Only usable as input to `CloudProvider::await_validation`; nothing
/// downstream accepts this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateRequest {
    pub arn: String,
    pub domain: String,
    pub region: String,
}

/// A certificate whose DNS ownership challenge has been confirmed.
///
/// Fields are private and the constructor is crate-internal: the only
/// way to obtain one is through the validation wait, which makes
/// "distribution references an unvalidated certificate" a type error
/// rather than a runtime error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatedCertificate {
    arn: String,
    domain: String,
}

impl ValidatedCertificate {
    pub(crate) fn new(arn: String, domain: String) -> Self {
        Self { arn, domain }
    }

    pub fn arn(&self) -> &str {
        &self.arn
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Check that this certificate covers the given domain exactly
    pub fn covers(&self, domain: &str) -> bool {
        self.domain == domain
    }
}

// ---------------------------------------------------------------------------
// Object storage
// ---------------------------------------------------------------------------

/// Server-side encryption mode for the site bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketEncryption {
    /// Provider-managed keys
    Managed,
}

/// Public-access posture for the site bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublicAccessBlock {
    /// Block every form of public access
    All,
}

/// Declaration of the private site-content bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSpec {
    pub encryption: BucketEncryption,
    pub versioned: bool,
    pub public_access: PublicAccessBlock,
}

impl BucketSpec {
    /// The fixed posture for the site bucket: encrypted, versioned,
    /// unreachable from the public internet.
    pub fn site_defaults() -> Self {
        Self {
            encryption: BucketEncryption::Managed,
            versioned: true,
            public_access: PublicAccessBlock::All,
        }
    }
}

/// Live handle to the site bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketHandle {
    name: String,
}

impl BucketHandle {
    pub fn new(name: String) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self) -> String {
        format!("arn:aws:s3:::{}", self.name)
    }

    /// ARN covering every object in the bucket
    pub fn objects_arn(&self) -> String {
        format!("arn:aws:s3:::{}/*", self.name)
    }
}

// ---------------------------------------------------------------------------
// CDN distribution
// ---------------------------------------------------------------------------

/// Remap one origin error status to a response page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRemap {
    pub http_status: u16,
    pub response_status: u16,
    pub response_page_path: String,
}

/// Viewer protocol policy for the distribution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewerProtocol {
    RedirectToHttps,
}

impl ViewerProtocol {
    /// Policy value as the control plane spells it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RedirectToHttps => "redirect-to-https",
        }
    }
}

/// Declaration of the CDN distribution fronting the site bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionSpec {
    /// Public domain names served by the distribution
    pub domain_names: Vec<String>,

    /// Object served for `/`
    pub default_root_object: String,

    /// Origin bucket name
    pub origin_bucket: String,

    /// Apex certificate; the type guarantees it has validated
    pub certificate: ValidatedCertificate,

    pub viewer_protocol: ViewerProtocol,
    pub compress: bool,
    pub http2: bool,

    /// Error remaps. Both 403 and 404 must rewrite to the default
    /// root object at 200 so client-side routing works.
    pub error_remaps: Vec<ErrorRemap>,
}

impl DistributionSpec {
    /// Standard single-page-app distribution over the given bucket
    pub fn site_defaults(
        domain: &str,
        bucket: &BucketHandle,
        certificate: ValidatedCertificate,
    ) -> Self {
        let index = "/index.html".to_string();
        Self {
            domain_names: vec![domain.to_string()],
            default_root_object: "index.html".to_string(),
            origin_bucket: bucket.name().to_string(),
            certificate,
            viewer_protocol: ViewerProtocol::RedirectToHttps,
            compress: true,
            http2: true,
            error_remaps: vec![
                ErrorRemap {
                    http_status: 404,
                    response_status: 200,
                    response_page_path: index.clone(),
                },
                ErrorRemap {
                    http_status: 403,
                    response_status: 200,
                    response_page_path: index,
                },
            ],
        }
    }
}

/// Live handle to a CDN distribution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionHandle {
    id: String,
    domain_name: String,
    account: String,
}

impl DistributionHandle {
    pub fn new(id: String, domain_name: String, account: String) -> Self {
        Self {
            id,
            domain_name,
            account,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The distribution's own public domain (e.g. `d123.cloudfront.net`)
    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn arn(&self) -> String {
        format!(
            "arn:aws:cloudfront::{}:distribution/{}",
            self.account, self.id
        )
    }

    /// Alias target for the apex DNS record
    pub fn alias_target(&self) -> AliasTarget {
        AliasTarget::Distribution {
            id: self.id.clone(),
            domain_name: self.domain_name.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Serverless API
// ---------------------------------------------------------------------------

/// Declaration of the stateless request handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Code artifact location, relative to the deployment root
    pub code_path: String,

    /// Entry point within the artifact
    pub handler: String,

    pub runtime: String,
    pub log_retention_days: u32,
}

impl FunctionSpec {
    /// The fixed handler shipped with the site
    pub fn site_defaults() -> Self {
        Self {
            code_path: "api".to_string(),
            handler: "callbackcode.handler".to_string(),
            runtime: "python3.7".to_string(),
            log_retention_days: 7,
        }
    }
}

/// Live handle to the request handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionHandle {
    pub name: String,
    pub arn: String,
}

/// Declaration of the managed gateway fronting the handler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestApiSpec {
    /// Custom domain (the api subdomain)
    pub domain_name: String,

    /// Certificate for that exact subdomain
    pub certificate: ValidatedCertificate,

    /// Deployment stage name
    pub stage: String,
}

/// Live handle to the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayHandle {
    rest_api_id: String,
    region: String,
    stage: String,
}

impl GatewayHandle {
    pub fn new(rest_api_id: String, region: String, stage: String) -> Self {
        Self {
            rest_api_id,
            region,
            stage,
        }
    }

    pub fn rest_api_id(&self) -> &str {
        &self.rest_api_id
    }

    /// The gateway's execute endpoint for the site's single resource
    pub fn invoke_url(&self) -> String {
        format!(
            "https://{}.execute-api.{}.amazonaws.com/{}/request",
            self.rest_api_id, self.region, self.stage
        )
    }

    /// The same resource behind the custom subdomain; this is the URL
    /// the deployed site calls
    pub fn custom_domain_url(&self, api_domain: &str) -> String {
        format!("https://{}/{}/request", api_domain, self.stage)
    }

    /// Alias target for the subdomain DNS record
    pub fn alias_target(&self) -> AliasTarget {
        AliasTarget::RestApi {
            rest_api_id: self.rest_api_id.clone(),
            region: self.region.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// DNS records
// ---------------------------------------------------------------------------

/// What an alias record points at
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AliasTarget {
    Distribution { id: String, domain_name: String },
    RestApi { rest_api_id: String, region: String },
}

/// Declaration of one alias record in the hosted zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSpec {
    /// Record name (the public domain it binds)
    pub name: String,

    /// Hosted zone the record lives in
    pub zone_id: String,

    /// Target, taken from a live handle so the record can only point
    /// at a resource created in the same run
    pub target: AliasTarget,
}

// ---------------------------------------------------------------------------
// Deployment pipeline
// ---------------------------------------------------------------------------

/// Source stage: pull from an external repository branch.
///
/// `credential_ref` names a secret-store entry; the secret itself is
/// resolved at pipeline-run time and never appears in the declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub credential_ref: String,
}

/// Build stage: run the externally-defined buildspec with the live
/// identifiers injected as environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Buildspec path within the pulled source
    pub buildspec_path: String,

    /// Build container image
    pub image: String,

    /// Name of the role the build runs as
    pub role_name: String,

    /// Injected environment (sorted map so fingerprints are stable)
    pub environment: BTreeMap<String, String>,
}

impl BuildSpec {
    /// Build environment wired from the live handles of the same run
    pub fn site_defaults(
        domain: &str,
        gateway: &GatewayHandle,
        distribution: &DistributionHandle,
        bucket: &BucketHandle,
    ) -> Self {
        let mut environment = BTreeMap::new();
        // The built site calls the API through its public subdomain;
        // the execute-api endpoint is only published in the OutputSet
        environment.insert(
            "API_ENDPOINT".to_string(),
            gateway.custom_domain_url(&format!("api.{}", domain)),
        );
        environment.insert("DISTRIBUTION_ID".to_string(), distribution.id().to_string());
        environment.insert("S3_BUCKET".to_string(), bucket.name().to_string());
        environment.insert("SITE_URL".to_string(), domain.to_string());

        Self {
            buildspec_path: "web/buildspec.yml".to_string(),
            image: "aws/codebuild/standard:5.0".to_string(),
            role_name: format!("{}-build", domain),
            environment,
        }
    }
}

/// A permission granted to the build role. Grants are exact: the one
/// bucket, the one distribution, never a wildcard resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Grant {
    BucketReadWrite {
        role_name: String,
        bucket_arn: String,
        objects_arn: String,
    },
    CreateInvalidation {
        role_name: String,
        distribution_arn: String,
    },
}

impl Grant {
    pub fn bucket_read_write(role_name: &str, bucket: &BucketHandle) -> Self {
        Self::BucketReadWrite {
            role_name: role_name.to_string(),
            bucket_arn: bucket.arn(),
            objects_arn: bucket.objects_arn(),
        }
    }

    pub fn create_invalidation(role_name: &str, distribution: &DistributionHandle) -> Self {
        Self::CreateInvalidation {
            role_name: role_name.to_string(),
            distribution_arn: distribution.arn(),
        }
    }

    /// Short description used in logs and grant-failure errors
    pub fn describe(&self) -> String {
        match self {
            Self::BucketReadWrite { bucket_arn, .. } => {
                format!("read/write on {}", bucket_arn)
            }
            Self::CreateInvalidation {
                distribution_arn, ..
            } => format!("invalidation on {}", distribution_arn),
        }
    }
}

/// Declaration of the two-stage deployment pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Pipeline name, `<domain>-deploy`
    pub name: String,

    pub source: SourceSpec,
    pub build: BuildSpec,

    /// Permissions the build role needs, granted before the pipeline
    /// is declared
    pub grants: Vec<Grant>,
}

impl PipelineSpec {
    /// Fixed stage order: the source pull must complete before the
    /// build-and-deploy stage starts.
    pub fn stage_names() -> [&'static str; 2] {
        ["Source", "BuildAndDeploy"]
    }
}

/// Live handle to the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineHandle {
    name: String,
}

impl PipelineHandle {
    pub fn new(name: String) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cert(domain: &str) -> ValidatedCertificate {
        ValidatedCertificate::new(format!("arn:aws:acm:us-east-1:123:certificate/{domain}"), domain.to_string())
    }

    #[test]
    fn test_spa_error_remaps() {
        let bucket = BucketHandle::new("site-bucket".to_string());
        let spec = DistributionSpec::site_defaults("example.com", &bucket, cert("example.com"));

        assert_eq!(spec.default_root_object, "index.html");
        assert_eq!(spec.error_remaps.len(), 2);
        for remap in &spec.error_remaps {
            assert_eq!(remap.response_status, 200);
            assert_eq!(remap.response_page_path, "/index.html");
        }
        let statuses: Vec<u16> = spec.error_remaps.iter().map(|r| r.http_status).collect();
        assert!(statuses.contains(&403));
        assert!(statuses.contains(&404));
    }

    #[test]
    fn test_apex_certificate_pinned_to_us_east_1() {
        let spec = CertificateSpec::apex("example.com");
        assert_eq!(spec.region, "us-east-1");

        let api = CertificateSpec::api("api.example.com", "eu-west-1");
        assert_eq!(api.region, "eu-west-1");
    }

    #[test]
    fn test_certificate_covers_exact_domain_only() {
        let c = cert("api.example.com");
        assert!(c.covers("api.example.com"));
        assert!(!c.covers("example.com"));
    }

    #[test]
    fn test_gateway_invoke_url_shape() {
        let gw = GatewayHandle::new("abc123".to_string(), "us-east-1".to_string(), "prod".to_string());
        assert_eq!(
            gw.invoke_url(),
            "https://abc123.execute-api.us-east-1.amazonaws.com/prod/request"
        );
        assert_eq!(
            gw.custom_domain_url("api.example.com"),
            "https://api.example.com/prod/request"
        );
    }

    #[test]
    fn test_viewer_protocol_policy_value() {
        let bucket = BucketHandle::new("site-bucket".to_string());
        let spec = DistributionSpec::site_defaults("example.com", &bucket, cert("example.com"));
        assert_eq!(spec.viewer_protocol.as_str(), "redirect-to-https");
    }

    #[test]
    fn test_build_env_comes_from_handles() {
        let bucket = BucketHandle::new("site-bucket".to_string());
        let dist = DistributionHandle::new(
            "E123".to_string(),
            "d1.cloudfront.net".to_string(),
            "123456789012".to_string(),
        );
        let gw = GatewayHandle::new("abc".to_string(), "us-east-1".to_string(), "prod".to_string());

        let build = BuildSpec::site_defaults("example.com", &gw, &dist, &bucket);

        assert_eq!(
            build.environment["API_ENDPOINT"],
            "https://api.example.com/prod/request"
        );
        assert_eq!(build.environment["DISTRIBUTION_ID"], "E123");
        assert_eq!(build.environment["S3_BUCKET"], "site-bucket");
        assert_eq!(build.environment["SITE_URL"], "example.com");
    }

    #[test]
    fn test_grant_scoping_is_exact() {
        let bucket = BucketHandle::new("site-bucket".to_string());
        let dist = DistributionHandle::new(
            "E123".to_string(),
            "d1.cloudfront.net".to_string(),
            "123456789012".to_string(),
        );

        let rw = Grant::bucket_read_write("role", &bucket);
        let inv = Grant::create_invalidation("role", &dist);

        match rw {
            Grant::BucketReadWrite { bucket_arn, objects_arn, .. } => {
                assert_eq!(bucket_arn, "arn:aws:s3:::site-bucket");
                assert_eq!(objects_arn, "arn:aws:s3:::site-bucket/*");
            }
            _ => panic!("wrong grant kind"),
        }
        match inv {
            Grant::CreateInvalidation { distribution_arn, .. } => {
                assert_eq!(
                    distribution_arn,
                    "arn:aws:cloudfront::123456789012:distribution/E123"
                );
                assert!(!distribution_arn.contains('*'));
            }
            _ => panic!("wrong grant kind"),
        }
    }

    #[test]
    fn test_pipeline_stage_order() {
        assert_eq!(PipelineSpec::stage_names(), ["Source", "BuildAndDeploy"]);
    }
}
