//! Deployment configuration.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (SITEWIRE_DOMAIN, SITEWIRE_REPO_OWNER, ...)
//! 2. Config file (sitewire.yaml, discovered in cwd and parents)
//! 3. Defaults
//!
//! The four required fields {domain, repo_owner, repo_name,
//! credential_ref} are validated eagerly with a named error per
//! missing field, before any resource is created.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::domain::ProvisionError;

/// Raw configuration as read from file and environment; everything
/// optional until resolved
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    /// Root domain name (the apex)
    pub domain: Option<String>,

    /// Source repository owner
    pub repo_owner: Option<String>,

    /// Source repository name
    pub repo_name: Option<String>,

    /// Secret-store reference for the source-control credential.
    /// The secret itself is resolved at pipeline-run time.
    pub credential_ref: Option<String>,

    pub branch: Option<String>,
    pub region: Option<String>,
    pub cert_timeout_seconds: Option<u64>,
    pub state_dir: Option<PathBuf>,
}

impl RawConfig {
    /// Overlay environment variables onto file values
    pub fn overlay_env(mut self) -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());

        if let Some(v) = var("SITEWIRE_DOMAIN") {
            self.domain = Some(v);
        }
        if let Some(v) = var("SITEWIRE_REPO_OWNER") {
            self.repo_owner = Some(v);
        }
        if let Some(v) = var("SITEWIRE_REPO_NAME") {
            self.repo_name = Some(v);
        }
        if let Some(v) = var("SITEWIRE_CREDENTIAL_REF") {
            self.credential_ref = Some(v);
        }
        if let Some(v) = var("SITEWIRE_BRANCH") {
            self.branch = Some(v);
        }
        if let Some(v) = var("SITEWIRE_REGION") {
            self.region = Some(v);
        }
        if let Some(v) = var("SITEWIRE_CERT_TIMEOUT") {
            self.cert_timeout_seconds = v.parse().ok();
        }
        if let Some(v) = var("SITEWIRE_STATE_DIR") {
            self.state_dir = Some(PathBuf::from(v));
        }

        self
    }

    /// Resolve into a validated configuration
    pub fn resolve(self) -> Result<DeployConfig, ProvisionError> {
        let required = |value: Option<String>, field: &'static str| {
            value
                .filter(|v| !v.trim().is_empty())
                .ok_or(ProvisionError::MissingConfig { field })
        };

        let domain = required(self.domain, "domain")?;
        if domain.contains('/') || domain.contains(char::is_whitespace) || !domain.contains('.') {
            return Err(ProvisionError::InvalidConfig {
                field: "domain",
                reason: format!("'{}' is not a bare domain name", domain),
            });
        }

        Ok(DeployConfig {
            domain,
            repo_owner: required(self.repo_owner, "repo_owner")?,
            repo_name: required(self.repo_name, "repo_name")?,
            credential_ref: required(self.credential_ref, "credential_ref")?,
            branch: self.branch.unwrap_or_else(|| "main".to_string()),
            region: self.region.unwrap_or_else(|| "us-east-1".to_string()),
            cert_timeout_seconds: self.cert_timeout_seconds.unwrap_or(600),
            state_dir: self.state_dir,
        })
    }
}

/// Resolved deployment configuration
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub domain: String,
    pub repo_owner: String,
    pub repo_name: String,
    pub credential_ref: String,
    pub branch: String,
    pub region: String,
    pub cert_timeout_seconds: u64,
    pub state_dir: Option<PathBuf>,
}

impl DeployConfig {
    /// Load configuration: explicit file, or discovered sitewire.yaml,
    /// then environment overlay, then eager validation
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let raw = match explicit_path.map(PathBuf::from).or_else(find_config_file) {
            Some(path) => load_config_file(&path)?,
            None => RawConfig::default(),
        };

        let config = raw.overlay_env().resolve()?;
        Ok(config)
    }

    /// Re-check the invariants (cheap; used at orchestrator entry)
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.domain.trim().is_empty() {
            return Err(ProvisionError::MissingConfig { field: "domain" });
        }
        if self.credential_ref.trim().is_empty() {
            return Err(ProvisionError::MissingConfig {
                field: "credential_ref",
            });
        }
        Ok(())
    }

    /// The API subdomain, `api.<domain>`
    pub fn api_domain(&self) -> String {
        format!("api.{}", self.domain)
    }

    /// The pipeline name, `<domain>-deploy`
    pub fn pipeline_name(&self) -> String {
        format!("{}-deploy", self.domain)
    }

    /// Bounded wait for certificate validation
    pub fn cert_timeout(&self) -> Duration {
        Duration::from_secs(self.cert_timeout_seconds)
    }

    /// Base directory for the provisioning record
    pub fn state_base_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::core::StateStore::default_base_dir(),
        }
    }
}

/// Find sitewire.yaml by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join("sitewire.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<RawConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_raw() -> RawConfig {
        RawConfig {
            domain: Some("example.com".to_string()),
            repo_owner: Some("acme".to_string()),
            repo_name: Some("site".to_string()),
            credential_ref: Some("github-token".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let config = full_raw().resolve().unwrap();

        assert_eq!(config.branch, "main");
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.cert_timeout_seconds, 600);
        assert_eq!(config.api_domain(), "api.example.com");
        assert_eq!(config.pipeline_name(), "example.com-deploy");
    }

    #[test]
    fn test_each_missing_field_is_named() {
        let cases: [(&str, Box<dyn Fn(&mut RawConfig)>); 4] = [
            ("domain", Box::new(|r| r.domain = None)),
            ("repo_owner", Box::new(|r| r.repo_owner = None)),
            ("repo_name", Box::new(|r| r.repo_name = None)),
            ("credential_ref", Box::new(|r| r.credential_ref = None)),
        ];

        for (field, clear) in cases {
            let mut raw = full_raw();
            clear(&mut raw);
            match raw.resolve() {
                Err(ProvisionError::MissingConfig { field: named }) => assert_eq!(named, field),
                other => panic!("expected MissingConfig for {}, got {:?}", field, other),
            }
        }
    }

    #[test]
    fn test_empty_string_counts_as_missing() {
        let mut raw = full_raw();
        raw.repo_owner = Some("  ".to_string());

        assert!(matches!(
            raw.resolve(),
            Err(ProvisionError::MissingConfig {
                field: "repo_owner"
            })
        ));
    }

    #[test]
    fn test_domain_shape_is_checked() {
        let mut raw = full_raw();
        raw.domain = Some("https://example.com/path".to_string());

        assert!(matches!(
            raw.resolve(),
            Err(ProvisionError::InvalidConfig { field: "domain", .. })
        ));
    }

    #[test]
    fn test_config_file_parsing() {
        let yaml = r#"
domain: example.com
repo_owner: acme
repo_name: site
credential_ref: github-token
branch: develop
cert_timeout_seconds: 120
"#;
        let raw: RawConfig = serde_yaml::from_str(yaml).unwrap();
        let config = raw.resolve().unwrap();

        assert_eq!(config.branch, "develop");
        assert_eq!(config.cert_timeout_seconds, 120);
    }
}
