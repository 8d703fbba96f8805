//! Dependency-ordering and parameter-propagation integration tests.
//!
//! The orchestrator must never wire a consumer to a not-yet-ready
//! producer, and every injected pipeline parameter must equal the
//! identifier actually provisioned in the same run.

use std::path::Path;

use sitewire::{DeployConfig, MemoryProvider, ProvisionError, Provisioner};
use tempfile::TempDir;

fn test_config(state_dir: &Path) -> DeployConfig {
    DeployConfig {
        domain: "example.com".to_string(),
        repo_owner: "acme".to_string(),
        repo_name: "site".to_string(),
        credential_ref: "github-token".to_string(),
        branch: "main".to_string(),
        region: "us-east-1".to_string(),
        cert_timeout_seconds: 600,
        state_dir: Some(state_dir.to_path_buf()),
    }
}

fn position(calls: &[String], prefix: &str) -> usize {
    calls
        .iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("no call starting with '{}'", prefix))
}

#[tokio::test]
async fn test_provider_calls_respect_the_partial_order() {
    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1");

    Provisioner::new(provider.clone(), test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .unwrap();

    let calls = provider.calls();

    // Zone before everything
    assert_eq!(position(&calls, "ensure_zone"), 0);

    // Certificates validate before either branch starts
    let branches_start = position(&calls, "ensure_bucket").min(position(&calls, "ensure_function"));
    assert!(position(&calls, "await_validation:example.com") < branches_start);
    assert!(position(&calls, "await_validation:api.example.com") < branches_start);

    // Each alias record follows its target
    assert!(position(&calls, "ensure_distribution") < position(&calls, "upsert_alias:example.com"));
    assert!(position(&calls, "ensure_rest_api") < position(&calls, "upsert_alias:api.example.com"));

    // Grants precede the pipeline declaration, which comes last
    // before outputs
    assert!(position(&calls, "grant:") < position(&calls, "ensure_pipeline"));
    assert!(position(&calls, "ensure_distribution") < position(&calls, "ensure_pipeline"));
    assert!(position(&calls, "ensure_rest_api") < position(&calls, "ensure_pipeline"));
}

#[tokio::test]
async fn test_grants_reference_same_run_identifiers() {
    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1");

    let outputs = Provisioner::new(provider.clone(), test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .unwrap();

    let calls = provider.calls();

    // The invalidation grant names exactly the distribution created
    // in this run, never a wildcard
    let invalidation = calls
        .iter()
        .find(|c| c.starts_with("grant:invalidation"))
        .expect("invalidation grant missing");
    assert!(invalidation.ends_with(&format!("distribution/{}", outputs.distribution_id)));
    assert!(!invalidation.contains('*'));

    // The bucket grant names exactly the bucket created in this run
    let bucket_grant = calls
        .iter()
        .find(|c| c.starts_with("grant:read/write"))
        .expect("bucket grant missing");
    assert!(bucket_grant.contains(&outputs.bucket));
}

#[tokio::test]
async fn test_both_public_domains_get_one_record_each() {
    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1");

    Provisioner::new(provider.clone(), test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .unwrap();

    assert_eq!(provider.call_count("upsert_alias:example.com"), 1);
    assert_eq!(provider.call_count("upsert_alias:api.example.com"), 1);
    assert_eq!(provider.call_count("upsert_alias"), 2);
}

#[tokio::test]
async fn test_grant_failure_leaves_pipeline_undeclared() {
    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1").with_grant_failure();

    let err = Provisioner::new(provider.clone(), test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .err()
        .expect("grant failure must abort the run");

    let provision = err.downcast_ref::<ProvisionError>().unwrap();
    assert!(matches!(provision, ProvisionError::PermissionGrant { .. }));

    // The pipeline is not usable until the grant is corrected
    assert_eq!(provider.call_count("ensure_pipeline"), 0);
}

#[tokio::test]
async fn test_status_reaches_outputs_published() {
    use sitewire::core::load_status;
    use sitewire::DeployState;

    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1");

    Provisioner::new(provider, test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .unwrap();

    let deployment = load_status(temp.path(), "example.com")
        .await
        .unwrap()
        .expect("deployment record must exist");

    assert_eq!(deployment.state, DeployState::OutputsPublished);
    assert!(deployment.is_published());
}
