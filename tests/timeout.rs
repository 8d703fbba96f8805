//! Certificate-validation timeout integration tests.
//!
//! A validation that never completes within the window fails the
//! whole run; independent resources created earlier persist and are
//! reused when the operator re-applies.

use std::path::Path;
use std::time::Duration;

use sitewire::core::load_status;
use sitewire::{DeployConfig, DeployState, MemoryProvider, ProvisionError, Provisioner};
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

#[tokio::test]
async fn test_validation_timeout_fails_the_run() {
    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1")
        .with_validation_delay(Duration::from_secs(3600));

    let err = Provisioner::new(provider.clone(), test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .err()
        .expect("validation timeout must abort the run");

    let provision = err.downcast_ref::<ProvisionError>().unwrap();
    assert!(matches!(
        provision,
        ProvisionError::ValidationTimeout {
            waited_seconds: 600,
            ..
        }
    ));

    // The zone was created; nothing downstream of the certificates was
    assert_eq!(provider.call_count("ensure_zone"), 1);
    assert_eq!(provider.call_count("ensure_distribution"), 0);
    assert_eq!(provider.call_count("ensure_rest_api"), 0);
    assert_eq!(provider.call_count("ensure_pipeline"), 0);
}

#[tokio::test]
async fn test_failed_run_is_recorded_as_terminal() {
    let temp = TempDir::new().unwrap();
    let provider = MemoryProvider::new("us-east-1")
        .with_validation_delay(Duration::from_secs(3600));

    let _ = Provisioner::new(provider, test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await;

    let deployment = load_status(temp.path(), "example.com")
        .await
        .unwrap()
        .expect("failed run must leave a record");

    assert!(matches!(deployment.state, DeployState::Failed { .. }));
    assert!(deployment.is_step_done("zone"));
    assert!(!deployment.is_step_done("delivery"));
}

#[tokio::test]
async fn test_rerun_after_timeout_converges_and_reuses_the_zone() {
    let temp = TempDir::new().unwrap();

    let broken = MemoryProvider::new("us-east-1")
        .with_validation_delay(Duration::from_secs(3600));
    let _ = Provisioner::new(broken, test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await;

    // Operator re-applies once the validation path is healthy
    let healthy = MemoryProvider::new("us-east-1");
    let outputs = Provisioner::new(healthy.clone(), test_config(temp.path()))
        .await
        .unwrap()
        .apply()
        .await
        .unwrap();

    // The zone step's fingerprint matched, so the healthy provider was
    // never asked to create it again
    assert_eq!(healthy.call_count("ensure_zone"), 0);
    assert_eq!(healthy.call_count("ensure_distribution"), 1);
    assert_eq!(outputs.pipeline, "example.com-deploy");

    let deployment = load_status(temp.path(), "example.com")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(deployment.state, DeployState::OutputsPublished);
}
