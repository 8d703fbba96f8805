//! Provisioning error taxonomy.
//!
//! Every failure class the orchestrator distinguishes gets its own
//! variant, so callers (and tests) can tell a configuration problem
//! apart from a validation timeout or a rejected permission grant.

use thiserror::Error;

/// Errors that abort a provisioning run
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// A required configuration field was not supplied by any source
    #[error("Missing required configuration field '{field}'")]
    MissingConfig { field: &'static str },

    /// A configuration field was supplied but is unusable
    #[error("Invalid configuration field '{field}': {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    /// A certificate did not reach the validated state within the window
    #[error("Certificate for '{domain}' failed to validate within {waited_seconds}s")]
    ValidationTimeout { domain: String, waited_seconds: u64 },

    /// A step was asked to run before one of its dependencies resolved.
    /// The graph evaluator prevents this structurally; seeing it at
    /// runtime means the step table itself is wrong.
    #[error("Step '{step}' evaluated before dependency '{requires}'")]
    DependencyOrder { step: String, requires: String },

    /// The build role could not be granted a required permission
    #[error("Permission grant failed for '{grant}': {reason}")]
    PermissionGrant { grant: String, reason: String },

    /// The control plane rejected a resource declaration outright
    /// (e.g. certificate/domain mismatch). Not retried.
    #[error("Step '{step}' rejected by the control plane: {reason}")]
    Rejected { step: String, reason: String },
}
