//! Explicit dependency graph over the provisioning steps.
//!
//! Nodes are provisioning declarations, edges are "requires output
//! of". A topological evaluator turns the graph into ordered waves of
//! mutually independent steps, which is what lets the delivery and
//! API branches apply concurrently.

use serde::{Deserialize, Serialize};

use crate::domain::deployment::{
    STEP_API, STEP_API_CERT, STEP_APEX_CERT, STEP_DELIVERY, STEP_OUTPUTS, STEP_PIPELINE, STEP_ZONE,
};
use crate::domain::ProvisionError;

/// The provisioning steps, one owning provisioner per resource group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    /// Hosted zone for the root domain
    Zone,

    /// Apex certificate request + validation wait
    ApexCert,

    /// API subdomain certificate request + validation wait
    ApiCert,

    /// Bucket, distribution and apex alias record
    Delivery,

    /// Handler, gateway and subdomain alias record
    Api,

    /// Two-stage pipeline with grants and injected parameters
    Pipeline,

    /// The published OutputSet
    Outputs,
}

impl StepId {
    /// All steps, in declaration order
    pub const ALL: [StepId; 7] = [
        StepId::Zone,
        StepId::ApexCert,
        StepId::ApiCert,
        StepId::Delivery,
        StepId::Api,
        StepId::Pipeline,
        StepId::Outputs,
    ];

    /// Step name as recorded in events and fingerprints
    pub fn as_str(&self) -> &'static str {
        match self {
            StepId::Zone => STEP_ZONE,
            StepId::ApexCert => STEP_APEX_CERT,
            StepId::ApiCert => STEP_API_CERT,
            StepId::Delivery => STEP_DELIVERY,
            StepId::Api => STEP_API,
            StepId::Pipeline => STEP_PIPELINE,
            StepId::Outputs => STEP_OUTPUTS,
        }
    }

    /// Steps whose outputs this step consumes
    pub fn requires(&self) -> &'static [StepId] {
        match self {
            StepId::Zone => &[],
            StepId::ApexCert => &[StepId::Zone],
            StepId::ApiCert => &[StepId::Zone],
            // Each branch needs its own certificate plus the zone for
            // its alias record
            StepId::Delivery => &[StepId::Zone, StepId::ApexCert],
            StepId::Api => &[StepId::Zone, StepId::ApiCert],
            // The pipeline consumes concrete identifiers from both
            // branches
            StepId::Pipeline => &[StepId::Delivery, StepId::Api],
            StepId::Outputs => &[StepId::Delivery, StepId::Api, StepId::Pipeline],
        }
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the topological evaluation order as waves.
///
/// Every step in a wave depends only on steps in earlier waves, so
/// steps within one wave may be applied concurrently. Returns a
/// `DependencyOrder` error if the step table ever declares a cycle.
pub fn evaluation_waves() -> Result<Vec<Vec<StepId>>, ProvisionError> {
    let mut remaining: Vec<StepId> = StepId::ALL.to_vec();
    let mut resolved: Vec<StepId> = Vec::new();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let ready: Vec<StepId> = remaining
            .iter()
            .copied()
            .filter(|step| step.requires().iter().all(|dep| resolved.contains(dep)))
            .collect();

        if ready.is_empty() {
            // Nothing became ready: a cycle among the remaining steps
            let stuck = remaining[0];
            return Err(ProvisionError::DependencyOrder {
                step: stuck.as_str().to_string(),
                requires: stuck
                    .requires()
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(","),
            });
        }

        remaining.retain(|step| !ready.contains(step));
        resolved.extend(&ready);
        waves.push(ready);
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waves_follow_the_partial_order() {
        let waves = evaluation_waves().unwrap();

        assert_eq!(waves[0], vec![StepId::Zone]);
        assert_eq!(waves[1], vec![StepId::ApexCert, StepId::ApiCert]);
        assert_eq!(waves[2], vec![StepId::Delivery, StepId::Api]);
        assert_eq!(waves[3], vec![StepId::Pipeline]);
        assert_eq!(waves[4], vec![StepId::Outputs]);
    }

    #[test]
    fn test_every_step_appears_exactly_once() {
        let waves = evaluation_waves().unwrap();
        let flattened: Vec<StepId> = waves.into_iter().flatten().collect();

        assert_eq!(flattened.len(), StepId::ALL.len());
        for step in StepId::ALL {
            assert_eq!(flattened.iter().filter(|s| **s == step).count(), 1);
        }
    }

    #[test]
    fn test_dependencies_resolve_before_dependents() {
        let waves = evaluation_waves().unwrap();
        let position = |step: StepId| {
            waves
                .iter()
                .position(|wave| wave.contains(&step))
                .unwrap()
        };

        for step in StepId::ALL {
            for dep in step.requires() {
                assert!(
                    position(*dep) < position(step),
                    "{dep} must resolve before {step}"
                );
            }
        }
    }

    #[test]
    fn test_branches_are_parallel() {
        let waves = evaluation_waves().unwrap();
        let wave = waves
            .iter()
            .find(|wave| wave.contains(&StepId::Delivery))
            .unwrap();
        assert!(wave.contains(&StepId::Api));
    }
}
