use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{priority_for, simulate_latency};
use crate::error::{Error, Result};
use crate::workflow::{
    AllocationOutput, AssessmentOutput, ResourceAllocation, StageContract, StageError,
};

/// Resources dispatched once the assessed severity reaches `min_severity`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationTier {
    pub min_severity: u8,
    /// Units per resource type for the first cluster; each further cluster
    /// gets one fewer, never below one
    pub base_quantity: u32,
    pub resources: Vec<String>,
}

impl AllocationTier {
    fn new(min_severity: u8, base_quantity: u32, resources: &[&str]) -> Self {
        Self {
            min_severity,
            base_quantity,
            resources: resources.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Severity-scaled resource table used by [`ResourceAllocator`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationPolicy {
    pub tiers: Vec<AllocationTier>,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                AllocationTier::new(
                    80,
                    5,
                    &["ambulance", "fire_truck", "rescue_helicopter", "mobile_hospital"],
                ),
                AllocationTier::new(60, 3, &["ambulance", "fire_truck", "rescue_team"]),
                AllocationTier::new(0, 2, &["ambulance", "rescue_team"]),
            ],
        }
    }
}

impl AllocationPolicy {
    /// Highest tier whose threshold the severity reaches
    pub fn tier_for(&self, severity: u8) -> Option<&AllocationTier> {
        self.tiers
            .iter()
            .filter(|tier| severity >= tier.min_severity)
            .max_by_key(|tier| tier.min_severity)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tiers.is_empty() {
            return Err(Error::InvalidConfig(
                "allocation policy needs at least one tier".to_string(),
            ));
        }
        for tier in &self.tiers {
            if tier.resources.is_empty() || tier.base_quantity == 0 {
                return Err(Error::InvalidConfig(format!(
                    "allocation tier at severity {} must list resources with a positive base quantity",
                    tier.min_severity
                )));
            }
        }
        Ok(())
    }
}

/// Assigns resources to each impact cluster
#[derive(Debug, Clone, Default)]
pub struct ResourceAllocator {
    policy: AllocationPolicy,
    latency: Duration,
}

impl ResourceAllocator {
    pub fn new(policy: AllocationPolicy, latency: Duration) -> Self {
        Self { policy, latency }
    }
}

#[async_trait]
impl StageContract for ResourceAllocator {
    type Input = AssessmentOutput;
    type Output = AllocationOutput;

    async fn execute(
        &self,
        assessment: &AssessmentOutput,
    ) -> std::result::Result<AllocationOutput, StageError> {
        if assessment.clusters.is_empty() {
            return Err(StageError::invalid_input(format!(
                "assessment {} has no impact clusters",
                assessment.assessment_id
            )));
        }

        let tier = self
            .policy
            .tier_for(assessment.overall_severity)
            .ok_or_else(|| {
                StageError::invalid_input(format!(
                    "no allocation tier covers severity {}",
                    assessment.overall_severity
                ))
            })?;

        simulate_latency(self.latency).await;

        let allocations: Vec<ResourceAllocation> = assessment
            .clusters
            .iter()
            .enumerate()
            .flat_map(|(i, cluster)| {
                let quantity = tier.base_quantity.saturating_sub(i as u32).max(1);
                tier.resources.iter().map(move |resource| ResourceAllocation {
                    resource_type: resource.clone(),
                    quantity,
                    target: cluster.center,
                    priority: priority_for(cluster.severity).to_string(),
                })
            })
            .collect();

        let total_resources = allocations.iter().map(|a| a.quantity).sum();
        debug!(
            "Allocated {} resources across {} clusters",
            total_resources,
            assessment.clusters.len()
        );

        Ok(AllocationOutput {
            allocation_id: format!("alloc-{}", assessment.assessment_id),
            allocations,
            total_resources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assessment_with_severity;
    use crate::workflow::ErrorKind;

    #[test]
    fn test_tier_selection() {
        let policy = AllocationPolicy::default();
        assert_eq!(policy.tier_for(95).map(|t| t.base_quantity), Some(5));
        assert_eq!(policy.tier_for(80).map(|t| t.base_quantity), Some(5));
        assert_eq!(policy.tier_for(65).map(|t| t.base_quantity), Some(3));
        assert_eq!(policy.tier_for(10).map(|t| t.base_quantity), Some(2));
    }

    #[test]
    fn test_policy_validation() {
        assert!(AllocationPolicy::default().validate().is_ok());
        assert!(AllocationPolicy { tiers: vec![] }.validate().is_err());
    }

    #[tokio::test]
    async fn test_high_severity_allocation() {
        let assessment = assessment_with_severity(85);

        let output = ResourceAllocator::default()
            .execute(&assessment)
            .await
            .unwrap();

        assert_eq!(output.allocations.len(), 4);
        assert!(output.allocations.iter().all(|a| a.quantity == 5));
        assert!(output.allocations.iter().all(|a| a.priority == "CRITICAL"));
        assert_eq!(output.total_resources, 20);
    }

    #[tokio::test]
    async fn test_secondary_clusters_get_fewer_units() {
        let mut assessment = assessment_with_severity(70);
        let mut second = assessment.clusters[0].clone();
        second.cluster_id = "cluster_2".to_string();
        second.severity = 45;
        assessment.clusters.push(second);

        let output = ResourceAllocator::default()
            .execute(&assessment)
            .await
            .unwrap();

        assert_eq!(output.allocations.len(), 6);
        assert_eq!(output.allocations[0].quantity, 3);
        assert_eq!(output.allocations[3].quantity, 2);
        assert_eq!(output.allocations[3].priority, "MEDIUM");
        assert_eq!(output.total_resources, 15);
    }

    #[tokio::test]
    async fn test_uncovered_severity_is_invalid() {
        let policy = AllocationPolicy {
            tiers: vec![AllocationTier::new(50, 1, &["ambulance"])],
        };
        let allocator = ResourceAllocator::new(policy, Duration::ZERO);

        let err = allocator
            .execute(&assessment_with_severity(20))
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidInput);
    }
}
