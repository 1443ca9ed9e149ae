use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::simulate_latency;
use crate::workflow::{DispatchInput, ReportOutput, StageContract, StageError};

/// Produces the situation report artifacts
#[derive(Debug, Clone, Default)]
pub struct ReportSynthesizer {
    latency: Duration,
}

impl ReportSynthesizer {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

fn executive_summary(input: &DispatchInput) -> String {
    let assessment = &input.assessment;
    let resources = match &input.allocation {
        Some(allocation) => format!("{} resources deployed", allocation.total_resources),
        None => "resource allocation unavailable".to_string(),
    };

    format!(
        "Severity {}/100 incident affecting an estimated {} people across {} impact zone(s); {}.",
        assessment.overall_severity,
        assessment.affected_population,
        assessment.clusters.len(),
        resources
    )
}

#[async_trait]
impl StageContract for ReportSynthesizer {
    type Input = DispatchInput;
    type Output = ReportOutput;

    async fn execute(&self, input: &DispatchInput) -> Result<ReportOutput, StageError> {
        simulate_latency(self.latency).await;

        let report_id = format!("report-{}", input.assessment.assessment_id);
        let artifacts = vec![
            format!("{report_id}_situation_report.pdf"),
            format!("{report_id}.geojson"),
            format!("{report_id}_data.csv"),
        ];
        debug!("Generated {} report artifacts for {}", artifacts.len(), report_id);

        Ok(ReportOutput {
            executive_summary: executive_summary(input),
            reports_count: artifacts.len() as u32,
            generated: true,
            report_id,
            artifacts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assessment_with_severity;
    use crate::workflow::AllocationOutput;

    #[tokio::test]
    async fn test_report_artifacts() {
        let input = DispatchInput {
            assessment: assessment_with_severity(72),
            allocation: None,
        };

        let report = ReportSynthesizer::default().execute(&input).await.unwrap();

        assert!(report.generated);
        assert_eq!(report.reports_count, 3);
        assert!(report.artifacts[0].ends_with("_situation_report.pdf"));
        assert!(report.executive_summary.contains("Severity 72/100"));
        assert!(report
            .executive_summary
            .contains("resource allocation unavailable"));
    }

    #[tokio::test]
    async fn test_summary_mentions_allocation() {
        let input = DispatchInput {
            assessment: assessment_with_severity(90),
            allocation: Some(AllocationOutput {
                allocation_id: "alloc-1".to_string(),
                allocations: vec![],
                total_resources: 20,
            }),
        };

        let report = ReportSynthesizer::default().execute(&input).await.unwrap();

        assert!(report.executive_summary.contains("20 resources deployed"));
    }
}
