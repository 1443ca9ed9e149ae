use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use super::simulate_latency;
use crate::workflow::{CommunicationOutput, DispatchInput, StageContract, StageError};

/// Each alert is sent in this many languages
const LANGUAGE_VARIANTS: u64 = 3;

struct Channel {
    name: &'static str,
    /// Delivered messages per thousand sent
    success_per_mille: u64,
    base_reach: u64,
}

const SMS: Channel = Channel {
    name: "sms",
    success_per_mille: 950,
    base_reach: 500,
};
const PUSH: Channel = Channel {
    name: "push_notification",
    success_per_mille: 880,
    base_reach: 1_500,
};
const SOCIAL: Channel = Channel {
    name: "social_media",
    success_per_mille: 990,
    base_reach: 5_000,
};
const BROADCAST: Channel = Channel {
    name: "emergency_broadcast",
    success_per_mille: 1_000,
    base_reach: 10_000,
};

const CRITICAL_CHANNELS: &[Channel] = &[SMS, PUSH, SOCIAL, BROADCAST];
const HIGH_CHANNELS: &[Channel] = &[SMS, PUSH, SOCIAL];
const MEDIUM_CHANNELS: &[Channel] = &[PUSH, SOCIAL];

fn plan(severity: u8) -> (&'static str, &'static [Channel]) {
    match severity {
        80.. => ("CRITICAL", CRITICAL_CHANNELS),
        60..=79 => ("HIGH", HIGH_CHANNELS),
        _ => ("MEDIUM", MEDIUM_CHANNELS),
    }
}

/// Sends multilingual alerts over severity-dependent channels
#[derive(Debug, Clone, Default)]
pub struct AlertDispatcher {
    latency: Duration,
}

impl AlertDispatcher {
    pub fn new(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl StageContract for AlertDispatcher {
    type Input = DispatchInput;
    type Output = CommunicationOutput;

    async fn execute(&self, input: &DispatchInput) -> Result<CommunicationOutput, StageError> {
        let severity = input.assessment.overall_severity;
        let (alert_level, channels) = plan(severity);

        simulate_latency(self.latency).await;

        // Reach scales linearly with severity and saturates at double
        let scale = u64::from(severity.min(100));
        let alerts_sent = channels
            .iter()
            .map(|channel| {
                let reach = channel.base_reach * scale / 50;
                LANGUAGE_VARIANTS * reach * channel.success_per_mille / 1_000
            })
            .sum();
        let delivery_rate = channels.iter().map(|c| c.success_per_mille).sum::<u64>() as f64
            / (channels.len() as u64 * 1_000) as f64;

        debug!(
            "Dispatched {} {} alerts over {} channels",
            alerts_sent,
            alert_level,
            channels.len()
        );

        Ok(CommunicationOutput {
            alerts_sent,
            delivery_rate,
            alert_level: alert_level.to_string(),
            channels: channels.iter().map(|c| c.name.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::assessment_with_severity;

    fn dispatch(severity: u8) -> DispatchInput {
        DispatchInput {
            assessment: assessment_with_severity(severity),
            allocation: None,
        }
    }

    #[tokio::test]
    async fn test_critical_uses_every_channel() {
        let output = AlertDispatcher::default()
            .execute(&dispatch(100))
            .await
            .unwrap();

        assert_eq!(output.alert_level, "CRITICAL");
        assert_eq!(output.channels.len(), 4);
        // 2850 + 7920 + 29700 + 60000
        assert_eq!(output.alerts_sent, 100_470);
        assert!((output.delivery_rate - 0.955).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_medium_severity_channels() {
        let output = AlertDispatcher::default()
            .execute(&dispatch(50))
            .await
            .unwrap();

        assert_eq!(output.alert_level, "MEDIUM");
        assert_eq!(
            output.channels,
            vec!["push_notification".to_string(), "social_media".to_string()]
        );
        // 3960 + 14850
        assert_eq!(output.alerts_sent, 18_810);
    }
}
