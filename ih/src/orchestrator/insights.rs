//! Cross-module summary attached to every aggregated response

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::job::{ModuleStatus, ResponderStatus};

const MAX_INSIGHTS: usize = 5;
const HIGH_CONSENSUS_THRESHOLD: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusLevel {
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoreSummary {
    /// Responders that returned a result
    pub modules_engaged: usize,
    /// Mean of the numeric `confidence` fields, rounded to 2 decimals
    pub average_confidence: f64,
    /// Distinct `key_insights` strings in responder order
    pub synthesized_insights: Vec<String>,
    pub consensus_level: ConsensusLevel,
}

impl CoreSummary {
    pub fn synthesize(responses: &[ModuleStatus]) -> Self {
        let mut engaged = 0;
        let mut confidences = Vec::new();
        let mut seen = HashSet::new();
        let mut insights = Vec::new();

        for response in responses {
            let ResponderStatus::Ok { result } = &response.status else {
                continue;
            };
            engaged += 1;
            if let Some(confidence) = result.get("confidence").and_then(Value::as_f64) {
                confidences.push(confidence);
            }
            let key_insights = result.get("key_insights").and_then(Value::as_array);
            for insight in key_insights.into_iter().flatten().filter_map(Value::as_str) {
                if seen.insert(insight.to_string()) {
                    insights.push(insight.to_string());
                }
            }
        }

        let average = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };
        insights.truncate(MAX_INSIGHTS);

        Self {
            modules_engaged: engaged,
            average_confidence: (average * 100.0).round() / 100.0,
            synthesized_insights: insights,
            consensus_level: if average > HIGH_CONSENSUS_THRESHOLD {
                ConsensusLevel::High
            } else {
                ConsensusLevel::Medium
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModuleId;
    use serde_json::json;

    fn status(id: &str, status: ResponderStatus) -> ModuleStatus {
        ModuleStatus {
            module_id: ModuleId::from(id),
            module_name: id.to_string(),
            status,
        }
    }

    #[test]
    fn test_synthesize_mixed_outcomes() {
        let responses = vec![
            status(
                "a",
                ResponderStatus::Ok {
                    result: json!({"confidence": 0.9, "key_insights": ["x", "y"]}),
                },
            ),
            status(
                "b",
                ResponderStatus::Ok {
                    result: json!({"confidence": 0.6, "key_insights": ["y", "z"]}),
                },
            ),
            status("c", ResponderStatus::Error { error: "boom".to_string() }),
            status("d", ResponderStatus::TimedOut),
        ];
        let summary = CoreSummary::synthesize(&responses);
        assert_eq!(summary.modules_engaged, 2);
        assert_eq!(summary.average_confidence, 0.75);
        assert_eq!(summary.synthesized_insights, vec!["x", "y", "z"]);
        assert_eq!(summary.consensus_level, ConsensusLevel::High);
    }

    #[test]
    fn test_synthesize_caps_insights() {
        let many: Vec<String> = (0..8).map(|i| format!("insight {}", i)).collect();
        let responses = vec![status("a", ResponderStatus::Ok { result: json!({"key_insights": many}) })];
        let summary = CoreSummary::synthesize(&responses);
        assert_eq!(summary.synthesized_insights.len(), 5);
        assert_eq!(summary.synthesized_insights[0], "insight 0");
    }

    #[test]
    fn test_no_confidence_is_medium() {
        let summary = CoreSummary::synthesize(&[status("a", ResponderStatus::TimedOut)]);
        assert_eq!(summary.modules_engaged, 0);
        assert_eq!(summary.average_confidence, 0.0);
        assert_eq!(summary.consensus_level, ConsensusLevel::Medium);
    }
}
