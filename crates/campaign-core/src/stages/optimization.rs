//! Optimization stage: rule-based recommendations, optional auto-apply

use super::narrative::{Narrative, NarrativeWriter};
use crate::clients::{ToolGateway, ToolRequest};
use crate::constants::*;
use crate::error::Result;
use crate::workflow::{Stage, StageOutcome, StageSummary, WorkflowState};
use async_trait::async_trait;
use campaign_types::{
    CampaignData, OptimizationRecommendation, RecommendationStatus, RecommendationType, StageId,
};
use std::collections::BTreeMap;
use std::sync::Arc;

const OPTIMIZER_INSTRUCTIONS: &str = "You are an expert digital marketing optimizer. \
Summarize the proposed optimization recommendations for a campaign manager, \
in order of expected impact. Do not invent metrics that are not in the data.";

fn status_for(confidence: f64) -> RecommendationStatus {
    if confidence > APPROVAL_CONFIDENCE_THRESHOLD {
        RecommendationStatus::PendingApproval
    } else {
        RecommendationStatus::Proposed
    }
}

fn steps(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Apply the recommendation rules to one campaign
pub fn generate_recommendations(campaign: &CampaignData) -> Vec<OptimizationRecommendation> {
    let entity = &campaign.entity;
    let metrics = &campaign.metrics;
    let mut recommendations = Vec::new();

    let near_budget = campaign
        .spend_ratio()
        .map(|ratio| ratio > NEAR_BUDGET_RATIO)
        .unwrap_or(false);

    if metrics.roas > HIGH_ROAS_THRESHOLD && near_budget {
        let confidence = 0.85;
        recommendations.push(OptimizationRecommendation {
            campaign_id: entity.id.clone(),
            recommendation_type: RecommendationType::Budget,
            title: "Increase Budget for High-Performing Campaign".to_string(),
            description: format!(
                "Campaign '{}' has strong ROAS ({:.2}) and is near budget limit",
                entity.name, metrics.roas
            ),
            expected_impact: "20-30% increase in conversions".to_string(),
            confidence_score: confidence,
            implementation_steps: steps(&[
                "Increase daily budget by 25%",
                "Monitor performance for 3 days",
                "Adjust based on results",
            ]),
            estimated_results: BTreeMap::from([
                (
                    "additional_conversions".to_string(),
                    (metrics.conversions as f64 * 0.25).floor(),
                ),
                (
                    "estimated_additional_revenue".to_string(),
                    metrics.roas * entity.spend * 0.25,
                ),
            ]),
            status: status_for(confidence),
        });
    }

    if metrics.ctr < CREATIVE_CTR_THRESHOLD {
        let confidence = 0.75;
        recommendations.push(OptimizationRecommendation {
            campaign_id: entity.id.clone(),
            recommendation_type: RecommendationType::Creative,
            title: "Improve Ad Creative for Low CTR".to_string(),
            description: format!("Campaign '{}' has low CTR ({:.2}%)", entity.name, metrics.ctr),
            expected_impact: "40-60% CTR improvement".to_string(),
            confidence_score: confidence,
            implementation_steps: steps(&[
                "Test new ad headlines",
                "Update creative images/videos",
                "A/B test different call-to-actions",
                "Review targeting relevance",
            ]),
            estimated_results: BTreeMap::from([
                ("projected_ctr".to_string(), metrics.ctr * 1.5),
                (
                    "additional_clicks".to_string(),
                    (metrics.impressions as f64 * 0.005).floor(),
                ),
            ]),
            status: status_for(confidence),
        });
    }

    if metrics.conversion_rate < LANDING_PAGE_CONVERSION_THRESHOLD
        && metrics.ctr > HEALTHY_CTR_THRESHOLD
    {
        let confidence = 0.70;
        recommendations.push(OptimizationRecommendation {
            campaign_id: entity.id.clone(),
            recommendation_type: RecommendationType::Targeting,
            title: "Optimize Landing Page for Better Conversions".to_string(),
            description: format!(
                "Good CTR ({:.2}%) but low conversion rate ({:.2}%)",
                metrics.ctr, metrics.conversion_rate
            ),
            expected_impact: "25-40% conversion rate improvement".to_string(),
            confidence_score: confidence,
            implementation_steps: steps(&[
                "Analyze landing page user journey",
                "Optimize page load speed",
                "Test different form layouts",
                "Improve value proposition clarity",
            ]),
            estimated_results: BTreeMap::from([
                (
                    "projected_conversion_rate".to_string(),
                    metrics.conversion_rate * 1.3,
                ),
                (
                    "additional_conversions".to_string(),
                    (metrics.clicks as f64 * 0.01).floor(),
                ),
            ]),
            status: status_for(confidence),
        });
    }

    recommendations
}

pub struct OptimizationStage {
    narratives: Option<NarrativeWriter>,
    tool_gateway: Option<Arc<dyn ToolGateway>>,
    auto_apply: bool,
}

impl OptimizationStage {
    pub fn new() -> Self {
        Self {
            narratives: None,
            tool_gateway: None,
            auto_apply: false,
        }
    }

    pub fn with_narratives(mut self, writer: NarrativeWriter) -> Self {
        self.narratives = Some(writer);
        self
    }

    /// Send pending-approval recommendations to the gateway for application
    pub fn with_auto_apply(mut self, gateway: Arc<dyn ToolGateway>) -> Self {
        self.tool_gateway = Some(gateway);
        self.auto_apply = true;
        self
    }

    async fn apply_pending(&self, state: &mut WorkflowState) -> usize {
        let Some(gateway) = self.tool_gateway.as_ref().filter(|_| self.auto_apply) else {
            return 0;
        };

        let mut applied = 0;
        for index in 0..state.recommendations.len() {
            let rec = &state.recommendations[index];
            if rec.status != RecommendationStatus::PendingApproval {
                continue;
            }

            let request = ToolRequest::new(APPLY_RECOMMENDATION_OPERATION)
                .arg("recommendation_id", rec.recommendation_id())
                .arg("campaign_id", rec.campaign_id.as_str())
                .arg("recommendation_type", rec.recommendation_type.as_str())
                .arg("title", rec.title.as_str());
            let recommendation_id = rec.recommendation_id();

            match gateway.invoke(request).await {
                Ok(response) => {
                    state.recommendations[index].status = RecommendationStatus::Applied;
                    applied += 1;
                    state.log(
                        self.name(),
                        format!("Applied {}: {}", recommendation_id, response.as_text()),
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Workflow {}: failed to apply {}: {}",
                        state.workflow_id,
                        recommendation_id,
                        e
                    );
                    state.log(
                        self.name(),
                        format!("Failed to apply {}, left pending: {}", recommendation_id, e),
                    );
                }
            }
        }
        applied
    }
}

impl Default for OptimizationStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for OptimizationStage {
    fn id(&self) -> StageId {
        StageId::Optimization
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        state.log(self.name(), "Starting optimization analysis");

        if state.campaigns.is_empty() {
            state.log(self.name(), "No campaigns to optimize");
            return Ok(StageOutcome::skipped("No campaigns to optimize"));
        }

        let generated: Vec<OptimizationRecommendation> = state
            .campaigns
            .iter()
            .flat_map(generate_recommendations)
            .collect();
        for recommendation in generated {
            state.record_recommendation(recommendation);
        }

        let applied = self.apply_pending(state).await;

        if let (Some(writer), false) = (&self.narratives, state.recommendations.is_empty()) {
            let source_data = serde_json::to_string_pretty(&state.recommendations)?;
            let prompt = format!(
                "Summarize these optimization recommendations:\n\n{}\n\n\
                 Insights from analysis:\n{}",
                source_data,
                state.metadata.insight_narrative.as_deref().unwrap_or("none")
            );
            match writer.write(&prompt, OPTIMIZER_INSTRUCTIONS, &source_data).await {
                Narrative::Accepted { text, .. } => {
                    state.metadata.optimization_narrative = Some(text);
                }
                Narrative::Rejected { grade } => {
                    let message = format!("Optimization summary rejected: {}", grade.reason);
                    state.log(self.name(), message);
                }
                Narrative::Unavailable { error } => {
                    state.log(self.name(), format!("AI recommendation summary failed: {}", error));
                }
            }
        }

        let pending_approval = state
            .recommendations
            .iter()
            .filter(|r| r.status == RecommendationStatus::PendingApproval)
            .count();

        state.log(
            self.name(),
            format!("Generated {} recommendations", state.recommendations.len()),
        );

        Ok(StageOutcome::Completed(StageSummary::Optimization {
            recommendations_generated: state.recommendations.len(),
            pending_approval,
            applied,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::ToolResponse;
    use crate::error::CampaignError;
    use campaign_types::{CampaignEntity, CampaignId, MetricSnapshot, Priority};
    use std::sync::Mutex;

    fn campaign(budget: f64, spend: f64, metrics: MetricSnapshot) -> CampaignData {
        CampaignData::new(
            CampaignEntity {
                id: CampaignId::new("c-1"),
                name: "Summer".to_string(),
                platform: "facebook".to_string(),
                status: "active".to_string(),
                budget,
                spend,
            },
            metrics,
        )
    }

    fn kinds(recs: &[OptimizationRecommendation]) -> Vec<RecommendationType> {
        recs.iter().map(|r| r.recommendation_type).collect()
    }

    #[test]
    fn test_budget_recommendation() {
        let metrics = MetricSnapshot {
            roas: 4.0,
            ctr: 2.0,
            conversion_rate: 3.0,
            conversions: 100,
            ..MetricSnapshot::default()
        };
        let recs = generate_recommendations(&campaign(1000.0, 900.0, metrics));
        assert_eq!(kinds(&recs), vec![RecommendationType::Budget]);
        assert_eq!(recs[0].status, RecommendationStatus::PendingApproval);
        assert_eq!(recs[0].estimated_results["additional_conversions"], 25.0);
        assert_eq!(recs[0].estimated_results["estimated_additional_revenue"], 900.0);
    }

    #[test]
    fn test_creative_and_landing_page_rules() {
        let low_ctr = MetricSnapshot {
            ctr: 0.3,
            conversion_rate: 3.0,
            ..MetricSnapshot::default()
        };
        let recs = generate_recommendations(&campaign(1000.0, 100.0, low_ctr));
        assert_eq!(kinds(&recs), vec![RecommendationType::Creative]);
        assert_eq!(recs[0].status, RecommendationStatus::Proposed);

        let weak_funnel = MetricSnapshot {
            ctr: 2.0,
            conversion_rate: 1.5,
            ..MetricSnapshot::default()
        };
        let recs = generate_recommendations(&campaign(1000.0, 100.0, weak_funnel));
        assert_eq!(kinds(&recs), vec![RecommendationType::Targeting]);
    }

    struct RecordingGateway {
        fail: bool,
        calls: Mutex<Vec<ToolRequest>>,
    }

    #[async_trait]
    impl ToolGateway for RecordingGateway {
        async fn invoke(&self, request: ToolRequest) -> Result<ToolResponse> {
            self.calls.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(CampaignError::ToolGateway("unavailable".to_string()));
            }
            Ok(ToolResponse {
                operation: request.operation,
                payload: serde_json::Value::String("ok".to_string()),
            })
        }
    }

    fn budget_state() -> WorkflowState {
        let mut state = WorkflowState::new(CampaignId::new("c-1"), "test", Priority::High);
        state.upsert_campaign(campaign(
            1000.0,
            900.0,
            MetricSnapshot {
                roas: 4.0,
                ctr: 2.0,
                conversion_rate: 3.0,
                ..MetricSnapshot::default()
            },
        ));
        state
    }

    #[tokio::test]
    async fn test_auto_apply_marks_applied() {
        let gateway = Arc::new(RecordingGateway {
            fail: false,
            calls: Mutex::new(Vec::new()),
        });
        let stage = OptimizationStage::new().with_auto_apply(gateway.clone());
        let mut state = budget_state();

        let outcome = stage.execute(&mut state).await.unwrap();
        assert_eq!(
            outcome,
            StageOutcome::Completed(StageSummary::Optimization {
                recommendations_generated: 1,
                pending_approval: 0,
                applied: 1,
            })
        );
        assert_eq!(state.recommendations[0].status, RecommendationStatus::Applied);

        let calls = gateway.calls.lock().unwrap();
        assert_eq!(calls[0].operation, APPLY_RECOMMENDATION_OPERATION);
        assert_eq!(calls[0].arguments["recommendation_id"], "rec_c-1_budget");
    }

    #[tokio::test]
    async fn test_failed_apply_stays_pending() {
        let gateway = Arc::new(RecordingGateway {
            fail: true,
            calls: Mutex::new(Vec::new()),
        });
        let stage = OptimizationStage::new().with_auto_apply(gateway);
        let mut state = budget_state();

        stage.execute(&mut state).await.unwrap();
        assert_eq!(state.recommendations[0].status, RecommendationStatus::PendingApproval);
    }

    #[tokio::test]
    async fn test_rerun_does_not_duplicate() {
        let stage = OptimizationStage::new();
        let mut state = budget_state();
        stage.execute(&mut state).await.unwrap();
        stage.execute(&mut state).await.unwrap();
        assert_eq!(state.recommendations.len(), 1);
    }
}
