//! Analysis stage: portfolio trend statistics and an optional narrative

use super::narrative::{Narrative, NarrativeWriter};
use crate::error::Result;
use crate::workflow::{Stage, StageOutcome, StageSummary, WorkflowState};
use async_trait::async_trait;
use campaign_types::{CampaignData, StageId};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

const ANALYST_INSTRUCTIONS: &str =
    "You are a digital marketing expert analyzing campaign performance data. \
     Provide insights, identify patterns, and suggest optimizations based on the \
     campaign data provided. Focus on actionable insights and specific recommendations.";

/// Per-platform averages
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformStats {
    pub campaign_count: usize,
    pub avg_ctr: f64,
    pub avg_cpc: f64,
    pub avg_conversion_rate: f64,
}

/// Portfolio statistics across the fetched campaigns
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrendAnalysis {
    pub total_spend: f64,
    pub total_impressions: u64,
    pub total_clicks: u64,
    pub total_conversions: u64,
    pub average_cpm: f64,
    pub average_ctr: f64,
    pub average_conversion_rate: f64,
    /// ROAS weighted by spend, zero when nothing was spent
    pub weighted_roas: f64,
    pub platform_comparison: BTreeMap<String, PlatformStats>,
    /// Audience-level observations. Empty until an audience source exists.
    pub audience_insights: Vec<String>,
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

pub fn analyze_trends(campaigns: &[CampaignData]) -> TrendAnalysis {
    if campaigns.is_empty() {
        return TrendAnalysis::default();
    }

    let total_spend: f64 = campaigns.iter().map(|c| c.entity.spend).sum();
    let weighted_roas = if total_spend > 0.0 {
        campaigns
            .iter()
            .map(|c| c.metrics.roas * c.entity.spend)
            .sum::<f64>()
            / total_spend
    } else {
        0.0
    };

    let mut by_platform: BTreeMap<String, Vec<&CampaignData>> = BTreeMap::new();
    for campaign in campaigns {
        by_platform
            .entry(campaign.entity.platform.to_lowercase())
            .or_default()
            .push(campaign);
    }
    let platform_comparison = by_platform
        .into_iter()
        .map(|(platform, group)| {
            let stats = PlatformStats {
                campaign_count: group.len(),
                avg_ctr: mean(group.iter().map(|c| c.metrics.ctr)),
                avg_cpc: mean(group.iter().map(|c| c.metrics.cpc)),
                avg_conversion_rate: mean(group.iter().map(|c| c.metrics.conversion_rate)),
            };
            (platform, stats)
        })
        .collect();

    TrendAnalysis {
        total_spend,
        total_impressions: campaigns.iter().map(|c| c.metrics.impressions).sum(),
        total_clicks: campaigns.iter().map(|c| c.metrics.clicks).sum(),
        total_conversions: campaigns.iter().map(|c| c.metrics.conversions).sum(),
        average_cpm: mean(campaigns.iter().map(|c| c.metrics.cpm)),
        average_ctr: mean(campaigns.iter().map(|c| c.metrics.ctr)),
        average_conversion_rate: mean(campaigns.iter().map(|c| c.metrics.conversion_rate)),
        weighted_roas,
        platform_comparison,
        audience_insights: Vec::new(),
    }
}

pub struct AnalysisStage {
    narratives: Option<NarrativeWriter>,
}

impl AnalysisStage {
    pub fn new() -> Self {
        Self { narratives: None }
    }

    pub fn with_narratives(mut self, writer: NarrativeWriter) -> Self {
        self.narratives = Some(writer);
        self
    }

    fn campaign_summary(campaigns: &[CampaignData]) -> serde_json::Value {
        campaigns
            .iter()
            .map(|c| {
                json!({
                    "name": c.entity.name,
                    "platform": c.entity.platform,
                    "ctr": c.metrics.ctr,
                    "cpc": c.metrics.cpc,
                    "conversion_rate": c.metrics.conversion_rate,
                    "roas": c.metrics.roas,
                    "spend": c.entity.spend,
                    "budget_utilization": c.budget_utilization(),
                })
            })
            .collect()
    }
}

impl Default for AnalysisStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for AnalysisStage {
    fn id(&self) -> StageId {
        StageId::Analysis
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        state.log(self.name(), "Starting data analysis");

        if state.campaigns.is_empty() {
            state.log(self.name(), "No campaigns to analyze");
            return Ok(StageOutcome::skipped("No campaigns to analyze"));
        }

        let trends = analyze_trends(&state.campaigns);
        let platforms_compared = trends.platform_comparison.len();

        let mut narrative_generated = false;
        if let Some(writer) = &self.narratives {
            let source_data = serde_json::to_string_pretty(&json!({
                "campaigns": Self::campaign_summary(&state.campaigns),
                "trend_analysis": trends,
            }))?;
            let prompt = format!(
                "Analyze the following campaign data and provide insights:\n\n{}\n\n\
                 Please provide:\n1. Key performance insights\n2. Identified patterns or trends\n\
                 3. Potential issues or opportunities\n\
                 4. Specific recommendations for optimization",
                source_data
            );

            match writer.write(&prompt, ANALYST_INSTRUCTIONS, &source_data).await {
                Narrative::Accepted { text, grade } => {
                    state.metadata.insight_narrative = Some(text);
                    state.metadata.narrative_grade = grade;
                    narrative_generated = true;
                }
                Narrative::Rejected { grade } => {
                    log::warn!(
                        "Workflow {}: insight narrative rejected by grader ({})",
                        state.workflow_id,
                        grade.reason
                    );
                    state.log(self.name(), format!("AI analysis rejected: {}", grade.reason));
                    state.metadata.narrative_grade = Some(grade);
                }
                Narrative::Unavailable { error } => {
                    log::warn!("Workflow {}: AI analysis failed: {}", state.workflow_id, error);
                    state.log(self.name(), format!("AI analysis failed: {}", error));
                }
            }
        }

        state.metadata.trend_analysis = Some(trends);
        state.log(self.name(), "Data analysis completed");

        Ok(StageOutcome::Completed(StageSummary::Analysis {
            campaigns_analyzed: state.campaigns.len(),
            platforms_compared,
            narrative_generated,
        }))
    }
}
