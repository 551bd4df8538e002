//! Monitor stage: fetch the campaign, derive metrics, raise alerts

use crate::clients::CampaignDataSource;
use crate::constants::*;
use crate::error::Result;
use crate::workflow::{Stage, StageOutcome, StageSummary, WorkflowState};
use async_trait::async_trait;
use campaign_types::{
    AlertData, AlertType, CampaignData, CampaignMetrics, EfficiencyRating, MetricSnapshot,
    Priority, StageId,
};
use chrono::Utc;
use std::sync::Arc;

pub struct MonitorStage {
    data_source: Arc<dyn CampaignDataSource>,
}

impl MonitorStage {
    pub fn new(data_source: Arc<dyn CampaignDataSource>) -> Self {
        Self { data_source }
    }
}

/// Weighted blend of normalized CTR, conversion rate and ROAS, in [0, 100]
pub fn performance_score(metrics: &MetricSnapshot) -> f64 {
    let ctr_score = (metrics.ctr * 20.0).min(100.0);
    let conversion_score = (metrics.conversion_rate * 25.0).min(100.0);
    let roas_score = if metrics.roas > 0.0 {
        (metrics.roas * 10.0).min(100.0)
    } else {
        0.0
    };

    (ctr_score * 0.3 + conversion_score * 0.4 + roas_score * 0.3).max(0.0)
}

pub fn campaign_metrics(metrics: &MetricSnapshot) -> CampaignMetrics {
    let score = performance_score(metrics);
    CampaignMetrics {
        performance_score: score,
        efficiency_rating: EfficiencyRating::from_score(score),
        optimization_potential: (100.0 - score).max(0.0),
        last_updated: Utc::now(),
    }
}

/// Evaluate the four alert rules against one campaign
pub fn evaluate_alerts(campaign: &CampaignData) -> Vec<AlertData> {
    let entity = &campaign.entity;
    let metrics = &campaign.metrics;
    let mut alerts = Vec::new();

    if metrics.ctr < LOW_CTR_THRESHOLD {
        alerts.push(AlertData {
            campaign_id: entity.id.clone(),
            alert_type: AlertType::PerformanceDrop,
            severity: Priority::High,
            message: format!("Campaign '{}' has low CTR: {}%", entity.name, metrics.ctr),
            suggested_action: Some("Review and optimize ad creative or targeting".to_string()),
        });
    }

    if let Some(utilization) = campaign.budget_utilization() {
        if utilization >= BUDGET_ALERT_UTILIZATION {
            let severity = if utilization > BUDGET_CRITICAL_UTILIZATION {
                Priority::Critical
            } else {
                Priority::High
            };
            alerts.push(AlertData {
                campaign_id: entity.id.clone(),
                alert_type: AlertType::BudgetOverrun,
                severity,
                message: format!(
                    "Campaign '{}' has used {:.1}% of budget",
                    entity.name, utilization
                ),
                suggested_action: Some(
                    "Consider increasing budget or pausing campaign".to_string(),
                ),
            });
        }
    }

    if metrics.cpc > HIGH_CPC_THRESHOLD {
        alerts.push(AlertData {
            campaign_id: entity.id.clone(),
            alert_type: AlertType::HighCost,
            severity: Priority::Medium,
            message: format!("Campaign '{}' has high CPC: ${:.2}", entity.name, metrics.cpc),
            suggested_action: Some("Optimize bidding strategy or targeting".to_string()),
        });
    }

    if metrics.conversion_rate < LOW_CONVERSION_RATE_THRESHOLD {
        alerts.push(AlertData {
            campaign_id: entity.id.clone(),
            alert_type: AlertType::LowConversions,
            severity: Priority::Medium,
            message: format!(
                "Campaign '{}' has low conversion rate: {}%",
                entity.name, metrics.conversion_rate
            ),
            suggested_action: Some("Review landing page and conversion funnel".to_string()),
        });
    }

    alerts
}

#[async_trait]
impl Stage for MonitorStage {
    fn id(&self) -> StageId {
        StageId::Monitor
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        state.log(self.name(), "Starting campaign monitoring");

        let campaign_id = state.campaign_id.clone();
        let entity = self.data_source.fetch(&campaign_id).await?;
        let metrics = self.data_source.fetch_insights(&campaign_id).await?;
        let campaign = CampaignData::new(entity, metrics);

        state
            .campaign_metrics
            .insert(campaign_id.clone(), campaign_metrics(&campaign.metrics));

        let mut added = 0;
        for alert in evaluate_alerts(&campaign) {
            log::info!(
                "Workflow {}: {} alert for {} ({})",
                state.workflow_id,
                alert.severity,
                campaign_id,
                alert.alert_type
            );
            if state.record_alert(alert) {
                added += 1;
            }
        }
        state.upsert_campaign(campaign);

        state.log(
            self.name(),
            format!("Monitoring completed. Found {} alerts", state.alerts.len()),
        );
        log::debug!("Workflow {}: {} new alerts", state.workflow_id, added);

        Ok(StageOutcome::Completed(StageSummary::Monitor {
            campaigns_monitored: state.campaigns.len(),
            alerts_generated: state.alerts.len(),
            urgent_alerts: state.urgent_alert_count(),
        }))
    }
}
