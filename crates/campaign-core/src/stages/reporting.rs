//! Reporting stage: reports and notifications from prior stage outputs

use crate::constants::{APPROVAL_CONFIDENCE_THRESHOLD, NOTIFICATION_CONFIDENCE_THRESHOLD};
use crate::error::Result;
use crate::workflow::{Stage, StageOutcome, StageSummary, WorkflowState};
use async_trait::async_trait;
use campaign_types::{
    Notification, NotificationKind, Priority, RecommendationStatus, ReportData, ReportType,
    StageId,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;

const PERIOD: &str = "current_analysis";
const TOP_RECOMMENDATIONS: usize = 3;
const PLATFORM_CTR_MARGIN: f64 = 1.2;

#[derive(Default)]
pub struct ReportingStage;

impl ReportingStage {
    pub fn new() -> Self {
        Self
    }
}

fn average(state: &WorkflowState, f: impl Fn(&campaign_types::CampaignData) -> f64) -> f64 {
    if state.campaigns.is_empty() {
        return 0.0;
    }
    state.campaigns.iter().map(f).sum::<f64>() / state.campaigns.len() as f64
}

pub fn performance_report(state: &WorkflowState) -> ReportData {
    if state.campaigns.is_empty() {
        return ReportData {
            report_type: ReportType::Performance,
            period: "current".to_string(),
            summary: "No campaigns to analyze".to_string(),
            key_metrics: BTreeMap::new(),
            insights: Vec::new(),
            recommendations: Vec::new(),
            generated_at: Utc::now(),
        };
    }

    let total_spend: f64 = state.campaigns.iter().map(|c| c.entity.spend).sum();
    let average_ctr = average(state, |c| c.metrics.ctr);
    let average_conversion_rate = average(state, |c| c.metrics.conversion_rate);
    let total_roas = if total_spend > 0.0 {
        state
            .campaigns
            .iter()
            .map(|c| c.metrics.roas * c.entity.spend)
            .sum::<f64>()
            / total_spend
    } else {
        0.0
    };

    let key_metrics: BTreeMap<String, Value> = [
        ("total_campaigns", json!(state.campaigns.len())),
        ("total_spend", json!(total_spend)),
        (
            "total_impressions",
            json!(state.campaigns.iter().map(|c| c.metrics.impressions).sum::<u64>()),
        ),
        (
            "total_clicks",
            json!(state.campaigns.iter().map(|c| c.metrics.clicks).sum::<u64>()),
        ),
        (
            "total_conversions",
            json!(state.campaigns.iter().map(|c| c.metrics.conversions).sum::<u64>()),
        ),
        ("average_ctr", json!(average_ctr)),
        ("average_cpc", json!(average(state, |c| c.metrics.cpc))),
        ("average_conversion_rate", json!(average_conversion_rate)),
        ("total_roas", json!(total_roas)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();

    let mut insights = Vec::new();
    if average_ctr < 1.0 {
        insights.push(
            "Overall CTR is below industry average - consider creative optimization".to_string(),
        );
    }
    if average_conversion_rate < 2.0 {
        insights.push(
            "Conversion rates could be improved - review landing pages and user experience"
                .to_string(),
        );
    }
    if total_roas > 3.0 {
        insights.push(
            "Strong ROAS performance - consider scaling successful campaigns".to_string(),
        );
    }

    ReportData {
        report_type: ReportType::Performance,
        period: PERIOD.to_string(),
        summary: format!(
            "Analysis of {} campaigns with total spend of ${:.2}",
            state.campaigns.len(),
            total_spend
        ),
        key_metrics,
        insights,
        recommendations: state
            .recommendations
            .iter()
            .take(TOP_RECOMMENDATIONS)
            .cloned()
            .collect(),
        generated_at: Utc::now(),
    }
}

pub fn insights_report(state: &WorkflowState) -> Result<ReportData> {
    let mut insights = Vec::new();

    if let Some(narrative) = &state.metadata.insight_narrative {
        insights.push(narrative.clone());
    }

    let critical = state
        .alerts
        .iter()
        .filter(|a| a.severity == Priority::Critical)
        .count();
    if critical > 0 {
        insights.push(format!(
            "Found {} critical issues requiring immediate attention",
            critical
        ));
    }

    let mut key_metrics = BTreeMap::new();
    if let Some(trends) = &state.metadata.trend_analysis {
        let mut platforms: Vec<(&String, f64)> = trends
            .platform_comparison
            .iter()
            .map(|(name, stats)| (name, stats.avg_ctr))
            .collect();
        platforms.sort_by(|a, b| b.1.total_cmp(&a.1));

        if let (Some(best), Some(worst)) = (platforms.first(), platforms.last()) {
            if platforms.len() > 1 && best.1 > worst.1 * PLATFORM_CTR_MARGIN {
                insights.push(format!(
                    "{} campaigns are significantly outperforming {} in CTR",
                    best.0, worst.0
                ));
            }
        }

        if let Value::Object(map) = serde_json::to_value(trends)? {
            key_metrics.extend(map);
        }
    }

    Ok(ReportData {
        report_type: ReportType::Insights,
        period: PERIOD.to_string(),
        summary: "Data-driven insights and trend analysis".to_string(),
        key_metrics,
        insights,
        recommendations: Vec::new(),
        generated_at: Utc::now(),
    })
}

pub fn recommendations_report(state: &WorkflowState) -> ReportData {
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    for rec in &state.recommendations {
        *by_type.entry(rec.recommendation_type.to_string()).or_insert(0) += 1;
    }

    let mut summary = format!(
        "Generated {} optimization recommendations",
        state.recommendations.len()
    );
    if !by_type.is_empty() {
        let parts: Vec<String> = by_type
            .iter()
            .map(|(kind, count)| format!("{} {}", count, kind))
            .collect();
        summary.push_str(&format!(" ({})", parts.join(", ")));
    }

    let high_confidence = state
        .recommendations
        .iter()
        .filter(|r| r.confidence_score > APPROVAL_CONFIDENCE_THRESHOLD)
        .count();

    ReportData {
        report_type: ReportType::Recommendations,
        period: PERIOD.to_string(),
        summary,
        key_metrics: by_type.into_iter().map(|(k, v)| (k, json!(v))).collect(),
        insights: vec![format!("High-confidence recommendations: {}", high_confidence)],
        recommendations: state.recommendations.clone(),
        generated_at: Utc::now(),
    }
}

/// One entry per HIGH or CRITICAL alert, and one per recommendation whose
/// confidence exceeds the notification threshold
pub fn derive_notifications(state: &WorkflowState) -> Vec<Notification> {
    let now = Utc::now();

    let alerts = state.alerts.iter().filter(|a| a.severity.is_urgent()).map(|alert| {
        let label = if alert.severity == Priority::Critical {
            "Critical Issue"
        } else {
            "High Priority Issue"
        };
        Notification {
            kind: NotificationKind::Alert,
            priority: alert.severity,
            title: format!("{}: Campaign {}", label, alert.campaign_id),
            message: alert.message.clone(),
            campaign_id: Some(alert.campaign_id.clone()),
            action_required: true,
            created_at: now,
        }
    });

    let recommendations = state
        .recommendations
        .iter()
        .filter(|r| r.confidence_score > NOTIFICATION_CONFIDENCE_THRESHOLD)
        .map(|rec| Notification {
            kind: NotificationKind::Recommendation,
            priority: Priority::High,
            title: format!("High-Impact Optimization: {}", rec.title),
            message: rec.description.clone(),
            campaign_id: Some(rec.campaign_id.clone()),
            action_required: rec.status == RecommendationStatus::PendingApproval,
            created_at: now,
        });

    alerts.chain(recommendations).collect()
}

#[async_trait]
impl Stage for ReportingStage {
    fn id(&self) -> StageId {
        StageId::Reporting
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<StageOutcome> {
        state.log(self.name(), "Starting report generation");

        state.reports = vec![
            performance_report(state),
            insights_report(state)?,
            recommendations_report(state),
        ];
        state.notifications = derive_notifications(state);

        state.log(self.name(), "Report generation completed");

        Ok(StageOutcome::Completed(StageSummary::Reporting {
            reports_generated: state.reports.len(),
            notifications_created: state.notifications.len(),
        }))
    }
}
