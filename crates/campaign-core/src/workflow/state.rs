//! Mutable record threaded through one workflow run

use crate::error::{CampaignError, Result};
use crate::guards::GradeResult;
use crate::stages::analysis::TrendAnalysis;
use campaign_types::{
    AlertData, CampaignData, CampaignId, CampaignMetrics, ErrorRecord, Notification,
    OptimizationRecommendation, Priority, ReportData, StageId, WorkflowStatus, WorkflowStep,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Strongly typed workflow identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl WorkflowId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Result<Self> {
        uuid::Uuid::parse_str(s)
            .map(|_| Self(s.to_string()))
            .map_err(|e| CampaignError::NotFound(format!("Invalid WorkflowId format: {}", e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Path chosen after the monitor stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingDecision {
    FullAnalysis,
    ReportOnly,
}

/// Known cross-stage signals. Stages communicate through these fields only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Set by the graph once the monitor stage has run
    pub routing_decision: Option<RoutingDecision>,
    /// Portfolio statistics from the analysis stage
    pub trend_analysis: Option<TrendAnalysis>,
    /// Narrative insight text, only kept when it passed grading
    pub insight_narrative: Option<String>,
    pub narrative_grade: Option<GradeResult>,
    /// Summary text from the optimization stage
    pub optimization_narrative: Option<String>,
}

/// Typed per-stage output summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageSummary {
    Monitor {
        campaigns_monitored: usize,
        alerts_generated: usize,
        urgent_alerts: usize,
    },
    Analysis {
        campaigns_analyzed: usize,
        platforms_compared: usize,
        narrative_generated: bool,
    },
    Optimization {
        recommendations_generated: usize,
        pending_approval: usize,
        applied: usize,
    },
    Reporting {
        reports_generated: usize,
        notifications_created: usize,
    },
    Skipped {
        reason: String,
    },
}

/// State of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: WorkflowId,
    pub campaign_id: CampaignId,
    pub status: WorkflowStatus,
    pub priority: Priority,
    pub current_step: WorkflowStep,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub trigger_reason: String,
    pub error_message: Option<String>,

    pub campaigns: Vec<CampaignData>,
    pub campaign_metrics: BTreeMap<CampaignId, CampaignMetrics>,
    pub alerts: Vec<AlertData>,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub reports: Vec<ReportData>,
    pub notifications: Vec<Notification>,
    pub execution_log: Vec<String>,
    pub errors: Vec<ErrorRecord>,

    pub completed_stages: Vec<StageId>,
    pub stage_outputs: BTreeMap<StageId, StageSummary>,
    pub metadata: WorkflowMetadata,
}

impl WorkflowState {
    pub fn new(
        campaign_id: CampaignId,
        trigger_reason: impl Into<String>,
        priority: Priority,
    ) -> Self {
        Self {
            workflow_id: WorkflowId::new(),
            campaign_id,
            status: WorkflowStatus::Pending,
            priority,
            current_step: WorkflowStep::Initialization,
            progress: 0.0,
            started_at: Utc::now(),
            completed_at: None,
            trigger_reason: trigger_reason.into(),
            error_message: None,
            campaigns: Vec::new(),
            campaign_metrics: BTreeMap::new(),
            alerts: Vec::new(),
            recommendations: Vec::new(),
            reports: Vec::new(),
            notifications: Vec::new(),
            execution_log: Vec::new(),
            errors: Vec::new(),
            completed_stages: Vec::new(),
            stage_outputs: BTreeMap::new(),
            metadata: WorkflowMetadata::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next` along the allowed status edges
    pub fn transition(&mut self, next: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CampaignError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        if next == WorkflowStatus::Completed {
            self.enter_step(WorkflowStep::Completed);
        }
        Ok(())
    }

    /// Enter a step, raising progress to the step's value
    pub fn enter_step(&mut self, step: WorkflowStep) {
        self.current_step = step;
        if let Some(progress) = step.progress() {
            self.advance_progress(progress);
        }
    }

    /// Progress only moves forward
    pub fn advance_progress(&mut self, value: f64) {
        let value = value.clamp(0.0, 1.0);
        if value > self.progress {
            self.progress = value;
        }
    }

    /// Terminate as FAILED, keeping `current_step` and partial outputs
    pub fn fail(&mut self, stage: &str, message: impl Into<String>) {
        let message = message.into();
        self.record_error(stage, message.clone());
        self.error_message = Some(message);
        if !self.is_terminal() {
            self.status = WorkflowStatus::Failed;
            self.completed_at = Some(Utc::now());
        }
    }

    pub fn record_error(&mut self, stage: &str, message: impl Into<String>) {
        self.errors.push(ErrorRecord::new(stage, message));
    }

    /// Append a timestamped line to the execution log
    pub fn log(&mut self, stage_name: &str, message: impl AsRef<str>) {
        self.execution_log.push(format!(
            "[{}] {}: {}",
            Utc::now().to_rfc3339(),
            stage_name,
            message.as_ref()
        ));
    }

    /// Replace or add a fetched campaign
    pub fn upsert_campaign(&mut self, data: CampaignData) {
        match self.campaigns.iter_mut().find(|c| c.id() == data.id()) {
            Some(existing) => *existing = data,
            None => self.campaigns.push(data),
        }
    }

    /// Append an alert unless one for the same campaign and type exists.
    /// Returns whether the alert was added.
    pub fn record_alert(&mut self, alert: AlertData) -> bool {
        if self.alerts.iter().any(|a| a.same_subject(&alert)) {
            return false;
        }
        self.alerts.push(alert);
        true
    }

    /// Append a recommendation unless an equivalent one exists
    pub fn record_recommendation(&mut self, recommendation: OptimizationRecommendation) -> bool {
        if self
            .recommendations
            .iter()
            .any(|r| r.same_subject(&recommendation))
        {
            return false;
        }
        self.recommendations.push(recommendation);
        true
    }

    pub fn urgent_alert_count(&self) -> usize {
        self.alerts.iter().filter(|a| a.severity.is_urgent()).count()
    }

    pub fn is_stage_completed(&self, stage: StageId) -> bool {
        self.completed_stages.contains(&stage)
    }

    pub fn mark_stage_completed(&mut self, stage: StageId, summary: StageSummary) {
        if !self.is_stage_completed(stage) {
            self.completed_stages.push(stage);
        }
        self.stage_outputs.insert(stage, summary);
    }
}
