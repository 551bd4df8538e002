//! Shared types for the campaign optimization workflow engine
//!
//! Plain serializable records passed between the engine, its stages and its
//! collaborators. No behaviour beyond small derived helpers lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default number of whole-workflow retries granted to a queued task
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Errors raised while parsing identifiers and enum labels
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("Unknown priority: {0}")]
    UnknownPriority(String),
}

/// Strongly typed campaign identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CampaignId(String);

impl CampaignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CampaignId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CampaignId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Strongly typed identifier of a queued coordinator task
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Result<Self, TypesError> {
        uuid::Uuid::parse_str(s)
            .map(|_| Self(s.to_string()))
            .map_err(|e| TypesError::InvalidId(format!("Invalid TaskId format: {}", e)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Urgency level shared by alert severity and task-queue ordering.
///
/// Variants are declared in ascending order so the derived `Ord` gives
/// LOW < MEDIUM < HIGH < CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// HIGH and CRITICAL both demand attention from a human
    pub fn is_urgent(&self) -> bool {
        *self >= Self::High
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(TypesError::UnknownPriority(other.to_string())),
        }
    }
}

/// Lifecycle status of one workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub const ALL: [WorkflowStatus; 5] = [
        Self::Pending,
        Self::Running,
        Self::Completed,
        Self::Failed,
        Self::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Allowed moves: PENDING -> RUNNING, and any non-terminal status into
    /// FAILED or CANCELLED. RUNNING is the only way into COMPLETED.
    pub fn can_transition_to(&self, next: WorkflowStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending, Self::Failed | Self::Cancelled) => true,
            (Self::Running, Self::Completed | Self::Failed | Self::Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of one processing stage in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    Monitor,
    Analysis,
    Optimization,
    Reporting,
}

impl StageId {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monitor => "monitor",
            Self::Analysis => "analysis",
            Self::Optimization => "optimization",
            Self::Reporting => "reporting",
        }
    }

    /// Human readable name used in the execution log
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Monitor => "CampaignMonitor",
            Self::Analysis => "DataAnalysis",
            Self::Optimization => "Optimization",
            Self::Reporting => "Reporting",
        }
    }

    /// Step the workflow is in while this stage executes
    pub fn step(&self) -> WorkflowStep {
        match self {
            Self::Monitor => WorkflowStep::Monitoring,
            Self::Analysis => WorkflowStep::Analysis,
            Self::Optimization => WorkflowStep::Optimization,
            Self::Reporting => WorkflowStep::Reporting,
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Position of a workflow in the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Initialization,
    Monitoring,
    Analysis,
    Optimization,
    Reporting,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialization => "initialization",
            Self::Monitoring => "monitoring",
            Self::Analysis => "analysis",
            Self::Optimization => "optimization",
            Self::Reporting => "reporting",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Progress reached on entering this step. Failure and cancellation
    /// freeze progress where it was, so they have no value of their own.
    pub fn progress(&self) -> Option<f64> {
        match self {
            Self::Initialization => Some(0.0),
            Self::Monitoring => Some(0.2),
            Self::Analysis => Some(0.4),
            Self::Optimization => Some(0.6),
            Self::Reporting => Some(0.8),
            Self::Completed => Some(1.0),
            Self::Failed | Self::Cancelled => None,
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign record as returned by the campaign data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignEntity {
    pub id: CampaignId,
    pub name: String,
    pub platform: String,
    pub status: String,
    pub budget: f64,
    pub spend: f64,
}

/// Point-in-time KPI snapshot. Rates (`ctr`, `conversion_rate`) are percentages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    #[serde(default)]
    pub impressions: u64,
    #[serde(default)]
    pub clicks: u64,
    #[serde(default)]
    pub conversions: u64,
    #[serde(default)]
    pub cpm: f64,
    #[serde(default)]
    pub cpc: f64,
    #[serde(default)]
    pub ctr: f64,
    #[serde(default)]
    pub conversion_rate: f64,
    #[serde(default)]
    pub roas: f64,
}

/// A campaign joined with its latest metric snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignData {
    pub entity: CampaignEntity,
    pub metrics: MetricSnapshot,
}

impl CampaignData {
    pub fn new(entity: CampaignEntity, metrics: MetricSnapshot) -> Self {
        Self { entity, metrics }
    }

    pub fn id(&self) -> &CampaignId {
        &self.entity.id
    }

    /// Spend divided by budget, `None` when no budget is set
    pub fn spend_ratio(&self) -> Option<f64> {
        if self.entity.budget > 0.0 {
            Some(self.entity.spend / self.entity.budget)
        } else {
            None
        }
    }

    /// Budget utilization in percent, `None` when no budget is set
    pub fn budget_utilization(&self) -> Option<f64> {
        self.spend_ratio().map(|ratio| ratio * 100.0)
    }
}

/// Category of a monitor alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    PerformanceDrop,
    BudgetOverrun,
    HighCost,
    LowConversions,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PerformanceDrop => "performance_drop",
            Self::BudgetOverrun => "budget_overrun",
            Self::HighCost => "high_cost",
            Self::LowConversions => "low_conversions",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert raised by the monitor stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertData {
    pub campaign_id: CampaignId,
    pub alert_type: AlertType,
    pub severity: Priority,
    pub message: String,
    pub suggested_action: Option<String>,
}

impl AlertData {
    /// One alert per campaign and alert type
    pub fn same_subject(&self, other: &AlertData) -> bool {
        self.campaign_id == other.campaign_id && self.alert_type == other.alert_type
    }
}

/// Area a recommendation acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationType {
    Budget,
    Targeting,
    Creative,
    Bidding,
}

impl RecommendationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Targeting => "targeting",
            Self::Creative => "creative",
            Self::Bidding => "bidding",
        }
    }
}

impl fmt::Display for RecommendationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downstream handling state of a recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    Proposed,
    PendingApproval,
    Applied,
}

/// Optimization recommendation produced by the optimization stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRecommendation {
    pub campaign_id: CampaignId,
    pub recommendation_type: RecommendationType,
    pub title: String,
    pub description: String,
    pub expected_impact: String,
    pub confidence_score: f64,
    pub implementation_steps: Vec<String>,
    pub estimated_results: BTreeMap<String, f64>,
    pub status: RecommendationStatus,
}

impl OptimizationRecommendation {
    pub fn recommendation_id(&self) -> String {
        format!("rec_{}_{}", self.campaign_id, self.recommendation_type)
    }

    pub fn same_subject(&self, other: &OptimizationRecommendation) -> bool {
        self.campaign_id == other.campaign_id
            && self.recommendation_type == other.recommendation_type
            && self.title == other.title
    }
}

/// Kind of report assembled by the reporting stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Performance,
    Insights,
    Recommendations,
}

/// Report assembled from prior stage outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportData {
    pub report_type: ReportType,
    pub period: String,
    pub summary: String,
    pub key_metrics: BTreeMap<String, serde_json::Value>,
    pub insights: Vec<String>,
    pub recommendations: Vec<OptimizationRecommendation>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Alert,
    Recommendation,
}

/// Entry derived by the reporting stage for a human to act on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub priority: Priority,
    pub title: String,
    pub message: String,
    pub campaign_id: Option<CampaignId>,
    pub action_required: bool,
    pub created_at: DateTime<Utc>,
}

/// Bucketed performance score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EfficiencyRating {
    Excellent,
    Good,
    Average,
    Poor,
}

impl EfficiencyRating {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 60.0 {
            Self::Good
        } else if score >= 40.0 {
            Self::Average
        } else {
            Self::Poor
        }
    }
}

/// Derived per-campaign metric summary written by the monitor stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignMetrics {
    pub performance_score: f64,
    pub efficiency_rating: EfficiencyRating,
    pub optimization_potential: f64,
    pub last_updated: DateTime<Utc>,
}

/// Error recorded against a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub stage: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Data carried by a queued task into the workflow it starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub trigger_reason: String,
    #[serde(default)]
    pub data: BTreeMap<String, serde_json::Value>,
}

/// Coordinator queue item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTask {
    pub task_id: TaskId,
    pub campaign_id: CampaignId,
    pub target: StageId,
    pub priority: Priority,
    pub scheduled_at: DateTime<Utc>,
    pub payload: TaskPayload,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl WorkflowTask {
    /// Create a task due immediately, entering the pipeline at the monitor stage
    pub fn new(
        campaign_id: CampaignId,
        priority: Priority,
        trigger_reason: impl Into<String>,
    ) -> Self {
        Self {
            task_id: TaskId::new(),
            campaign_id,
            target: StageId::Monitor,
            priority,
            scheduled_at: Utc::now(),
            payload: TaskPayload {
                trigger_reason: trigger_reason.into(),
                data: BTreeMap::new(),
            },
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at <= now
    }

    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign(budget: f64, spend: f64) -> CampaignData {
        CampaignData::new(
            CampaignEntity {
                id: CampaignId::new("c-1"),
                name: "Spring Sale".to_string(),
                platform: "facebook".to_string(),
                status: "active".to_string(),
                budget,
                spend,
            },
            MetricSnapshot::default(),
        )
    }

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
        assert!(Priority::High < Priority::Critical);
        assert!(Priority::High.is_urgent());
        assert!(!Priority::Medium.is_urgent());
    }

    #[test]
    fn test_priority_serialization() {
        let json = serde_json::to_string(&Priority::Critical).unwrap();
        assert_eq!(json, "\"critical\"");

        let parsed: Priority = "HIGH".parse().unwrap();
        assert_eq!(parsed, Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn test_status_transitions() {
        assert!(WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Running));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Completed));
        assert!(WorkflowStatus::Running.can_transition_to(WorkflowStatus::Cancelled));
        assert!(!WorkflowStatus::Pending.can_transition_to(WorkflowStatus::Completed));
        assert!(!WorkflowStatus::Running.can_transition_to(WorkflowStatus::Pending));

        let terminals = [
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
            WorkflowStatus::Cancelled,
        ];
        for terminal in terminals {
            assert!(terminal.is_terminal());
            for next in WorkflowStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_step_progress_is_ordered() {
        let steps = [
            WorkflowStep::Initialization,
            WorkflowStep::Monitoring,
            WorkflowStep::Analysis,
            WorkflowStep::Optimization,
            WorkflowStep::Reporting,
            WorkflowStep::Completed,
        ];
        let values: Vec<f64> = steps.iter().map(|s| s.progress().unwrap()).collect();
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(WorkflowStep::Failed.progress(), None);
    }

    #[test]
    fn test_budget_utilization() {
        assert_eq!(campaign(100.0, 95.0).budget_utilization(), Some(95.0));
        assert_eq!(campaign(0.0, 10.0).budget_utilization(), None);
    }

    #[test]
    fn test_efficiency_rating_buckets() {
        assert_eq!(EfficiencyRating::from_score(85.0), EfficiencyRating::Excellent);
        assert_eq!(EfficiencyRating::from_score(60.0), EfficiencyRating::Good);
        assert_eq!(EfficiencyRating::from_score(45.5), EfficiencyRating::Average);
        assert_eq!(EfficiencyRating::from_score(12.0), EfficiencyRating::Poor);
    }

    #[test]
    fn test_workflow_task_defaults() {
        let task =
            WorkflowTask::new(CampaignId::new("c-9"), Priority::High, "scheduled_monitoring");
        assert_eq!(task.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(task.retry_count, 0);
        assert_eq!(task.target, StageId::Monitor);
        assert!(task.is_due(Utc::now()));
        assert!(!task.retries_exhausted());
        assert!(TaskId::from_string(task.task_id.as_str()).is_ok());
    }

    #[test]
    fn test_alert_subject_matching() {
        let alert = AlertData {
            campaign_id: CampaignId::new("c-1"),
            alert_type: AlertType::HighCost,
            severity: Priority::Medium,
            message: "high cpc".to_string(),
            suggested_action: None,
        };
        let mut other = alert.clone();
        other.message = "different wording".to_string();
        assert!(alert.same_subject(&other));

        other.alert_type = AlertType::LowConversions;
        assert!(!alert.same_subject(&other));
    }
}
