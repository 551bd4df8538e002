//! Fixed thresholds used by the stages and the coordinator

// Monitor alert rules
pub const LOW_CTR_THRESHOLD: f64 = 0.5;
pub const BUDGET_ALERT_UTILIZATION: f64 = 90.0;
pub const BUDGET_CRITICAL_UTILIZATION: f64 = 100.0;
pub const HIGH_CPC_THRESHOLD: f64 = 5.0;
pub const LOW_CONVERSION_RATE_THRESHOLD: f64 = 1.0;

// Optimization rules
pub const HIGH_ROAS_THRESHOLD: f64 = 3.0;
pub const NEAR_BUDGET_RATIO: f64 = 0.8;
pub const CREATIVE_CTR_THRESHOLD: f64 = 1.0;
pub const HEALTHY_CTR_THRESHOLD: f64 = 1.5;
pub const LANDING_PAGE_CONVERSION_THRESHOLD: f64 = 2.0;

/// Recommendations above this confidence wait for approval
pub const APPROVAL_CONFIDENCE_THRESHOLD: f64 = 0.8;

/// Recommendations above this confidence produce a notification
pub const NOTIFICATION_CONFIDENCE_THRESHOLD: f64 = 0.85;

// Coordinator priority derivation
pub const PRIORITY_HIGH_SPEND_RATIO: f64 = 0.8;
pub const PRIORITY_HIGH_CTR: f64 = 1.0;
pub const PRIORITY_HIGH_ROAS: f64 = 1.0;
pub const PRIORITY_MEDIUM_CPC: f64 = 5.0;
pub const PRIORITY_MEDIUM_CTR: f64 = 2.0;

/// Gateway operation used when recommendations are auto-applied
pub const APPLY_RECOMMENDATION_OPERATION: &str = "apply_recommendation";

/// Trigger reason attached to tasks created by `schedule_monitoring`
pub const SCHEDULED_MONITORING_REASON: &str = "scheduled_monitoring";
