//! Iteration and retry limits per workflow

use crate::config::GuardsConfig;
use crate::workflow::WorkflowId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;

/// Outcome of one `should_continue` check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EnforcerDecision {
    Continue { reason: String },
    Stop { reason: String },
}

impl EnforcerDecision {
    pub fn should_continue(&self) -> bool {
        matches!(self, Self::Continue { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Continue { reason } | Self::Stop { reason } => reason,
        }
    }
}

/// Current counters for one workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnforcerStatus {
    pub iterations: u32,
    pub retries: HashMap<String, u32>,
}

#[derive(Default)]
struct Counters {
    iterations: HashMap<WorkflowId, u32>,
    retries: HashMap<WorkflowId, HashMap<String, u32>>,
}

/// Caps how many iterations a workflow, and how many retries an operation
/// within it, may consume. Any internal failure results in a stop.
pub struct Enforcer {
    max_iterations: u32,
    max_retries: u32,
    counters: Mutex<Counters>,
}

impl Enforcer {
    pub fn new(max_iterations: u32, max_retries: u32) -> Self {
        log::info!(
            "Initialized enforcer (max_iterations: {}, max_retries: {})",
            max_iterations,
            max_retries
        );
        Self {
            max_iterations,
            max_retries,
            counters: Mutex::new(Counters::default()),
        }
    }

    pub fn from_config(config: &GuardsConfig) -> Self {
        Self::new(config.max_iterations, config.max_retries)
    }

    /// Count one more iteration of `workflow_id` and one more attempt of
    /// `operation`, then decide whether to go on
    pub fn should_continue(&self, workflow_id: &WorkflowId, operation: &str) -> EnforcerDecision {
        let mut counters = match self.counters.lock() {
            Ok(guard) => guard,
            Err(e) => {
                log::error!("Enforcer error for workflow {}: {}", workflow_id, e);
                return EnforcerDecision::Stop {
                    reason: format!("Enforcer error: {}", e),
                };
            }
        };

        let iterations = {
            let count = counters.iterations.entry(workflow_id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let retries = {
            let count = counters
                .retries
                .entry(workflow_id.clone())
                .or_default()
                .entry(operation.to_string())
                .or_insert(0);
            *count += 1;
            *count
        };

        let decision = if iterations > self.max_iterations {
            EnforcerDecision::Stop {
                reason: format!(
                    "Maximum iterations exceeded ({}/{})",
                    iterations, self.max_iterations
                ),
            }
        } else if retries > self.max_retries {
            EnforcerDecision::Stop {
                reason: format!(
                    "Maximum retries exceeded for {} ({}/{})",
                    operation, retries, self.max_retries
                ),
            }
        } else {
            EnforcerDecision::Continue {
                reason: format!(
                    "Within limits (iterations: {}/{}, retries: {}/{})",
                    iterations, self.max_iterations, retries, self.max_retries
                ),
            }
        };

        if decision.should_continue() {
            log::debug!("Enforcer: CONTINUE {} - {}", workflow_id, decision.reason());
        } else {
            log::warn!("Enforcer: STOP {} - {}", workflow_id, decision.reason());
        }
        decision
    }

    /// Clear every counter held for `workflow_id`
    pub fn reset(&self, workflow_id: &WorkflowId) {
        match self.counters.lock() {
            Ok(mut counters) => {
                counters.iterations.remove(workflow_id);
                counters.retries.remove(workflow_id);
                log::debug!("Reset enforcer counters for workflow {}", workflow_id);
            }
            Err(e) => log::error!("Failed to reset enforcer counters for {}: {}", workflow_id, e),
        }
    }

    pub fn status(&self, workflow_id: &WorkflowId) -> EnforcerStatus {
        match self.counters.lock() {
            Ok(counters) => EnforcerStatus {
                iterations: counters.iterations.get(workflow_id).copied().unwrap_or(0),
                retries: counters.retries.get(workflow_id).cloned().unwrap_or_default(),
            },
            Err(_) => EnforcerStatus::default(),
        }
    }
}

impl Default for Enforcer {
    fn default() -> Self {
        Self::from_config(&GuardsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stops_after_max_iterations() {
        let enforcer = Enforcer::new(3, 10);
        let id = WorkflowId::new();
        let ops = ["monitor", "analysis", "optimization"];
        for op in ops {
            assert!(enforcer.should_continue(&id, op).should_continue());
        }

        let decision = enforcer.should_continue(&id, "reporting");
        assert!(!decision.should_continue());
        assert_eq!(decision.reason(), "Maximum iterations exceeded (4/3)");
    }

    #[test]
    fn test_stops_after_max_retries() {
        let enforcer = Enforcer::new(10, 2);
        let id = WorkflowId::new();
        assert!(enforcer.should_continue(&id, "fetch").should_continue());
        assert!(enforcer.should_continue(&id, "fetch").should_continue());

        let decision = enforcer.should_continue(&id, "fetch");
        assert!(!decision.should_continue());
        assert!(decision.reason().contains("Maximum retries exceeded for fetch (3/2)"));

        // other operations keep their own counter
        assert!(enforcer.should_continue(&id, "report").should_continue());
    }

    #[test]
    fn test_reset_clears_counters() {
        let enforcer = Enforcer::new(1, 1);
        let id = WorkflowId::new();
        assert!(enforcer.should_continue(&id, "op").should_continue());
        assert!(!enforcer.should_continue(&id, "op").should_continue());

        enforcer.reset(&id);
        assert_eq!(enforcer.status(&id), EnforcerStatus::default());
        assert!(enforcer.should_continue(&id, "op").should_continue());
    }

    #[test]
    fn test_workflows_are_isolated() {
        let enforcer = Enforcer::new(1, 5);
        let a = WorkflowId::new();
        let b = WorkflowId::new();
        assert!(enforcer.should_continue(&a, "op").should_continue());
        assert!(enforcer.should_continue(&b, "op").should_continue());

        let status = enforcer.status(&a);
        assert_eq!(status.iterations, 1);
        assert_eq!(status.retries.get("op"), Some(&1));
    }
}
