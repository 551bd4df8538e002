//! Stage abstraction for the campaign pipeline

use super::state::{StageSummary, WorkflowState};
use crate::error::Result;
use async_trait::async_trait;
use campaign_types::StageId;

/// Expected result of a stage. Fatal failures travel through `Err`.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    Completed(StageSummary),
    /// Nothing to do for this input
    Skipped { reason: String },
}

impl StageOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
        }
    }

    pub fn into_summary(self) -> StageSummary {
        match self {
            Self::Completed(summary) => summary,
            Self::Skipped { reason } => StageSummary::Skipped { reason },
        }
    }
}

/// One unit of work in the pipeline.
///
/// Re-running a stage on an already checkpointed state must not record the
/// same alert or recommendation twice.
#[async_trait]
pub trait Stage: Send + Sync {
    fn id(&self) -> StageId;

    fn name(&self) -> &'static str {
        self.id().display_name()
    }

    async fn execute(&self, state: &mut WorkflowState) -> Result<StageOutcome>;
}
