//! Campaign Core Library
//!
//! Workflow engine for campaign monitoring and optimization: service
//! clients, guards, pipeline stages, the workflow graph and the coordinator.

pub mod clients;
pub mod config;
pub mod constants;
pub mod error;
pub mod guards;
pub mod stages;
pub mod workflow;

pub use config::CampaignConfig;
pub use error::{CampaignError, Result};

pub use clients::{
    CampaignDataSource, CompletionService, HttpCampaignSource, HttpToolGateway,
    OpenAiCompletionClient, StaticCampaignSource, ToolGateway, ToolRequest, ToolResponse,
};

pub use guards::{Enforcer, EnforcerDecision, GradeResult, Grader};

pub use workflow::{
    CancellationFlag, CheckpointStore, Collaborators, Coordinator, FileCheckpointStore, Guards,
    InMemoryCheckpointStore, MonitoringScheduler, RoutingDecision, Stage, StageOutcome,
    StageSummary, WorkflowGraph, WorkflowId, WorkflowMetrics, WorkflowState,
};
