//! Workflow engine: state, stage contract, graph execution and coordination

pub mod checkpoint;
pub mod coordinator;
pub mod graph;
pub mod scheduler;
pub mod stage;
pub mod state;

pub use checkpoint::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
pub use coordinator::{
    derive_priority, Coordinator, CountMap, DroppedTask, HealthStatus, QueueRunSummary,
    WorkflowMetrics, WorkflowSummary,
};
pub use graph::{
    route_after_monitor, CancellationFlag, Collaborators, Edge, Guards, Router, WorkflowGraph,
    WorkflowGraphBuilder,
};
pub use scheduler::{MonitoringScheduler, TickReport};
pub use stage::{Stage, StageOutcome};
pub use state::{RoutingDecision, StageSummary, WorkflowId, WorkflowMetadata, WorkflowState};
