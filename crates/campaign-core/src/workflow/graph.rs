//! Workflow graph: compiles stages into an executable state machine
//!
//! The graph owns the `WorkflowState` while it runs, checkpoints it after
//! every stage, and can resume a run from its last checkpoint. Stage
//! failures never escape: they end the run as FAILED with the error recorded.

use super::checkpoint::CheckpointStore;
use super::stage::Stage;
use super::state::{RoutingDecision, WorkflowId, WorkflowState};
use crate::clients::{CampaignDataSource, CompletionService, ToolGateway};
use crate::config::EngineConfig;
use crate::error::{CampaignError, Result};
use crate::guards::{Enforcer, Grader};
use crate::stages::{
    AnalysisStage, MonitorStage, NarrativeWriter, OptimizationStage, ReportingStage,
};
use campaign_types::{CampaignId, Priority, StageId, WorkflowStatus};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const GRAPH_LOG_NAME: &str = "Workflow";
const SNAPSHOT_BUFFER: usize = 16;

/// Cooperative cancellation shared between a running graph and its owner
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub type Router = Arc<dyn Fn(&WorkflowState) -> RoutingDecision + Send + Sync>;

/// Outgoing edge of a stage
#[derive(Clone)]
pub enum Edge {
    Next(StageId),
    End,
    /// Conditional edge: the router picks `full` or `short`
    Branch {
        router: Router,
        full: StageId,
        short: StageId,
    },
}

/// Full path unless monitoring produced no alerts at all
pub fn route_after_monitor(state: &WorkflowState) -> RoutingDecision {
    if state.alerts.is_empty() {
        RoutingDecision::ReportOnly
    } else {
        RoutingDecision::FullAnalysis
    }
}

/// External collaborators the stages call
#[derive(Clone)]
pub struct Collaborators {
    pub data_source: Arc<dyn CampaignDataSource>,
    pub completion: Option<Arc<dyn CompletionService>>,
    pub tool_gateway: Option<Arc<dyn ToolGateway>>,
}

/// Guard instances shared by every run
#[derive(Clone)]
pub struct Guards {
    pub enforcer: Arc<Enforcer>,
    pub grader: Option<Arc<Grader>>,
}

#[derive(Default)]
pub struct WorkflowGraphBuilder {
    stages: HashMap<StageId, Arc<dyn Stage>>,
    edges: HashMap<StageId, Edge>,
    entry: Option<StageId>,
}

impl WorkflowGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.insert(stage.id(), stage);
        self
    }

    pub fn entry(mut self, stage: StageId) -> Self {
        self.entry = Some(stage);
        self
    }

    pub fn edge(mut self, from: StageId, to: StageId) -> Self {
        self.edges.insert(from, Edge::Next(to));
        self
    }

    pub fn end(mut self, from: StageId) -> Self {
        self.edges.insert(from, Edge::End);
        self
    }

    pub fn branch(mut self, from: StageId, router: Router, full: StageId, short: StageId) -> Self {
        self.edges.insert(from, Edge::Branch { router, full, short });
        self
    }

    /// Validate the graph: an entry exists, every stage has an outgoing
    /// edge, every edge points at a registered stage, and no path loops
    pub fn compile(
        self,
        enforcer: Arc<Enforcer>,
        store: Arc<dyn CheckpointStore>,
    ) -> Result<WorkflowGraph> {
        let entry = self
            .entry
            .ok_or_else(|| CampaignError::Config("Workflow graph has no entry stage".to_string()))?;

        let require = |id: StageId| -> Result<()> {
            if self.stages.contains_key(&id) {
                Ok(())
            } else {
                Err(CampaignError::Config(format!("Stage {} is not registered", id)))
            }
        };

        require(entry)?;
        for id in self.stages.keys() {
            let edge = self
                .edges
                .get(id)
                .ok_or_else(|| {
                    CampaignError::Config(format!("Stage {} has no outgoing edge", id))
                })?;
            match edge {
                Edge::Next(to) => require(*to)?,
                Edge::End => {}
                Edge::Branch { full, short, .. } => {
                    require(*full)?;
                    require(*short)?;
                }
            }
        }

        let graph = WorkflowGraph {
            stages: self.stages,
            edges: self.edges,
            entry,
            enforcer,
            store,
        };
        graph.check_acyclic(entry, &mut HashSet::new())?;
        Ok(graph)
    }
}

pub struct WorkflowGraph {
    stages: HashMap<StageId, Arc<dyn Stage>>,
    edges: HashMap<StageId, Edge>,
    entry: StageId,
    enforcer: Arc<Enforcer>,
    store: Arc<dyn CheckpointStore>,
}

impl WorkflowGraph {
    pub fn builder() -> WorkflowGraphBuilder {
        WorkflowGraphBuilder::new()
    }

    /// monitor -> {route} -> [analysis -> optimization] -> reporting
    pub fn campaign_pipeline(
        collaborators: &Collaborators,
        guards: &Guards,
        store: Arc<dyn CheckpointStore>,
        engine: &EngineConfig,
    ) -> Result<Self> {
        let narrative_writer = || {
            let completion = collaborators
                .completion
                .clone()
                .filter(|_| engine.narratives_enabled)?;
            let writer = NarrativeWriter::new(completion);
            Some(match (&guards.grader, engine.grade_narratives) {
                (Some(grader), true) => writer.with_grader(grader.clone()),
                _ => writer,
            })
        };

        let mut analysis = AnalysisStage::new();
        let mut optimization = OptimizationStage::new();
        if let Some(writer) = narrative_writer() {
            analysis = analysis.with_narratives(writer);
        }
        if let Some(writer) = narrative_writer() {
            optimization = optimization.with_narratives(writer);
        }
        if engine.auto_apply_recommendations {
            match &collaborators.tool_gateway {
                Some(gateway) => optimization = optimization.with_auto_apply(gateway.clone()),
                None => log::warn!("Auto-apply is enabled but no tool gateway is configured"),
            }
        }

        Self::builder()
            .add_stage(Arc::new(MonitorStage::new(collaborators.data_source.clone())))
            .add_stage(Arc::new(analysis))
            .add_stage(Arc::new(optimization))
            .add_stage(Arc::new(ReportingStage::new()))
            .entry(StageId::Monitor)
            .branch(
                StageId::Monitor,
                Arc::new(route_after_monitor),
                StageId::Analysis,
                StageId::Reporting,
            )
            .edge(StageId::Analysis, StageId::Optimization)
            .edge(StageId::Optimization, StageId::Reporting)
            .end(StageId::Reporting)
            .compile(guards.enforcer.clone(), store)
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    fn check_acyclic(&self, from: StageId, path: &mut HashSet<StageId>) -> Result<()> {
        if !path.insert(from) {
            return Err(CampaignError::Config(format!(
                "Workflow graph loops back to stage {}",
                from
            )));
        }
        let targets = match self.edges.get(&from) {
            Some(Edge::Next(to)) => vec![*to],
            Some(Edge::Branch { full, short, .. }) => vec![*full, *short],
            Some(Edge::End) | None => Vec::new(),
        };
        for to in targets {
            self.check_acyclic(to, path)?;
        }
        path.remove(&from);
        Ok(())
    }

    /// Stage following `from`, plus the routing decision when the edge is
    /// conditional. A decision already recorded in the state is reused.
    fn successor(
        &self,
        from: StageId,
        state: &WorkflowState,
    ) -> (Option<StageId>, Option<RoutingDecision>) {
        match self.edges.get(&from) {
            Some(Edge::Next(to)) => (Some(*to), None),
            Some(Edge::End) | None => (None, None),
            Some(Edge::Branch { router, full, short }) => {
                let decision = state.metadata.routing_decision.unwrap_or_else(|| router(state));
                let next = match decision {
                    RoutingDecision::FullAnalysis => *full,
                    RoutingDecision::ReportOnly => *short,
                };
                (Some(next), Some(decision))
            }
        }
    }

    /// First stage on the path that has not completed yet
    fn resume_point(&self, state: &WorkflowState) -> Option<StageId> {
        let mut current = Some(self.entry);
        while let Some(stage) = current {
            if !state.is_stage_completed(stage) {
                return Some(stage);
            }
            current = self.successor(stage, state).0;
        }
        None
    }

    /// Execute the full pipeline for a new workflow
    pub async fn run(
        &self,
        campaign_id: CampaignId,
        trigger_reason: &str,
        priority: Priority,
    ) -> WorkflowState {
        let state = WorkflowState::new(campaign_id, trigger_reason, priority);
        self.execute(state, &CancellationFlag::new()).await
    }

    /// Drive `state` to a terminal status
    pub async fn execute(&self, state: WorkflowState, cancel: &CancellationFlag) -> WorkflowState {
        self.drive(state, cancel, None).await
    }

    /// Like `execute`, but yields a snapshot after every checkpoint. The
    /// last item is the terminal state.
    pub fn stream(
        self: Arc<Self>,
        state: WorkflowState,
        cancel: CancellationFlag,
    ) -> ReceiverStream<WorkflowState> {
        let (tx, rx) = mpsc::channel(SNAPSHOT_BUFFER);
        tokio::spawn(async move {
            self.drive(state, &cancel, Some(&tx)).await;
        });
        ReceiverStream::new(rx)
    }

    /// Continue a workflow from its last checkpoint. Terminal workflows are
    /// returned unchanged.
    pub async fn resume(
        &self,
        workflow_id: &WorkflowId,
        cancel: &CancellationFlag,
    ) -> Result<WorkflowState> {
        let state = self
            .store
            .load(workflow_id)
            .await?
            .ok_or_else(|| {
                CampaignError::NotFound(format!("No checkpoint for workflow {}", workflow_id))
            })?;

        if state.is_terminal() {
            log::info!(
                "Workflow {} is already {}, nothing to resume",
                workflow_id,
                state.status
            );
            return Ok(state);
        }

        log::info!(
            "Resuming workflow {} from step {} ({} stages completed)",
            workflow_id,
            state.current_step,
            state.completed_stages.len()
        );
        Ok(self.drive(state, cancel, None).await)
    }

    async fn drive(
        &self,
        mut state: WorkflowState,
        cancel: &CancellationFlag,
        observer: Option<&mpsc::Sender<WorkflowState>>,
    ) -> WorkflowState {
        if state.is_terminal() {
            return state;
        }

        if state.status == WorkflowStatus::Pending {
            if !self.checkpoint(&mut state, observer).await {
                return self.finish(state, observer).await;
            }
            // PENDING -> RUNNING is always allowed
            let _ = state.transition(WorkflowStatus::Running);
            log::info!(
                "Workflow {} started for campaign {} ({})",
                state.workflow_id,
                state.campaign_id,
                state.trigger_reason
            );
            let message = format!(
                "Started for campaign {} ({})",
                state.campaign_id, state.trigger_reason
            );
            state.log(GRAPH_LOG_NAME, message);
        }

        let mut next = self.resume_point(&state);
        while let Some(stage_id) = next {
            if cancel.is_cancelled() {
                break;
            }

            let decision = self.enforcer.should_continue(&state.workflow_id, stage_id.as_str());
            if !decision.should_continue() {
                let error = CampaignError::GuardStop(decision.reason().to_string());
                state.fail("Enforcer", error.to_string());
                break;
            }

            let Some(stage) = self.stages.get(&stage_id).cloned() else {
                state.fail(GRAPH_LOG_NAME, format!("Stage {} is not registered", stage_id));
                break;
            };

            state.enter_step(stage_id.step());
            log::info!("Workflow {}: running stage {}", state.workflow_id, stage.name());

            match stage.execute(&mut state).await {
                Ok(outcome) => state.mark_stage_completed(stage_id, outcome.into_summary()),
                Err(e) => {
                    log::error!(
                        "Workflow {}: stage {} failed: {}",
                        state.workflow_id,
                        stage.name(),
                        e
                    );
                    let message = format!("Error in {}: {}", stage.name(), e);
                    state.log(stage.name(), &message);
                    if cancel.is_cancelled() {
                        // Cancellation wins over a stage error raised while it was pending
                        state.record_error(stage.name(), message);
                    } else {
                        state.fail(stage.name(), message);
                    }
                    break;
                }
            }

            let (following, decision) = self.successor(stage_id, &state);
            if let Some(decision) = decision {
                if state.metadata.routing_decision.is_none() {
                    let message =
                        format!("Routing decision after {}: {:?}", stage.name(), decision);
                    state.log(GRAPH_LOG_NAME, message);
                }
                state.metadata.routing_decision = Some(decision);
            }
            next = following;

            if !self.checkpoint(&mut state, observer).await {
                break;
            }
        }

        if state.status == WorkflowStatus::Running {
            let outcome = if cancel.is_cancelled() {
                WorkflowStatus::Cancelled
            } else {
                WorkflowStatus::Completed
            };
            if state.transition(outcome).is_ok() {
                log::info!("Workflow {} {}", state.workflow_id, outcome);
                state.log(GRAPH_LOG_NAME, format!("Workflow {}", outcome));
            }
        }

        self.finish(state, observer).await
    }

    /// Persist the terminal state and release guard counters
    async fn finish(
        &self,
        mut state: WorkflowState,
        observer: Option<&mpsc::Sender<WorkflowState>>,
    ) -> WorkflowState {
        self.checkpoint(&mut state, observer).await;
        if state.is_terminal() {
            self.enforcer.reset(&state.workflow_id);
        }
        state
    }

    /// Save the state and notify the observer. A failed save ends the run.
    async fn checkpoint(
        &self,
        state: &mut WorkflowState,
        observer: Option<&mpsc::Sender<WorkflowState>>,
    ) -> bool {
        let saved = match self.store.save(state).await {
            Ok(()) => true,
            Err(e) => {
                log::error!("Workflow {}: checkpoint failed: {}", state.workflow_id, e);
                if !state.is_terminal() {
                    state.fail("Checkpoint", format!("Checkpoint failed: {}", e));
                }
                false
            }
        };

        if let Some(tx) = observer {
            // A dropped receiver only loses progress updates
            let _ = tx.send(state.clone()).await;
        }
        saved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{InMemoryCheckpointStore, StageOutcome, StageSummary};
    use async_trait::async_trait;
    use campaign_types::WorkflowStep;

    struct NoopStage(StageId);

    #[async_trait]
    impl Stage for NoopStage {
        fn id(&self) -> StageId {
            self.0
        }

        async fn execute(&self, _state: &mut WorkflowState) -> Result<StageOutcome> {
            Ok(StageOutcome::skipped("noop"))
        }
    }

    fn store() -> Arc<dyn CheckpointStore> {
        Arc::new(InMemoryCheckpointStore::new())
    }

    #[test]
    fn test_compile_rejects_missing_edge() {
        let result = WorkflowGraph::builder()
            .add_stage(Arc::new(NoopStage(StageId::Monitor)))
            .entry(StageId::Monitor)
            .compile(Arc::new(Enforcer::default()), store());
        assert!(matches!(result, Err(CampaignError::Config(_))));
    }

    #[test]
    fn test_compile_rejects_cycle() {
        let result = WorkflowGraph::builder()
            .add_stage(Arc::new(NoopStage(StageId::Monitor)))
            .add_stage(Arc::new(NoopStage(StageId::Analysis)))
            .entry(StageId::Monitor)
            .edge(StageId::Monitor, StageId::Analysis)
            .edge(StageId::Analysis, StageId::Monitor)
            .compile(Arc::new(Enforcer::default()), store());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("loops back"));
    }

    #[tokio::test]
    async fn test_linear_graph_completes() {
        let graph = WorkflowGraph::builder()
            .add_stage(Arc::new(NoopStage(StageId::Monitor)))
            .add_stage(Arc::new(NoopStage(StageId::Reporting)))
            .entry(StageId::Monitor)
            .edge(StageId::Monitor, StageId::Reporting)
            .end(StageId::Reporting)
            .compile(Arc::new(Enforcer::default()), store())
            .unwrap();

        let state = graph.run(CampaignId::new("c"), "test", Priority::Low).await;
        assert_eq!(state.status, WorkflowStatus::Completed);
        assert_eq!(state.current_step, WorkflowStep::Completed);
        assert_eq!(state.completed_stages, vec![StageId::Monitor, StageId::Reporting]);
        assert_eq!(
            state.stage_outputs[&StageId::Monitor],
            StageSummary::Skipped { reason: "noop".to_string() }
        );
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let graph = WorkflowGraph::builder()
            .add_stage(Arc::new(NoopStage(StageId::Monitor)))
            .entry(StageId::Monitor)
            .end(StageId::Monitor)
            .compile(Arc::new(Enforcer::default()), store())
            .unwrap();

        let cancel = CancellationFlag::new();
        cancel.cancel();
        let state = graph
            .execute(WorkflowState::new(CampaignId::new("c"), "test", Priority::Low), &cancel)
            .await;
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        assert!(state.completed_stages.is_empty());
    }

    /// Stage that is cancelled while in flight and then errors out
    struct CancelledThenFailingStage(CancellationFlag);

    #[async_trait]
    impl Stage for CancelledThenFailingStage {
        fn id(&self) -> StageId {
            StageId::Monitor
        }

        async fn execute(&self, _state: &mut WorkflowState) -> Result<StageOutcome> {
            self.0.cancel();
            Err(CampaignError::DataSource("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stage_error_after_cancel_ends_cancelled() {
        let cancel = CancellationFlag::new();
        let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
        let graph = WorkflowGraph::builder()
            .add_stage(Arc::new(CancelledThenFailingStage(cancel.clone())))
            .add_stage(Arc::new(NoopStage(StageId::Reporting)))
            .entry(StageId::Monitor)
            .edge(StageId::Monitor, StageId::Reporting)
            .end(StageId::Reporting)
            .compile(Arc::new(Enforcer::default()), checkpoints.clone())
            .unwrap();

        let state = graph
            .execute(WorkflowState::new(CampaignId::new("c"), "test", Priority::Low), &cancel)
            .await;
        assert_eq!(state.status, WorkflowStatus::Cancelled);
        assert!(state.error_message.is_none());
        assert_eq!(state.errors.len(), 1);
        assert!(state.errors[0].message.contains("connection reset"));

        let saved = checkpoints.load(&state.workflow_id).await.unwrap().unwrap();
        assert_eq!(saved.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_enforcer_stop_fails_workflow() {
        let graph = WorkflowGraph::builder()
            .add_stage(Arc::new(NoopStage(StageId::Monitor)))
            .add_stage(Arc::new(NoopStage(StageId::Reporting)))
            .entry(StageId::Monitor)
            .edge(StageId::Monitor, StageId::Reporting)
            .end(StageId::Reporting)
            .compile(Arc::new(Enforcer::new(1, 3)), store())
            .unwrap();

        let state = graph.run(CampaignId::new("c"), "test", Priority::Low).await;
        assert_eq!(state.status, WorkflowStatus::Failed);
        assert!(state
            .error_message
            .unwrap()
            .contains("Maximum iterations exceeded (2/1)"));
        assert_eq!(state.completed_stages, vec![StageId::Monitor]);
    }
}
