//! Coordinator: priority task queue and active-workflow table
//!
//! All shared bookkeeping lives in one mutex-guarded inner struct, so
//! workflows completing concurrently never lose each other's updates.
//! Running workflows report progress through the graph's snapshot stream.

use super::graph::{CancellationFlag, WorkflowGraph};
use super::state::{WorkflowId, WorkflowState};
use crate::clients::CampaignDataSource;
use crate::config::CoordinatorConfig;
use crate::constants::*;
use crate::error::Result;
use campaign_types::{
    CampaignData, CampaignId, Priority, TaskId, WorkflowStatus, WorkflowStep, WorkflowTask,
};
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Priority of a monitoring task derived from current campaign metrics
pub fn derive_priority(campaign: &CampaignData) -> Priority {
    let metrics = &campaign.metrics;
    let near_budget = campaign
        .spend_ratio()
        .map(|ratio| ratio > PRIORITY_HIGH_SPEND_RATIO)
        .unwrap_or(false);

    if near_budget || metrics.ctr < PRIORITY_HIGH_CTR || metrics.roas < PRIORITY_HIGH_ROAS {
        Priority::High
    } else if metrics.cpc > PRIORITY_MEDIUM_CPC || metrics.ctr < PRIORITY_MEDIUM_CTR {
        Priority::Medium
    } else {
        Priority::Low
    }
}

/// Count map for statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountMap<K: Eq + Hash> {
    counts: HashMap<K, usize>,
}

impl<K: Eq + Hash> CountMap<K> {
    pub fn new() -> Self {
        Self {
            counts: HashMap::new(),
        }
    }

    pub fn increment(&mut self, key: K) {
        *self.counts.entry(key).or_insert(0) += 1;
    }

    pub fn get(&self, key: &K) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

impl<K: Eq + Hash> Default for CountMap<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    /// Some tasks were dropped or active workflows failed
    Degraded,
}

/// Aggregate view returned by `get_workflow_metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub status: HealthStatus,
    pub total_active: usize,
    pub by_status: CountMap<WorkflowStatus>,
    pub by_priority: CountMap<Priority>,
    pub queue_depth: usize,
    pub dropped_tasks: usize,
    pub history_size: usize,
    pub generated_at: DateTime<Utc>,
}

/// Compact listing entry for an active workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: WorkflowId,
    pub campaign_id: CampaignId,
    pub status: WorkflowStatus,
    pub priority: Priority,
    pub current_step: WorkflowStep,
    pub progress: f64,
    pub started_at: DateTime<Utc>,
}

impl From<&WorkflowState> for WorkflowSummary {
    fn from(state: &WorkflowState) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            campaign_id: state.campaign_id.clone(),
            status: state.status,
            priority: state.priority,
            current_step: state.current_step,
            progress: state.progress,
            started_at: state.started_at,
        }
    }
}

/// A task removed from the queue after exhausting its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedTask {
    pub task: WorkflowTask,
    pub last_error: String,
    pub last_workflow_id: WorkflowId,
    pub dropped_at: DateTime<Utc>,
}

/// What one `process_task_queue` pass did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRunSummary {
    pub started: usize,
    pub completed: usize,
    pub rescheduled: usize,
    pub dropped: usize,
    pub cancelled: usize,
}

/// Heap entry: higher priority first, then earlier schedule, then FIFO
struct QueuedTask {
    task: WorkflowTask,
    sequence: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        self.task
            .priority
            .cmp(&other.task.priority)
            .then_with(|| other.task.scheduled_at.cmp(&self.task.scheduled_at))
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct ActiveWorkflow {
    state: WorkflowState,
    cancel: CancellationFlag,
}

#[derive(Default)]
struct CoordinatorInner {
    active: HashMap<WorkflowId, ActiveWorkflow>,
    history: VecDeque<WorkflowState>,
    queue: BinaryHeap<QueuedTask>,
    dropped: Vec<DroppedTask>,
    next_sequence: u64,
}

impl CoordinatorInner {
    fn push_task(&mut self, task: WorkflowTask) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue.push(QueuedTask { task, sequence });
    }

    fn push_history(&mut self, state: WorkflowState, limit: usize) {
        self.history.push_back(state);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

enum TaskOutcome {
    Completed,
    Rescheduled,
    Dropped,
    Cancelled,
}

pub struct Coordinator {
    graph: Arc<WorkflowGraph>,
    data_source: Arc<dyn CampaignDataSource>,
    config: CoordinatorConfig,
    inner: Mutex<CoordinatorInner>,
}

impl Coordinator {
    pub fn new(
        graph: Arc<WorkflowGraph>,
        data_source: Arc<dyn CampaignDataSource>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            graph,
            data_source,
            config,
            inner: Mutex::new(CoordinatorInner::default()),
        }
    }

    async fn register(&self, state: &WorkflowState) -> CancellationFlag {
        let cancel = CancellationFlag::new();
        self.inner.lock().await.active.insert(
            state.workflow_id.clone(),
            ActiveWorkflow {
                state: state.clone(),
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Record a snapshot unless the workflow has left the active table
    async fn observe(&self, snapshot: &WorkflowState) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.active.get_mut(&snapshot.workflow_id) {
            entry.state = snapshot.clone();
        }
    }

    async fn drive(&self, state: WorkflowState, cancel: CancellationFlag) -> WorkflowState {
        let mut last = state.clone();
        let mut snapshots = self.graph.clone().stream(state, cancel);
        while let Some(snapshot) = snapshots.next().await {
            self.observe(&snapshot).await;
            last = snapshot;
        }
        last
    }

    /// Start a workflow as a managed background task and return its id
    pub async fn start_workflow(
        self: &Arc<Self>,
        campaign_id: CampaignId,
        trigger_reason: &str,
        priority: Priority,
    ) -> WorkflowId {
        let state = WorkflowState::new(campaign_id, trigger_reason, priority);
        let workflow_id = state.workflow_id.clone();
        let cancel = self.register(&state).await;

        log::info!(
            "Starting workflow {} for campaign {} (priority: {})",
            workflow_id,
            state.campaign_id,
            priority
        );

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            coordinator.drive(state, cancel).await;
        });
        workflow_id
    }

    /// Run a workflow to its terminal state
    pub async fn execute_workflow(
        &self,
        campaign_id: CampaignId,
        trigger_reason: &str,
        priority: Priority,
    ) -> WorkflowState {
        let state = WorkflowState::new(campaign_id, trigger_reason, priority);
        let cancel = self.register(&state).await;
        self.drive(state, cancel).await
    }

    async fn execute_task(&self, task: &WorkflowTask) -> (WorkflowState, CancellationFlag) {
        let state = WorkflowState::new(
            task.campaign_id.clone(),
            &task.payload.trigger_reason,
            task.priority,
        );
        let cancel = self.register(&state).await;
        let state = self.drive(state, cancel.clone()).await;
        (state, cancel)
    }

    /// Add a task to the queue
    pub async fn enqueue(&self, task: WorkflowTask) -> TaskId {
        let task_id = task.task_id.clone();
        log::debug!(
            "Queued task {} for campaign {} (priority: {})",
            task_id,
            task.campaign_id,
            task.priority
        );
        self.inner.lock().await.push_task(task);
        task_id
    }

    /// Enqueue one monitoring task per campaign, prioritised from its current
    /// metrics. Campaigns that already have a queued task are skipped.
    pub async fn schedule_monitoring(&self, campaign_ids: &[CampaignId]) -> Vec<TaskId> {
        let mut scheduled = Vec::new();

        for campaign_id in campaign_ids {
            let already_queued = self
                .inner
                .lock()
                .await
                .queue
                .iter()
                .any(|q| &q.task.campaign_id == campaign_id);
            if already_queued {
                log::debug!("Campaign {} already has a queued task", campaign_id);
                continue;
            }

            let priority = match self.current_campaign(campaign_id).await {
                Ok(campaign) => derive_priority(&campaign),
                Err(e) => {
                    log::warn!(
                        "Could not read metrics for campaign {}, scheduling at medium priority: {}",
                        campaign_id,
                        e
                    );
                    Priority::Medium
                }
            };

            let task = WorkflowTask::new(campaign_id.clone(), priority, SCHEDULED_MONITORING_REASON)
                .with_max_retries(self.config.max_retries);
            scheduled.push(self.enqueue(task).await);
        }

        log::info!("Scheduled monitoring for {} campaigns", scheduled.len());
        scheduled
    }

    async fn current_campaign(&self, campaign_id: &CampaignId) -> Result<CampaignData> {
        let entity = self.data_source.fetch(campaign_id).await?;
        let metrics = self.data_source.fetch_insights(campaign_id).await?;
        Ok(CampaignData::new(entity, metrics))
    }

    /// Run every due task, highest priority first
    pub async fn process_task_queue(&self) -> QueueRunSummary {
        self.process_task_queue_at(Utc::now()).await
    }

    /// Run every task due at `now`. Failed tasks are rescheduled
    /// `backoff × retry_count` minutes after `now` until their retries run out.
    pub async fn process_task_queue_at(&self, now: DateTime<Utc>) -> QueueRunSummary {
        let due = {
            let mut inner = self.inner.lock().await;
            let mut due = Vec::new();
            let mut waiting = Vec::new();
            while let Some(queued) = inner.queue.pop() {
                if queued.task.is_due(now) {
                    due.push(queued.task);
                } else {
                    waiting.push(queued);
                }
            }
            inner.queue.extend(waiting);
            due
        };

        let mut summary = QueueRunSummary {
            started: due.len(),
            ..QueueRunSummary::default()
        };
        if due.is_empty() {
            return summary;
        }

        log::info!("Processing {} due tasks", due.len());
        let outcomes: Vec<TaskOutcome> = futures::stream::iter(due)
            .map(|task| self.run_task(task, now))
            .buffer_unordered(self.config.max_concurrent_workflows.max(1))
            .collect()
            .await;

        for outcome in outcomes {
            match outcome {
                TaskOutcome::Completed => summary.completed += 1,
                TaskOutcome::Rescheduled => summary.rescheduled += 1,
                TaskOutcome::Dropped => summary.dropped += 1,
                TaskOutcome::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    async fn run_task(&self, mut task: WorkflowTask, now: DateTime<Utc>) -> TaskOutcome {
        let (state, cancel) = self.execute_task(&task).await;
        if cancel.is_cancelled() {
            log::info!(
                "Task {} for campaign {} cancelled, not retrying",
                task.task_id,
                task.campaign_id
            );
            return TaskOutcome::Cancelled;
        }

        match state.status {
            WorkflowStatus::Completed => TaskOutcome::Completed,
            WorkflowStatus::Cancelled => TaskOutcome::Cancelled,
            _ => {
                let error = state
                    .error_message
                    .clone()
                    .unwrap_or_else(|| format!("Workflow ended as {}", state.status));
                task.retry_count = (task.retry_count + 1).min(task.max_retries);

                let mut inner = self.inner.lock().await;
                if !task.retries_exhausted() {
                    let backoff = self.config.retry_backoff_minutes * i64::from(task.retry_count);
                    let delay = Duration::minutes(backoff);
                    task.scheduled_at = now + delay;
                    log::warn!(
                        "Task {} for campaign {} failed (attempt {}/{}), retrying at {}: {}",
                        task.task_id,
                        task.campaign_id,
                        task.retry_count,
                        task.max_retries,
                        task.scheduled_at,
                        error
                    );
                    inner.push_task(task);
                    TaskOutcome::Rescheduled
                } else {
                    log::error!(
                        "Task {} for campaign {} dropped after {} attempts: {}",
                        task.task_id,
                        task.campaign_id,
                        task.retry_count,
                        error
                    );
                    inner.dropped.push(DroppedTask {
                        task,
                        last_error: error,
                        last_workflow_id: state.workflow_id.clone(),
                        dropped_at: Utc::now(),
                    });
                    TaskOutcome::Dropped
                }
            }
        }
    }

    /// Mark an active workflow CANCELLED and remove it from the active table.
    /// The running graph stops at its next stage boundary.
    pub async fn cancel_workflow(&self, workflow_id: &WorkflowId) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(mut entry) = inner.active.remove(workflow_id) else {
            return false;
        };

        if entry.state.is_terminal() {
            // Already finished; keep it for cleanup
            inner.active.insert(workflow_id.clone(), entry);
            return false;
        }

        entry.cancel.cancel();
        if let Err(e) = entry.state.transition(WorkflowStatus::Cancelled) {
            log::warn!("Cancelling workflow {}: {}", workflow_id, e);
        }
        entry.state.log("Coordinator", "Workflow cancelled");
        log::info!("Cancelled workflow {}", workflow_id);

        inner.push_history(entry.state, self.config.history_limit);
        true
    }

    /// Move terminal workflows from the active table into history
    pub async fn cleanup_completed(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let finished: Vec<WorkflowId> = inner
            .active
            .iter()
            .filter(|(_, entry)| entry.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();

        let mut states: Vec<WorkflowState> = finished
            .iter()
            .filter_map(|id| inner.active.remove(id))
            .map(|entry| entry.state)
            .collect();
        states.sort_by_key(|s| s.completed_at);
        for state in states {
            inner.push_history(state, self.config.history_limit);
        }

        if !finished.is_empty() {
            log::info!("Cleaned up {} finished workflows", finished.len());
        }
        finished.len()
    }

    /// Look a workflow up in the active table, then history, then the
    /// checkpoint store
    pub async fn get_workflow_status(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<WorkflowState>> {
        {
            let inner = self.inner.lock().await;
            if let Some(entry) = inner.active.get(workflow_id) {
                return Ok(Some(entry.state.clone()));
            }
            if let Some(state) = inner.history.iter().find(|s| &s.workflow_id == workflow_id) {
                return Ok(Some(state.clone()));
            }
        }
        self.graph.store().load(workflow_id).await
    }

    pub async fn list_active_workflows(&self) -> Vec<WorkflowSummary> {
        let inner = self.inner.lock().await;
        let mut summaries: Vec<WorkflowSummary> =
            inner.active.values().map(|entry| WorkflowSummary::from(&entry.state)).collect();
        summaries.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        summaries
    }

    /// Most recent finished workflows first
    pub async fn get_workflow_history(&self, limit: usize) -> Vec<WorkflowState> {
        let inner = self.inner.lock().await;
        inner.history.iter().rev().take(limit).cloned().collect()
    }

    pub async fn get_workflow_metrics(&self) -> WorkflowMetrics {
        let inner = self.inner.lock().await;

        let mut by_status = CountMap::new();
        let mut by_priority = CountMap::new();
        for entry in inner.active.values() {
            by_status.increment(entry.state.status);
            by_priority.increment(entry.state.priority);
        }

        let status = if inner.dropped.is_empty() && by_status.get(&WorkflowStatus::Failed) == 0 {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        WorkflowMetrics {
            status,
            total_active: inner.active.len(),
            by_status,
            by_priority,
            queue_depth: inner.queue.len(),
            dropped_tasks: inner.dropped.len(),
            history_size: inner.history.len(),
            generated_at: Utc::now(),
        }
    }

    /// Queued tasks in the order they would be admitted
    pub async fn queued_tasks(&self) -> Vec<WorkflowTask> {
        let inner = self.inner.lock().await;
        let mut queued: Vec<&QueuedTask> = inner.queue.iter().collect();
        queued.sort_by(|a, b| b.cmp(a));
        queued.into_iter().map(|q| q.task.clone()).collect()
    }

    pub async fn dropped_tasks(&self) -> Vec<DroppedTask> {
        self.inner.lock().await.dropped.clone()
    }
}
