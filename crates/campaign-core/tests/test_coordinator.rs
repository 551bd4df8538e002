mod common;

use campaign_core::config::CoordinatorConfig;
use campaign_core::workflow::HealthStatus;
use campaign_core::{
    CheckpointStore, Coordinator, InMemoryCheckpointStore, MonitoringScheduler, WorkflowId,
};
use campaign_types::{CampaignId, Priority, WorkflowStatus, WorkflowTask};
use chrono::{Duration, Utc};
use common::*;
use std::sync::Arc;

fn coordinator(source: Arc<RecordingSource>, config: CoordinatorConfig) -> Arc<Coordinator> {
    coordinator_with_store(source, config).0
}

fn coordinator_with_store(
    source: Arc<RecordingSource>,
    config: CoordinatorConfig,
) -> (Arc<Coordinator>, Arc<InMemoryCheckpointStore>) {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let graph = Arc::new(pipeline(source.clone(), store.clone()));
    (Arc::new(Coordinator::new(graph, source, config)), store)
}

fn sequential() -> CoordinatorConfig {
    CoordinatorConfig {
        max_concurrent_workflows: 1,
        ..CoordinatorConfig::default()
    }
}

#[tokio::test]
async fn test_failed_task_backs_off_then_drops() {
    init_logging();
    let source = Arc::new(RecordingSource::new(Vec::new()));
    let coordinator = coordinator(source, CoordinatorConfig::default());

    let scheduled = coordinator.schedule_monitoring(&[CampaignId::new("ghost")]).await;
    assert_eq!(scheduled.len(), 1);
    let queued = coordinator.queued_tasks().await;
    assert_eq!(queued[0].priority, Priority::Medium, "unreadable campaigns fall back to medium");

    let t0 = Utc::now();
    let first = coordinator.process_task_queue_at(t0).await;
    assert_eq!((first.started, first.rescheduled), (1, 1));
    let queued = coordinator.queued_tasks().await;
    assert_eq!(queued[0].retry_count, 1);
    assert_eq!(queued[0].scheduled_at, t0 + Duration::minutes(5));

    let early = coordinator.process_task_queue_at(t0 + Duration::minutes(1)).await;
    assert_eq!(early.started, 0, "task is not due yet");

    let t1 = t0 + Duration::minutes(5);
    let second = coordinator.process_task_queue_at(t1).await;
    assert_eq!(second.rescheduled, 1);
    let queued = coordinator.queued_tasks().await;
    assert_eq!(queued[0].retry_count, 2);
    assert_eq!(queued[0].scheduled_at, t1 + Duration::minutes(10));

    let third = coordinator.process_task_queue_at(t1 + Duration::minutes(10)).await;
    assert_eq!(third.dropped, 1);
    assert!(coordinator.queued_tasks().await.is_empty());

    let dropped = coordinator.dropped_tasks().await;
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].task.retry_count, 3);
    assert!(dropped[0].last_error.contains("Error in CampaignMonitor"));

    let metrics = coordinator.get_workflow_metrics().await;
    assert_eq!(metrics.status, HealthStatus::Degraded);
    assert_eq!(metrics.dropped_tasks, 1);
    assert_eq!(metrics.by_status.get(&WorkflowStatus::Failed), 3);
}

#[tokio::test]
async fn test_task_without_retries_drops_on_first_failure() {
    let source = Arc::new(RecordingSource::new(Vec::new()));
    let coordinator = coordinator(source, CoordinatorConfig::default());

    coordinator
        .enqueue(
            WorkflowTask::new(CampaignId::new("ghost"), Priority::Medium, "test")
                .with_max_retries(0),
        )
        .await;
    let summary = coordinator.process_task_queue_at(Utc::now()).await;
    assert_eq!((summary.started, summary.rescheduled, summary.dropped), (1, 0, 1));
    assert!(coordinator.queued_tasks().await.is_empty());

    let dropped = coordinator.dropped_tasks().await;
    assert_eq!(dropped.len(), 1);
    assert_eq!(dropped[0].task.max_retries, 0);
    assert!(dropped[0].task.retry_count <= dropped[0].task.max_retries);
}

#[tokio::test]
async fn test_cancelled_task_is_not_retried() {
    init_logging();
    let source = Arc::new(
        RecordingSource::new(Vec::new()).with_delay(std::time::Duration::from_millis(300)),
    );
    let (coordinator, store) = coordinator_with_store(source, CoordinatorConfig::default());
    coordinator
        .enqueue(WorkflowTask::new(CampaignId::new("ghost"), Priority::High, "test"))
        .await;

    let worker = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.process_task_queue_at(Utc::now()).await })
    };

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    let active = coordinator.list_active_workflows().await;
    assert_eq!(active.len(), 1);
    let id = active[0].workflow_id.clone();
    assert!(coordinator.cancel_workflow(&id).await);

    let summary = worker.await.unwrap();
    assert_eq!((summary.started, summary.cancelled), (1, 1));
    assert_eq!((summary.rescheduled, summary.dropped), (0, 0));
    assert!(coordinator.queued_tasks().await.is_empty());
    assert!(coordinator.dropped_tasks().await.is_empty());

    let state = coordinator.get_workflow_status(&id).await.unwrap().unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);

    let saved = store.load(&id).await.unwrap().unwrap();
    assert_eq!(saved.status, WorkflowStatus::Cancelled);
    assert!(saved.error_message.is_none());
}

#[tokio::test]
async fn test_due_tasks_run_in_priority_order() {
    let source = Arc::new(RecordingSource::new(vec![
        healthy_campaign("low"),
        healthy_campaign("high"),
        healthy_campaign("critical"),
    ]));
    let coordinator = coordinator(source.clone(), sequential());

    coordinator
        .enqueue(WorkflowTask::new(CampaignId::new("low"), Priority::Low, "test"))
        .await;
    coordinator
        .enqueue(WorkflowTask::new(CampaignId::new("high"), Priority::High, "test"))
        .await;
    coordinator
        .enqueue(WorkflowTask::new(CampaignId::new("critical"), Priority::Critical, "test"))
        .await;

    let summary = coordinator.process_task_queue_at(Utc::now() + Duration::seconds(1)).await;
    assert_eq!(summary.completed, 3);
    assert_eq!(
        source.fetched(),
        vec![CampaignId::new("critical"), CampaignId::new("high"), CampaignId::new("low")]
    );
}

#[tokio::test]
async fn test_schedule_monitoring_derives_priority_and_deduplicates() {
    let source = Arc::new(RecordingSource::new(vec![
        struggling_campaign("bad"),
        healthy_campaign("good"),
    ]));
    let coordinator = coordinator(source, CoordinatorConfig::default());

    let ids = [CampaignId::new("bad"), CampaignId::new("good"), CampaignId::new("bad")];
    assert_eq!(coordinator.schedule_monitoring(&ids).await.len(), 2);
    assert!(coordinator.schedule_monitoring(&ids).await.is_empty());

    let queued = coordinator.queued_tasks().await;
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].campaign_id, CampaignId::new("bad"));
    assert_eq!(queued[0].priority, Priority::High);
    assert_eq!(queued[1].priority, Priority::Low);
    assert_eq!(queued[0].payload.trigger_reason, "scheduled_monitoring");
}

#[tokio::test]
async fn test_cancel_running_workflow() {
    let source = Arc::new(
        RecordingSource::new(vec![struggling_campaign("c-1")])
            .with_delay(std::time::Duration::from_millis(200)),
    );
    let coordinator = coordinator(source, CoordinatorConfig::default());

    let id = coordinator
        .start_workflow(CampaignId::new("c-1"), "manual", Priority::High)
        .await;
    assert_eq!(coordinator.list_active_workflows().await.len(), 1);

    assert!(coordinator.cancel_workflow(&id).await);
    assert!(coordinator.list_active_workflows().await.is_empty());
    assert!(!coordinator.cancel_workflow(&id).await, "second cancel is a no-op");

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let state = coordinator.get_workflow_status(&id).await.unwrap().unwrap();
    assert_eq!(state.status, WorkflowStatus::Cancelled);
    assert!(coordinator.list_active_workflows().await.is_empty());

    let history = coordinator.get_workflow_history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].workflow_id, id);
}

#[tokio::test]
async fn test_cancel_unknown_workflow() {
    let source = Arc::new(RecordingSource::new(Vec::new()));
    let coordinator = coordinator(source, CoordinatorConfig::default());
    assert!(!coordinator.cancel_workflow(&WorkflowId::new()).await);
    assert!(coordinator.get_workflow_status(&WorkflowId::new()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_metrics_cleanup_and_bounded_history() {
    let source = Arc::new(RecordingSource::new(vec![
        healthy_campaign("a"),
        healthy_campaign("b"),
        struggling_campaign("c"),
    ]));
    let config = CoordinatorConfig {
        history_limit: 2,
        ..CoordinatorConfig::default()
    };
    let coordinator = coordinator(source, config);

    let first = coordinator.execute_workflow(CampaignId::new("a"), "manual", Priority::Low).await;
    coordinator.execute_workflow(CampaignId::new("b"), "manual", Priority::Low).await;
    let last = coordinator.execute_workflow(CampaignId::new("c"), "manual", Priority::High).await;
    assert_eq!(last.status, WorkflowStatus::Completed);

    let metrics = coordinator.get_workflow_metrics().await;
    assert_eq!(metrics.status, HealthStatus::Healthy);
    assert_eq!(metrics.total_active, 3);
    assert_eq!(metrics.by_status.get(&WorkflowStatus::Completed), 3);
    assert_eq!(metrics.by_priority.get(&Priority::Low), 2);
    assert_eq!(metrics.queue_depth, 0);

    assert_eq!(coordinator.cleanup_completed().await, 3);
    assert!(coordinator.list_active_workflows().await.is_empty());

    let history = coordinator.get_workflow_history(10).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].workflow_id, last.workflow_id);

    // Evicted from history but still in the checkpoint store
    let status = coordinator.get_workflow_status(&first.workflow_id).await.unwrap();
    assert_eq!(status.unwrap().status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn test_scheduler_tick() {
    let source = Arc::new(RecordingSource::new(vec![
        struggling_campaign("c-1"),
        healthy_campaign("c-2"),
    ]));
    let coordinator = coordinator(source, CoordinatorConfig::default());
    let scheduler = MonitoringScheduler::new(
        coordinator.clone(),
        vec![CampaignId::new("c-1"), CampaignId::new("c-2")],
        std::time::Duration::from_secs(60),
    );

    let report = scheduler.tick().await;
    assert_eq!(report.scheduled, 2);
    assert_eq!(report.queue.completed, 2);
    assert_eq!(report.cleaned_up, 2);
    assert_eq!(coordinator.get_workflow_history(10).await.len(), 2);
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let source = Arc::new(RecordingSource::new(vec![healthy_campaign("c-1")]));
    let coordinator = coordinator(source, CoordinatorConfig::default());
    let scheduler = MonitoringScheduler::new(
        coordinator,
        vec![CampaignId::new("c-1")],
        std::time::Duration::from_secs(3600),
    );

    let (tx, rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(async move { scheduler.run(rx).await });
    tx.send(true).unwrap();

    tokio::time::timeout(std::time::Duration::from_secs(5), handle)
        .await
        .expect("scheduler should stop")
        .unwrap();
}
