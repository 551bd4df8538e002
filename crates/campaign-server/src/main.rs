//! Campaign workflow executable
//!
//! Runs a single workflow, resumes one from its checkpoint, or starts the
//! periodic monitoring scheduler.

use anyhow::Context;
use campaign_core::{
    clients::{CampaignDataSource, CompletionService, ToolGateway},
    CampaignConfig, CancellationFlag, CheckpointStore, Collaborators, Coordinator, Enforcer,
    FileCheckpointStore, Grader, Guards, HttpCampaignSource, HttpToolGateway,
    MonitoringScheduler, OpenAiCompletionClient, StaticCampaignSource, WorkflowGraph, WorkflowId,
    WorkflowState,
};
use campaign_types::{CampaignId, Priority};
use clap::{Arg, ArgAction, Command};
use futures::StreamExt;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with INFO as default if RUST_LOG not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("campaign-server")
        .version("1.0.0")
        .about("Campaign monitoring and optimization workflow engine")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .value_name("FILE")
                .help("Configuration file path (JSON or TOML)")
                .env("CAMPAIGN_CONFIG")
                .default_value("config/campaign.toml"),
        )
        .arg(
            Arg::new("campaign-id")
                .long("campaign-id")
                .value_name("ID")
                .help("Run one workflow for this campaign"),
        )
        .arg(
            Arg::new("priority")
                .long("priority")
                .value_name("PRIORITY")
                .help("Priority for --campaign-id (low, medium, high, critical)")
                .default_value("medium"),
        )
        .arg(
            Arg::new("reason")
                .long("reason")
                .value_name("TEXT")
                .help("Trigger reason recorded on the workflow")
                .default_value("manual"),
        )
        .arg(
            Arg::new("resume")
                .long("resume")
                .value_name("WORKFLOW_ID")
                .help("Resume a workflow from its last checkpoint"),
        )
        .arg(
            Arg::new("status")
                .long("status")
                .value_name("WORKFLOW_ID")
                .help("Print the last checkpoint of a workflow"),
        )
        .arg(
            Arg::new("scheduler")
                .long("scheduler")
                .help("Run the periodic monitoring scheduler until interrupted")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .context("missing --config")?;
    let config = CampaignConfig::from_file(config_path)?;
    log::info!("Loaded configuration from {}", config_path);

    let store: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpointStore::new(&config.engine.checkpoint_dir)?);
    log::info!("Checkpoints stored in {}", config.engine.checkpoint_dir.display());

    let collaborators = build_collaborators(&config)?;
    let guards = Guards {
        enforcer: Arc::new(Enforcer::from_config(&config.guards)),
        grader: collaborators
            .completion
            .clone()
            .filter(|_| config.engine.grade_narratives)
            .map(|completion| Arc::new(Grader::new(completion))),
    };
    let graph = Arc::new(WorkflowGraph::campaign_pipeline(
        &collaborators,
        &guards,
        store.clone(),
        &config.engine,
    )?);
    log::info!("Workflow graph compiled");

    if let Some(workflow_id) = matches.get_one::<String>("status") {
        let workflow_id = WorkflowId::from_string(workflow_id)?;
        match store.load(&workflow_id).await? {
            Some(state) => print_state(&state)?,
            None => anyhow::bail!("No checkpoint for workflow {}", workflow_id),
        }
    } else if let Some(workflow_id) = matches.get_one::<String>("resume") {
        let workflow_id = WorkflowId::from_string(workflow_id)?;
        let state = graph.resume(&workflow_id, &CancellationFlag::new()).await?;
        print_state(&state)?;
    } else if let Some(campaign_id) = matches.get_one::<String>("campaign-id") {
        let priority: Priority = matches
            .get_one::<String>("priority")
            .context("missing --priority")?
            .parse()?;
        let reason = matches.get_one::<String>("reason").context("missing --reason")?;

        let campaign_id = CampaignId::new(campaign_id.as_str());
        let state = run_single(graph, campaign_id, reason, priority).await?;
        print_state(&state)?;
    } else if matches.get_flag("scheduler") {
        run_scheduler(graph, collaborators.data_source.clone(), &config).await;
    } else {
        log::info!("No mode selected. Use --campaign-id, --resume, --status or --scheduler");
    }

    Ok(())
}

fn build_collaborators(config: &CampaignConfig) -> anyhow::Result<Collaborators> {
    let source_config = &config.data_source;
    let location = (&source_config.fixture_path, &source_config.base_url);
    let data_source: Arc<dyn CampaignDataSource> = match location {
        (Some(path), _) => {
            log::info!("Using campaign fixture {}", path.display());
            Arc::new(StaticCampaignSource::from_fixture(path)?)
        }
        (None, Some(_)) => Arc::new(HttpCampaignSource::from_config(source_config)?),
        (None, None) => anyhow::bail!("data_source needs either base_url or fixture_path"),
    };

    let completion: Option<Arc<dyn CompletionService>> =
        if config.engine.narratives_enabled || config.engine.grade_narratives {
            Some(Arc::new(OpenAiCompletionClient::new(config.completion.clone())?))
        } else {
            None
        };

    let tool_gateway: Option<Arc<dyn ToolGateway>> =
        match HttpToolGateway::from_config(&config.tool_gateway)? {
            Some(gateway) => Some(Arc::new(gateway)),
            None => None,
        };

    Ok(Collaborators {
        data_source,
        completion,
        tool_gateway,
    })
}

async fn run_single(
    graph: Arc<WorkflowGraph>,
    campaign_id: CampaignId,
    reason: &str,
    priority: Priority,
) -> anyhow::Result<WorkflowState> {
    let state = WorkflowState::new(campaign_id, reason, priority);
    log::info!(
        "Running workflow {} for campaign {}",
        state.workflow_id,
        state.campaign_id
    );

    let mut snapshots = graph.stream(state, CancellationFlag::new());
    let mut last = None;
    while let Some(snapshot) = snapshots.next().await {
        log::info!(
            "[{}] {} {:.0}%",
            snapshot.status,
            snapshot.current_step,
            snapshot.progress * 100.0
        );
        last = Some(snapshot);
    }
    last.context("workflow produced no state")
}

async fn run_scheduler(
    graph: Arc<WorkflowGraph>,
    data_source: Arc<dyn CampaignDataSource>,
    config: &CampaignConfig,
) {
    let coordinator = Arc::new(Coordinator::new(graph, data_source, config.coordinator.clone()));
    let scheduler = MonitoringScheduler::from_config(coordinator, config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Shutdown requested"),
            Err(e) => log::error!("Failed to listen for shutdown signal: {}", e),
        }
        let _ = shutdown_tx.send(true);
    });

    scheduler.run(shutdown_rx).await;
}

fn print_state(state: &WorkflowState) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}
