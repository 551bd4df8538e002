//! Shared fixtures and test doubles for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use campaign_core::clients::{CampaignDataSource, CompletionService, StaticCampaignSource};
use campaign_core::config::EngineConfig;
use campaign_core::{
    CampaignError, CheckpointStore, Collaborators, Enforcer, Grader, Guards, Result, WorkflowGraph,
};
use campaign_types::{CampaignData, CampaignEntity, CampaignId, MetricSnapshot};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Route engine logs to the test harness; `RUST_LOG=debug` shows them
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn campaign(id: &str, budget: f64, spend: f64, metrics: MetricSnapshot) -> CampaignData {
    CampaignData::new(
        CampaignEntity {
            id: CampaignId::new(id),
            name: format!("Campaign {}", id),
            platform: "facebook".to_string(),
            status: "active".to_string(),
            budget,
            spend,
        },
        metrics,
    )
}

/// Low CTR, 90% of budget spent: two HIGH alerts, one creative recommendation
pub fn struggling_campaign(id: &str) -> CampaignData {
    campaign(
        id,
        10_000.0,
        9_000.0,
        MetricSnapshot {
            impressions: 100_000,
            clicks: 300,
            conversions: 9,
            cpm: 90.0,
            cpc: 2.0,
            ctr: 0.3,
            conversion_rate: 3.0,
            roas: 0.0,
        },
    )
}

/// Nothing triggers an alert
pub fn healthy_campaign(id: &str) -> CampaignData {
    campaign(
        id,
        10_000.0,
        1_000.0,
        MetricSnapshot {
            impressions: 50_000,
            clicks: 1_250,
            conversions: 50,
            cpm: 20.0,
            cpc: 0.8,
            ctr: 2.5,
            conversion_rate: 4.0,
            roas: 4.0,
        },
    )
}

/// Records the order of `fetch` calls and can delay them
pub struct RecordingSource {
    inner: StaticCampaignSource,
    delay: Option<Duration>,
    pub fetched: Mutex<Vec<CampaignId>>,
}

impl RecordingSource {
    pub fn new(campaigns: Vec<CampaignData>) -> Self {
        let mut inner = StaticCampaignSource::new();
        for data in campaigns {
            inner.insert(data);
        }
        Self {
            inner,
            delay: None,
            fetched: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fetched(&self) -> Vec<CampaignId> {
        self.fetched.lock().unwrap().clone()
    }
}

#[async_trait]
impl CampaignDataSource for RecordingSource {
    async fn fetch(&self, campaign_id: &CampaignId) -> Result<CampaignEntity> {
        self.fetched.lock().unwrap().push(campaign_id.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.fetch(campaign_id).await
    }

    async fn fetch_insights(&self, campaign_id: &CampaignId) -> Result<MetricSnapshot> {
        self.inner.fetch_insights(campaign_id).await
    }
}

/// Answers grading prompts with a fixed verdict and everything else with
/// a fixed narrative
pub struct ScriptedCompletion {
    pub narrative: String,
    pub verdict: String,
    pub fail_narratives: bool,
    pub calls: Mutex<usize>,
}

impl ScriptedCompletion {
    pub fn new(narrative: &str, verdict: &str) -> Self {
        Self {
            narrative: narrative.to_string(),
            verdict: verdict.to_string(),
            fail_narratives: false,
            calls: Mutex::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_narratives: true,
            ..Self::new("", "VALID")
        }
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str, _context: Option<&str>) -> Result<String> {
        *self.calls.lock().unwrap() += 1;
        if prompt.starts_with("**Output to Evaluate:**") {
            return Ok(self.verdict.clone());
        }
        if self.fail_narratives {
            return Err(CampaignError::Completion("service unavailable".to_string()));
        }
        Ok(self.narrative.clone())
    }
}

pub fn engine_without_narratives() -> EngineConfig {
    EngineConfig {
        narratives_enabled: false,
        grade_narratives: false,
        ..EngineConfig::default()
    }
}

pub fn pipeline(
    data_source: Arc<dyn CampaignDataSource>,
    store: Arc<dyn CheckpointStore>,
) -> WorkflowGraph {
    let collaborators = Collaborators {
        data_source,
        completion: None,
        tool_gateway: None,
    };
    let guards = Guards {
        enforcer: Arc::new(Enforcer::default()),
        grader: None,
    };
    WorkflowGraph::campaign_pipeline(&collaborators, &guards, store, &engine_without_narratives())
        .expect("pipeline should compile")
}

pub fn narrated_pipeline(
    data_source: Arc<dyn CampaignDataSource>,
    completion: Arc<dyn CompletionService>,
    store: Arc<dyn CheckpointStore>,
) -> WorkflowGraph {
    let collaborators = Collaborators {
        data_source,
        completion: Some(completion.clone()),
        tool_gateway: None,
    };
    let guards = Guards {
        enforcer: Arc::new(Enforcer::default()),
        grader: Some(Arc::new(Grader::new(completion))),
    };
    WorkflowGraph::campaign_pipeline(&collaborators, &guards, store, &EngineConfig::default())
        .expect("pipeline should compile")
}
