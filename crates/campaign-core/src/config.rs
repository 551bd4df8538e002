//! Configuration management for the campaign workflow engine

use crate::error::{CampaignError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables with this prefix override file values,
/// e.g. `CAMPAIGN__COORDINATOR__MAX_RETRIES=5`
pub const ENV_PREFIX: &str = "CAMPAIGN";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CampaignConfig {
    pub engine: EngineConfig,
    pub coordinator: CoordinatorConfig,
    pub guards: GuardsConfig,
    pub scheduler: SchedulerConfig,
    pub completion: CompletionConfig,
    pub data_source: DataSourceConfig,
    pub tool_gateway: ToolGatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub checkpoint_dir: PathBuf,
    pub narratives_enabled: bool,
    pub auto_apply_recommendations: bool,
    pub grade_narratives: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: PathBuf::from("./data/checkpoints"),
            narratives_enabled: true,
            auto_apply_recommendations: false,
            grade_narratives: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub max_retries: u32,
    pub retry_backoff_minutes: i64,
    pub max_concurrent_workflows: usize,
    pub history_limit: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_retries: campaign_types::DEFAULT_MAX_RETRIES,
            retry_backoff_minutes: 5,
            max_concurrent_workflows: 4,
            history_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardsConfig {
    pub max_iterations: u32,
    pub max_retries: u32,
}

impl Default for GuardsConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub interval_seconds: u64,
    pub campaign_ids: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            campaign_ids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: 0.1,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceConfig {
    #[serde(alias = "url")]
    pub base_url: Option<String>,
    pub fixture_path: Option<PathBuf>,
    pub timeout_seconds: u64,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            fixture_path: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolGatewayConfig {
    #[serde(alias = "url")]
    pub base_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ToolGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_seconds: 30,
        }
    }
}

impl CampaignConfig {
    /// Load configuration from a JSON or TOML file, with `CAMPAIGN__*`
    /// environment variables layered on top
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(CampaignError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        let config: CampaignConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: CampaignConfig = serde_json::from_str(json)
            .map_err(|e| CampaignError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.coordinator.max_concurrent_workflows == 0 {
            return Err(CampaignError::Config(
                "coordinator.max_concurrent_workflows must be at least 1".to_string(),
            ));
        }

        if self.coordinator.max_retries == 0 {
            return Err(CampaignError::Config(
                "coordinator.max_retries must be at least 1".to_string(),
            ));
        }

        if self.coordinator.retry_backoff_minutes <= 0 {
            return Err(CampaignError::Config(
                "coordinator.retry_backoff_minutes must be positive".to_string(),
            ));
        }

        if self.guards.max_iterations == 0 || self.guards.max_retries == 0 {
            return Err(CampaignError::Config(
                "guards.max_iterations and guards.max_retries must be at least 1".to_string(),
            ));
        }

        if self.scheduler.interval_seconds == 0 {
            return Err(CampaignError::Config(
                "scheduler.interval_seconds must be at least 1".to_string(),
            ));
        }

        let needs_completion = self.engine.narratives_enabled || self.engine.grade_narratives;
        if needs_completion && self.completion.api_key.is_empty() {
            return Err(CampaignError::Config(
                "completion.api_key is required when narratives or grading are enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Campaign ids the periodic scheduler watches
    pub fn scheduled_campaigns(&self) -> Vec<campaign_types::CampaignId> {
        self.scheduler
            .campaign_ids
            .iter()
            .map(|id| campaign_types::CampaignId::new(id.as_str()))
            .collect()
    }
}
