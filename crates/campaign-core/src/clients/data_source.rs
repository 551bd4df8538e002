//! Campaign data source used by the monitor stage

use crate::config::DataSourceConfig;
use crate::error::{CampaignError, Result};
use async_trait::async_trait;
use campaign_types::{CampaignData, CampaignEntity, CampaignId, MetricSnapshot};
use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::path::Path;

/// Source of campaign records and their latest metrics
#[async_trait]
pub trait CampaignDataSource: Send + Sync {
    async fn fetch(&self, campaign_id: &CampaignId) -> Result<CampaignEntity>;

    async fn fetch_insights(&self, campaign_id: &CampaignId) -> Result<MetricSnapshot>;
}

/// HTTP-backed campaign source
pub struct HttpCampaignSource {
    base_url: String,
    http_client: HttpClient,
}

impl HttpCampaignSource {
    pub fn new(base_url: impl Into<String>, timeout_seconds: u64) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn from_config(config: &DataSourceConfig) -> Result<Self> {
        let base_url = config.base_url.as_deref().ok_or_else(|| {
            CampaignError::Config(
                "data_source.base_url is required for the HTTP source".to_string(),
            )
        })?;
        Self::new(base_url, config.timeout_seconds)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        log::debug!("GET {}", url);

        let response = self.http_client.get(url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(CampaignError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CampaignError::DataSource(format!(
                "{} returned {}: {}",
                url, status, body
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| {
                CampaignError::DataSource(format!("Malformed response from {}: {}", url, e))
            })
    }
}

#[async_trait]
impl CampaignDataSource for HttpCampaignSource {
    async fn fetch(&self, campaign_id: &CampaignId) -> Result<CampaignEntity> {
        let url = format!("{}/campaigns/{}", self.base_url, campaign_id);
        self.get_json(&url).await
    }

    async fn fetch_insights(&self, campaign_id: &CampaignId) -> Result<MetricSnapshot> {
        let url = format!("{}/campaigns/{}/insights", self.base_url, campaign_id);
        self.get_json(&url).await
    }
}

/// In-memory campaign source, optionally loaded from a JSON fixture holding
/// an array of `CampaignData` records
#[derive(Default)]
pub struct StaticCampaignSource {
    campaigns: HashMap<CampaignId, CampaignData>,
}

impl StaticCampaignSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_campaign(mut self, data: CampaignData) -> Self {
        self.insert(data);
        self
    }

    pub fn insert(&mut self, data: CampaignData) {
        self.campaigns.insert(data.id().clone(), data);
    }

    pub fn from_fixture<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            CampaignError::DataSource(format!(
                "Failed to read fixture {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let records: Vec<CampaignData> = serde_json::from_str(&content)?;

        let mut source = Self::new();
        for record in records {
            source.insert(record);
        }
        log::info!("Loaded {} campaigns from fixture", source.campaigns.len());
        Ok(source)
    }

    pub fn campaign_ids(&self) -> Vec<CampaignId> {
        let mut ids: Vec<CampaignId> = self.campaigns.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lookup(&self, campaign_id: &CampaignId) -> Result<&CampaignData> {
        self.campaigns
            .get(campaign_id)
            .ok_or_else(|| CampaignError::NotFound(format!("Campaign {}", campaign_id)))
    }
}

#[async_trait]
impl CampaignDataSource for StaticCampaignSource {
    async fn fetch(&self, campaign_id: &CampaignId) -> Result<CampaignEntity> {
        Ok(self.lookup(campaign_id)?.entity.clone())
    }

    async fn fetch_insights(&self, campaign_id: &CampaignId) -> Result<MetricSnapshot> {
        Ok(self.lookup(campaign_id)?.metrics.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FIXTURE: &str = r#"[
        {
            "entity": {
                "id": "camp-1",
                "name": "Brand Awareness",
                "platform": "google",
                "status": "active",
                "budget": 1000.0,
                "spend": 400.0
            },
            "metrics": { "impressions": 50000, "clicks": 900, "ctr": 1.8, "cpc": 0.44 }
        }
    ]"#;

    #[tokio::test]
    async fn test_static_source_from_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(FIXTURE.as_bytes()).unwrap();

        let source = StaticCampaignSource::from_fixture(file.path()).unwrap();
        let id = CampaignId::new("camp-1");

        let entity = source.fetch(&id).await.unwrap();
        assert_eq!(entity.platform, "google");

        let metrics = source.fetch_insights(&id).await.unwrap();
        assert_eq!(metrics.clicks, 900);
        assert_eq!(metrics.conversions, 0);
    }

    #[tokio::test]
    async fn test_static_source_unknown_campaign() {
        let source = StaticCampaignSource::new();
        let err = source.fetch(&CampaignId::new("missing")).await.unwrap_err();
        assert!(matches!(err, CampaignError::NotFound(_)));
    }
}
