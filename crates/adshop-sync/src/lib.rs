//! Ingest pipeline orchestration: fetch → normalize → insert-if-absent → commit,
//! plus the read-only dashboard aggregator.

use std::sync::Arc;
use std::time::Duration;

use adshop_adapters::{
    optional_env, AdapterError, ConfigError, GoogleAdsFetcher, ShopifyFetcher, SourceFetcher,
};
use adshop_core::{AdCampaignDraft, DashboardData, DashboardMetrics, ProductDraft, Source};
use adshop_storage::{HttpClientConfig, HttpFetcher, IngestStore, PgStore, StorageError};
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "adshop-sync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub http_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl ServiceConfig {
    /// `DATABASE_URL` is required (`DB_URL` is accepted as an alias).
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = optional_env("DATABASE_URL")
            .or_else(|| optional_env("DB_URL"))
            .ok_or(ConfigError::Missing { key: "DATABASE_URL" })?;
        let port = match optional_env("ADSHOP_PORT") {
            Some(raw) => raw.parse::<u16>().map_err(|e| ConfigError::Invalid {
                key: "ADSHOP_PORT",
                message: format!("{e}"),
            })?,
            None => 8000,
        };
        let http_timeout_secs = optional_env("ADSHOP_HTTP_TIMEOUT_SECS")
            .map(|raw| {
                raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
                    key: "ADSHOP_HTTP_TIMEOUT_SECS",
                    message: format!("{e}"),
                })
            })
            .transpose()?;

        Ok(Self {
            database_url,
            host: optional_env("ADSHOP_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            http_timeout_secs,
            user_agent: optional_env("ADSHOP_USER_AGENT").unwrap_or_else(|| "adshop/0.1".to_string()),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout_secs.map(Duration::from_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }
}

#[derive(Debug, Error)]
pub enum PullError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("upstream error: {0}")]
    Upstream(AdapterError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<AdapterError> for PullError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Config(config) => PullError::Config(config),
            other => PullError::Upstream(other),
        }
    }
}

/// Draft kinds that know which insert-if-absent call persists them.
#[async_trait]
pub trait Upsertable: Sized + Send + Sync {
    async fn insert_batch(store: &dyn IngestStore, drafts: &[Self]) -> Result<usize, StorageError>;
}

#[async_trait]
impl Upsertable for AdCampaignDraft {
    async fn insert_batch(store: &dyn IngestStore, drafts: &[Self]) -> Result<usize, StorageError> {
        store.insert_ad_campaigns(drafts).await
    }
}

#[async_trait]
impl Upsertable for ProductDraft {
    async fn insert_batch(store: &dyn IngestStore, drafts: &[Self]) -> Result<usize, StorageError> {
        store.insert_products(drafts).await
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PullSummary {
    pub run_id: Uuid,
    pub source: Source,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub inserted: usize,
    pub skipped: usize,
}

/// Body returned by the pull endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullResponse {
    pub status: String,
    pub inserted_records: usize,
}

impl PullSummary {
    /// `inserted_records` carries the fetched count, duplicates included.
    pub fn response(&self) -> PullResponse {
        PullResponse {
            status: "success".to_string(),
            inserted_records: self.fetched,
        }
    }
}

pub type CampaignPipeline = IngestPipeline<dyn SourceFetcher<Draft = AdCampaignDraft>>;
pub type ProductPipeline = IngestPipeline<dyn SourceFetcher<Draft = ProductDraft>>;

/// One source's fetcher bound to the shared store.
pub struct IngestPipeline<F: SourceFetcher + ?Sized> {
    fetcher: Arc<F>,
    store: Arc<dyn IngestStore>,
}

impl<F: SourceFetcher + ?Sized> Clone for IngestPipeline<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
        }
    }
}

impl<F> IngestPipeline<F>
where
    F: SourceFetcher + ?Sized,
    F::Draft: Upsertable,
{
    pub fn new(fetcher: Arc<F>, store: Arc<dyn IngestStore>) -> Self {
        Self { fetcher, store }
    }

    /// Fetch one upstream response and insert every draft whose natural key is new,
    /// in a single transaction. Existing rows are never updated.
    pub async fn run_once(&self) -> Result<PullSummary, PullError> {
        let run_id = Uuid::new_v4();
        let source = self.fetcher.source();
        let span = info_span!("pull", %run_id, source = source.as_str());

        async move {
            let started_at = Utc::now();
            let drafts = self.fetcher.fetch().await?;
            let fetched = drafts.len();
            let inserted = <F::Draft as Upsertable>::insert_batch(self.store.as_ref(), &drafts).await?;
            let finished_at = Utc::now();

            let summary = PullSummary {
                run_id,
                source,
                started_at,
                finished_at,
                fetched,
                inserted,
                skipped: fetched.saturating_sub(inserted),
            };
            info!(
                fetched = summary.fetched,
                inserted = summary.inserted,
                skipped = summary.skipped,
                "pull committed"
            );
            Ok(summary)
        }
        .instrument(span)
        .await
    }
}

/// Load every stored record of both kinds and count them.
pub async fn aggregate_dashboard(store: &dyn IngestStore) -> Result<DashboardData, StorageError> {
    let shopify_data = store.load_products().await?;
    let google_ads_data = store.load_ad_campaigns().await?;
    Ok(DashboardData {
        metrics: DashboardMetrics {
            shopify_total: shopify_data.len(),
            google_ads_total: google_ads_data.len(),
        },
        shopify_data,
        google_ads_data,
    })
}

/// Fetchers reading credentials from the environment at pull time.
pub fn env_pipelines(
    config: &ServiceConfig,
    store: Arc<dyn IngestStore>,
) -> anyhow::Result<(CampaignPipeline, ProductPipeline)> {
    let http = HttpFetcher::new(config.http_client_config())?;
    let google_ads: Arc<dyn SourceFetcher<Draft = AdCampaignDraft>> =
        Arc::new(GoogleAdsFetcher::from_env(http.clone()));
    let shopify: Arc<dyn SourceFetcher<Draft = ProductDraft>> = Arc::new(ShopifyFetcher::from_env(http));
    Ok((
        IngestPipeline::new(google_ads, Arc::clone(&store)),
        IngestPipeline::new(shopify, store),
    ))
}

/// Connect, migrate, run one pull for `source`, close.
pub async fn run_pull_once_from_env(source: Source) -> anyhow::Result<PullSummary> {
    let config = ServiceConfig::from_env()?;
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    store.migrate().await?;

    let shared: Arc<dyn IngestStore> = Arc::new(store.clone());
    let (google_ads, shopify) = env_pipelines(&config, shared)?;
    let result = match source {
        Source::GoogleAds => google_ads.run_once().await,
        Source::Shopify => shopify.run_once().await,
    };
    store.close().await;
    result.with_context(|| format!("pulling {source}"))
}

pub async fn dashboard_once_from_env() -> anyhow::Result<DashboardData> {
    let config = ServiceConfig::from_env()?;
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    let result = aggregate_dashboard(&store).await;
    store.close().await;
    Ok(result?)
}
