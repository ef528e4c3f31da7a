//! Relational storage (PostgreSQL via sqlx) + upstream HTTP fetch utilities for adshop.

use std::time::Duration;

use adshop_core::{AdCampaignDraft, AdCampaignRecord, ProductDraft, ProductRecord};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, Instrument};

pub const CRATE_NAME: &str = "adshop-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("constraint violated: {0}")]
    Constraint(String),
}

/// Persistence seam for the ingest pipelines and the aggregator.
///
/// `insert_*` calls are insert-only and all-or-nothing: every draft whose natural
/// key is not yet stored is inserted inside one transaction, drafts whose key
/// already exists are skipped without touching the stored row. The returned
/// count is the number of rows actually inserted.
#[async_trait]
pub trait IngestStore: Send + Sync {
    async fn insert_ad_campaigns(&self, drafts: &[AdCampaignDraft]) -> Result<usize, StorageError>;
    async fn insert_products(&self, drafts: &[ProductDraft]) -> Result<usize, StorageError>;
    async fn load_ad_campaigns(&self) -> Result<Vec<AdCampaignRecord>, StorageError>;
    async fn load_products(&self) -> Result<Vec<ProductRecord>, StorageError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl IngestStore for PgStore {
    async fn insert_ad_campaigns(&self, drafts: &[AdCampaignDraft]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for draft in drafts {
            let result = sqlx::query(
                r#"
                INSERT INTO google_ads_data
                    (google_ads_id, campaign_name, impressions, clicks, cost, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (google_ads_id) DO NOTHING
                "#,
            )
            .bind(&draft.external_id)
            .bind(&draft.name)
            .bind(draft.impressions)
            .bind(draft.clicks)
            .bind(draft.cost)
            .bind(draft.created_at)
            .bind(draft.updated_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted as usize)
    }

    async fn insert_products(&self, drafts: &[ProductDraft]) -> Result<usize, StorageError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for draft in drafts {
            let result = sqlx::query(
                r#"
                INSERT INTO shopify_data (shopify_id, title, price, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (shopify_id) DO NOTHING
                "#,
            )
            .bind(&draft.external_id)
            .bind(&draft.title)
            .bind(draft.price)
            .bind(draft.created_at)
            .bind(draft.updated_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted as usize)
    }

    async fn load_ad_campaigns(&self) -> Result<Vec<AdCampaignRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, google_ads_id, campaign_name, impressions, clicks, cost, created_at, updated_at
              FROM google_ads_data
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(AdCampaignRecord {
                id: row.try_get("id")?,
                external_id: row.try_get("google_ads_id")?,
                name: row.try_get("campaign_name")?,
                impressions: row.try_get("impressions")?,
                clicks: row.try_get("clicks")?,
                cost: row.try_get("cost")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(out)
    }

    async fn load_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT id, shopify_id, title, price, created_at, updated_at
              FROM shopify_data
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ProductRecord {
                id: row.try_get("id")?,
                external_id: row.try_get("shopify_id")?,
                title: row.try_get("title")?,
                price: row.try_get("price")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }
        Ok(out)
    }
}

/// Process-local store with the same insert-only, all-or-nothing semantics and
/// CHECK constraints as the PostgreSQL schema. Used by tests and local demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    campaigns: Vec<AdCampaignRecord>,
    products: Vec<ProductRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_campaign(draft: &AdCampaignDraft) -> Result<(), StorageError> {
    if draft.impressions < 0 || draft.clicks < 0 || draft.cost.is_nan() || draft.cost < 0.0 {
        return Err(StorageError::Constraint(format!(
            "google_ads_data row {} has a negative metric",
            draft.external_id
        )));
    }
    if draft.updated_at < draft.created_at {
        return Err(StorageError::Constraint(format!(
            "google_ads_data row {} has updated_at before created_at",
            draft.external_id
        )));
    }
    Ok(())
}

fn check_product(draft: &ProductDraft) -> Result<(), StorageError> {
    if draft.price.is_some_and(|p| p.is_nan() || p < 0.0) {
        return Err(StorageError::Constraint(format!(
            "shopify_data row {} has a negative price",
            draft.external_id
        )));
    }
    if draft.updated_at < draft.created_at {
        return Err(StorageError::Constraint(format!(
            "shopify_data row {} has updated_at before created_at",
            draft.external_id
        )));
    }
    Ok(())
}

#[async_trait]
impl IngestStore for MemoryStore {
    async fn insert_ad_campaigns(&self, drafts: &[AdCampaignDraft]) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        let mut staged = Vec::new();
        for draft in drafts {
            check_campaign(draft)?;
            let exists = state
                .campaigns
                .iter()
                .chain(staged.iter())
                .any(|r: &AdCampaignRecord| r.external_id == draft.external_id);
            if exists {
                continue;
            }
            let id = (state.campaigns.len() + staged.len()) as i64 + 1;
            staged.push(AdCampaignRecord::from_draft(id, draft));
        }
        let inserted = staged.len();
        state.campaigns.extend(staged);
        Ok(inserted)
    }

    async fn insert_products(&self, drafts: &[ProductDraft]) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        let mut staged = Vec::new();
        for draft in drafts {
            check_product(draft)?;
            let exists = state
                .products
                .iter()
                .chain(staged.iter())
                .any(|r: &ProductRecord| r.external_id == draft.external_id);
            if exists {
                continue;
            }
            let id = (state.products.len() + staged.len()) as i64 + 1;
            staged.push(ProductRecord::from_draft(id, draft));
        }
        let inserted = staged.len();
        state.products.extend(staged);
        Ok(inserted)
    }

    async fn load_ad_campaigns(&self) -> Result<Vec<AdCampaignRecord>, StorageError> {
        Ok(self.state.lock().await.campaigns.clone())
    }

    async fn load_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
        Ok(self.state.lock().await.products.clone())
    }
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientConfig {
    /// `None` leaves upstream calls unbounded.
    pub timeout: Option<Duration>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}: {body}")]
    HttpStatus {
        status: StatusCode,
        url: String,
        body: String,
    },
    #[error("invalid JSON body from {url}: {message}")]
    Decode { url: String, message: String },
}

/// Thin wrapper over a shared reqwest client; one request, one response, no retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().gzip(true).brotli(true);

        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send a prepared request and decode a 2xx JSON body.
    pub async fn send_json(&self, source_id: &str, request: RequestBuilder) -> Result<JsonValue, FetchError> {
        let span = info_span!("http_fetch", source_id);
        async move {
            let resp = request.send().await?;
            let status = resp.status();
            let url = resp.url().to_string();

            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(FetchError::HttpStatus { status, url, body });
            }

            let bytes = resp.bytes().await?;
            debug!(%url, bytes = bytes.len(), "upstream response received");
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode {
                url,
                message: e.to_string(),
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).expect("ts").with_timezone(&Utc)
    }

    fn campaign(id: &str, name: &str) -> AdCampaignDraft {
        AdCampaignDraft {
            external_id: id.to_string(),
            name: name.to_string(),
            impressions: 100,
            clicks: 4,
            cost: 2.5,
            created_at: ts("2026-03-01T12:00:00Z"),
            updated_at: ts("2026-03-01T12:00:00Z"),
        }
    }

    fn product(id: &str, title: &str) -> ProductDraft {
        ProductDraft {
            external_id: id.to_string(),
            title: title.to_string(),
            price: Some(19.99),
            created_at: ts("2026-03-01T12:00:00Z"),
            updated_at: ts("2026-03-01T12:00:00Z"),
        }
    }

    #[tokio::test]
    async fn memory_store_skips_existing_natural_keys() {
        let store = MemoryStore::new();
        let first = store
            .insert_products(&[product("1", "A"), product("2", "B")])
            .await
            .expect("first insert");
        let second = store
            .insert_products(&[product("1", "changed"), product("3", "C")])
            .await
            .expect("second insert");

        assert_eq!(first, 2);
        assert_eq!(second, 1);
        let rows = store.load_products().await.expect("load");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].title, "A");
        assert_eq!(rows.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn memory_store_dedupes_within_one_batch() {
        let store = MemoryStore::new();
        let inserted = store
            .insert_ad_campaigns(&[campaign("9", "first"), campaign("9", "second")])
            .await
            .expect("insert");
        assert_eq!(inserted, 1);
        let rows = store.load_ad_campaigns().await.expect("load");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "first");
    }

    #[tokio::test]
    async fn memory_store_batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        let mut bad = campaign("2", "bad");
        bad.cost = -1.0;

        let err = store
            .insert_ad_campaigns(&[campaign("1", "ok"), bad])
            .await
            .expect_err("constraint should abort the batch");
        assert!(matches!(err, StorageError::Constraint(_)));
        assert!(store.load_ad_campaigns().await.expect("load").is_empty());
    }

    #[tokio::test]
    async fn memory_store_rejects_inverted_timestamps() {
        let store = MemoryStore::new();
        let mut draft = product("5", "late");
        draft.created_at = ts("2026-03-02T00:00:00Z");
        let err = store.insert_products(&[draft]).await.expect_err("check");
        assert!(matches!(err, StorageError::Constraint(_)));
    }

    async fn test_pg_store() -> Option<PgStore> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("skipping PgStore test: TEST_DATABASE_URL not set");
            return None;
        };
        let store = PgStore::connect(&url).await.expect("db should connect");
        store.migrate().await.expect("migrations");
        Some(store)
    }

    fn unique_prefix() -> String {
        format!("test-{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    #[tokio::test]
    async fn pg_store_insert_ignores_conflicts() {
        let Some(store) = test_pg_store().await else {
            return;
        };
        let prefix = unique_prefix();
        let a = product(&format!("{prefix}-1"), "A");
        let b = product(&format!("{prefix}-1"), "B");

        assert_eq!(store.insert_products(&[a.clone()]).await.expect("insert"), 1);
        assert_eq!(store.insert_products(&[b, a]).await.expect("re-insert"), 0);

        let rows = store
            .load_products()
            .await
            .expect("load")
            .into_iter()
            .filter(|r| r.external_id.starts_with(&prefix))
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "A");
    }

    #[tokio::test]
    async fn pg_store_failed_batch_leaves_no_rows() {
        let Some(store) = test_pg_store().await else {
            return;
        };
        let prefix = unique_prefix();
        let mut bad = campaign(&format!("{prefix}-2"), "bad");
        bad.cost = -3.0;

        let result = store
            .insert_ad_campaigns(&[campaign(&format!("{prefix}-1"), "ok"), bad])
            .await;
        assert!(matches!(result, Err(StorageError::Database(_))));

        let rows = store.load_ad_campaigns().await.expect("load");
        assert!(rows.iter().all(|r| !r.external_id.starts_with(&prefix)));
    }

    #[tokio::test]
    async fn pg_store_concurrent_batches_insert_each_key_once() {
        let Some(store) = test_pg_store().await else {
            return;
        };
        let prefix = unique_prefix();
        let batch = (1..=3)
            .map(|n| product(&format!("{prefix}-{n}"), "same"))
            .collect::<Vec<_>>();

        let (left, right) = tokio::join!(store.insert_products(&batch), store.insert_products(&batch));
        let left = left.expect("first concurrent batch");
        let right = right.expect("second concurrent batch");
        assert_eq!(left + right, batch.len());

        let rows = store
            .load_products()
            .await
            .expect("load")
            .into_iter()
            .filter(|r| r.external_id.starts_with(&prefix))
            .collect::<Vec<_>>();
        assert_eq!(rows.len(), batch.len());
    }
}
