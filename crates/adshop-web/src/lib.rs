//! Axum + Askama surface: pull triggers, dashboard JSON and the dashboard page.

use std::sync::Arc;

use adshop_core::{AdCampaignRecord, DashboardData, ProductRecord};
use adshop_storage::{IngestStore, StorageError};
use adshop_sync::{aggregate_dashboard, CampaignPipeline, ProductPipeline, PullError};
use askama::Template;
use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub const CRATE_NAME: &str = "adshop-web";

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn IngestStore>,
    pub google_ads: CampaignPipeline,
    pub shopify: ProductPipeline,
}

impl AppState {
    pub fn new(store: Arc<dyn IngestStore>, google_ads: CampaignPipeline, shopify: ProductPipeline) -> Self {
        Self {
            store,
            google_ads,
            shopify,
        }
    }
}

/// Every failure surfaces as 500 with `{"error": "<message>"}`.
#[derive(Debug)]
pub struct ApiError {
    message: String,
}

impl From<PullError> for ApiError {
    fn from(err: PullError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.message, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": self.message })),
        )
            .into_response()
    }
}

struct ProductRow {
    id: i64,
    shopify_id: String,
    title: String,
    price: String,
    created_at: String,
}

impl From<&ProductRecord> for ProductRow {
    fn from(record: &ProductRecord) -> Self {
        Self {
            id: record.id,
            shopify_id: record.external_id.clone(),
            title: record.title.clone(),
            price: record.price.map(|p| format!("{p:.2}")).unwrap_or_else(|| "-".into()),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

struct CampaignRow {
    id: i64,
    google_ads_id: String,
    campaign_name: String,
    impressions: i64,
    clicks: i64,
    cost: String,
    created_at: String,
}

impl From<&AdCampaignRecord> for CampaignRow {
    fn from(record: &AdCampaignRecord) -> Self {
        Self {
            id: record.id,
            google_ads_id: record.external_id.clone(),
            campaign_name: record.name.clone(),
            impressions: record.impressions,
            clicks: record.clicks,
            cost: format!("{:.2}", record.cost),
            created_at: record.created_at.to_rfc3339(),
        }
    }
}

#[derive(Template)]
#[template(path = "dashboard.html")]
struct DashboardTemplate {
    shopify_total: usize,
    google_ads_total: usize,
    products: Vec<ProductRow>,
    campaigns: Vec<CampaignRow>,
}

impl From<&DashboardData> for DashboardTemplate {
    fn from(data: &DashboardData) -> Self {
        Self {
            shopify_total: data.metrics.shopify_total,
            google_ads_total: data.metrics.google_ads_total,
            products: data.shopify_data.iter().map(ProductRow::from).collect(),
            campaigns: data.google_ads_data.iter().map(CampaignRow::from).collect(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/google-ads/pull", post(google_ads_pull_handler))
        .route("/shopify/pull", post(shopify_pull_handler))
        .route("/dashboard-data/", get(dashboard_data_handler))
        .route("/dashboard-data", get(dashboard_data_handler))
        .route("/dashboard", get(dashboard_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

/// Bind `addr` and serve until Ctrl-C.
pub async fn serve(addr: &str, state: AppState) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
}

async fn google_ads_pull_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let summary = state.google_ads.run_once().await?;
    Ok(Json(summary.response()).into_response())
}

async fn shopify_pull_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let summary = state.shopify.run_once().await?;
    Ok(Json(summary.response()).into_response())
}

async fn dashboard_data_handler(State(state): State<Arc<AppState>>) -> Result<Json<DashboardData>, ApiError> {
    let data = aggregate_dashboard(state.store.as_ref()).await?;
    Ok(Json(data))
}

async fn dashboard_handler(State(state): State<Arc<AppState>>) -> Response {
    match aggregate_dashboard(state.store.as_ref()).await {
        Ok(data) => render_html(DashboardTemplate::from(&data)),
        Err(err) => server_error(err.to_string()),
    }
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(err.to_string()),
    }
}

#[derive(Template)]
#[template(path = "error.html")]
struct ErrorTemplate<'a> {
    message: &'a str,
}

fn server_error(message: String) -> Response {
    error!(error = %message, "dashboard render failed");
    let body = ErrorTemplate { message: &message }
        .render()
        .unwrap_or_else(|_| "<h1>Server error</h1>".to_string());
    (StatusCode::INTERNAL_SERVER_ERROR, Html(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use adshop_adapters::{AdapterError, ConfigError, SourceFetcher};
    use adshop_core::{AdCampaignDraft, ProductDraft, Source};
    use adshop_storage::MemoryStore;
    use adshop_sync::{IngestPipeline, PullResponse};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{header, Request};
    use chrono::{DateTime, TimeZone, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct FixedFetcher<D> {
        source: Source,
        drafts: Result<Vec<D>, ConfigError>,
    }

    #[async_trait]
    impl<D: Clone + Send + Sync> SourceFetcher for FixedFetcher<D> {
        type Draft = D;

        fn source(&self) -> Source {
            self.source
        }

        async fn fetch(&self) -> Result<Vec<D>, AdapterError> {
            self.drafts.clone().map_err(AdapterError::from)
        }
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).single().unwrap()
    }

    fn product(id: &str, title: &str) -> ProductDraft {
        ProductDraft {
            external_id: id.to_string(),
            title: title.to_string(),
            price: Some(19.99),
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn campaign(id: &str, name: &str) -> AdCampaignDraft {
        AdCampaignDraft {
            external_id: id.to_string(),
            name: name.to_string(),
            impressions: 1200,
            clicks: 40,
            cost: 2.5,
            created_at: ts(),
            updated_at: ts(),
        }
    }

    fn state_with(
        store: Arc<MemoryStore>,
        campaigns: Result<Vec<AdCampaignDraft>, ConfigError>,
        products: Result<Vec<ProductDraft>, ConfigError>,
    ) -> AppState {
        let google_ads: Arc<dyn SourceFetcher<Draft = AdCampaignDraft>> = Arc::new(FixedFetcher {
            source: Source::GoogleAds,
            drafts: campaigns,
        });
        let shopify: Arc<dyn SourceFetcher<Draft = ProductDraft>> = Arc::new(FixedFetcher {
            source: Source::Shopify,
            drafts: products,
        });
        AppState::new(
            store.clone(),
            IngestPipeline::new(google_ads, store.clone()),
            IngestPipeline::new(shopify, store),
        )
    }

    async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, Option<String>, String) {
        let resp = app
            .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let content_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_string());
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        (status, content_type, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn shopify_pull_reports_fetched_count() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state_with(
            Arc::clone(&store),
            Ok(vec![]),
            Ok(vec![product("1", "A"), product("2", "B")]),
        ));

        let (status, _, body) = send(app.clone(), "POST", "/shopify/pull").await;
        assert_eq!(status, StatusCode::OK);
        let first: PullResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(first.status, "success");
        assert_eq!(first.inserted_records, 2);

        // Nothing new on the second pull, but the count still reflects what was fetched.
        let (_, _, body) = send(app, "POST", "/shopify/pull").await;
        let second: PullResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(second.inserted_records, 2);
        assert_eq!(store.load_products().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn dashboard_data_counts_both_kinds() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state_with(
            Arc::clone(&store),
            Ok(vec![campaign("10", "Spring"), campaign("11", "Summer")]),
            Ok(vec![product("1", "A"), product("2", "B"), product("3", "C")]),
        ));

        send(app.clone(), "POST", "/google-ads/pull").await;
        send(app.clone(), "POST", "/shopify/pull").await;

        for uri in ["/dashboard-data/", "/dashboard-data"] {
            let (status, content_type, body) = send(app.clone(), "GET", uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(content_type.as_deref(), Some("application/json"));
            let value: serde_json::Value = serde_json::from_str(&body).unwrap();
            assert_eq!(value["metrics"]["shopify_total"], 3);
            assert_eq!(value["metrics"]["google_ads_total"], 2);
            assert_eq!(value["shopify_data"].as_array().unwrap().len(), 3);
            assert_eq!(value["google_ads_data"][0]["google_ads_id"], "10");
            assert_eq!(value["google_ads_data"][0]["cost"], 2.5);
            assert_eq!(value["shopify_data"][0]["created_at"], "2026-03-01T09:30:00Z");
        }
    }

    #[tokio::test]
    async fn dashboard_page_renders_metrics_and_rows() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state_with(
            Arc::clone(&store),
            Ok(vec![campaign("10", "Spring Sale")]),
            Ok(vec![product("1", "Walnut Desk")]),
        ));
        send(app.clone(), "POST", "/google-ads/pull").await;
        send(app.clone(), "POST", "/shopify/pull").await;

        let (status, content_type, body) = send(app, "GET", "/dashboard").await;
        assert_eq!(status, StatusCode::OK);
        assert!(content_type.unwrap().starts_with("text/html"));
        assert!(body.contains("Walnut Desk"));
        assert!(body.contains("Spring Sale"));
        assert!(body.contains("19.99"));
        assert!(body.contains(r#"id="shopify-total">1<"#));
    }

    #[tokio::test]
    async fn missing_config_maps_to_500_json() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state_with(
            Arc::clone(&store),
            Err(ConfigError::Missing {
                key: "GOOGLE_ADS_DEVELOPER_TOKEN",
            }),
            Ok(vec![]),
        ));

        let (status, _, body) = send(app, "POST", "/google-ads/pull").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("GOOGLE_ADS_DEVELOPER_TOKEN"));
        assert!(store.load_ad_campaigns().await.unwrap().is_empty());
    }

    /// Store whose reads always fail with a message that looks like markup.
    struct BrokenStore;

    #[async_trait]
    impl IngestStore for BrokenStore {
        async fn insert_ad_campaigns(&self, _drafts: &[AdCampaignDraft]) -> Result<usize, StorageError> {
            Ok(0)
        }

        async fn insert_products(&self, _drafts: &[ProductDraft]) -> Result<usize, StorageError> {
            Ok(0)
        }

        async fn load_ad_campaigns(&self) -> Result<Vec<AdCampaignRecord>, StorageError> {
            Ok(vec![])
        }

        async fn load_products(&self) -> Result<Vec<ProductRecord>, StorageError> {
            Err(StorageError::Constraint("<script>alert(1)</script>".to_string()))
        }
    }

    #[tokio::test]
    async fn dashboard_error_page_escapes_message() {
        let store: Arc<dyn IngestStore> = Arc::new(BrokenStore);
        let google_ads: Arc<dyn SourceFetcher<Draft = AdCampaignDraft>> = Arc::new(FixedFetcher {
            source: Source::GoogleAds,
            drafts: Ok(vec![]),
        });
        let shopify: Arc<dyn SourceFetcher<Draft = ProductDraft>> = Arc::new(FixedFetcher {
            source: Source::Shopify,
            drafts: Ok(vec![]),
        });
        let state = AppState::new(
            Arc::clone(&store),
            IngestPipeline::new(google_ads, Arc::clone(&store)),
            IngestPipeline::new(shopify, store),
        );

        let (status, content_type, body) = send(app(state.clone()), "GET", "/dashboard").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(content_type.unwrap().starts_with("text/html"));
        assert!(!body.contains("<script>"));
        assert!(body.contains("&lt;script&gt;"));

        let (status, _, body) = send(app(state), "GET", "/dashboard-data/").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(value["error"].as_str().unwrap().contains("<script>alert(1)</script>"));
    }

    #[tokio::test]
    async fn pull_routes_reject_get() {
        let store = Arc::new(MemoryStore::new());
        let app = app(state_with(store, Ok(vec![]), Ok(vec![])));
        let (status, _, _) = send(app, "GET", "/shopify/pull").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn cors_allows_any_origin() {
        let store = Arc::new(MemoryStore::new());
        let resp = app(state_with(store, Ok(vec![]), Ok(vec![])))
            .oneshot(
                Request::builder()
                    .uri("/dashboard-data/")
                    .header(header::ORIGIN, "http://example.test")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
