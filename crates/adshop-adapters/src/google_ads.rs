//! Google Ads campaign metrics via the REST `googleAds:search` endpoint.

use adshop_core::{AdCampaignDraft, Source};
use adshop_storage::HttpFetcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};
use tracing::{info, warn};

use crate::{
    json_i64, json_id, json_str, non_negative_count, optional_env, require_env, usable_amount,
    AdapterError, ConfigError, SourceFetcher,
};

/// REST version used when `GOOGLE_ADS_API_VERSION` is unset.
pub const DEFAULT_API_VERSION: &str = "v17";
pub const DEFAULT_API_BASE: &str = "https://googleads.googleapis.com";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub const CAMPAIGN_METRICS_QUERY: &str = "SELECT campaign.id, campaign.name, metrics.impressions, \
     metrics.clicks, metrics.cost_micros FROM campaign WHERE segments.date DURING TODAY";

const SOURCE_ID: &str = "google-ads";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleAdsConfig {
    pub developer_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub login_customer_id: Option<String>,
    pub customer_id: String,
    pub api_base: String,
    pub api_version: String,
    pub token_url: String,
}

impl GoogleAdsConfig {
    /// Load credentials from the environment.
    ///
    /// `GOOGLE_ADS_CUSTOMER_ID` falls back to the OAuth client id when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let developer_token = require_env("GOOGLE_ADS_DEVELOPER_TOKEN")?;
        let client_id = require_env("GOOGLE_ADS_CLIENT_ID")?;
        let client_secret = require_env("GOOGLE_ADS_CLIENT_SECRET")?;
        let refresh_token = require_env("GOOGLE_ADS_REFRESH_TOKEN")?;
        let login_customer_id = optional_env("GOOGLE_ADS_LOGIN_CUSTOMER_ID")
            .map(|v| normalize_customer_id("GOOGLE_ADS_LOGIN_CUSTOMER_ID", &v))
            .transpose()?;
        let customer_id = match optional_env("GOOGLE_ADS_CUSTOMER_ID") {
            Some(v) => normalize_customer_id("GOOGLE_ADS_CUSTOMER_ID", &v)?,
            None => client_id.clone(),
        };

        Ok(Self {
            developer_token,
            client_id,
            client_secret,
            refresh_token,
            login_customer_id,
            customer_id,
            api_base: optional_env("GOOGLE_ADS_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            api_version: optional_env("GOOGLE_ADS_API_VERSION")
                .map(|v| v.trim_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            token_url: optional_env("GOOGLE_ADS_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        })
    }

    pub fn search_url(&self) -> String {
        format!(
            "{}/{}/customers/{}/googleAds:search",
            self.api_base.trim_end_matches('/'),
            self.api_version,
            self.customer_id
        )
    }
}

/// Customer ids are often written `123-456-7890`; the API wants bare digits.
fn normalize_customer_id(key: &'static str, raw: &str) -> Result<String, ConfigError> {
    let digits = raw.chars().filter(|c| *c != '-').collect::<String>();
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::Invalid {
            key,
            message: format!("expected a numeric customer id, got `{raw}`"),
        });
    }
    Ok(digits)
}

pub struct GoogleAdsFetcher {
    http: HttpFetcher,
    config: Option<GoogleAdsConfig>,
}

impl GoogleAdsFetcher {
    /// Credentials are read from the environment on every fetch.
    pub fn from_env(http: HttpFetcher) -> Self {
        Self { http, config: None }
    }

    pub fn with_config(http: HttpFetcher, config: GoogleAdsConfig) -> Self {
        Self {
            http,
            config: Some(config),
        }
    }

    fn resolve_config(&self) -> Result<GoogleAdsConfig, ConfigError> {
        match &self.config {
            Some(config) => Ok(config.clone()),
            None => GoogleAdsConfig::from_env(),
        }
    }

    async fn access_token(&self, config: &GoogleAdsConfig) -> Result<String, AdapterError> {
        let request = self.http.client().post(&config.token_url).form(&[
            ("grant_type", "refresh_token"),
            ("client_id", config.client_id.as_str()),
            ("client_secret", config.client_secret.as_str()),
            ("refresh_token", config.refresh_token.as_str()),
        ]);
        let body = self.http.send_json(SOURCE_ID, request).await?;
        json_str(&body, &["access_token"])
            .map(ToString::to_string)
            .ok_or_else(|| AdapterError::Malformed {
                source_id: SOURCE_ID,
                message: "token response has no access_token".to_string(),
            })
    }
}

#[async_trait]
impl SourceFetcher for GoogleAdsFetcher {
    type Draft = AdCampaignDraft;

    fn source(&self) -> Source {
        Source::GoogleAds
    }

    async fn fetch(&self) -> Result<Vec<AdCampaignDraft>, AdapterError> {
        let config = self.resolve_config()?;
        let token = self.access_token(&config).await?;

        let mut request = self
            .http
            .client()
            .post(config.search_url())
            .bearer_auth(token)
            .header("developer-token", &config.developer_token)
            .json(&json!({ "query": CAMPAIGN_METRICS_QUERY }));
        if let Some(login_customer_id) = &config.login_customer_id {
            request = request.header("login-customer-id", login_customer_id);
        }

        let body = self.http.send_json(SOURCE_ID, request).await?;
        let drafts = normalize_campaign_rows(&body, Utc::now())?;
        info!(customer_id = %config.customer_id, rows = drafts.len(), "google ads campaigns fetched");
        Ok(drafts)
    }
}

/// Convert an amount in micro-currency units to the currency unit.
pub fn micros_to_currency(micros: i64) -> f64 {
    usable_amount(micros as f64 / 1_000_000.0)
}

/// Map a `googleAds:search` response body into drafts stamped with `fetched_at`.
///
/// An absent `results` array means the query matched nothing.
pub fn normalize_campaign_rows(
    body: &JsonValue,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<AdCampaignDraft>, AdapterError> {
    if !body.is_object() {
        return Err(AdapterError::Malformed {
            source_id: SOURCE_ID,
            message: "search response is not a JSON object".to_string(),
        });
    }
    let rows = match body.get("results") {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(rows)) => rows,
        Some(_) => {
            return Err(AdapterError::Malformed {
                source_id: SOURCE_ID,
                message: "`results` is not an array".to_string(),
            })
        }
    };

    let mut drafts = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(external_id) = json_id(row, &["campaign", "id"]) else {
            warn!(source_id = SOURCE_ID, "skipping search row without campaign.id");
            continue;
        };
        let cost_micros = json_i64(row, &["metrics", "costMicros"])
            .or_else(|| json_i64(row, &["metrics", "cost_micros"]))
            .unwrap_or(0);

        drafts.push(AdCampaignDraft {
            external_id,
            name: json_str(row, &["campaign", "name"]).unwrap_or_default().to_string(),
            impressions: non_negative_count(json_i64(row, &["metrics", "impressions"])),
            clicks: non_negative_count(json_i64(row, &["metrics", "clicks"])),
            cost: micros_to_currency(cost_micros),
            created_at: fetched_at,
            updated_at: fetched_at,
        });
    }
    Ok(drafts)
}
