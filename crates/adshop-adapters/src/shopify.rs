//! Shopify Admin REST product listing.

use adshop_core::{ProductDraft, Source};
use adshop_storage::HttpFetcher;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{json_id, json_str, optional_env, require_env, usable_amount, AdapterError, ConfigError, SourceFetcher};

pub const API_VERSION: &str = "2023-10";

const SOURCE_ID: &str = "shopify";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShopifyConfig {
    pub api_key: String,
    pub api_password: String,
    pub shop_name: String,
    pub base_url: String,
}

impl ShopifyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = require_env("SHOPIFY_API_KEY")?;
        let api_password = require_env("SHOPIFY_API_PASSWORD")?;
        let shop_name = require_env("SHOPIFY_SHOP_NAME")?;
        let base_url = optional_env("SHOPIFY_BASE_URL")
            .unwrap_or_else(|| format!("https://{shop_name}.myshopify.com"));
        Ok(Self {
            api_key,
            api_password,
            shop_name,
            base_url,
        })
    }

    pub fn products_url(&self) -> String {
        format!(
            "{}/admin/api/{}/products.json",
            self.base_url.trim_end_matches('/'),
            API_VERSION
        )
    }
}

pub struct ShopifyFetcher {
    http: HttpFetcher,
    config: Option<ShopifyConfig>,
}

impl ShopifyFetcher {
    /// Credentials are read from the environment on every fetch.
    pub fn from_env(http: HttpFetcher) -> Self {
        Self { http, config: None }
    }

    pub fn with_config(http: HttpFetcher, config: ShopifyConfig) -> Self {
        Self {
            http,
            config: Some(config),
        }
    }

    fn resolve_config(&self) -> Result<ShopifyConfig, ConfigError> {
        match &self.config {
            Some(config) => Ok(config.clone()),
            None => ShopifyConfig::from_env(),
        }
    }
}

#[async_trait]
impl SourceFetcher for ShopifyFetcher {
    type Draft = ProductDraft;

    fn source(&self) -> Source {
        Source::Shopify
    }

    async fn fetch(&self) -> Result<Vec<ProductDraft>, AdapterError> {
        let config = self.resolve_config()?;
        let request = self
            .http
            .client()
            .get(config.products_url())
            .basic_auth(&config.api_key, Some(&config.api_password));

        let body = self.http.send_json(SOURCE_ID, request).await?;
        let drafts = normalize_products(&body, Utc::now())?;
        info!(shop = %config.shop_name, rows = drafts.len(), "shopify products fetched");
        Ok(drafts)
    }
}

/// Price of the first variant only. Unparsable, negative or missing prices are zero.
pub fn first_variant_price(product: &JsonValue) -> f64 {
    let Some(raw) = product
        .get("variants")
        .and_then(JsonValue::as_array)
        .and_then(|variants| variants.first())
        .and_then(|variant| variant.get("price"))
    else {
        return 0.0;
    };

    let parsed = match raw {
        JsonValue::String(s) => s.trim().parse::<f64>().ok(),
        JsonValue::Number(n) => n.as_f64(),
        _ => None,
    };
    match parsed {
        Some(price) => usable_amount(price),
        None => {
            debug!(raw = %raw, "unparsable variant price, defaulting to 0.0");
            0.0
        }
    }
}

/// Map a `products.json` body into drafts stamped with `fetched_at`.
pub fn normalize_products(
    body: &JsonValue,
    fetched_at: DateTime<Utc>,
) -> Result<Vec<ProductDraft>, AdapterError> {
    if !body.is_object() {
        return Err(AdapterError::Malformed {
            source_id: SOURCE_ID,
            message: "products response is not a JSON object".to_string(),
        });
    }
    let products = match body.get("products") {
        None | Some(JsonValue::Null) => return Ok(Vec::new()),
        Some(JsonValue::Array(products)) => products,
        Some(_) => {
            return Err(AdapterError::Malformed {
                source_id: SOURCE_ID,
                message: "`products` is not an array".to_string(),
            })
        }
    };

    let mut drafts = Vec::with_capacity(products.len());
    for product in products {
        let Some(external_id) = json_id(product, &["id"]) else {
            warn!(source_id = SOURCE_ID, "skipping product without id");
            continue;
        };
        drafts.push(ProductDraft {
            external_id,
            title: json_str(product, &["title"]).unwrap_or_default().to_string(),
            price: Some(first_variant_price(product)),
            created_at: fetched_at,
            updated_at: fetched_at,
        });
    }
    Ok(drafts)
}
