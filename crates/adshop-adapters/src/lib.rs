//! Upstream source contracts: configuration, fetchers and response normalizers.

use adshop_core::Source;
use adshop_storage::FetchError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod google_ads;
pub mod shopify;

pub use google_ads::{GoogleAdsConfig, GoogleAdsFetcher};
pub use shopify::{ShopifyConfig, ShopifyFetcher};

pub const CRATE_NAME: &str = "adshop-adapters";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} is required but not set")]
    Missing { key: &'static str },
    #[error("{key} is invalid: {message}")]
    Invalid { key: &'static str, message: String },
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("malformed {source_id} response: {message}")]
    Malformed { source_id: &'static str, message: String },
}

/// One upstream API mapped into normalized drafts.
///
/// A call issues exactly one upstream request sequence and maps the single
/// response it gets back; there is no pagination and no retry.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    type Draft: Send;

    fn source(&self) -> Source;

    async fn fetch(&self) -> Result<Vec<Self::Draft>, AdapterError>;
}

/// Read a required variable; blank values count as missing.
pub fn require_env(key: &'static str) -> Result<String, ConfigError> {
    optional_env(key).ok_or(ConfigError::Missing { key })
}

pub fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn json_at<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    Some(cur)
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    json_at(value, path)?.as_str()
}

/// Identifiers arrive as JSON numbers (Shopify) or int64-as-string (Google Ads REST).
fn json_id(value: &JsonValue, path: &[&str]) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_i64(value: &JsonValue, path: &[&str]) -> Option<i64> {
    match json_at(value, path)? {
        JsonValue::String(s) => s.trim().parse().ok(),
        JsonValue::Number(n) => n.as_i64().or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX))),
        _ => None,
    }
}

/// Clamp a count to the non-negative range; absent values are zero.
fn non_negative_count(value: Option<i64>) -> i64 {
    value.unwrap_or(0).max(0)
}

/// Zero for anything that is not a finite, non-negative amount.
fn usable_amount(value: f64) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        0.0
    }
}
