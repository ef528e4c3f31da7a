//! Core domain model for adshop: normalized upstream drafts, persisted records
//! and the dashboard view.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "adshop-core";

/// Upstream system a record was pulled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    GoogleAds,
    Shopify,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::GoogleAds => "google-ads",
            Source::Shopify => "shopify",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "google-ads" | "googleads" => Ok(Source::GoogleAds),
            "shopify" => Ok(Source::Shopify),
            other => Err(format!("unknown source `{other}`")),
        }
    }
}

/// Normalized campaign metrics handed from the ad-platform fetcher to the upserter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdCampaignDraft {
    pub external_id: String,
    pub name: String,
    pub impressions: i64,
    pub clicks: i64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalized storefront product handed from the storefront fetcher to the upserter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDraft {
    pub external_id: String,
    pub title: String,
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted campaign row. Serializes to the flat dashboard shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdCampaignRecord {
    pub id: i64,
    #[serde(rename = "google_ads_id")]
    pub external_id: String,
    #[serde(rename = "campaign_name")]
    pub name: String,
    pub impressions: i64,
    pub clicks: i64,
    pub cost: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted product row. Serializes to the flat dashboard shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    #[serde(rename = "shopify_id")]
    pub external_id: String,
    pub title: String,
    pub price: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdCampaignRecord {
    pub fn from_draft(id: i64, draft: &AdCampaignDraft) -> Self {
        Self {
            id,
            external_id: draft.external_id.clone(),
            name: draft.name.clone(),
            impressions: draft.impressions,
            clicks: draft.clicks,
            cost: draft.cost,
            created_at: draft.created_at,
            updated_at: draft.updated_at,
        }
    }
}

impl ProductRecord {
    pub fn from_draft(id: i64, draft: &ProductDraft) -> Self {
        Self {
            id,
            external_id: draft.external_id.clone(),
            title: draft.title.clone(),
            price: draft.price,
            created_at: draft.created_at,
            updated_at: draft.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DashboardMetrics {
    pub shopify_total: usize,
    pub google_ads_total: usize,
}

/// Aggregated payload served by `/dashboard-data/` and rendered by `/dashboard`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DashboardData {
    pub metrics: DashboardMetrics,
    pub shopify_data: Vec<ProductRecord>,
    pub google_ads_data: Vec<AdCampaignRecord>,
}
