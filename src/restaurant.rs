use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

/// Client for the restaurant service. Lookups are best-effort: any failure
/// reads as "no restaurant".
#[async_trait]
pub trait RestaurantClient: Send + Sync {
    async fn restaurant_for_creator(&self, user_id: i64) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct RestaurantBody {
    #[serde(rename = "_id")]
    id: Option<String>,
}

pub struct HttpRestaurantClient {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRestaurantClient {
    pub fn new(base_url: impl Into<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("build restaurant http client")?;
        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    async fn fetch(&self, user_id: i64) -> anyhow::Result<Option<String>> {
        let url = format!("{}/restaurants/creator/{}", self.base_url, user_id);
        let res = self.client.get(&url).send().await.context("restaurant request")?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body: RestaurantBody = res
            .error_for_status()
            .context("restaurant service status")?
            .json()
            .await
            .context("restaurant body")?;
        Ok(body.id)
    }
}

#[async_trait]
impl RestaurantClient for HttpRestaurantClient {
    async fn restaurant_for_creator(&self, user_id: i64) -> Option<String> {
        match self.fetch(user_id).await {
            Ok(id) => {
                debug!(user_id, found = id.is_some(), "restaurant lookup");
                id
            }
            Err(e) => {
                warn!(user_id, error = %e, "restaurant lookup failed");
                None
            }
        }
    }
}

/// Used when no restaurant service is configured.
pub struct NoRestaurants;

#[async_trait]
impl RestaurantClient for NoRestaurants {
    async fn restaurant_for_creator(&self, _user_id: i64) -> Option<String> {
        None
    }
}
