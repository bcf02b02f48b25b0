use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::formats::Item;

pub const APIFY_BASE_URL: &str = "https://api.apify.com";

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid dataset url: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for DatasetError {
    fn from(err: reqwest::Error) -> Self {
        DatasetError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(err: serde_json::Error) -> Self {
        DatasetError::Parse(err.to_string())
    }
}

/// Source of the complete current item set.
#[async_trait]
pub trait DatasetSource: Send + Sync {
    async fn fetch_items(&self) -> Result<Vec<Item>, DatasetError>;
}

/// Reads every item of one Apify dataset in a single request.
pub struct ApifyDataset {
    client: reqwest::Client,
    base_url: String,
    dataset_id: String,
    token: String,
}

impl ApifyDataset {
    pub fn new(base_url: &str, dataset_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
            dataset_id: dataset_id.into(),
            token: token.into(),
        }
    }

    fn items_url(&self) -> Result<Url, DatasetError> {
        let raw = format!("{}/v2/datasets/{}/items", self.base_url, self.dataset_id);
        let mut url =
            Url::parse(&raw).map_err(|err| DatasetError::InvalidUrl(format!("{raw}: {err}")))?;
        url.query_pairs_mut().append_pair("format", "json");
        Ok(url)
    }
}

#[async_trait]
impl DatasetSource for ApifyDataset {
    async fn fetch_items(&self) -> Result<Vec<Item>, DatasetError> {
        let url = self.items_url()?;
        tracing::debug!(dataset_id = %self.dataset_id, "fetching dataset items");

        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(DatasetError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let body = resp.text().await?;
        let items: Vec<Item> = serde_json::from_str(&body)?;
        Ok(items)
    }
}
