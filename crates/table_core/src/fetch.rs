use std::{collections::BTreeMap, marker::PhantomData};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{error::ApiError, protocol::Page};
use thiserror::Error;
use tracing::debug;

/// Request parameters derived from table state plus any static params.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionQuery {
    pub search: String,
    pub limit: u32,
    pub offset: u32,
    pub ordering: String,
    pub params: BTreeMap<String, String>,
}

impl CollectionQuery {
    /// Query-string pairs in the shape the list endpoints expect. Empty
    /// search and ordering are omitted rather than sent as empty values.
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = Vec::with_capacity(self.params.len() + 4);
        if !self.search.is_empty() {
            pairs.push(("search".to_string(), self.search.clone()));
        }
        pairs.push(("limit".to_string(), self.limit.to_string()));
        pairs.push(("offset".to_string(), self.offset.to_string()));
        if !self.ordering.is_empty() {
            pairs.push(("ordering".to_string(), self.ordering.clone()));
        }
        for (name, value) in &self.params {
            pairs.push((name.clone(), value.clone()));
        }
        pairs
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("list endpoint rejected request: {0:?}")]
    Api(ApiError),
    #[error("list endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode list page: {0}")]
    Decode(String),
}

/// Seam to the paginated list endpoints. Implementations resolve one
/// derived query to one page of rows.
#[async_trait]
pub trait CollectionFetcher<R>: Send + Sync {
    async fn fetch_page(&self, query: &CollectionQuery) -> Result<Page<R>>;
}

pub struct MissingCollectionFetcher;

#[async_trait]
impl<R: Send> CollectionFetcher<R> for MissingCollectionFetcher {
    async fn fetch_page(&self, _query: &CollectionQuery) -> Result<Page<R>> {
        Err(anyhow!("no collection backend configured"))
    }
}

/// Fetches pages from a single collection URL over HTTP. Non-2xx responses
/// carrying an [`ApiError`] body surface it as [`FetchError::Api`].
pub struct HttpCollectionFetcher<R> {
    http: Client,
    collection_url: String,
    _row: PhantomData<fn() -> R>,
}

impl<R> HttpCollectionFetcher<R> {
    pub fn new(collection_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), collection_url)
    }

    pub fn with_client(http: Client, collection_url: impl Into<String>) -> Self {
        Self {
            http,
            collection_url: collection_url.into(),
            _row: PhantomData,
        }
    }

    pub fn collection_url(&self) -> &str {
        &self.collection_url
    }
}

#[async_trait]
impl<R> CollectionFetcher<R> for HttpCollectionFetcher<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch_page(&self, query: &CollectionQuery) -> Result<Page<R>> {
        let response = self
            .http
            .get(&self.collection_url)
            .query(&query.to_query_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(FetchError::Api(api_error).into());
            }
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let bytes = response.bytes().await?;
        let page: Page<R> = serde_json::from_slice(&bytes)
            .map_err(|err| FetchError::Decode(err.to_string()))?;

        debug!(
            "fetched page url={} results={} count={}",
            self.collection_url,
            page.results.len(),
            page.count
        );
        Ok(page)
    }
}
