#![doc = "HTTP client for the remote content service: implements every collaborator trait of content-sync-core."]
//
//! # Content API client (CLI <-> Core)
//!
//! This module bridges the trait abstractions in [`content_sync_core::contract`] to the real
//! REST API. One [`ContentApiClient`] is built per run and shared by reference.
//!
//! - Construct it from a loaded [`RemoteConfig`] (base URL, bearer token, timeout).
//! - Responses with status 5xx, 408 or 429, timeouts and connection failures become
//!   `SyncError::RemoteTransient`, which the pipeline retries. Every other non-success status
//!   becomes `SyncError::RemoteRejected` carrying the response body.
//! - Content bodies are decoded with `Content::from_wire` so unknown field types are reported
//!   as `NoConverterFound`.

use async_trait::async_trait;
use content_sync_core::content::{
    AssetRef, AssetUpload, CategoryItem, Content, ContentRef, NewContent, Pagination, SearchPage,
    SearchQuery, SearchType,
};
use content_sync_core::contract::{AssetClient, CategoryClient, ContentClient, SearchClient};
use content_sync_core::SyncError;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::load_config::RemoteConfig;

pub struct ContentApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Serialize)]
struct SearchBody<'a> {
    content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
    value: &'a str,
    page: u32,
    page_size: u32,
}

#[derive(Serialize)]
struct NewCategoryBody<'a> {
    parent_id: &'a str,
    name: &'a str,
}

impl ContentApiClient {
    pub fn new(config: &RemoteConfig) -> anyhow::Result<Self> {
        let http = match reqwest::Client::builder().timeout(config.timeout).build() {
            Ok(http) => http,
            Err(e) => {
                tracing::error!(error = ?e, "Failed to build HTTP client");
                return Err(anyhow::anyhow!("Failed to build HTTP client: {e}"));
            }
        };
        tracing::info!(
            base_url = %config.base_url,
            api_key_set = !config.api_key.is_empty(),
            timeout_secs = config.timeout.as_secs(),
            "Initialized ContentApiClient"
        );
        Ok(ContentApiClient {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response, SyncError> {
        let response = request.send().await.map_err(|e| {
            tracing::error!(error = ?e, call = what, "Request failed before a response");
            if e.is_builder() {
                SyncError::Configuration(format!("{what}: invalid request: {e}"))
            } else {
                SyncError::RemoteTransient(format!("{what}: {e}"))
            }
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().await.unwrap_or_default();
        tracing::error!(status = status.as_u16(), call = what, detail = %detail, "Remote returned an error status");
        Err(classify(status, what, detail))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, what: &str) -> Result<T, SyncError> {
        let response = self.send(request, what).await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::RemoteTransient(format!("{what}: reading body: {e}")))?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Maps a non-success status to the error taxonomy.
pub fn classify(status: StatusCode, what: &str, detail: String) -> SyncError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        SyncError::RemoteTransient(format!("{what}: HTTP {status}: {detail}"))
    } else {
        SyncError::RemoteRejected {
            status: status.as_u16(),
            detail,
        }
    }
}

#[async_trait]
impl ContentClient for ContentApiClient {
    async fn get(&self, id: &str) -> Result<Content, SyncError> {
        tracing::debug!(id, "Fetching content");
        let raw: Value = self
            .send_json(self.request(Method::GET, &format!("/content/{id}")), "get content")
            .await?;
        Content::from_wire(raw)
    }

    async fn create(&self, content: NewContent) -> Result<ContentRef, SyncError> {
        tracing::info!(name = %content.name, content_type = %content.content_type, "Creating content");
        let body = content.to_wire()?;
        let created: ContentRef = self
            .send_json(self.request(Method::POST, "/content").json(&body), "create content")
            .await?;
        tracing::info!(id = %created.id, "Successfully created content");
        Ok(created)
    }

    async fn update(&self, content: Content) -> Result<ContentRef, SyncError> {
        tracing::info!(id = %content.id, "Updating content");
        let body = content.to_wire()?;
        self.send_json(
            self.request(Method::PUT, &format!("/content/{}", content.id)).json(&body),
            "update content",
        )
        .await
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        tracing::info!(id, "Deleting content");
        self.send(self.request(Method::DELETE, &format!("/content/{id}")), "delete content")
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SearchClient for ContentApiClient {
    async fn search(
        &self,
        library_id: &str,
        query: &SearchQuery,
        pagination: Pagination,
    ) -> Result<SearchPage, SyncError> {
        let field = match &query.search_type {
            SearchType::Name => None,
            SearchType::Field(field) => Some(field.as_str()),
        };
        let body = SearchBody {
            content_type: &query.content_type,
            field,
            value: &query.value,
            page: pagination.page,
            page_size: pagination.page_size,
        };
        tracing::debug!(library_id, page = pagination.page, value = %query.value, "Searching content");
        self.send_json(
            self.request(Method::POST, &format!("/libraries/{library_id}/search"))
                .json(&body),
            "search content",
        )
        .await
    }
}

#[async_trait]
impl CategoryClient for ContentApiClient {
    async fn list_categories(&self, root: &str) -> Result<Vec<CategoryItem>, SyncError> {
        tracing::info!(root, "Listing categories");
        self.send_json(
            self.request(Method::GET, "/categories").query(&[("root", root)]),
            "list categories",
        )
        .await
    }

    async fn create_category(&self, parent_id: &str, name: &str) -> Result<CategoryItem, SyncError> {
        tracing::info!(parent_id, name, "Creating category");
        self.send_json(
            self.request(Method::POST, "/categories")
                .json(&NewCategoryBody { parent_id, name }),
            "create category",
        )
        .await
    }
}

#[async_trait]
impl AssetClient for ContentApiClient {
    async fn create(&self, upload: AssetUpload) -> Result<AssetRef, SyncError> {
        let checksum = {
            let mut hasher = Sha256::new();
            hasher.update(&upload.bytes);
            format!("{:x}", hasher.finalize())
        };
        tracing::info!(file_name = %upload.file_name, size = upload.bytes.len(), "Uploading asset");
        let asset: AssetRef = self
            .send_json(
                self.request(Method::POST, "/assets")
                    .header("X-File-Name", upload.file_name.as_str())
                    .header("X-Content-Sha256", checksum)
                    .body(upload.bytes),
                "upload asset",
            )
            .await?;
        tracing::info!(asset_id = %asset.id, "Successfully uploaded asset");
        Ok(asset)
    }
}
