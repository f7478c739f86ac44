//! # contract: interfaces to the remote content service
//!
//! The pipeline, the category resolver, the graph walker and the exporter only
//! talk to the remote system through the traits in this module. The CLI crate
//! implements all of them on one HTTP client; tests use the generated mocks.
//!
//! ## Error contract
//! - Every method returns [`SyncError`].
//! - Network failures, timeouts and 5xx/429 responses must be reported as
//!   [`SyncError::RemoteTransient`], the only variant the pipeline retries.
//! - Other refusals are [`SyncError::RemoteRejected`].
//! - Content payloads must be decoded through [`crate::content::Content::from_wire`]
//!   so unknown field types surface as [`SyncError::NoConverterFound`].
//!
//! ## Mocking & Testing
//! - Traits are annotated for `mockall`; the mocks are exported behind the
//!   default `test-export-mocks` feature so integration tests in other crates
//!   can use them.

use async_trait::async_trait;

#[cfg(any(test, feature = "test-export-mocks"))]
use mockall::automock;

use crate::content::{
    AssetRef, AssetUpload, CategoryItem, Content, ContentRef, NewContent, Pagination, SearchPage,
    SearchQuery,
};
use crate::error::SyncError;

/// CRUD on individual content items.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait ContentClient: Send + Sync {
    /// Fetch one content item with all of its fields.
    async fn get(&self, id: &str) -> Result<Content, SyncError>;

    async fn create(&self, content: NewContent) -> Result<ContentRef, SyncError>;

    /// Replace the stored item with `content` (matched by `content.id`).
    async fn update(&self, content: Content) -> Result<ContentRef, SyncError>;

    async fn delete(&self, id: &str) -> Result<(), SyncError>;
}

/// Paginated search within one library.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(
        &self,
        library_id: &str,
        query: &SearchQuery,
        pagination: Pagination,
    ) -> Result<SearchPage, SyncError>;
}

/// The remote category tree.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait CategoryClient: Send + Sync {
    /// Every category below (and including) the root named `root`.
    async fn list_categories(&self, root: &str) -> Result<Vec<CategoryItem>, SyncError>;

    /// Create `name` as a direct child of `parent_id`.
    async fn create_category(&self, parent_id: &str, name: &str) -> Result<CategoryItem, SyncError>;
}

/// Binary asset storage for images and files.
#[cfg_attr(any(test, feature = "test-export-mocks"), automock)]
#[async_trait]
pub trait AssetClient: Send + Sync {
    async fn create(&self, upload: AssetUpload) -> Result<AssetRef, SyncError>;
}
