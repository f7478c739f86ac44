//! Reconciliation pipeline: rows in, remote creates and updates out.
//!
//! Every accepted row becomes one record that runs through
//!
//! ```text
//! PENDING -> LOOKUP (update intent only) -> CREATE | MERGE_THEN_UPDATE -> SUCCEEDED | FAILED
//! ```
//!
//! # Responsibilities
//! - Validates the mapping and the CSV header before any record runs.
//! - Runs records on a bounded pool; one failing record never affects another.
//! - Retries transient remote failures with exponential backoff, rebuilding the
//!   record from its row on every attempt.
//! - Resolves category paths through a run-wide [`CategoryResolver`] and
//!   uploads local files before the record is written. Both are memoized for
//!   the run, so a retried attempt never creates a category or an asset twice.
//!
//! # Error Handling
//! Record-scoped failures end up in [`SyncReport::failed`] with the row's
//! natural key. Run-scoped failures (see [`SyncError::is_run_scoped`]) stop
//! launching new records and are returned once the in-flight ones finish.
//!
//! # Navigation
//! - Main entrypoint: [`synchronise`]
//! - Supporting types: [`Remote`], [`SyncOptions`], [`SyncReport`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::category::CategoryResolver;
use crate::content::{AssetRef, AssetUpload, ContentSummary, NewContent, Pagination, SearchQuery};
use crate::contract::{AssetClient, CategoryClient, ContentClient, SearchClient};
use crate::element::{Fields, Resolutions};
use crate::error::{Result, SyncError};
use crate::filter::RowFilter;
use crate::generic::{GenericRow, Row, RowSet};
use crate::mapping::MappingConfig;
use crate::retry::{execute_with_retry, RetryConfig};
use crate::transform::{transform, ContentRecord};

/// The remote collaborators of a run, borrowed for its duration.
#[derive(Clone, Copy)]
pub struct Remote<'a> {
    pub content: &'a dyn ContentClient,
    pub search: &'a dyn SearchClient,
    pub categories: &'a dyn CategoryClient,
    pub assets: &'a dyn AssetClient,
}

fn default_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Records processed at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub filter: RowFilter,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            concurrency: default_concurrency(),
            retry: RetryConfig::default(),
            filter: RowFilter::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
    /// An existing item already matched the row; no update call was made.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordSuccess {
    pub index: usize,
    pub key: String,
    pub id: String,
    pub action: SyncAction,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct RecordFailure {
    pub index: usize,
    pub key: String,
    pub error: SyncError,
    pub attempts: u32,
}

#[derive(Debug)]
pub struct SyncReport {
    pub run_id: Uuid,
    /// Rows in the input, including filtered ones.
    pub total: usize,
    pub succeeded: Vec<RecordSuccess>,
    pub failed: Vec<RecordFailure>,
    /// Rows rejected by the filter or never started because of cancellation.
    pub skipped: usize,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn count(&self, action: SyncAction) -> usize {
        self.succeeded.iter().filter(|s| s.action == action).count()
    }

    fn log_summary(&self) {
        for failure in &self.failed {
            error!(
                run_id = %self.run_id,
                row = failure.index,
                key = %failure.key,
                attempts = failure.attempts,
                error = %failure.error.chain(),
                "[SYNC][ERROR] Record failed"
            );
        }
        info!(
            run_id = %self.run_id,
            total = self.total,
            succeeded = self.succeeded.len(),
            created = self.count(SyncAction::Created),
            updated = self.count(SyncAction::Updated),
            unchanged = self.count(SyncAction::Unchanged),
            failed = self.failed.len(),
            skipped = self.skipped,
            "[SYNC] Run finished"
        );
    }
}

enum Outcome {
    Succeeded(RecordSuccess),
    Failed(RecordFailure),
    Cancelled,
}

/// Synchronises `rows` into the content type described by `mapping`.
///
/// Returns `Err` only for run-scoped failures; per-record failures are in the
/// report. Cancelling `cancel` stops launching new records.
pub async fn synchronise(
    mapping: &MappingConfig,
    rows: &RowSet,
    remote: Remote<'_>,
    options: &SyncOptions,
    cancel: &CancellationToken,
) -> Result<SyncReport> {
    let run_id = Uuid::new_v4();
    info!(%run_id, rows = rows.rows.len(), content_type = %mapping.content_type, "[SYNC] Starting synchronisation");

    mapping.validate()?;
    mapping.check_headers(&rows.headers)?;
    if let Some(column) = options
        .filter
        .columns()
        .find(|column| !rows.headers.iter().any(|header| header.as_str() == *column))
    {
        return Err(SyncError::Configuration(format!(
            "filter column `{column}` is not in the CSV"
        )));
    }

    let pipeline = Pipeline {
        mapping,
        remote,
        retry: options.retry,
        resolver: mapping
            .category_root
            .as_ref()
            .map(|root| CategoryResolver::new(remote.categories, root.clone())),
        uploads: Mutex::new(HashMap::new()),
    };

    let (accepted, filtered): (Vec<&Row>, Vec<&Row>) =
        rows.rows.iter().partition(|row| options.filter.accepts(row));
    if !filtered.is_empty() {
        info!(%run_id, filtered = filtered.len(), "[SYNC] Rows rejected by filter");
    }

    let run_token = cancel.child_token();
    let mut report = SyncReport {
        run_id,
        total: rows.rows.len(),
        succeeded: Vec::new(),
        failed: Vec::new(),
        skipped: filtered.len(),
    };
    let mut fatal: Option<SyncError> = None;

    let mut outcomes = stream::iter(accepted)
        .map(|row| pipeline.process(row, &run_token))
        .buffer_unordered(options.concurrency.max(1));

    while let Some(outcome) = outcomes.next().await {
        match outcome {
            Outcome::Succeeded(success) => {
                info!(row = success.index, key = %success.key, id = %success.id, action = ?success.action, "[SYNC] Record succeeded");
                report.succeeded.push(success);
            }
            Outcome::Failed(failure) if failure.error.is_run_scoped() => {
                error!(row = failure.index, key = %failure.key, error = %failure.error.chain(), "[SYNC][ERROR] Aborting run");
                run_token.cancel();
                fatal.get_or_insert(failure.error);
            }
            Outcome::Failed(failure) => report.failed.push(failure),
            Outcome::Cancelled => report.skipped += 1,
        }
    }

    if let Some(e) = fatal {
        return Err(e);
    }
    if cancel.is_cancelled() {
        warn!(%run_id, skipped = report.skipped, "[SYNC] Run cancelled");
    }
    report.succeeded.sort_by_key(|s| s.index);
    report.failed.sort_by_key(|f| f.index);
    report.log_summary();
    Ok(report)
}

struct Pipeline<'a> {
    mapping: &'a MappingConfig,
    remote: Remote<'a>,
    retry: RetryConfig,
    resolver: Option<CategoryResolver<'a>>,
    /// Local path → uploaded asset, shared by every record and attempt.
    uploads: Mutex<HashMap<PathBuf, AssetRef>>,
}

impl Pipeline<'_> {
    async fn process(&self, row: &Row, cancel: &CancellationToken) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }
        let key = self.row_key(row);
        debug!(row = row.index, %key, "[SYNC] Processing record");
        let outcome = execute_with_retry(&self.retry, |attempt| self.attempt(row, attempt)).await;
        match outcome.result {
            Ok((id, action)) => Outcome::Succeeded(RecordSuccess {
                index: row.index,
                key,
                id,
                action,
                attempts: outcome.attempts,
            }),
            Err(error) => Outcome::Failed(RecordFailure {
                index: row.index,
                key,
                error,
                attempts: outcome.attempts,
            }),
        }
    }

    /// Best-effort natural key, available even when the row fails to
    /// transform.
    fn row_key(&self, row: &Row) -> String {
        let search = self
            .mapping
            .update
            .as_ref()
            .and_then(|update| row.get(&update.search_column));
        search
            .or_else(|| row.get(&self.mapping.name_column))
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| format!("row {}", row.index))
    }

    async fn attempt(&self, row: &Row, attempt: u32) -> Result<(String, SyncAction)> {
        let generic = GenericRow::from_row(self.mapping, row)?;
        let mut record = transform(self.mapping, &generic)?;
        self.resolve_pending(&mut record).await?;
        debug!(row = row.index, attempt, "[SYNC] Record ready");

        if !record.update_intent {
            return self.create(record).await;
        }
        let key = record.key().to_owned();
        let query = SearchQuery {
            content_type: self.mapping.content_type.clone(),
            search_type: record.search_type.clone(),
            value: key.clone(),
        };
        let matches = self.find_all(&query).await?;
        match matches.as_slice() {
            [] if record.create_if_missing => self.create(record).await,
            [] => Err(SyncError::NotFound { key }),
            [existing] => self.merge_then_update(&existing.id, record).await,
            many => Err(SyncError::AmbiguousMatch {
                key,
                count: many.len(),
            }),
        }
    }

    async fn find_all(&self, query: &SearchQuery) -> Result<Vec<ContentSummary>> {
        let mut pagination = Pagination::first();
        let mut matches = Vec::new();
        loop {
            let page = self
                .remote
                .search
                .search(&self.mapping.library_id, query, pagination)
                .await?;
            matches.extend(page.matches);
            if !page.has_more {
                return Ok(matches);
            }
            pagination = pagination.next();
        }
    }

    /// Fills in category ids and uploads local files referenced by the
    /// record.
    async fn resolve_pending(&self, record: &mut ContentRecord) -> Result<()> {
        let mut categories = Vec::new();
        let mut assets = Vec::new();
        for element in record.elements.values() {
            element.collect_pending(&mut categories, &mut assets);
        }
        if categories.is_empty() && assets.is_empty() {
            return Ok(());
        }

        let mut resolutions = Resolutions::default();
        if !categories.is_empty() {
            let resolver = self.resolver.as_ref().ok_or_else(|| {
                SyncError::Configuration("category fields need `category_root`".into())
            })?;
            resolutions.categories = resolver.create_categories(&categories).await?;
        }
        if !assets.is_empty() {
            // Held across the uploads so two records sharing a file upload it once.
            let mut uploads = self.uploads.lock().await;
            for path in assets {
                if resolutions.assets.contains_key(&path) {
                    continue;
                }
                let asset = match uploads.get(&path) {
                    Some(asset) => {
                        debug!(file = %path.display(), asset_id = %asset.id, "[SYNC] Reusing uploaded asset");
                        asset.clone()
                    }
                    None => {
                        let asset = self.upload(&path).await?;
                        uploads.insert(path.clone(), asset.clone());
                        asset
                    }
                };
                resolutions.assets.insert(path, asset);
            }
        }

        record.elements = std::mem::take(&mut record.elements)
            .into_iter()
            .map(|(name, element)| {
                let resolved = element.resolve(&name, &resolutions)?;
                Ok((name, resolved))
            })
            .collect::<Result<Fields>>()?;
        Ok(())
    }

    async fn upload(&self, path: &Path) -> Result<AssetRef> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        info!(file = %path.display(), size = bytes.len(), "[SYNC] Uploading asset");
        self.remote
            .assets
            .create(AssetUpload { file_name, bytes })
            .await
    }

    async fn create(&self, record: ContentRecord) -> Result<(String, SyncAction)> {
        let created = self
            .remote
            .content
            .create(NewContent {
                name: record.name,
                content_type: self.mapping.content_type.clone(),
                library_id: self.mapping.library_id.clone(),
                tags: record.tags,
                fields: record.elements,
            })
            .await?;
        Ok((created.id, SyncAction::Created))
    }

    async fn merge_then_update(&self, id: &str, record: ContentRecord) -> Result<(String, SyncAction)> {
        let mut existing = self.remote.content.get(id).await?;
        let mut changed = false;

        for (name, new) in record.elements {
            let merged = match existing.fields.get(&name) {
                None => Some(new),
                Some(current) => current.update(&name, &new)?,
            };
            if let Some(merged) = merged {
                debug!(id, field = %name, "[SYNC] Field changed");
                existing.fields.insert(name, merged);
                changed = true;
            }
        }
        let tag_count = existing.tags.len();
        existing.tags.extend(record.tags);
        changed |= existing.tags.len() != tag_count;
        if existing.name != record.name {
            existing.name = record.name;
            changed = true;
        }

        if !changed {
            return Ok((existing.id, SyncAction::Unchanged));
        }
        let updated = self.remote.content.update(existing).await?;
        Ok((updated.id, SyncAction::Updated))
    }
}
