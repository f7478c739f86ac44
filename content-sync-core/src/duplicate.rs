//! Duplication of a walked content tree.
//!
//! Copies are created deepest level first, so by the time a parent is copied
//! every item it references already has a new id to point at.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::content::NewContent;
use crate::contract::ContentClient;
use crate::error::{Result, SyncError};
use crate::graph::ContentGraph;

fn default_suffix() -> String {
    " (copy)".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateOptions {
    /// Appended to the name of every copy.
    #[serde(default = "default_suffix")]
    pub name_suffix: String,
}

impl Default for DuplicateOptions {
    fn default() -> Self {
        DuplicateOptions {
            name_suffix: default_suffix(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Duplication {
    pub root: String,
    /// Source id → id of its copy.
    pub ids: HashMap<String, String>,
}

/// Creates one copy of every distinct item in `graph`, with references
/// rewritten to the copies.
pub async fn duplicate(
    client: &dyn ContentClient,
    graph: &ContentGraph,
    options: &DuplicateOptions,
) -> Result<Duplication> {
    let contents = graph.contents();
    let mut ids: HashMap<String, String> = HashMap::new();

    for (depth, level) in graph.levels().into_iter().rev() {
        debug!(depth, items = level.len(), "[CLONE] Copying level");
        for source_id in level {
            if ids.contains_key(&source_id) {
                continue;
            }
            let source = contents.get(source_id.as_str()).ok_or_else(|| {
                SyncError::Configuration(format!("content `{source_id}` is missing from the graph"))
            })?;
            let copy = NewContent {
                name: format!("{}{}", source.name, options.name_suffix),
                content_type: source.content_type.clone(),
                library_id: source.library_id.clone(),
                tags: source.tags.clone(),
                fields: source
                    .fields
                    .iter()
                    .map(|(name, element)| (name.clone(), element.clone_for_create().remap_references(&ids)))
                    .collect(),
            };
            let created = match client.create(copy).await {
                Ok(created) => created,
                Err(e) => {
                    error!(source = %source_id, error = ?e, "[CLONE][ERROR] Failed to create copy");
                    return Err(e);
                }
            };
            info!(source = %source_id, copy = %created.id, "[CLONE] Created copy");
            ids.insert(source_id, created.id);
        }
    }

    let root = ids.get(&graph.root().id).cloned().ok_or_else(|| {
        SyncError::Configuration(format!("root `{}` was not copied", graph.root().id))
    })?;
    info!(root = %root, copies = ids.len(), "[CLONE] Duplication finished");
    Ok(Duplication { root, ids })
}
