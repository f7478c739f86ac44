//! Content reference-graph walker.
//!
//! Starting from one content item, follows every `reference` and
//! `multi_reference` field (including those nested in groups) and builds a
//! rooted tree of [`ContentContainer`]s in an arena. Shared references yield
//! one tree node per occurrence but are fetched only once. A reference back to
//! an ancestor is rejected with [`SyncError::ReferenceCycle`].

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, info};

use crate::content::Content;
use crate::contract::ContentClient;
use crate::error::{Result, SyncError};

/// Index of a node in [`ContentGraph`].
pub type NodeId = usize;

#[derive(Debug, Clone, PartialEq)]
pub struct ContentContainer {
    pub id: String,
    pub content: Content,
    /// `None` for the root.
    pub parent: Option<NodeId>,
    /// Field path (`related`, `bundle.product`) → children in reference order.
    pub children: BTreeMap<String, Vec<NodeId>>,
}

#[derive(Debug, Clone)]
pub struct ContentGraph {
    nodes: Vec<ContentContainer>,
}

impl ContentGraph {
    pub const ROOT: NodeId = 0;

    pub fn root(&self) -> &ContentContainer {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, id: NodeId) -> Option<&ContentContainer> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> &[ContentContainer] {
        &self.nodes
    }

    /// Content ids from the root down to `node`, inclusive.
    pub fn path_to(&self, node: NodeId) -> Vec<String> {
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(index) = current {
            let container = &self.nodes[index];
            path.push(container.id.clone());
            current = container.parent;
        }
        path.reverse();
        path
    }

    /// Content ids per depth, root at depth 0, each level in pre-order.
    pub fn levels(&self) -> BTreeMap<usize, Vec<String>> {
        let mut levels: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        let mut stack = vec![(Self::ROOT, 0usize)];
        while let Some((index, depth)) = stack.pop() {
            let container = &self.nodes[index];
            levels.entry(depth).or_default().push(container.id.clone());
            let children: Vec<NodeId> = container.children.values().flatten().copied().collect();
            stack.extend(children.into_iter().rev().map(|child| (child, depth + 1)));
        }
        levels
    }

    /// Distinct content items in the graph.
    pub fn contents(&self) -> HashMap<&str, &Content> {
        self.nodes
            .iter()
            .map(|node| (node.id.as_str(), &node.content))
            .collect()
    }
}

/// Walks the reference graph below `root_id`. Any fetch failure aborts the
/// walk.
pub async fn walk(client: &dyn ContentClient, root_id: &str) -> Result<ContentGraph> {
    info!(root = %root_id, "[GRAPH] Walking reference graph");
    let mut cache: HashMap<String, Content> = HashMap::new();
    let root = fetch(client, &mut cache, root_id).await?;
    let mut graph = ContentGraph {
        nodes: vec![ContentContainer {
            id: root_id.to_owned(),
            content: root,
            parent: None,
            children: BTreeMap::new(),
        }],
    };

    let mut stack = vec![ContentGraph::ROOT];
    while let Some(parent) = stack.pop() {
        let references: Vec<(String, String)> = graph.nodes[parent]
            .content
            .fields
            .iter()
            .flat_map(|(field, element)| element.references(field))
            .collect();
        if references.is_empty() {
            continue;
        }
        let ancestors = graph.path_to(parent);
        let mut pushed = Vec::with_capacity(references.len());
        for (field, child_id) in references {
            if ancestors.contains(&child_id) {
                let mut path = ancestors.clone();
                path.push(child_id);
                return Err(SyncError::ReferenceCycle { path });
            }
            let content = fetch(client, &mut cache, &child_id).await?;
            let node = graph.nodes.len();
            graph.nodes.push(ContentContainer {
                id: child_id,
                content,
                parent: Some(parent),
                children: BTreeMap::new(),
            });
            graph.nodes[parent]
                .children
                .entry(field)
                .or_default()
                .push(node);
            pushed.push(node);
        }
        stack.extend(pushed.into_iter().rev());
    }

    info!(
        root = %root_id,
        nodes = graph.nodes.len(),
        distinct = cache.len(),
        "[GRAPH] Walk finished"
    );
    Ok(graph)
}

async fn fetch(
    client: &dyn ContentClient,
    cache: &mut HashMap<String, Content>,
    id: &str,
) -> Result<Content> {
    if let Some(content) = cache.get(id) {
        return Ok(content.clone());
    }
    debug!(id, "[GRAPH] Fetching content");
    let content = client.get(id).await?;
    cache.insert(id.to_owned(), content.clone());
    Ok(content)
}
