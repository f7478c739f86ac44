//! Category hierarchy resolver.
//!
//! Turns slash-separated category paths into remote category ids, creating
//! any missing ancestors top-down. Known paths are cached for the whole run:
//! the cache is seeded once from the remote listing and only grows.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, error, info};

use crate::contract::CategoryClient;
use crate::error::{Result, SyncError};

static SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*/+\s*").expect("valid regex"));

pub struct CategoryResolver<'a> {
    client: &'a dyn CategoryClient,
    root: String,
    seeded: OnceCell<()>,
    /// Full path → id. The write lock is held for the whole resolution of
    /// one path.
    known: RwLock<HashMap<String, String>>,
}

impl<'a> CategoryResolver<'a> {
    pub fn new(client: &'a dyn CategoryClient, root: impl Into<String>) -> Self {
        CategoryResolver {
            client,
            root: root.into(),
            seeded: OnceCell::new(),
            known: RwLock::new(HashMap::new()),
        }
    }

    /// Splits `path` into trimmed segments, prefixed with the root when the
    /// path does not already start with it.
    pub fn normalize(&self, path: &str) -> Vec<String> {
        let mut segments: Vec<String> = SEPARATOR
            .split(path.trim())
            .map(str::trim)
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned)
            .collect();
        if segments.first() != Some(&self.root) {
            segments.insert(0, self.root.clone());
        }
        segments
    }

    async fn seed(&self) -> Result<()> {
        self.seeded
            .get_or_try_init(|| async {
                let items = self.client.list_categories(&self.root).await?;
                let mut known = self.known.write().await;
                for item in items {
                    known.insert(item.full_path(), item.id);
                }
                info!(root = %self.root, known = known.len(), "[CATEGORY] Seeded category cache");
                Ok::<(), SyncError>(())
            })
            .await
            .map(|_| ())
    }

    /// Id of the category at `path`, creating it and any missing ancestors.
    pub async fn resolve(&self, path: &str) -> Result<String> {
        self.seed().await?;
        let segments = self.normalize(path);
        let full = segments.join("/");

        if let Some(id) = self.known.read().await.get(&full) {
            debug!(path = %full, "[CATEGORY] Cache hit");
            return Ok(id.clone());
        }

        let mut known = self.known.write().await;
        // Longest prefix already known; a concurrent resolver may have
        // finished this path while we waited for the lock.
        let (mut depth, mut parent_id) = (1..=segments.len())
            .rev()
            .find_map(|depth| {
                known
                    .get(&segments[..depth].join("/"))
                    .map(|id| (depth, id.clone()))
            })
            .ok_or_else(|| {
                SyncError::Configuration(format!(
                    "root category `{}` does not exist remotely",
                    self.root
                ))
            })?;

        while depth < segments.len() {
            let name = &segments[depth];
            let created = match self.client.create_category(&parent_id, name).await {
                Ok(created) => created,
                Err(e) => {
                    error!(path = %full, segment = %name, error = ?e, "[CATEGORY][ERROR] Failed to create category");
                    return Err(e);
                }
            };
            depth += 1;
            let created_path = segments[..depth].join("/");
            info!(path = %created_path, id = %created.id, "[CATEGORY] Created category");
            known.insert(created_path, created.id.clone());
            parent_id = created.id;
        }
        Ok(parent_id)
    }

    /// Resolves every distinct path, in first-seen order. The map is keyed by
    /// the paths as given.
    pub async fn create_categories(&self, paths: &[String]) -> Result<HashMap<String, String>> {
        let mut seen = HashSet::new();
        let mut resolved = HashMap::new();
        for path in paths.iter().filter(|path| seen.insert(path.as_str())) {
            let id = self.resolve(path).await?;
            resolved.insert(path.clone(), id);
        }
        Ok(resolved)
    }

    /// Number of paths currently known, seeded or created.
    pub async fn known_len(&self) -> usize {
        self.known.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CategoryItem;
    use crate::contract::MockCategoryClient;
    use mockall::predicate::eq;

    fn item(id: &str, path: &[&str]) -> CategoryItem {
        CategoryItem {
            id: id.into(),
            path: path.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn seeded_client(items: Vec<CategoryItem>) -> MockCategoryClient {
        let mut client = MockCategoryClient::new();
        client
            .expect_list_categories()
            .with(eq("Products"))
            .times(1)
            .returning(move |_| Ok(items.clone()));
        client
    }

    #[test]
    fn normalize_prefixes_root_and_trims() {
        let client = MockCategoryClient::new();
        let resolver = CategoryResolver::new(&client, "Products");
        assert_eq!(resolver.normalize(" Shoes // Running "), vec!["Products", "Shoes", "Running"]);
        assert_eq!(resolver.normalize("Products/Shoes"), vec!["Products", "Shoes"]);
    }

    #[tokio::test]
    async fn known_path_needs_no_remote_call() {
        let mut client = seeded_client(vec![item("1", &["Products"]), item("2", &["Products", "Shoes"])]);
        client.expect_create_category().times(0);
        let resolver = CategoryResolver::new(&client, "Products");
        assert_eq!(resolver.resolve("Shoes").await.unwrap(), "2");
        assert_eq!(resolver.resolve("Products/Shoes").await.unwrap(), "2");
    }

    #[tokio::test]
    async fn creates_missing_ancestors_once() {
        let mut client = seeded_client(vec![item("root", &["Products"])]);
        client
            .expect_create_category()
            .with(eq("root"), eq("Shoes"))
            .times(1)
            .returning(|_, _| Ok(item("shoes", &["Products", "Shoes"])));
        client
            .expect_create_category()
            .with(eq("shoes"), eq("Running"))
            .times(1)
            .returning(|_, _| Ok(item("running", &["Products", "Shoes", "Running"])));
        client
            .expect_create_category()
            .with(eq("shoes"), eq("Trail"))
            .times(1)
            .returning(|_, _| Ok(item("trail", &["Products", "Shoes", "Trail"])));

        let resolver = CategoryResolver::new(&client, "Products");
        let paths = vec![
            "Shoes/Running".to_string(),
            "Shoes/Trail".to_string(),
            "Shoes/Running".to_string(),
        ];
        let resolved = resolver.create_categories(&paths).await.unwrap();
        assert_eq!(resolved["Shoes/Running"], "running");
        assert_eq!(resolved["Shoes/Trail"], "trail");
        assert_eq!(resolver.resolve("Products/Shoes").await.unwrap(), "shoes");
        assert_eq!(resolver.known_len().await, 4);
    }

    #[tokio::test]
    async fn missing_root_is_a_configuration_error() {
        let mut client = seeded_client(vec![]);
        client.expect_create_category().times(0);
        let resolver = CategoryResolver::new(&client, "Products");
        let err = resolver.resolve("Shoes").await.unwrap_err();
        assert!(err.is_run_scoped(), "{err}");
    }

    #[tokio::test]
    async fn created_ancestors_survive_a_failed_leaf() {
        let mut client = seeded_client(vec![item("root", &["Products"])]);
        client
            .expect_create_category()
            .with(eq("root"), eq("Shoes"))
            .times(1)
            .returning(|_, _| Ok(item("shoes", &["Products", "Shoes"])));
        client
            .expect_create_category()
            .with(eq("shoes"), eq("Running"))
            .times(1)
            .returning(|_, _| {
                Err(SyncError::RemoteRejected {
                    status: 409,
                    detail: "conflict".into(),
                })
            });
        let resolver = CategoryResolver::new(&client, "Products");
        assert!(resolver.resolve("Shoes/Running").await.is_err());
        assert_eq!(resolver.resolve("Shoes").await.unwrap(), "shoes");
    }
}
