use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Hyperlink payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// One selected category. Rows carry a path, remote content carries an id;
/// the pipeline fills in the id before the record is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,
}

impl CategoryRef {
    pub fn from_path(raw: &str) -> Self {
        CategoryRef {
            id: None,
            path: raw
                .split('/')
                .map(str::trim)
                .filter(|segment| !segment.is_empty())
                .map(str::to_owned)
                .collect(),
        }
    }

    pub fn joined_path(&self) -> String {
        self.path.join("/")
    }

    /// Identity used when merging category selections.
    pub fn merge_key(&self) -> String {
        match &self.id {
            Some(id) => format!("id:{id}"),
            None => format!("path:{}", self.joined_path()),
        }
    }
}

/// A single path segment contributed by one column, folded into the
/// `category` field it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryPart {
    pub category: String,
    pub segment: String,
}

/// Where the bytes of an image or file live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    /// Already uploaded; `url` is the resolved delivery URL when known.
    Remote { id: String, url: Option<String> },
    /// Hosted elsewhere and referenced by URL only.
    External(String),
    /// On the local disk, waiting to be uploaded.
    Local(PathBuf),
}

impl AssetSource {
    pub const ASSET_PREFIX: &'static str = "asset:";

    /// Parses a CSV cell: `http(s)://` is external, `asset:<id>` is an
    /// uploaded asset, anything else is a local path.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            AssetSource::External(raw.to_owned())
        } else if let Some(id) = raw.strip_prefix(Self::ASSET_PREFIX) {
            AssetSource::Remote {
                id: id.to_owned(),
                url: None,
            }
        } else {
            AssetSource::Local(PathBuf::from(raw))
        }
    }

    /// Keeps only what identifies the asset; resolved URLs are dropped.
    pub fn identity(&self) -> Self {
        match self {
            AssetSource::Remote { id, .. } => AssetSource::Remote {
                id: id.clone(),
                url: None,
            },
            other => other.clone(),
        }
    }

    /// Cell text for CSV export.
    pub fn render(&self) -> String {
        match self {
            AssetSource::Remote { url: Some(url), .. } => url.clone(),
            AssetSource::Remote { id, url: None } => format!("{}{id}", Self::ASSET_PREFIX),
            AssetSource::External(url) => url.clone(),
            AssetSource::Local(path) => path.display().to_string(),
        }
    }
}

pub const DEFAULT_DISPLAY_MODE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub display_mode: String,
    pub source: AssetSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAsset {
    pub source: AssetSource,
}

/// Wire shape shared by images and files.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct WireAsset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireReference {
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_source_parsing() {
        assert_eq!(
            AssetSource::parse("https://cdn.example.com/a.png"),
            AssetSource::External("https://cdn.example.com/a.png".into())
        );
        assert_eq!(
            AssetSource::parse("asset:42"),
            AssetSource::Remote {
                id: "42".into(),
                url: None
            }
        );
        assert_eq!(
            AssetSource::parse(" images/a.png "),
            AssetSource::Local(PathBuf::from("images/a.png"))
        );
    }

    #[test]
    fn category_path_trims_segments() {
        let cat = CategoryRef::from_path(" Brand / Sub //Item ");
        assert_eq!(cat.path, vec!["Brand", "Sub", "Item"]);
        assert_eq!(cat.joined_path(), "Brand/Sub/Item");
    }
}
