//! Plain data exchanged with the remote content service.
//!
//! Content fields are [`Element`]s; they go through [`Content::from_wire`] and
//! [`NewContent::to_wire`] instead of a serde derive so decoding failures keep
//! their [`SyncError`] variant (an unknown field type must surface as
//! `NoConverterFound`, not as a generic JSON error).

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::element::{ConverterRegistry, Element};
use crate::error::Result;

/// A content item as stored remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub id: String,
    pub name: String,
    pub content_type: String,
    pub library_id: String,
    pub tags: BTreeSet<String>,
    pub fields: BTreeMap<String, Element>,
}

/// Payload for creating a content item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewContent {
    pub name: String,
    pub content_type: String,
    pub library_id: String,
    pub tags: BTreeSet<String>,
    pub fields: BTreeMap<String, Element>,
}

#[derive(Deserialize)]
struct RawContent {
    id: String,
    name: String,
    content_type: String,
    library_id: String,
    #[serde(default)]
    tags: BTreeSet<String>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

impl Content {
    pub fn from_wire(raw: Value) -> Result<Self> {
        Self::from_wire_with(ConverterRegistry::global(), raw)
    }

    pub fn from_wire_with(registry: &ConverterRegistry, raw: Value) -> Result<Self> {
        let raw: RawContent = serde_json::from_value(raw)?;
        let mut fields = BTreeMap::new();
        for (name, value) in &raw.fields {
            fields.insert(name.clone(), registry.decode(name, value)?);
        }
        Ok(Content {
            id: raw.id,
            name: raw.name,
            content_type: raw.content_type,
            library_id: raw.library_id,
            tags: raw.tags,
            fields,
        })
    }

    pub fn to_wire(&self) -> Result<Value> {
        let mut body = content_body(
            &self.name,
            &self.content_type,
            &self.library_id,
            &self.tags,
            &self.fields,
        )?;
        body.insert("id".into(), Value::String(self.id.clone()));
        Ok(Value::Object(body))
    }
}

impl NewContent {
    pub fn to_wire(&self) -> Result<Value> {
        content_body(
            &self.name,
            &self.content_type,
            &self.library_id,
            &self.tags,
            &self.fields,
        )
        .map(Value::Object)
    }
}

fn content_body(
    name: &str,
    content_type: &str,
    library_id: &str,
    tags: &BTreeSet<String>,
    fields: &BTreeMap<String, Element>,
) -> Result<Map<String, Value>> {
    let mut wire_fields = Map::new();
    for (field, element) in fields {
        wire_fields.insert(field.clone(), element.to_wire(field)?);
    }
    let mut body = Map::new();
    body.insert("name".into(), Value::String(name.to_owned()));
    body.insert("content_type".into(), Value::String(content_type.to_owned()));
    body.insert("library_id".into(), Value::String(library_id.to_owned()));
    body.insert("tags".into(), serde_json::to_value(tags)?);
    body.insert("fields".into(), Value::Object(wire_fields));
    Ok(body)
}

/// Identifier returned by create and update calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: String,
}

/// How an existing item is looked up for an update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchType {
    /// Match on the content name.
    Name,
    /// Match on the value of a named field.
    Field(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub content_type: String,
    pub search_type: SearchType,
    /// Empty means "every item of the content type".
    pub value: String,
}

impl SearchQuery {
    pub fn all(content_type: &str) -> Self {
        SearchQuery {
            content_type: content_type.to_owned(),
            search_type: SearchType::Name,
            value: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Pagination {
    pub const DEFAULT_PAGE_SIZE: u32 = 50;

    pub fn first() -> Self {
        Pagination {
            page: 0,
            page_size: Self::DEFAULT_PAGE_SIZE,
        }
    }

    pub fn next(self) -> Self {
        Pagination {
            page: self.page + 1,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSummary {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub matches: Vec<ContentSummary>,
    pub has_more: bool,
}

/// A node of the remote category tree; `path` starts at the root category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryItem {
    pub id: String,
    pub path: Vec<String>,
}

impl CategoryItem {
    pub fn full_path(&self) -> String {
        self.path.join("/")
    }
}

/// A local file to upload as an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetUpload {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_fields_through_the_registry() {
        let raw = json!({
            "id": "c1",
            "name": "Widget",
            "content_type": "product",
            "library_id": "lib",
            "tags": ["import"],
            "fields": {
                "title": { "type": "text", "value": "Widget" },
                "related": { "type": "reference", "values": [{ "id": "c2" }, { "id": "c3" }] }
            }
        });
        let content = Content::from_wire(raw).unwrap();
        assert_eq!(content.fields["title"], Element::Text("Widget".into()));
        assert_eq!(
            content.fields["related"],
            Element::MultiReference(vec!["c2".into(), "c3".into()])
        );
        assert!(content.tags.contains("import"));
    }

    #[test]
    fn unknown_field_type_is_no_converter_found() {
        let raw = json!({
            "id": "c1",
            "name": "Widget",
            "content_type": "product",
            "library_id": "lib",
            "fields": { "shape": { "type": "polygon", "value": 3 } }
        });
        let err = Content::from_wire(raw).unwrap_err();
        assert!(matches!(
            err,
            crate::error::SyncError::NoConverterFound { ref tag, multi: false } if tag == "polygon"
        ));
    }

    #[test]
    fn wire_body_carries_id_and_fields() {
        let content = Content {
            id: "c1".into(),
            name: "Widget".into(),
            content_type: "product".into(),
            library_id: "lib".into(),
            tags: BTreeSet::new(),
            fields: BTreeMap::from([("count".to_string(), Element::Number(3))]),
        };
        let wire = content.to_wire().unwrap();
        assert_eq!(wire["id"], "c1");
        assert_eq!(wire["fields"]["count"], json!({ "type": "number", "value": 3 }));
    }
}
