//! Typed field-mapping configuration.
//!
//! A mapping describes how the columns of one CSV feed become the fields of
//! one remote content type. It is parsed once (by the CLI, from YAML) and only
//! read afterwards.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::content::SearchType;
use crate::element::ElementKind;
use crate::error::{Result, SyncError};

fn default_separator() -> String {
    ";".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingConfig {
    /// Library that owns the content type.
    pub library_id: String,
    pub content_type: String,
    /// Column holding the content name; also the natural key in reports.
    pub name_column: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional column with additional, separator-delimited tags.
    #[serde(default)]
    pub tag_column: Option<String>,
    /// Root of the category tree that category fields resolve under.
    #[serde(default)]
    pub category_root: Option<String>,
    /// Splits multi-valued cells.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Present when rows should update existing content instead of always
    /// creating new items.
    #[serde(default)]
    pub update: Option<UpdateMapping>,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMapping {
    /// Column whose value identifies the existing item.
    pub search_column: String,
    /// Remote field to match against; the content name when absent.
    #[serde(default)]
    pub search_field: Option<String>,
    #[serde(default)]
    pub create_if_missing: bool,
}

impl UpdateMapping {
    pub fn search_type(&self) -> SearchType {
        match &self.search_field {
            Some(field) => SearchType::Field(field.clone()),
            None => SearchType::Name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    /// CSV column; defaults to `name`. Unused by group kinds.
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub ignore: bool,
    /// Target category field of a `category_part`.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub display_mode: Option<String>,
    /// Children of a `group`.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Entries of a `multi_group`, each with its own columns.
    #[serde(default)]
    pub items: Vec<GroupItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupItem {
    pub fields: Vec<FieldSpec>,
}

impl FieldSpec {
    pub fn column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }

    /// Child specs used when rendering this field back to CSV. Multi-group
    /// entries share child names, so the first item stands for all of them.
    pub fn child_specs(&self) -> &[FieldSpec] {
        match self.kind {
            ElementKind::Group => &self.fields,
            ElementKind::MultiGroup => self
                .items
                .first()
                .map(|item| item.fields.as_slice())
                .unwrap_or(&[]),
            _ => &[],
        }
    }
}

impl MappingConfig {
    pub fn trace_loaded(&self) {
        info!(
            library_id = %self.library_id,
            content_type = %self.content_type,
            fields = self.fields.len(),
            update = self.update.is_some(),
            "Loaded field mapping"
        );
        debug!(?self, "Field mapping (full debug)");
    }

    /// Structural checks that do not need the CSV header.
    pub fn validate(&self) -> Result<()> {
        validate_specs(&self.fields, "")?;
        for spec in iter_leaf_specs(&self.fields) {
            if spec.kind == ElementKind::CategoryPart {
                if spec.category.is_none() {
                    return Err(SyncError::Configuration(format!(
                        "category_part field `{}` must name its target `category`",
                        spec.name
                    )));
                }
                if self.category_root.is_none() {
                    return Err(SyncError::Configuration(format!(
                        "field `{}` needs `category_root` to be configured",
                        spec.name
                    )));
                }
            }
            if spec.kind == ElementKind::Category && self.category_root.is_none() {
                return Err(SyncError::Configuration(format!(
                    "field `{}` needs `category_root` to be configured",
                    spec.name
                )));
            }
        }
        Ok(())
    }

    /// Every column the mapping reads, in declaration order.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns = vec![self.name_column.as_str()];
        if let Some(tag_column) = &self.tag_column {
            columns.push(tag_column);
        }
        if let Some(update) = &self.update {
            columns.push(&update.search_column);
        }
        columns.extend(iter_leaf_specs(&self.fields).map(FieldSpec::column));
        columns
    }

    /// Fails with every column the header lacks. Typos in column names must
    /// stop the run rather than silently drop a field.
    pub fn check_headers(&self, headers: &[String]) -> Result<()> {
        let present: HashSet<&str> = headers.iter().map(String::as_str).collect();
        let mut reported = HashSet::new();
        let missing: Vec<&str> = self
            .columns()
            .into_iter()
            .filter(|column| !present.contains(column) && reported.insert(*column))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(SyncError::Configuration(format!(
                "CSV is missing mapped columns: {}",
                missing.join(", ")
            )))
        }
    }
}

fn validate_specs(specs: &[FieldSpec], prefix: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for spec in specs {
        let qualified = format!("{prefix}{}", spec.name);
        if !seen.insert(spec.name.as_str()) {
            return Err(SyncError::Configuration(format!(
                "field `{qualified}` is declared twice"
            )));
        }
        match spec.kind {
            ElementKind::Group => {
                if spec.fields.is_empty() {
                    return Err(SyncError::Configuration(format!(
                        "group `{qualified}` declares no fields"
                    )));
                }
                validate_specs(&spec.fields, &format!("{qualified}."))?;
            }
            ElementKind::MultiGroup => {
                if spec.items.is_empty() {
                    return Err(SyncError::Configuration(format!(
                        "multi_group `{qualified}` declares no items"
                    )));
                }
                for item in &spec.items {
                    validate_specs(&item.fields, &format!("{qualified}."))?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// Depth-first walk over every non-group spec.
pub fn iter_leaf_specs(specs: &[FieldSpec]) -> impl Iterator<Item = &FieldSpec> {
    let mut stack: Vec<&FieldSpec> = specs.iter().rev().collect();
    std::iter::from_fn(move || {
        while let Some(spec) = stack.pop() {
            match spec.kind {
                ElementKind::Group => stack.extend(spec.fields.iter().rev()),
                ElementKind::MultiGroup => {
                    for item in spec.items.iter().rev() {
                        stack.extend(item.fields.iter().rev());
                    }
                }
                _ => return Some(spec),
            }
        }
        None
    })
}
