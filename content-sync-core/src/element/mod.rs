//! The element model: one content field value as a closed sum type.
//!
//! Every variant supports the same four operations:
//!
//! - [`Element::convert`]: build a typed value from a [`GenericData`] payload.
//! - [`Element::update`]: merge a newly computed value into the persisted one,
//!   returning `None` when nothing changed.
//! - [`Element::clone_for_create`]: copy for creating a new item, keeping only
//!   identity-bearing parts of asset payloads.
//! - [`Element::to_csv`]: render for export (see [`render`]).
//!
//! Merging is only defined for kinds with an explicit rule. Everything else
//! fails with `NotImplemented` so an update sync never silently drops data.

mod kind;
mod registry;
pub mod render;
mod value;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{json, Map, Value};

use crate::content::AssetRef;
use crate::error::{Result, SyncError};
use crate::generic::{GenericData, GenericValue};

pub use kind::ElementKind;
pub use registry::ConverterRegistry;
pub use render::CsvValue;
pub use value::{AssetSource, CategoryPart, CategoryRef, FileAsset, Image, Link, DEFAULT_DISPLAY_MODE};

use value::{WireAsset, WireReference};

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

/// Child fields of a group, by name.
pub type Fields = BTreeMap<String, Element>;

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Text(String),
    MultiText(Vec<String>),
    FormattedText(String),
    Number(i64),
    Float(f64),
    Boolean(bool),
    Link(Link),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Category(Vec<CategoryRef>),
    CategoryPart(CategoryPart),
    Image(Image),
    MultiImage(Vec<Image>),
    File(FileAsset),
    Group(Fields),
    MultiGroup(Vec<Fields>),
    Reference(String),
    MultiReference(Vec<String>),
    OptionSelection(String),
    MultiOptionSelection(Vec<String>),
}

/// Remote ids for the pending parts of a record.
#[derive(Debug, Clone, Default)]
pub struct Resolutions {
    /// Category path as written in the row → category id.
    pub categories: HashMap<String, String>,
    /// Local file → uploaded asset.
    pub assets: HashMap<PathBuf, AssetRef>,
}

impl Element {
    /// An empty element of `kind`, ready to [`convert`](Self::convert) into.
    pub fn build(kind: ElementKind) -> Element {
        match kind {
            ElementKind::Text => Element::Text(String::new()),
            ElementKind::MultiText => Element::MultiText(Vec::new()),
            ElementKind::FormattedText => Element::FormattedText(String::new()),
            ElementKind::Number => Element::Number(0),
            ElementKind::Float => Element::Float(0.0),
            ElementKind::Boolean => Element::Boolean(false),
            ElementKind::Link => Element::Link(Link {
                url: String::new(),
                title: None,
            }),
            ElementKind::Date => Element::Date(NaiveDate::default()),
            ElementKind::DateTime => Element::DateTime(DateTime::<Utc>::default()),
            ElementKind::Category => Element::Category(Vec::new()),
            ElementKind::CategoryPart => Element::CategoryPart(CategoryPart {
                category: String::new(),
                segment: String::new(),
            }),
            ElementKind::Image => Element::Image(Image {
                display_mode: DEFAULT_DISPLAY_MODE.to_owned(),
                source: AssetSource::External(String::new()),
            }),
            ElementKind::MultiImage => Element::MultiImage(Vec::new()),
            ElementKind::File => Element::File(FileAsset {
                source: AssetSource::External(String::new()),
            }),
            ElementKind::Group => Element::Group(Fields::new()),
            ElementKind::MultiGroup => Element::MultiGroup(Vec::new()),
            ElementKind::Reference => Element::Reference(String::new()),
            ElementKind::MultiReference => Element::MultiReference(Vec::new()),
            ElementKind::OptionSelection => Element::OptionSelection(String::new()),
            ElementKind::MultiOptionSelection => Element::MultiOptionSelection(Vec::new()),
        }
    }

    pub fn kind(&self) -> ElementKind {
        match self {
            Element::Text(_) => ElementKind::Text,
            Element::MultiText(_) => ElementKind::MultiText,
            Element::FormattedText(_) => ElementKind::FormattedText,
            Element::Number(_) => ElementKind::Number,
            Element::Float(_) => ElementKind::Float,
            Element::Boolean(_) => ElementKind::Boolean,
            Element::Link(_) => ElementKind::Link,
            Element::Date(_) => ElementKind::Date,
            Element::DateTime(_) => ElementKind::DateTime,
            Element::Category(_) => ElementKind::Category,
            Element::CategoryPart(_) => ElementKind::CategoryPart,
            Element::Image(_) => ElementKind::Image,
            Element::MultiImage(_) => ElementKind::MultiImage,
            Element::File(_) => ElementKind::File,
            Element::Group(_) => ElementKind::Group,
            Element::MultiGroup(_) => ElementKind::MultiGroup,
            Element::Reference(_) => ElementKind::Reference,
            Element::MultiReference(_) => ElementKind::MultiReference,
            Element::OptionSelection(_) => ElementKind::OptionSelection,
            Element::MultiOptionSelection(_) => ElementKind::MultiOptionSelection,
        }
    }

    /// Converts a generic payload into an element of this element's kind.
    ///
    /// Groups are assembled by the record transformer from their converted
    /// children, so only an already-resolved wire value converts directly
    /// into a group here.
    pub fn convert(self, data: &GenericData) -> Result<Element> {
        let kind = self.kind();
        let field = data.name.as_str();
        match &data.value {
            GenericValue::Null => Err(SyncError::conversion(field, "no value to convert")),
            GenericValue::Resolved(payload) => {
                ConverterRegistry::global().decode_payload(kind, field, payload)
            }
            GenericValue::Scalar(raw) => from_scalar(kind, data, raw),
            GenericValue::List(items) => from_list(kind, field, items),
            GenericValue::Group(_) | GenericValue::GroupList(_) => Err(SyncError::conversion(
                field,
                "nested values are assembled by the record transformer",
            )),
        }
    }

    /// Merges `new` into `self` (the persisted value of `field`). `Ok(None)`
    /// means the persisted value already reflects `new` and can be left out
    /// of the update payload. Errors inside groups name the dotted child path.
    pub fn update(&self, field: &str, new: &Element) -> Result<Option<Element>> {
        if self.kind() != new.kind() {
            return Err(SyncError::conversion(
                field,
                format!("cannot merge {} into {}", new.kind(), self.kind()),
            ));
        }
        match (self, new) {
            (Element::Text(a), Element::Text(b)) => Ok(replace(a, b, Element::Text)),
            (Element::FormattedText(a), Element::FormattedText(b)) => {
                Ok(replace(a, b, Element::FormattedText))
            }
            (Element::Number(a), Element::Number(b)) => Ok(replace(a, b, Element::Number)),
            (Element::Float(a), Element::Float(b)) => Ok(replace(a, b, Element::Float)),
            (Element::Boolean(a), Element::Boolean(b)) => Ok(replace(a, b, Element::Boolean)),
            (Element::Link(a), Element::Link(b)) => Ok(replace(a, b, Element::Link)),
            (Element::Date(a), Element::Date(b)) => Ok(replace(a, b, Element::Date)),
            (Element::DateTime(a), Element::DateTime(b)) => Ok(replace(a, b, Element::DateTime)),
            (Element::Reference(a), Element::Reference(b)) => {
                Ok(replace(a, b, Element::Reference))
            }
            (Element::OptionSelection(a), Element::OptionSelection(b)) => {
                Ok(replace(a, b, Element::OptionSelection))
            }
            (Element::MultiReference(a), Element::MultiReference(b)) => {
                Ok(union_by(a, b, |id| id.clone()).map(Element::MultiReference))
            }
            (Element::MultiOptionSelection(a), Element::MultiOptionSelection(b)) => {
                Ok(union_by(a, b, |key| key.clone()).map(Element::MultiOptionSelection))
            }
            (Element::Category(a), Element::Category(b)) => {
                Ok(union_by(a, b, CategoryRef::merge_key).map(Element::Category))
            }
            (Element::Group(a), Element::Group(b)) => merge_group(field, a, b),
            (existing, _) => Err(SyncError::not_implemented("update", existing.kind())),
        }
    }

    /// Copy of this element for creating a new content item.
    pub fn clone_for_create(&self) -> Element {
        match self {
            Element::Image(image) => Element::Image(image.identity()),
            Element::MultiImage(images) => {
                Element::MultiImage(images.iter().map(Image::identity).collect())
            }
            Element::File(file) => Element::File(FileAsset {
                source: file.source.identity(),
            }),
            Element::Group(children) => Element::Group(clone_fields(children)),
            Element::MultiGroup(entries) => {
                Element::MultiGroup(entries.iter().map(clone_fields).collect())
            }
            other => other.clone(),
        }
    }

    /// Sets the display mode of image elements; other kinds are unchanged.
    pub fn with_display_mode(self, mode: Option<&str>) -> Element {
        let Some(mode) = mode else { return self };
        match self {
            Element::Image(image) => Element::Image(Image {
                display_mode: mode.to_owned(),
                ..image
            }),
            Element::MultiImage(images) => Element::MultiImage(
                images
                    .into_iter()
                    .map(|image| Image {
                        display_mode: mode.to_owned(),
                        ..image
                    })
                    .collect(),
            ),
            other => other,
        }
    }

    /// Full wire object, `{"type": .., "value"|"values": ..}`. Fails when the
    /// element still holds data only meaningful locally.
    pub fn to_wire(&self, field: &str) -> Result<Value> {
        let kind = self.kind();
        let tag = kind.wire_tag().ok_or_else(|| {
            SyncError::conversion(
                field,
                "category parts must be folded into a category before sending",
            )
        })?;
        let key = if kind.is_multi() { "values" } else { "value" };
        let mut wire = Map::new();
        wire.insert("type".into(), Value::String(tag.to_owned()));
        wire.insert(key.into(), self.wire_payload(field)?);
        Ok(Value::Object(wire))
    }

    fn wire_payload(&self, field: &str) -> Result<Value> {
        let payload = match self {
            Element::Text(s)
            | Element::FormattedText(s)
            | Element::OptionSelection(s) => json!(s),
            Element::MultiText(items) | Element::MultiOptionSelection(items) => json!(items),
            Element::Number(n) => json!(n),
            Element::Float(f) => json!(f),
            Element::Boolean(b) => json!(b),
            Element::Link(link) => serde_json::to_value(link)?,
            Element::Date(date) => json!(date.format(DATE_FORMAT).to_string()),
            Element::DateTime(at) => json!(at.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            Element::Category(refs) => {
                if let Some(pending) = refs.iter().find(|r| r.id.is_none()) {
                    return Err(SyncError::conversion(
                        field,
                        format!("category `{}` has not been resolved", pending.joined_path()),
                    ));
                }
                serde_json::to_value(refs)?
            }
            Element::CategoryPart(_) => {
                return Err(SyncError::conversion(field, "category part has no wire form"))
            }
            Element::Image(image) => image_payload(field, image)?,
            Element::MultiImage(images) => Value::Array(
                images
                    .iter()
                    .map(|image| image_payload(field, image))
                    .collect::<Result<_>>()?,
            ),
            Element::File(file) => {
                serde_json::to_value(asset_payload(field, &file.source, None)?)?
            }
            Element::Group(children) => Value::Object(fields_payload(field, children)?),
            Element::MultiGroup(entries) => Value::Array(
                entries
                    .iter()
                    .map(|entry| fields_payload(field, entry).map(Value::Object))
                    .collect::<Result<_>>()?,
            ),
            Element::Reference(id) => serde_json::to_value(WireReference { id: id.clone() })?,
            Element::MultiReference(ids) => serde_json::to_value(
                ids.iter()
                    .map(|id| WireReference { id: id.clone() })
                    .collect::<Vec<_>>(),
            )?,
        };
        Ok(payload)
    }

    /// Collects category paths without an id and local files that still
    /// need uploading, descending into groups.
    pub fn collect_pending(&self, categories: &mut Vec<String>, assets: &mut Vec<PathBuf>) {
        match self {
            Element::Category(refs) => categories.extend(
                refs.iter()
                    .filter(|r| r.id.is_none())
                    .map(CategoryRef::joined_path),
            ),
            Element::Image(image) => push_local(&image.source, assets),
            Element::MultiImage(images) => {
                for image in images {
                    push_local(&image.source, assets);
                }
            }
            Element::File(file) => push_local(&file.source, assets),
            Element::Group(children) => {
                for child in children.values() {
                    child.collect_pending(categories, assets);
                }
            }
            Element::MultiGroup(entries) => {
                for child in entries.iter().flat_map(BTreeMap::values) {
                    child.collect_pending(categories, assets);
                }
            }
            _ => {}
        }
    }

    /// Substitutes resolved category ids and uploaded assets.
    pub fn resolve(self, field: &str, resolutions: &Resolutions) -> Result<Element> {
        let element = match self {
            Element::Category(refs) => Element::Category(
                refs.into_iter()
                    .map(|r| resolve_category(field, r, resolutions))
                    .collect::<Result<_>>()?,
            ),
            Element::Image(image) => Element::Image(Image {
                source: resolve_asset(field, image.source, resolutions)?,
                ..image
            }),
            Element::MultiImage(images) => Element::MultiImage(
                images
                    .into_iter()
                    .map(|image| {
                        Ok(Image {
                            source: resolve_asset(field, image.source, resolutions)?,
                            ..image
                        })
                    })
                    .collect::<Result<_>>()?,
            ),
            Element::File(file) => Element::File(FileAsset {
                source: resolve_asset(field, file.source, resolutions)?,
            }),
            Element::Group(children) => Element::Group(resolve_fields(field, children, resolutions)?),
            Element::MultiGroup(entries) => Element::MultiGroup(
                entries
                    .into_iter()
                    .map(|entry| resolve_fields(field, entry, resolutions))
                    .collect::<Result<_>>()?,
            ),
            other => other,
        };
        Ok(element)
    }

    /// Content ids this element points at, paired with the field path they
    /// were found under. Group children are qualified as `parent.child`;
    /// multi-group entries are visited in order under the same path.
    pub fn references(&self, field: &str) -> Vec<(String, String)> {
        let mut found = Vec::new();
        let mut stack = vec![(field.to_owned(), self)];
        while let Some((path, element)) = stack.pop() {
            match element {
                Element::Reference(id) => found.push((path, id.clone())),
                Element::MultiReference(ids) => {
                    found.extend(ids.iter().map(|id| (path.clone(), id.clone())))
                }
                Element::Group(children) => {
                    for (child, nested) in children.iter().rev() {
                        stack.push((format!("{path}.{child}"), nested));
                    }
                }
                Element::MultiGroup(entries) => {
                    for entry in entries.iter().rev() {
                        for (child, nested) in entry.iter().rev() {
                            stack.push((format!("{path}.{child}"), nested));
                        }
                    }
                }
                _ => {}
            }
        }
        found
    }

    /// Rewrites referenced ids through `ids`; unknown ids are kept.
    pub fn remap_references(&self, ids: &HashMap<String, String>) -> Element {
        let remap = |id: &String| ids.get(id).cloned().unwrap_or_else(|| id.clone());
        match self {
            Element::Reference(id) => Element::Reference(remap(id)),
            Element::MultiReference(list) => Element::MultiReference(list.iter().map(remap).collect()),
            Element::Group(children) => Element::Group(remap_fields(children, ids)),
            Element::MultiGroup(entries) => Element::MultiGroup(
                entries.iter().map(|entry| remap_fields(entry, ids)).collect(),
            ),
            other => other.clone(),
        }
    }
}

impl Image {
    fn identity(&self) -> Image {
        Image {
            display_mode: self.display_mode.clone(),
            source: self.source.identity(),
        }
    }
}

fn from_scalar(kind: ElementKind, data: &GenericData, raw: &str) -> Result<Element> {
    let field = data.name.as_str();
    if kind.is_multi() {
        return Err(SyncError::conversion(
            field,
            format!("{kind} field received a single value without its multiplicity marker"),
        ));
    }
    let element = match kind {
        ElementKind::Text => Element::Text(raw.to_owned()),
        ElementKind::FormattedText => Element::FormattedText(raw.to_owned()),
        ElementKind::Number => Element::Number(
            raw.parse()
                .map_err(|e| SyncError::conversion(field, format!("`{raw}` is not an integer: {e}")))?,
        ),
        ElementKind::Float => {
            let value: f64 = raw
                .parse()
                .map_err(|e| SyncError::conversion(field, format!("`{raw}` is not a number: {e}")))?;
            if !value.is_finite() {
                return Err(SyncError::conversion(field, format!("`{raw}` is not finite")));
            }
            Element::Float(value)
        }
        ElementKind::Boolean => Element::Boolean(parse_bool(field, raw)?),
        ElementKind::Link => {
            if !(raw.contains("://") || raw.starts_with("mailto:")) {
                return Err(SyncError::conversion(field, format!("`{raw}` is not a URL")));
            }
            Element::Link(Link {
                url: raw.to_owned(),
                title: None,
            })
        }
        ElementKind::Date => Element::Date(
            NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map_err(|e| SyncError::conversion(field, format!("invalid date `{raw}`: {e}")))?,
        ),
        ElementKind::DateTime => Element::DateTime(parse_datetime(field, raw)?),
        ElementKind::CategoryPart => Element::CategoryPart(CategoryPart {
            category: data.category.clone().ok_or_else(|| {
                SyncError::Configuration(format!("category part `{field}` names no category"))
            })?,
            segment: raw.to_owned(),
        }),
        ElementKind::Image => Element::Image(Image {
            display_mode: data
                .display_mode
                .clone()
                .unwrap_or_else(|| DEFAULT_DISPLAY_MODE.to_owned()),
            source: AssetSource::parse(raw),
        }),
        ElementKind::File => Element::File(FileAsset {
            source: AssetSource::parse(raw),
        }),
        ElementKind::Reference => Element::Reference(raw.to_owned()),
        ElementKind::OptionSelection => Element::OptionSelection(raw.to_owned()),
        ElementKind::Group => {
            return Err(SyncError::conversion(field, "a group cannot be built from one cell"))
        }
        // Multi kinds returned above.
        _ => return Err(SyncError::conversion(field, format!("unsupported scalar kind {kind}"))),
    };
    Ok(element)
}

fn from_list(kind: ElementKind, field: &str, items: &[String]) -> Result<Element> {
    if !kind.is_multi() {
        return Err(SyncError::conversion(
            field,
            format!("{kind} field received {} values", items.len()),
        ));
    }
    let element = match kind {
        ElementKind::MultiText => Element::MultiText(items.to_vec()),
        ElementKind::Category => {
            Element::Category(items.iter().map(|raw| CategoryRef::from_path(raw)).collect())
        }
        ElementKind::MultiImage => Element::MultiImage(
            items
                .iter()
                .map(|raw| Image {
                    display_mode: DEFAULT_DISPLAY_MODE.to_owned(),
                    source: AssetSource::parse(raw),
                })
                .collect(),
        ),
        ElementKind::MultiReference => Element::MultiReference(items.to_vec()),
        ElementKind::MultiOptionSelection => Element::MultiOptionSelection(items.to_vec()),
        _ => {
            return Err(SyncError::conversion(
                field,
                "a multi group cannot be built from one cell",
            ))
        }
    };
    Ok(element)
}

fn parse_bool(field: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(SyncError::conversion(field, format!("`{raw}` is not a boolean"))),
    }
}

/// RFC 3339, or a naive `YYYY-MM-DD HH:MM:SS` taken as UTC.
fn parse_datetime(field: &str, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| SyncError::conversion(field, format!("invalid timestamp `{raw}`: {e}")))
}

fn replace<T: PartialEq + Clone>(existing: &T, new: &T, wrap: fn(T) -> Element) -> Option<Element> {
    (existing != new).then(|| wrap(new.clone()))
}

/// Existing-then-new, de-duplicated by key, first occurrence wins. `None`
/// when the union equals `existing`.
fn union_by<T: Clone>(existing: &[T], new: &[T], key: impl Fn(&T) -> String) -> Option<Vec<T>> {
    let mut seen = HashSet::new();
    let merged: Vec<T> = existing
        .iter()
        .chain(new)
        .filter(|item| seen.insert(key(*item)))
        .cloned()
        .collect();
    let unchanged = merged.len() == existing.len()
        && merged.iter().zip(existing).all(|(a, b)| key(a) == key(b));
    (!unchanged).then_some(merged)
}

fn merge_group(field: &str, existing: &Fields, new: &Fields) -> Result<Option<Element>> {
    let mut merged = existing.clone();
    let mut changed = false;
    for (name, incoming) in new {
        match existing.get(name) {
            None => {
                merged.insert(name.clone(), incoming.clone());
                changed = true;
            }
            Some(current) => {
                if let Some(updated) = current.update(&format!("{field}.{name}"), incoming)? {
                    merged.insert(name.clone(), updated);
                    changed = true;
                }
            }
        }
    }
    Ok(changed.then_some(Element::Group(merged)))
}

fn clone_fields(fields: &Fields) -> Fields {
    fields
        .iter()
        .map(|(name, element)| (name.clone(), element.clone_for_create()))
        .collect()
}

fn remap_fields(fields: &Fields, ids: &HashMap<String, String>) -> Fields {
    fields
        .iter()
        .map(|(name, element)| (name.clone(), element.remap_references(ids)))
        .collect()
}

fn resolve_fields(field: &str, fields: Fields, resolutions: &Resolutions) -> Result<Fields> {
    fields
        .into_iter()
        .map(|(name, element)| {
            let qualified = format!("{field}.{name}");
            Ok((name, element.resolve(&qualified, resolutions)?))
        })
        .collect()
}

fn fields_payload(field: &str, fields: &Fields) -> Result<Map<String, Value>> {
    fields
        .iter()
        .map(|(name, element)| Ok((name.clone(), element.to_wire(&format!("{field}.{name}"))?)))
        .collect()
}

fn push_local(source: &AssetSource, assets: &mut Vec<PathBuf>) {
    if let AssetSource::Local(path) = source {
        assets.push(path.clone());
    }
}

fn resolve_category(field: &str, category: CategoryRef, resolutions: &Resolutions) -> Result<CategoryRef> {
    if category.id.is_some() {
        return Ok(category);
    }
    let path = category.joined_path();
    match resolutions.categories.get(&path) {
        Some(id) => Ok(CategoryRef {
            id: Some(id.clone()),
            path: category.path,
        }),
        None => Err(SyncError::conversion(
            field,
            format!("category `{path}` was not resolved"),
        )),
    }
}

fn resolve_asset(field: &str, source: AssetSource, resolutions: &Resolutions) -> Result<AssetSource> {
    match source {
        AssetSource::Local(path) => match resolutions.assets.get(&path) {
            Some(asset) => Ok(AssetSource::Remote {
                id: asset.id.clone(),
                url: asset.url.clone(),
            }),
            None => Err(SyncError::conversion(
                field,
                format!("file `{}` was not uploaded", path.display()),
            )),
        },
        other => Ok(other),
    }
}

fn image_payload(field: &str, image: &Image) -> Result<Value> {
    Ok(serde_json::to_value(asset_payload(
        field,
        &image.source,
        Some(&image.display_mode),
    )?)?)
}

fn asset_payload(field: &str, source: &AssetSource, display_mode: Option<&String>) -> Result<WireAsset> {
    let mut wire = WireAsset {
        display_mode: display_mode.cloned(),
        ..WireAsset::default()
    };
    match source {
        AssetSource::Remote { id, url } => {
            wire.asset_id = Some(id.clone());
            wire.url = url.clone();
        }
        AssetSource::External(url) => wire.url = Some(url.clone()),
        AssetSource::Local(path) => {
            return Err(SyncError::conversion(
                field,
                format!("file `{}` must be uploaded before sending", path.display()),
            ))
        }
    }
    Ok(wire)
}
