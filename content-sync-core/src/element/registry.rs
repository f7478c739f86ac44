//! Dispatch from wire data to element variants.
//!
//! Remote fields look like `{"type": "reference", "values": [...]}`. The type
//! tag plus the presence of `value` or `values` selects the variant; the
//! first registered entry that matches wins.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use once_cell::sync::Lazy;
use serde_json::Value;

use super::value::{AssetSource, CategoryRef, FileAsset, Image, Link, WireAsset, WireReference, DEFAULT_DISPLAY_MODE};
use super::{Element, ElementKind, DATE_FORMAT};
use crate::error::{Result, SyncError};

static GLOBAL: Lazy<ConverterRegistry> = Lazy::new(ConverterRegistry::default);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    tag: &'static str,
    multi: bool,
    kind: ElementKind,
}

#[derive(Debug, Clone)]
pub struct ConverterRegistry {
    entries: Vec<Entry>,
}

impl Default for ConverterRegistry {
    /// Every kind that has a wire representation.
    fn default() -> Self {
        let entries = ElementKind::ALL
            .iter()
            .filter_map(|&kind| {
                kind.wire_tag().map(|tag| Entry {
                    tag,
                    multi: kind.is_multi(),
                    kind,
                })
            })
            .collect();
        ConverterRegistry { entries }
    }
}

impl ConverterRegistry {
    /// Process-wide registry, built on first use.
    pub fn global() -> &'static ConverterRegistry {
        &GLOBAL
    }

    pub fn empty() -> Self {
        ConverterRegistry { entries: Vec::new() }
    }

    /// Registers `kind` under an additional tag. Earlier entries win.
    pub fn register(&mut self, tag: &'static str, multi: bool, kind: ElementKind) {
        self.entries.push(Entry { tag, multi, kind });
    }

    pub fn lookup(&self, tag: &str, multi: bool) -> Result<ElementKind> {
        self.entries
            .iter()
            .find(|entry| entry.tag == tag && entry.multi == multi)
            .map(|entry| entry.kind)
            .ok_or_else(|| SyncError::NoConverterFound {
                tag: tag.to_owned(),
                multi,
            })
    }

    /// Decodes one wire field into an element.
    pub fn decode(&self, field: &str, raw: &Value) -> Result<Element> {
        let object = raw
            .as_object()
            .ok_or_else(|| SyncError::conversion(field, "wire field is not an object"))?;
        let tag = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| SyncError::conversion(field, "wire field has no `type` tag"))?;
        let (multi, payload) = match (object.get("value"), object.get("values")) {
            (_, Some(values)) => (true, values),
            (Some(value), None) => (false, value),
            (None, None) => {
                return Err(SyncError::conversion(
                    field,
                    "wire field has neither `value` nor `values`",
                ))
            }
        };
        let kind = self.lookup(tag, multi)?;
        self.decode_payload(kind, field, payload)
    }

    /// Decodes the bare `value`/`values` payload for a known kind.
    pub fn decode_payload(&self, kind: ElementKind, field: &str, payload: &Value) -> Result<Element> {
        let element = match kind {
            ElementKind::Text => Element::Text(string(field, payload)?),
            ElementKind::MultiText => Element::MultiText(strings(field, payload)?),
            ElementKind::FormattedText => Element::FormattedText(string(field, payload)?),
            ElementKind::Number => Element::Number(
                payload
                    .as_i64()
                    .ok_or_else(|| mismatch(field, "an integer", payload))?,
            ),
            ElementKind::Float => Element::Float(
                payload
                    .as_f64()
                    .ok_or_else(|| mismatch(field, "a number", payload))?,
            ),
            ElementKind::Boolean => Element::Boolean(
                payload
                    .as_bool()
                    .ok_or_else(|| mismatch(field, "a boolean", payload))?,
            ),
            ElementKind::Link => Element::Link(typed::<Link>(field, payload)?),
            ElementKind::Date => {
                let raw = string(field, payload)?;
                Element::Date(
                    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
                        .map_err(|e| SyncError::conversion(field, format!("invalid date `{raw}`: {e}")))?,
                )
            }
            ElementKind::DateTime => {
                let raw = string(field, payload)?;
                Element::DateTime(
                    DateTime::parse_from_rfc3339(&raw)
                        .map_err(|e| {
                            SyncError::conversion(field, format!("invalid timestamp `{raw}`: {e}"))
                        })?
                        .with_timezone(&Utc),
                )
            }
            ElementKind::Category => Element::Category(typed::<Vec<CategoryRef>>(field, payload)?),
            ElementKind::CategoryPart => {
                return Err(SyncError::conversion(
                    field,
                    "category parts have no wire representation",
                ))
            }
            ElementKind::Image => Element::Image(image(field, payload)?),
            ElementKind::MultiImage => Element::MultiImage(
                array(field, payload)?
                    .iter()
                    .map(|item| image(field, item))
                    .collect::<Result<_>>()?,
            ),
            ElementKind::File => Element::File(FileAsset {
                source: asset_source(field, typed::<WireAsset>(field, payload)?)?,
            }),
            ElementKind::Group => Element::Group(self.group(field, payload)?),
            ElementKind::MultiGroup => Element::MultiGroup(
                array(field, payload)?
                    .iter()
                    .map(|entry| self.group(field, entry))
                    .collect::<Result<_>>()?,
            ),
            ElementKind::Reference => {
                Element::Reference(typed::<WireReference>(field, payload)?.id)
            }
            ElementKind::MultiReference => Element::MultiReference(
                typed::<Vec<WireReference>>(field, payload)?
                    .into_iter()
                    .map(|reference| reference.id)
                    .collect(),
            ),
            ElementKind::OptionSelection => Element::OptionSelection(string(field, payload)?),
            ElementKind::MultiOptionSelection => {
                Element::MultiOptionSelection(strings(field, payload)?)
            }
        };
        Ok(element)
    }

    fn group(&self, field: &str, payload: &Value) -> Result<BTreeMap<String, Element>> {
        let object = payload
            .as_object()
            .ok_or_else(|| mismatch(field, "an object of child fields", payload))?;
        object
            .iter()
            .map(|(child, raw)| {
                let qualified = format!("{field}.{child}");
                Ok((child.clone(), self.decode(&qualified, raw)?))
            })
            .collect()
    }
}

fn mismatch(field: &str, expected: &str, got: &Value) -> SyncError {
    SyncError::conversion(field, format!("expected {expected}, got {got}"))
}

fn string(field: &str, payload: &Value) -> Result<String> {
    payload
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| mismatch(field, "a string", payload))
}

fn strings(field: &str, payload: &Value) -> Result<Vec<String>> {
    array(field, payload)?
        .iter()
        .map(|item| string(field, item))
        .collect()
}

fn array<'a>(field: &str, payload: &'a Value) -> Result<&'a Vec<Value>> {
    payload
        .as_array()
        .ok_or_else(|| mismatch(field, "a list", payload))
}

fn typed<T: serde::de::DeserializeOwned>(field: &str, payload: &Value) -> Result<T> {
    serde_json::from_value(payload.clone())
        .map_err(|e| SyncError::conversion(field, format!("malformed payload {payload}: {e}")))
}

fn image(field: &str, payload: &Value) -> Result<Image> {
    let wire = typed::<WireAsset>(field, payload)?;
    let display_mode = wire
        .display_mode
        .clone()
        .unwrap_or_else(|| DEFAULT_DISPLAY_MODE.to_owned());
    Ok(Image {
        display_mode,
        source: asset_source(field, wire)?,
    })
}

fn asset_source(field: &str, wire: WireAsset) -> Result<AssetSource> {
    match (wire.asset_id, wire.url) {
        (Some(id), url) => Ok(AssetSource::Remote { id, url }),
        (None, Some(url)) => Ok(AssetSource::External(url)),
        (None, None) => Err(SyncError::conversion(
            field,
            "asset payload has neither `asset_id` nor `url`",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn multiplicity_marker_selects_variant() {
        let registry = ConverterRegistry::default();
        assert_eq!(registry.lookup("text", false).unwrap(), ElementKind::Text);
        assert_eq!(registry.lookup("text", true).unwrap(), ElementKind::MultiText);
        assert_eq!(registry.lookup("group", true).unwrap(), ElementKind::MultiGroup);
        assert!(matches!(
            registry.lookup("number", true),
            Err(SyncError::NoConverterFound { multi: true, .. })
        ));
    }

    #[test]
    fn first_registered_entry_wins() {
        let mut registry = ConverterRegistry::empty();
        registry.register("label", false, ElementKind::Text);
        registry.register("label", false, ElementKind::OptionSelection);
        assert_eq!(registry.lookup("label", false).unwrap(), ElementKind::Text);
    }

    #[test]
    fn decodes_nested_groups() {
        let raw = json!({
            "type": "group",
            "values": [
                { "sku": { "type": "text", "value": "A" }, "stock": { "type": "number", "value": 4 } },
                { "sku": { "type": "text", "value": "B" } }
            ]
        });
        let element = ConverterRegistry::global().decode("variants", &raw).unwrap();
        match element {
            Element::MultiGroup(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0]["stock"], Element::Number(4));
                assert_eq!(entries[1]["sku"], Element::Text("B".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn image_keeps_asset_id_and_url() {
        let raw = json!({
            "type": "image",
            "value": { "display_mode": "cover", "asset_id": "a1", "url": "https://cdn/a1.png" }
        });
        let element = ConverterRegistry::global().decode("hero", &raw).unwrap();
        assert_eq!(
            element,
            Element::Image(Image {
                display_mode: "cover".into(),
                source: AssetSource::Remote {
                    id: "a1".into(),
                    url: Some("https://cdn/a1.png".into())
                }
            })
        );
    }

    #[test]
    fn missing_marker_is_a_conversion_error() {
        let raw = json!({ "type": "text" });
        assert!(matches!(
            ConverterRegistry::global().decode("title", &raw),
            Err(SyncError::Conversion { .. })
        ));
    }
}
