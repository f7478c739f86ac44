//! Rendering elements back into CSV cells.

use std::collections::BTreeMap;

use chrono::SecondsFormat;

use super::{Element, Fields, DATE_FORMAT};
use crate::error::{Result, SyncError};
use crate::mapping::FieldSpec;

/// A rendered field. Groups keep their shape so the exporter can spread them
/// over the columns of their child specs.
#[derive(Debug, Clone, PartialEq)]
pub enum CsvValue {
    Scalar(String),
    List(Vec<String>),
    Nested(BTreeMap<String, CsvValue>),
    NestedList(Vec<BTreeMap<String, CsvValue>>),
}

impl CsvValue {
    /// Flattens into one cell; lists are joined with `separator`.
    pub fn to_cell(&self, separator: &str) -> String {
        match self {
            CsvValue::Scalar(value) => value.clone(),
            CsvValue::List(items) => items.join(separator),
            CsvValue::Nested(_) | CsvValue::NestedList(_) => String::new(),
        }
    }
}

impl Element {
    /// Renders the element for export. `children` names the group children
    /// to include; other kinds ignore it.
    pub fn to_csv(&self, children: &[FieldSpec]) -> Result<CsvValue> {
        let value = match self {
            Element::Text(s) | Element::FormattedText(s) | Element::OptionSelection(s) => {
                CsvValue::Scalar(s.clone())
            }
            Element::Reference(id) => CsvValue::Scalar(id.clone()),
            Element::MultiText(items)
            | Element::MultiReference(items)
            | Element::MultiOptionSelection(items) => CsvValue::List(items.clone()),
            Element::Number(n) => CsvValue::Scalar(n.to_string()),
            Element::Float(f) => CsvValue::Scalar(f.to_string()),
            Element::Boolean(b) => CsvValue::Scalar(b.to_string()),
            Element::Link(link) => CsvValue::Scalar(link.url.clone()),
            Element::Date(date) => CsvValue::Scalar(date.format(DATE_FORMAT).to_string()),
            Element::DateTime(at) => {
                CsvValue::Scalar(at.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Element::Category(refs) => CsvValue::List(
                refs.iter()
                    .map(|category| {
                        if category.path.is_empty() {
                            category.id.clone().unwrap_or_default()
                        } else {
                            category.joined_path()
                        }
                    })
                    .collect(),
            ),
            Element::Image(image) => CsvValue::Scalar(image.source.render()),
            Element::File(file) => CsvValue::Scalar(file.source.render()),
            Element::Group(fields) => CsvValue::Nested(render_children(fields, children)?),
            Element::MultiGroup(entries) => CsvValue::NestedList(
                entries
                    .iter()
                    .map(|entry| render_children(entry, children))
                    .collect::<Result<_>>()?,
            ),
            Element::CategoryPart(_) | Element::MultiImage(_) => {
                return Err(SyncError::not_implemented("to_csv", self.kind()))
            }
        };
        Ok(value)
    }
}

fn render_children(fields: &Fields, specs: &[FieldSpec]) -> Result<BTreeMap<String, CsvValue>> {
    let mut rendered = BTreeMap::new();
    for spec in specs {
        if let Some(element) = fields.get(&spec.name) {
            rendered.insert(spec.name.clone(), element.to_csv(spec.child_specs())?);
        }
    }
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{AssetSource, CategoryRef, ElementKind, Image};
    use crate::generic::{GenericData, GenericValue};
    use crate::mapping::tests::leaf;

    #[test]
    fn scalars_round_trip_through_csv() {
        let cases = [
            (ElementKind::Text, "Blue widget"),
            (ElementKind::Number, "-17"),
            (ElementKind::Number, "+17"),
            (ElementKind::Float, "2.5"),
            (ElementKind::Float, "2.50"),
            (ElementKind::Boolean, "true"),
            (ElementKind::Boolean, "Yes"),
            (ElementKind::Boolean, "0"),
            (ElementKind::Date, "2024-02-29"),
            (ElementKind::Reference, "c-42"),
        ];
        for (kind, raw) in cases {
            let data = GenericData::new("f", kind, GenericValue::Scalar(raw.to_owned()));
            let element = Element::build(kind).convert(&data).unwrap();
            let cell = element.to_csv(&[]).unwrap().to_cell(";");
            let again = GenericData::new("f", kind, GenericValue::Scalar(cell.clone()));
            let reconverted = Element::build(kind).convert(&again).unwrap();
            assert_eq!(reconverted, element, "{kind} `{raw}` rendered as `{cell}`");
        }
    }

    #[test]
    fn unsupported_kinds_are_not_implemented() {
        let images = Element::MultiImage(vec![Image {
            display_mode: "default".into(),
            source: AssetSource::External("https://a".into()),
        }]);
        assert!(matches!(
            images.to_csv(&[]),
            Err(SyncError::NotImplemented { operation: "to_csv", kind: ElementKind::MultiImage })
        ));
    }

    #[test]
    fn groups_render_only_mapped_children() {
        let group = Element::Group(Fields::from([
            ("weight".to_string(), Element::Float(1.5)),
            ("internal".to_string(), Element::Text("hidden".into())),
        ]));
        let rendered = group.to_csv(&[leaf("weight", ElementKind::Float)]).unwrap();
        assert_eq!(
            rendered,
            CsvValue::Nested(BTreeMap::from([(
                "weight".to_string(),
                CsvValue::Scalar("1.5".into())
            )]))
        );
    }

    #[test]
    fn categories_prefer_paths() {
        let category = Element::Category(vec![
            CategoryRef {
                id: Some("7".into()),
                path: vec!["Products".into(), "Shoes".into()],
            },
            CategoryRef {
                id: Some("8".into()),
                path: vec![],
            },
        ]);
        assert_eq!(category.to_csv(&[]).unwrap().to_cell(";"), "Products/Shoes;8");
    }
}
