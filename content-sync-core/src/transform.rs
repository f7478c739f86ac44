//! Record transformer: one [`GenericRow`] in, one typed [`ContentRecord`] out.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::content::SearchType;
use crate::element::{CategoryRef, Element, Fields};
use crate::error::{Result, SyncError};
use crate::generic::{GenericData, GenericRow, GenericValue};
use crate::mapping::{FieldSpec, MappingConfig};

/// Everything needed to create or update one content item.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentRecord {
    /// Row the record was built from.
    pub index: usize,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub elements: Fields,
    /// Look up an existing item before writing.
    pub update_intent: bool,
    pub search_key: Option<String>,
    pub search_type: SearchType,
    pub create_if_missing: bool,
}

impl ContentRecord {
    /// Natural key used in reports: the search key when updating, the name
    /// otherwise.
    pub fn key(&self) -> &str {
        self.search_key.as_deref().unwrap_or(&self.name)
    }
}

/// Builds the record for one row. The first failing field aborts the row.
pub fn transform(mapping: &MappingConfig, row: &GenericRow) -> Result<ContentRecord> {
    let name = row
        .name
        .clone()
        .ok_or_else(|| SyncError::conversion(&mapping.name_column, "content name is empty"))?;
    let elements = transform_fields(&mapping.fields, &row.fields, mapping.category_root.as_deref())?;

    let mut tags: BTreeSet<String> = mapping.tags.iter().cloned().collect();
    tags.extend(row.extra_tags.iter().cloned());

    let (update_intent, search_key, search_type, create_if_missing) = match &mapping.update {
        Some(update) => {
            let key = row.search_key.clone().ok_or_else(|| {
                SyncError::conversion(&update.search_column, "search key is empty")
            })?;
            (true, Some(key), update.search_type(), update.create_if_missing)
        }
        None => (false, None, SearchType::Name, true),
    };

    debug!(row = row.index, %name, fields = elements.len(), "Transformed row");
    Ok(ContentRecord {
        index: row.index,
        name,
        tags,
        elements,
        update_intent,
        search_key,
        search_type,
        create_if_missing,
    })
}

/// Converts one level of fields. Category parts are gathered per target
/// field and folded into a single category path under `root`.
fn transform_fields(specs: &[FieldSpec], data: &[GenericData], root: Option<&str>) -> Result<Fields> {
    let mut elements = Fields::new();
    let mut parts: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for (spec, field) in specs.iter().zip(data) {
        if field.ignore {
            continue;
        }
        let element = match &field.value {
            GenericValue::Group(children) => {
                let nested = transform_fields(&spec.fields, children, root)?;
                (!nested.is_empty()).then_some(Element::Group(nested))
            }
            GenericValue::GroupList(entries) => {
                let mut items = Vec::new();
                for (item, children) in spec.items.iter().zip(entries) {
                    let nested = transform_fields(&item.fields, children, root)?;
                    if !nested.is_empty() {
                        items.push(nested);
                    }
                }
                (!items.is_empty()).then_some(Element::MultiGroup(items))
            }
            GenericValue::Null => None,
            _ => {
                let element = Element::build(field.declared_type)
                    .convert(field)?
                    .with_display_mode(field.display_mode.as_deref());
                if let Element::CategoryPart(part) = element {
                    parts.entry(part.category).or_default().push(part.segment);
                    continue;
                }
                Some(element)
            }
        };
        match element {
            Some(element) => {
                elements.insert(field.name.clone(), element);
            }
            None if spec.required => {
                return Err(SyncError::conversion(&field.name, "required field is empty"));
            }
            None => {}
        }
    }

    for (target, segments) in parts {
        let root = root.ok_or_else(|| {
            SyncError::Configuration(format!("category parts of `{target}` need a category root"))
        })?;
        let mut path = vec![root.to_owned()];
        path.extend(segments);
        let folded = CategoryRef { id: None, path };
        match elements.get_mut(&target) {
            Some(Element::Category(refs)) => refs.push(folded),
            Some(other) => {
                return Err(SyncError::conversion(
                    &target,
                    format!("category parts target a {} field", other.kind()),
                ))
            }
            None => {
                elements.insert(target, Element::Category(vec![folded]));
            }
        }
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::generic::Row;
    use crate::mapping::tests::{leaf, mapping};
    use crate::mapping::{GroupItem, UpdateMapping};

    fn row(pairs: &[(&str, &str)]) -> Row {
        Row::new(
            3,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn run(config: &MappingConfig, pairs: &[(&str, &str)]) -> Result<ContentRecord> {
        let generic = GenericRow::from_row(config, &row(pairs))?;
        transform(config, &generic)
    }

    #[test]
    fn converts_fields_and_skips_empty_ones() {
        let mut config = mapping(vec![
            leaf("title", ElementKind::Text),
            leaf("stock", ElementKind::Number),
            leaf("related", ElementKind::MultiReference),
        ]);
        config.tags = vec!["import".into()];
        let record = run(
            &config,
            &[("name", "Widget"), ("title", "Blue"), ("stock", ""), ("related", "a;b")],
        )
        .unwrap();
        assert_eq!(record.name, "Widget");
        assert_eq!(record.index, 3);
        assert_eq!(record.elements["title"], Element::Text("Blue".into()));
        assert!(!record.elements.contains_key("stock"));
        assert_eq!(
            record.elements["related"],
            Element::MultiReference(vec!["a".into(), "b".into()])
        );
        assert!(record.tags.contains("import"));
        assert!(!record.update_intent);
        assert_eq!(record.key(), "Widget");
    }

    #[test]
    fn required_empty_field_fails_the_row() {
        let mut title = leaf("title", ElementKind::Text);
        title.required = true;
        let config = mapping(vec![title]);
        let err = run(&config, &[("name", "Widget"), ("title", " ")]).unwrap_err();
        assert!(matches!(err, SyncError::Conversion { ref field, .. } if field == "title"));
    }

    #[test]
    fn ignored_fields_are_skipped_even_when_invalid() {
        let mut stock = leaf("stock", ElementKind::Number);
        stock.ignore = true;
        let config = mapping(vec![stock]);
        let record = run(&config, &[("name", "Widget"), ("stock", "lots")]).unwrap();
        assert!(record.elements.is_empty());
    }

    #[test]
    fn category_parts_fold_into_one_path() {
        let mut brand = leaf("brand", ElementKind::CategoryPart);
        brand.category = Some("category".into());
        let mut line = leaf("line", ElementKind::CategoryPart);
        line.category = Some("category".into());
        let config = mapping(vec![brand, line]);
        let record = run(&config, &[("name", "W"), ("brand", "Acme"), ("line", "Pro")]).unwrap();
        assert_eq!(
            record.elements["category"],
            Element::Category(vec![CategoryRef {
                id: None,
                path: vec!["Products".into(), "Acme".into(), "Pro".into()],
            }])
        );
    }

    #[test]
    fn empty_multi_group_entries_are_dropped() {
        let mut first = leaf("sku", ElementKind::Text);
        first.column = Some("sku_1".into());
        let mut second = leaf("sku", ElementKind::Text);
        second.column = Some("sku_2".into());
        let mut variants = leaf("variants", ElementKind::MultiGroup);
        variants.items = vec![
            GroupItem { fields: vec![first] },
            GroupItem { fields: vec![second] },
        ];
        let mut specs = leaf("specs", ElementKind::Group);
        specs.fields = vec![leaf("weight", ElementKind::Float)];
        let config = mapping(vec![variants, specs]);

        let record = run(
            &config,
            &[("name", "W"), ("sku_1", ""), ("sku_2", "B-2"), ("weight", "")],
        )
        .unwrap();
        match &record.elements["variants"] {
            Element::MultiGroup(items) => {
                assert_eq!(items.len(), 1);
                assert_eq!(items[0]["sku"], Element::Text("B-2".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!record.elements.contains_key("specs"));
    }

    #[test]
    fn update_mapping_sets_lookup_metadata() {
        let mut config = mapping(vec![leaf("title", ElementKind::Text)]);
        config.update = Some(UpdateMapping {
            search_column: "sku".into(),
            search_field: Some("sku".into()),
            create_if_missing: true,
        });
        let record = run(&config, &[("name", "W"), ("sku", "W-1"), ("title", "t")]).unwrap();
        assert!(record.update_intent);
        assert!(record.create_if_missing);
        assert_eq!(record.search_type, SearchType::Field("sku".into()));
        assert_eq!(record.key(), "W-1");

        let err = run(&config, &[("name", "W"), ("sku", ""), ("title", "t")]).unwrap_err();
        assert!(matches!(err, SyncError::Conversion { .. }));
    }
}
