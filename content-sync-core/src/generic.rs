//! Generic data rows: one CSV row flattened into field name → raw value,
//! annotated with the declared field type from the mapping.

use std::collections::HashMap;
use std::io::Read;

use csv::{ReaderBuilder, Trim};
use serde_json::Value;
use tracing::debug;

use crate::element::ElementKind;
use crate::error::{Result, SyncError};
use crate::mapping::{FieldSpec, MappingConfig};

/// One input row, column name → raw cell text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Zero-based position in the source, used in reports.
    pub index: usize,
    pub values: HashMap<String, String>,
}

impl Row {
    pub fn new(index: usize, values: HashMap<String, String>) -> Self {
        Row { index, values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }

    fn require(&self, column: &str) -> Result<&str> {
        self.get(column).ok_or_else(|| {
            SyncError::Configuration(format!("row {} has no column `{column}`", self.index))
        })
    }
}

/// An ordered, replayable set of rows plus the header they were read with.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl RowSet {
    /// Reads a CSV document with a header line. Cells are trimmed; short rows
    /// yield empty cells for the missing columns.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(reader);
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_owned).collect();
        let mut rows = Vec::new();
        for (index, record) in reader.records().enumerate() {
            let record = record?;
            let values = headers
                .iter()
                .enumerate()
                .map(|(i, header)| (header.clone(), record.get(i).unwrap_or("").to_owned()))
                .collect();
            rows.push(Row::new(index, values));
        }
        debug!(columns = headers.len(), rows = rows.len(), "Read CSV rows");
        Ok(RowSet { headers, rows })
    }
}

/// The raw payload of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericValue {
    Null,
    Scalar(String),
    /// A multi-valued cell, already split on the mapping separator.
    List(Vec<String>),
    /// Children of a group, in declaration order.
    Group(Vec<GenericData>),
    /// One child list per multi-group item.
    GroupList(Vec<Vec<GenericData>>),
    /// A value that is already in wire shape, e.g. copied from remote content.
    Resolved(Value),
}

impl GenericValue {
    pub fn is_null(&self) -> bool {
        matches!(self, GenericValue::Null)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericData {
    pub name: String,
    pub declared_type: ElementKind,
    pub value: GenericValue,
    pub ignore: bool,
    /// Target category field of a category part.
    pub category: Option<String>,
    pub display_mode: Option<String>,
}

impl GenericData {
    pub fn new(name: impl Into<String>, declared_type: ElementKind, value: GenericValue) -> Self {
        GenericData {
            name: name.into(),
            declared_type,
            value,
            ignore: false,
            category: None,
            display_mode: None,
        }
    }

    /// Skipped during transformation without being an error.
    pub fn is_skipped(&self) -> bool {
        self.ignore || self.value.is_null()
    }
}

/// A row after column resolution, ready for the record transformer.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericRow {
    pub index: usize,
    pub name: Option<String>,
    pub extra_tags: Vec<String>,
    pub search_key: Option<String>,
    pub fields: Vec<GenericData>,
}

impl GenericRow {
    pub fn from_row(mapping: &MappingConfig, row: &Row) -> Result<Self> {
        let separator = mapping.separator.as_str();
        let name = non_empty(row.require(&mapping.name_column)?);
        let extra_tags = match &mapping.tag_column {
            Some(column) => split(row.require(column)?, separator),
            None => Vec::new(),
        };
        let search_key = match &mapping.update {
            Some(update) => non_empty(row.require(&update.search_column)?),
            None => None,
        };
        let fields = mapping
            .fields
            .iter()
            .map(|spec| generic_field(spec, row, separator))
            .collect::<Result<Vec<_>>>()?;
        Ok(GenericRow {
            index: row.index,
            name,
            extra_tags,
            search_key,
            fields,
        })
    }

    pub fn get(&self, name: &str) -> Option<&GenericData> {
        self.fields.iter().find(|field| field.name == name)
    }
}

fn generic_field(spec: &FieldSpec, row: &Row, separator: &str) -> Result<GenericData> {
    let value = match spec.kind {
        ElementKind::Group => GenericValue::Group(
            spec.fields
                .iter()
                .map(|child| generic_field(child, row, separator))
                .collect::<Result<_>>()?,
        ),
        ElementKind::MultiGroup => GenericValue::GroupList(
            spec.items
                .iter()
                .map(|item| {
                    item.fields
                        .iter()
                        .map(|child| generic_field(child, row, separator))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<_>>()?,
        ),
        kind => {
            let raw = row.require(spec.column())?;
            match non_empty(raw) {
                None => GenericValue::Null,
                Some(_) if kind.is_multi() => {
                    let items = split(raw, separator);
                    if items.is_empty() {
                        GenericValue::Null
                    } else {
                        GenericValue::List(items)
                    }
                }
                Some(value) => GenericValue::Scalar(value),
            }
        }
    };
    Ok(GenericData {
        name: spec.name.clone(),
        declared_type: spec.kind,
        value,
        ignore: spec.ignore,
        category: spec.category.clone(),
        display_mode: spec.display_mode.clone(),
    })
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_owned())
}

fn split(raw: &str, separator: &str) -> Vec<String> {
    raw.split(separator).filter_map(non_empty).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::tests::{leaf, mapping};
    use crate::mapping::GroupItem;

    fn row(pairs: &[(&str, &str)]) -> Row {
        Row::new(
            0,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn reads_csv_with_trimmed_cells() {
        let csv = "name,title\n Widget , Blue \nGadget,\n";
        let set = RowSet::from_reader(csv.as_bytes()).unwrap();
        assert_eq!(set.headers, vec!["name", "title"]);
        assert_eq!(set.rows.len(), 2);
        assert_eq!(set.rows[0].get("title"), Some("Blue"));
        assert_eq!(set.rows[1].get("title"), Some(""));
        assert_eq!(set.rows[1].index, 1);
    }

    #[test]
    fn multi_kinds_split_on_separator() {
        let config = mapping(vec![
            leaf("related", ElementKind::MultiReference),
            leaf("title", ElementKind::Text),
        ]);
        let generic = GenericRow::from_row(
            &config,
            &row(&[("name", "W"), ("related", "a; b;;c"), ("title", "")]),
        )
        .unwrap();
        assert_eq!(
            generic.get("related").unwrap().value,
            GenericValue::List(vec!["a".into(), "b".into(), "c".into()])
        );
        assert!(generic.get("title").unwrap().is_skipped());
        assert_eq!(generic.name.as_deref(), Some("W"));
    }

    #[test]
    fn missing_column_is_a_configuration_error() {
        let config = mapping(vec![leaf("title", ElementKind::Text)]);
        let err = GenericRow::from_row(&config, &row(&[("name", "W")])).unwrap_err();
        assert!(matches!(err, SyncError::Configuration(_)));
    }

    #[test]
    fn multi_group_keeps_one_entry_per_item() {
        let mut first = leaf("sku", ElementKind::Text);
        first.column = Some("sku_1".into());
        let mut second = leaf("sku", ElementKind::Text);
        second.column = Some("sku_2".into());
        let mut variants = leaf("variants", ElementKind::MultiGroup);
        variants.items = vec![
            GroupItem { fields: vec![first] },
            GroupItem { fields: vec![second] },
        ];
        let config = mapping(vec![variants]);
        let generic = GenericRow::from_row(
            &config,
            &row(&[("name", "W"), ("sku_1", "A-1"), ("sku_2", "")]),
        )
        .unwrap();
        match &generic.get("variants").unwrap().value {
            GenericValue::GroupList(entries) => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0][0].value, GenericValue::Scalar("A-1".into()));
                assert!(entries[1][0].is_skipped());
            }
            other => panic!("unexpected value {other:?}"),
        }
    }
}
