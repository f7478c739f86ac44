//! Row pre-filter applied before a row enters the pipeline.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::generic::Row;

/// Column → allowed values. A row passes when, for every column, its cell
/// is one of the allowed values. An empty filter passes everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowFilter {
    allowed: BTreeMap<String, BTreeSet<String>>,
}

impl RowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, column: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed
            .entry(column.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Parses `column=value1,value2` as given on the command line.
    pub fn parse_arg(raw: &str) -> Option<(String, Vec<String>)> {
        let (column, values) = raw.split_once('=')?;
        let column = column.trim();
        if column.is_empty() {
            return None;
        }
        let values = values
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
            .collect();
        Some((column.to_owned(), values))
    }

    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(String::as_str)
    }

    pub fn accepts(&self, row: &Row) -> bool {
        self.allowed.iter().all(|(column, values)| {
            row.get(column)
                .map(|cell| values.contains(cell.trim()))
                .unwrap_or(false)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn row(pairs: &[(&str, &str)]) -> Row {
        Row::new(
            0,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        )
    }

    #[test]
    fn every_column_must_match() {
        let filter = RowFilter::new()
            .allow("market", ["NL", "BE"])
            .allow("status", ["live"]);
        assert!(filter.accepts(&row(&[("market", "NL"), ("status", "live")])));
        assert!(!filter.accepts(&row(&[("market", "DE"), ("status", "live")])));
        assert!(!filter.accepts(&row(&[("market", "BE")])));
    }

    #[test]
    fn empty_filter_accepts_all() {
        assert!(RowFilter::new().accepts(&row(&[("market", "DE")])));
    }

    #[test]
    fn parses_command_line_form() {
        assert_eq!(
            RowFilter::parse_arg("market = NL, BE"),
            Some(("market".to_string(), vec!["NL".to_string(), "BE".to_string()]))
        );
        assert_eq!(RowFilter::parse_arg("market"), None);
    }
}
