//! Mirrors remote content back into the CSV layout of a mapping.

use std::collections::{HashMap, HashSet};
use std::io::Write;

use tracing::{debug, info, warn};

use crate::content::{Content, Pagination, SearchQuery};
use crate::contract::{ContentClient, SearchClient};
use crate::element::CsvValue;
use crate::error::{Result, SyncError};
use crate::mapping::{FieldSpec, MappingConfig};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// Cells left empty because their element kind cannot be rendered.
    pub not_implemented: usize,
}

impl ExportTable {
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// Exports every item of the mapped content type, one row per item.
pub async fn export(
    mapping: &MappingConfig,
    search: &dyn SearchClient,
    contents: &dyn ContentClient,
) -> Result<ExportTable> {
    let mut seen = HashSet::new();
    let headers: Vec<String> = mapping
        .columns()
        .into_iter()
        .filter(|column| seen.insert(*column))
        .map(str::to_owned)
        .collect();
    let mut table = ExportTable {
        headers,
        ..ExportTable::default()
    };

    let query = SearchQuery::all(&mapping.content_type);
    let mut pagination = Pagination::first();
    loop {
        let page = search.search(&mapping.library_id, &query, pagination).await?;
        debug!(page = pagination.page, matches = page.matches.len(), "[EXPORT] Fetched page");
        for summary in &page.matches {
            let content = contents.get(&summary.id).await?;
            let cells = render_content(mapping, &content, &mut table.not_implemented)?;
            table.rows.push(
                table
                    .headers
                    .iter()
                    .map(|header| cells.get(header).cloned().unwrap_or_default())
                    .collect(),
            );
        }
        if !page.has_more {
            break;
        }
        pagination = pagination.next();
    }

    if table.not_implemented > 0 {
        warn!(cells = table.not_implemented, "[EXPORT] Some cells could not be rendered");
    }
    info!(rows = table.rows.len(), columns = table.headers.len(), "[EXPORT] Export finished");
    Ok(table)
}

fn render_content(
    mapping: &MappingConfig,
    content: &Content,
    not_implemented: &mut usize,
) -> Result<HashMap<String, String>> {
    let separator = mapping.separator.as_str();
    let mut cells = HashMap::new();
    cells.insert(mapping.name_column.clone(), content.name.clone());
    if let Some(tag_column) = &mapping.tag_column {
        let tags: Vec<&str> = content.tags.iter().map(String::as_str).collect();
        cells.insert(tag_column.clone(), tags.join(separator));
    }
    if let Some(update) = &mapping.update {
        let key = match &update.search_field {
            Some(field) => match content.fields.get(field) {
                Some(element) => render(element.to_csv(&[]), not_implemented)?
                    .map(|value| value.to_cell(separator))
                    .unwrap_or_default(),
                None => String::new(),
            },
            None => content.name.clone(),
        };
        cells.insert(update.search_column.clone(), key);
    }

    for spec in &mapping.fields {
        let Some(element) = content.fields.get(&spec.name) else {
            continue;
        };
        if let Some(value) = render(element.to_csv(spec.child_specs()), not_implemented)? {
            spread(spec, &value, separator, &mut cells);
        }
    }
    Ok(cells)
}

/// `NotImplemented` becomes an empty, counted cell; other errors fail.
fn render(result: Result<CsvValue>, not_implemented: &mut usize) -> Result<Option<CsvValue>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SyncError::NotImplemented { .. }) => {
            *not_implemented += 1;
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Writes a rendered value into the columns of `spec` and its children.
fn spread(spec: &FieldSpec, value: &CsvValue, separator: &str, cells: &mut HashMap<String, String>) {
    match value {
        CsvValue::Nested(children) => {
            for child in &spec.fields {
                if let Some(value) = children.get(&child.name) {
                    spread(child, value, separator, cells);
                }
            }
        }
        CsvValue::NestedList(entries) => {
            for (item, entry) in spec.items.iter().zip(entries) {
                for child in &item.fields {
                    if let Some(value) = entry.get(&child.name) {
                        spread(child, value, separator, cells);
                    }
                }
            }
        }
        leaf => {
            cells.insert(spec.column().to_owned(), leaf.to_cell(separator));
        }
    }
}
