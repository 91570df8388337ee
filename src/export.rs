//! Tabular results and the exporters that serialize them.

use serde::{Deserialize, Serialize};

use crate::script::Namespace;
use crate::{HostError, Result};

/// A table produced by a script: named columns and rows of JSON cells.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableModel {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl TableModel {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Append a row; its width must match the column count.
    pub fn push_row(&mut self, row: Vec<serde_json::Value>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(HostError::Export(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Build a table from `{ columns = {...}, rows = {{...}, ...} }`.
    pub fn from_json(mut value: serde_json::Value) -> Result<Self> {
        // Empty Lua tables arrive as empty objects.
        for key in ["columns", "rows"] {
            if value.get(key).is_some_and(is_empty_object) {
                value[key] = serde_json::Value::Array(Vec::new());
            }
        }
        let raw: TableModel = serde_json::from_value(value)
            .map_err(|e| HostError::Export(format!("not a table: {e}")))?;

        let mut table = TableModel::new(raw.columns);
        for row in raw.rows {
            table.push_row(row)?;
        }
        Ok(table)
    }

    /// Read a table a script left in `namespace` under `name`.
    pub fn from_namespace(namespace: &dyn Namespace, name: &str) -> Result<Self> {
        Self::from_json(namespace.lookup_json(name)?)
    }
}

fn is_empty_object(value: &serde_json::Value) -> bool {
    value.as_object().is_some_and(|map| map.is_empty())
}

/// Serializes a [`TableModel`].
pub trait Exporter {
    fn export(&self, table: &TableModel) -> Result<String>;

    /// MIME type of the exported text.
    fn content_type(&self) -> &'static str;
}

/// Exports rows as an array of objects keyed by column name.
#[derive(Debug, Clone, Default)]
pub struct JsonExporter {
    pretty: bool,
}

impl JsonExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl Exporter for JsonExporter {
    fn export(&self, table: &TableModel) -> Result<String> {
        let records: Vec<serde_json::Map<String, serde_json::Value>> = table
            .rows
            .iter()
            .map(|row| {
                table
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect();

        let text = if self.pretty {
            serde_json::to_string_pretty(&records)
        } else {
            serde_json::to_string(&records)
        };
        text.map_err(|e| HostError::Export(e.to_string()))
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }
}
