//! Schema context for prompts
//!
//! A [`SchemaCatalog`] is loaded once per database from
//! `information_schema.columns` and rendered into the prompt so generated SQL
//! references real tables. It also backs known-table enforcement.

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::engine::Row;

/// Columns of every user table, in ordinal order
pub const CATALOG_QUERY: &str = "SELECT table_schema, table_name, column_name, data_type \
     FROM information_schema.columns \
     WHERE table_schema NOT IN ('pg_catalog', 'information_schema') \
     AND table_schema NOT LIKE 'pg_toast%' \
     ORDER BY table_schema, table_name, ordinal_position";

/// Tables beyond this count are summarized instead of rendered
const MAX_RENDERED_TABLES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
}

/// Tables and columns of one database
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaCatalog {
    tables: BTreeMap<(String, String), Vec<ColumnInfo>>,
}

impl SchemaCatalog {
    /// Build from rows of [`CATALOG_QUERY`]
    ///
    /// Rows missing any of the expected text columns are skipped.
    #[must_use]
    pub fn from_rows(rows: &[Row]) -> Self {
        let text = |row: &Row, key: &str| row.get(key).and_then(|v| v.as_str()).map(str::to_string);

        let mut tables: BTreeMap<(String, String), Vec<ColumnInfo>> = BTreeMap::new();
        for row in rows {
            let (Some(schema), Some(table), Some(column), Some(data_type)) = (
                text(row, "table_schema"),
                text(row, "table_name"),
                text(row, "column_name"),
                text(row, "data_type"),
            ) else {
                continue;
            };
            tables.entry((schema, table)).or_default().push(ColumnInfo { name: column, data_type });
        }

        Self { tables }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Number of tables
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// `schema.table` names, sorted
    #[must_use]
    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().map(|(schema, table)| format!("{schema}.{table}")).collect()
    }

    /// One line per table: `schema.table(column type, ...)`
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for ((schema, table), columns) in self.tables.iter().take(MAX_RENDERED_TABLES) {
            let columns = columns
                .iter()
                .map(|c| format!("{} {}", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(out, "{schema}.{table}({columns})");
        }
        if self.tables.len() > MAX_RENDERED_TABLES {
            let hidden = self.tables.len() - MAX_RENDERED_TABLES;
            let _ = writeln!(out, "... and {hidden} more tables");
        }
        out
    }
}
