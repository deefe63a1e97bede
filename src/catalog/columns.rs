//! The `columns` table: introspection of every table's schema.

use crate::value::Value;

use super::{Column, ColumnInfo, ColumnType, Row, ScanContext, Schema, Table};

fn info_column(
    name: &'static str,
    description: &'static str,
    extract: fn(&ColumnInfo) -> Value,
) -> Column {
    Column::new(name, ColumnType::String, description, move |row| match row {
        Row::Column(info) => extract(info),
        _ => Value::Null,
    })
}

/// One row per column of every table.
pub struct ColumnsTable {
    schema: Schema,
}

impl ColumnsTable {
    #[must_use]
    pub fn new() -> Self {
        let mut schema = Schema::new();
        schema.push(info_column("table", "Table the column belongs to", |c| {
            Value::from(c.table.as_str())
        }));
        schema.push(info_column("name", "Column name", |c| Value::from(c.name.as_str())));
        schema.push(info_column("type", "Column type", |c| Value::from(c.column_type)));
        schema.push(info_column("description", "Column description", |c| {
            Value::from(c.description.as_str())
        }));
        Self { schema }
    }
}

impl Default for ColumnsTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Table for ColumnsTable {
    fn name(&self) -> &'static str {
        "columns"
    }

    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn rows<'a>(&self, scan: ScanContext<'a>) -> Box<dyn Iterator<Item = Row<'a>> + 'a> {
        Box::new(scan.columns.iter().map(Row::Column))
    }
}
