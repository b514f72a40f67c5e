//! Decoded rows and result handlers.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::backend::query::{CommandComplete, DataRow, FieldDescription};
use crate::protocol::types::{FormatCode, Oid};
use crate::registry::TypeRegistry;
use crate::value::PgValue;

/// One column of a result set: the RowDescription entry plus the format the
/// data actually arrives in.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name
    pub name: String,
    /// Table OID (0 if not a table column)
    pub table_oid: Oid,
    /// Column attribute number (0 if not a table column)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: Oid,
    /// Type size (-1 for variable)
    pub type_size: i16,
    /// Type modifier (type-specific)
    pub type_modifier: i32,
    /// Format the values arrive in
    pub format: FormatCode,
}

impl Column {
    pub(crate) fn from_field(field: &FieldDescription<'_>) -> Self {
        Self {
            name: field.name.to_string(),
            table_oid: field.table_oid,
            column_id: field.column_id,
            type_oid: field.type_oid,
            type_size: field.type_size,
            type_modifier: field.type_modifier,
            format: field.format,
        }
    }
}

/// A decoded data row: one optional value per column, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    values: Vec<Option<PgValue>>,
}

impl Row {
    /// Decode a wire DataRow against its column set.
    pub(crate) fn decode(
        columns: &[Column],
        row: DataRow<'_>,
        registry: &TypeRegistry,
    ) -> Result<Self> {
        if row.len() != columns.len() {
            return Err(Error::Protocol(format!(
                "DataRow has {} columns, description has {}",
                row.len(),
                columns.len()
            )));
        }

        let mut values = Vec::with_capacity(columns.len());
        for (column, raw) in columns.iter().zip(row.iter()) {
            match raw {
                None => values.push(None),
                Some(bytes) => {
                    values.push(Some(registry.decode(column.type_oid, column.format, bytes)?))
                }
            }
        }
        Ok(Self { values })
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value by column index; `None` for NULL.
    pub fn get(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index).and_then(Option::as_ref)
    }

    /// All values in column order.
    pub fn values(&self) -> &[Option<PgValue>] {
        &self.values
    }

    /// Take ownership of the values.
    pub fn into_values(self) -> Vec<Option<PgValue>> {
        self.values
    }
}

/// Handler for query results.
///
/// Callback patterns by statement type:
/// - SELECT with rows: `result_start` → `row*` → `result_end`
/// - SELECT with 0 rows: `result_start` → `result_end`
/// - INSERT/UPDATE/DELETE: `result_end` only (with affected row count)
pub trait RowHandler {
    /// Called when a result set begins.
    fn result_start(&mut self, columns: &[Column]) -> Result<()> {
        let _ = columns;
        Ok(())
    }

    /// Called for each decoded data row.
    fn row(&mut self, columns: &[Column], row: Row) -> Result<()>;

    /// Called when a result set ends.
    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        let _ = complete;
        Ok(())
    }
}

/// A handler that discards all rows, keeping only the affected-row count.
#[derive(Debug, Default)]
pub struct DropHandler {
    rows_affected: Option<u64>,
}

impl DropHandler {
    /// Create a new drop handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of rows affected (if applicable).
    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

impl RowHandler for DropHandler {
    fn row(&mut self, _columns: &[Column], _row: Row) -> Result<()> {
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.rows_affected = complete.rows_affected();
        Ok(())
    }
}

/// Handler that collects all rows.
#[derive(Debug, Default)]
pub struct CollectHandler {
    columns: Option<Arc<[Column]>>,
    rows: Vec<Row>,
    command_tag: Option<String>,
}

impl CollectHandler {
    /// Create a new collect handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The column set of the (last) result.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// The collected rows.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Take the collected rows.
    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    /// The command tag of the last completed statement.
    pub fn command_tag(&self) -> Option<&str> {
        self.command_tag.as_deref()
    }
}

impl RowHandler for CollectHandler {
    fn result_start(&mut self, columns: &[Column]) -> Result<()> {
        self.columns = Some(columns.to_vec().into());
        Ok(())
    }

    fn row(&mut self, _columns: &[Column], row: Row) -> Result<()> {
        self.rows.push(row);
        Ok(())
    }

    fn result_end(&mut self, complete: CommandComplete<'_>) -> Result<()> {
        self.command_tag = Some(complete.tag.to_string());
        Ok(())
    }
}

/// Handler that keeps only the first row.
#[derive(Debug, Default)]
pub struct FirstRowHandler {
    row: Option<Row>,
}

impl FirstRowHandler {
    /// Create a new first row handler.
    pub fn new() -> Self {
        Self::default()
    }

    /// The first row if present.
    pub fn get(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    /// Take the first row.
    pub fn into_row(self) -> Option<Row> {
        self.row
    }
}

impl RowHandler for FirstRowHandler {
    fn row(&mut self, _columns: &[Column], row: Row) -> Result<()> {
        if self.row.is_none() {
            self.row = Some(row);
        }
        Ok(())
    }
}
