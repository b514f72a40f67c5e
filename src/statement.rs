//! Prepared statements and the per-session statement cache.

use std::collections::HashMap;
use std::sync::Arc;

use crate::protocol::types::Oid;
use crate::registry::TypeRegistry;
use crate::row::Column;

/// A server-side prepared statement.
///
/// Owned by the session that created it. Cached entries survive transaction
/// aborts (the server keeps named statements across ROLLBACK) and die with
/// the connection.
#[derive(Debug)]
pub struct PreparedStatement {
    /// Wire protocol statement name
    name: String,
    /// SQL text, verbatim
    sql: String,
    /// Parameter type OIDs from ParameterDescription
    param_oids: Vec<Oid>,
    /// Row description; `None` when the statement returns no rows
    columns: Option<Arc<[Column]>>,
}

impl PreparedStatement {
    pub(crate) fn new(
        name: String,
        sql: String,
        param_oids: Vec<Oid>,
        columns: Option<Vec<Column>>,
    ) -> Self {
        Self {
            name,
            sql,
            param_oids,
            columns: columns.map(Into::into),
        }
    }

    /// Wire protocol statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The SQL text this statement was prepared from.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Parameter type OIDs.
    pub fn param_oids(&self) -> &[Oid] {
        &self.param_oids
    }

    /// Row description, if the statement returns rows.
    pub fn columns(&self) -> Option<&[Column]> {
        self.columns.as_deref()
    }

    /// Columns with the result format each column will actually be requested
    /// in: binary where the registry knows the OID, text otherwise.
    pub(crate) fn result_columns(&self, registry: &TypeRegistry) -> Arc<[Column]> {
        match &self.columns {
            None => Vec::new().into(),
            Some(columns) => columns
                .iter()
                .map(|c| {
                    let mut c = c.clone();
                    c.format = registry.result_format(c.type_oid);
                    c
                })
                .collect::<Vec<_>>()
                .into(),
        }
    }

    /// True if the statement produces a result set.
    pub fn returns_rows(&self) -> bool {
        self.columns.is_some()
    }
}

/// Statement cache keyed by verbatim SQL text.
///
/// Whitespace variations produce distinct entries, matching server-side
/// prepared statement behavior.
#[derive(Debug, Default)]
pub(crate) struct StatementCache {
    statements: HashMap<String, Arc<PreparedStatement>>,
}

impl StatementCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, sql: &str) -> Option<Arc<PreparedStatement>> {
        self.statements.get(sql).cloned()
    }

    pub(crate) fn insert(&mut self, statement: Arc<PreparedStatement>) {
        self.statements
            .insert(statement.sql.clone(), statement);
    }

    pub(crate) fn remove(&mut self, sql: &str) -> Option<Arc<PreparedStatement>> {
        self.statements.remove(sql)
    }

    pub(crate) fn clear(&mut self) {
        self.statements.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.statements.len()
    }
}
