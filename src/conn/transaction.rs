//! Transaction control with savepoint nesting.

use crate::error::{Error, Result};

use super::Conn;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    fn as_sql(self) -> &'static str {
        match self {
            IsolationLevel::ReadUncommitted => "READ UNCOMMITTED",
            IsolationLevel::ReadCommitted => "READ COMMITTED",
            IsolationLevel::RepeatableRead => "REPEATABLE READ",
            IsolationLevel::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for `BEGIN`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TxOpts {
    pub isolation: Option<IsolationLevel>,
    pub read_only: Option<bool>,
    pub deferrable: Option<bool>,
}

impl TxOpts {
    fn is_default(&self) -> bool {
        self.isolation.is_none() && self.read_only.is_none() && self.deferrable.is_none()
    }

    fn begin_sql(&self) -> String {
        let mut sql = String::from("BEGIN");
        if let Some(isolation) = self.isolation {
            sql.push_str(" ISOLATION LEVEL ");
            sql.push_str(isolation.as_sql());
        }
        if let Some(read_only) = self.read_only {
            sql.push_str(if read_only { " READ ONLY" } else { " READ WRITE" });
        }
        if let Some(deferrable) = self.deferrable {
            sql.push_str(if deferrable {
                " DEFERRABLE"
            } else {
                " NOT DEFERRABLE"
            });
        }
        sql
    }
}

/// A transaction scope.
///
/// Depth 1 is a real transaction block; deeper scopes are savepoints. The
/// guard must be resolved with [`commit`](Self::commit) or
/// [`rollback`](Self::rollback) on the same connection that opened it, in
/// inner-to-outer order.
#[must_use = "a transaction must be committed or rolled back"]
pub struct Transaction {
    depth: u32,
    connection_id: u32,
}

impl Transaction {
    /// The nesting depth of this scope (1 = outermost).
    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn check(&self, conn: &Conn) -> Result<()> {
        if self.connection_id != conn.connection_id() {
            return Err(Error::InvalidUsage(format!(
                "connection mismatch: transaction was opened on backend {}, got {}",
                self.connection_id,
                conn.connection_id()
            )));
        }
        if conn.tx_depth != self.depth {
            return Err(Error::InvalidUsage(format!(
                "transaction scopes resolved out of order: depth {} open, resolving {}",
                conn.tx_depth, self.depth
            )));
        }
        Ok(())
    }

    /// Commit this scope: `COMMIT` at depth 1, `RELEASE SAVEPOINT` deeper.
    pub async fn commit(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        if self.depth == 1 {
            conn.query_drop("COMMIT").await?;
        } else {
            conn.query_drop(&format!("RELEASE SAVEPOINT s{}", self.depth - 1))
                .await?;
        }
        conn.tx_depth = self.depth - 1;
        Ok(())
    }

    /// Roll back this scope: `ROLLBACK` at depth 1, `ROLLBACK TO SAVEPOINT`
    /// + `RELEASE` deeper.
    ///
    /// Rolling back to a savepoint that predates the failure clears the
    /// failed-transaction state, so the outer scope may continue.
    pub async fn rollback(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        if self.depth == 1 {
            conn.query_drop("ROLLBACK").await?;
        } else {
            let name = self.depth - 1;
            conn.query_drop(&format!("ROLLBACK TO SAVEPOINT s{}", name))
                .await?;
            conn.query_drop(&format!("RELEASE SAVEPOINT s{}", name))
                .await?;
        }
        conn.tx_depth = self.depth - 1;
        Ok(())
    }
}

impl Conn {
    /// Open a transaction scope.
    ///
    /// At depth 0 this emits `BEGIN` with the requested options; nested
    /// calls emit `SAVEPOINT s{depth}` (options are not applicable there).
    pub async fn begin(&mut self, opts: TxOpts) -> Result<Transaction> {
        if self.tx_depth == 0 {
            self.query_drop(&opts.begin_sql()).await?;
        } else {
            if !opts.is_default() {
                return Err(Error::InvalidUsage(
                    "transaction options cannot be set on a nested scope".into(),
                ));
            }
            self.query_drop(&format!("SAVEPOINT s{}", self.tx_depth))
                .await?;
        }
        self.tx_depth += 1;
        Ok(Transaction {
            depth: self.tx_depth,
            connection_id: self.connection_id(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_sql_forms() {
        assert_eq!(TxOpts::default().begin_sql(), "BEGIN");
        assert_eq!(
            TxOpts {
                isolation: Some(IsolationLevel::Serializable),
                read_only: Some(true),
                deferrable: Some(true),
            }
            .begin_sql(),
            "BEGIN ISOLATION LEVEL SERIALIZABLE READ ONLY DEFERRABLE"
        );
        assert_eq!(
            TxOpts {
                isolation: Some(IsolationLevel::RepeatableRead),
                read_only: Some(false),
                deferrable: None,
            }
            .begin_sql(),
            "BEGIN ISOLATION LEVEL REPEATABLE READ READ WRITE"
        );
    }
}
