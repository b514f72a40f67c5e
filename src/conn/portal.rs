//! Named portals for incremental row fetching.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::row::{CollectHandler, Column, Row, RowHandler};

use super::Conn;

/// Handle to a named server-side portal.
///
/// Created by [`Conn::exec_portal`]. Each [`fetch`](Self::fetch) issues an
/// Execute with a row limit; PortalSuspended from the server means more
/// rows remain and the portal stays open. Portals are destroyed at
/// transaction end, so incremental fetching belongs inside an explicit
/// transaction.
pub struct Portal {
    name: String,
    columns: Arc<[Column]>,
    complete: bool,
    connection_id: u32,
}

impl Portal {
    pub(crate) fn new(name: String, columns: Arc<[Column]>, connection_id: u32) -> Self {
        Self {
            name,
            columns,
            complete: false,
            connection_id,
        }
    }

    /// The wire name of this portal.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The result columns this portal produces.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// True once the portal has produced its last row.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    fn check(&self, conn: &Conn) -> Result<()> {
        if self.connection_id != conn.connection_id() {
            return Err(Error::InvalidUsage(format!(
                "connection mismatch: portal was bound on backend {}, got {}",
                self.connection_id,
                conn.connection_id()
            )));
        }
        Ok(())
    }

    /// Fetch up to `max_rows` more rows (0 = all remaining).
    pub async fn fetch<H: RowHandler>(
        &mut self,
        conn: &mut Conn,
        max_rows: u32,
        handler: &mut H,
    ) -> Result<()> {
        self.check(conn)?;
        let suspended = conn
            .execute_portal(&self.name, max_rows, self.columns.clone(), handler)
            .await?;
        self.complete = !suspended;
        Ok(())
    }

    /// Fetch up to `max_rows` more rows and collect them.
    pub async fn fetch_collect(&mut self, conn: &mut Conn, max_rows: u32) -> Result<Vec<Row>> {
        let mut handler = CollectHandler::new();
        self.fetch(conn, max_rows, &mut handler).await?;
        Ok(handler.into_rows())
    }

    /// Close the portal on the server.
    pub async fn close(self, conn: &mut Conn) -> Result<()> {
        self.check(conn)?;
        conn.close_portal(&self.name).await
    }
}
