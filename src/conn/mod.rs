//! Asynchronous PostgreSQL session.

pub mod pool;
pub mod portal;
pub mod replication;
pub mod stream;
pub mod transaction;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::buffer::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::opts::Opts;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::{write_cancel_request, write_terminate};
use crate::protocol::types::{Oid, TransactionStatus};
use crate::registry::TypeRegistry;
use crate::row::{CollectHandler, Column, DropHandler, FirstRowHandler, Row, RowHandler};
use crate::state::{
    Action, AsyncMessage, ConnectionStateMachine, ExecuteMachine, PrepareMachine,
    SimpleQueryMachine, StateMachine,
};
use crate::statement::{PreparedStatement, StatementCache};
use crate::value::PgValue;

pub use pool::{Pool, PoolOpts, PooledConn};
pub use portal::Portal;
pub use replication::ReplicationStream;
pub use transaction::{IsolationLevel, Transaction, TxOpts};

use self::stream::Stream;

/// How long to keep waiting after a CancelRequest before declaring the
/// session broken.
const CANCEL_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// An asynchronous notification delivered by LISTEN/NOTIFY.
#[derive(Debug, Clone)]
pub struct Notification {
    /// PID of the notifying backend process
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

/// An asynchronous PostgreSQL session.
///
/// One session owns one transport and drives at most one operation at a
/// time; every public method that touches the wire is a suspension point.
pub struct Conn {
    stream: Stream,
    buffers: BufferSet,
    opts: Opts,
    registry: Arc<TypeRegistry>,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    pub(crate) tx_depth: u32,
    is_broken: bool,
    statements: StatementCache,
    stmt_counter: u64,
    portal_counter: u64,
    notice_subs: Vec<mpsc::Sender<ServerError>>,
    notification_subs: Vec<mpsc::Sender<Notification>>,
    pub(crate) opened_at: Instant,
    pub(crate) queries_executed: u64,
}

impl Conn {
    /// Connect and authenticate, honoring `connect_timeout`.
    pub async fn connect(opts: Opts) -> Result<Self> {
        match opts.connect_timeout {
            Some(deadline) => tokio::time::timeout(deadline, Self::connect_inner(opts))
                .await
                .map_err(|_| Error::Timeout("connect deadline exceeded".into()))?,
            None => Self::connect_inner(opts).await,
        }
    }

    /// Connect using a `postgres://` URL.
    pub async fn connect_url(url: &str) -> Result<Self> {
        Self::connect(Opts::try_from(url)?).await
    }

    async fn connect_inner(opts: Opts) -> Result<Self> {
        if opts.host.is_empty() {
            return Err(Error::InvalidUsage("host is empty".into()));
        }

        let tcp = TcpStream::connect((opts.host.as_str(), opts.port)).await?;
        tcp.set_nodelay(true)?;
        let mut stream = Stream::tcp(tcp);

        let mut buffers = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(opts.clone());

        loop {
            match machine.step(&mut buffers)? {
                Action::WriteAndReadByte => {
                    stream.send(&mut buffers).await?;
                    let byte = stream.read_u8().await?;
                    machine.set_ssl_response(byte);
                }
                Action::TlsHandshake => {
                    #[cfg(feature = "tls")]
                    {
                        let verify = opts.ssl_mode == crate::opts::SslMode::VerifyFull;
                        stream = stream.upgrade_to_tls(&opts.host, verify).await?;
                    }
                    #[cfg(not(feature = "tls"))]
                    {
                        return Err(Error::Unsupported(
                            "TLS requested but the tls feature is not enabled".into(),
                        ));
                    }
                }
                Action::ReadMessage => stream.read_message(&mut buffers).await?,
                Action::Write => stream.send(&mut buffers).await?,
                Action::WriteAndReadMessage => {
                    stream.send(&mut buffers).await?;
                    stream.read_message(&mut buffers).await?;
                }
                Action::HandleAsyncMessage(_) => {
                    // Parameter updates are captured by the machine; other
                    // async traffic has no subscribers yet
                    stream.read_message(&mut buffers).await?;
                }
                Action::Finished => break,
            }
        }

        // No further codec registrations once a session is live
        opts.registry.freeze();

        let registry = opts.registry.clone();
        Ok(Self {
            stream,
            buffers,
            registry,
            backend_key: machine.backend_key().copied(),
            server_params: machine.take_server_params(),
            transaction_status: machine.transaction_status(),
            opts,
            tx_depth: 0,
            is_broken: false,
            statements: StatementCache::new(),
            stmt_counter: 0,
            portal_counter: 0,
            notice_subs: Vec::new(),
            notification_subs: Vec::new(),
            opened_at: Instant::now(),
            queries_executed: 0,
        })
    }

    /// Backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// The backend process ID, or 0 if unknown.
    pub fn connection_id(&self) -> u32 {
        self.backend_key.as_ref().map_or(0, |k| k.process_id())
    }

    /// Value of a server parameter reported via ParameterStatus.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// True while inside a transaction block (active or failed).
    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// True once the session hit a fatal error and must be discarded.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Number of cached prepared statements.
    pub fn cached_statements(&self) -> usize {
        self.statements.len()
    }

    /// Subscribe to server notices. The channel is bounded; messages are
    /// dropped when the subscriber falls behind.
    pub fn notices(&mut self, capacity: usize) -> mpsc::Receiver<ServerError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.notice_subs.push(tx);
        rx
    }

    /// Subscribe to LISTEN/NOTIFY notifications, with the same bounded
    /// drop-on-overflow policy as [`notices`](Self::notices).
    pub fn notifications(&mut self, capacity: usize) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.notification_subs.push(tx);
        rx
    }

    /// Ping the server with an empty query.
    pub async fn ping(&mut self) -> Result<()> {
        self.query_drop("").await?;
        Ok(())
    }

    // === Simple query protocol ===

    /// Run a simple query (text results) with a handler.
    pub async fn query<H: RowHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.check_usable(sql)?;
        let registry = self.registry.clone();
        let mut machine = SimpleQueryMachine::new(sql, handler, registry);
        let result = self.drive_timed(&mut machine).await;
        self.queries_executed += 1;
        result
    }

    /// Run a simple query and discard results.
    pub async fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.rows_affected())
    }

    /// Run a simple query and collect all rows.
    pub async fn query_collect(&mut self, sql: &str) -> Result<Vec<Row>> {
        let mut handler = CollectHandler::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_rows())
    }

    /// Run a simple query and return the first row.
    pub async fn query_first(&mut self, sql: &str) -> Result<Option<Row>> {
        let mut handler = FirstRowHandler::new();
        self.query(sql, &mut handler).await?;
        Ok(handler.into_row())
    }

    // === Extended query protocol ===

    /// Prepare `sql` as a named statement, or return the cached entry.
    ///
    /// The cache key is the SQL text verbatim.
    pub async fn prepare(&mut self, sql: &str) -> Result<Arc<PreparedStatement>> {
        self.prepare_with_hints(sql, &[]).await
    }

    async fn prepare_with_hints(
        &mut self,
        sql: &str,
        param_oid_hints: &[Oid],
    ) -> Result<Arc<PreparedStatement>> {
        if let Some(statement) = self.statements.get(sql) {
            return Ok(statement);
        }
        self.check_usable(sql)?;

        self.stmt_counter += 1;
        let name = format!("s{}", self.stmt_counter);
        let mut machine = PrepareMachine::new(&name, sql, param_oid_hints);
        self.drive_timed(&mut machine).await?;
        let (param_oids, columns) = machine.take_results();

        let statement = Arc::new(PreparedStatement::new(
            name,
            sql.to_string(),
            param_oids,
            columns,
        ));
        self.statements.insert(statement.clone());
        Ok(statement)
    }

    /// Execute parameterized SQL with a handler.
    ///
    /// Looks up or creates a cached prepared statement, binds the parameters
    /// (binary format for registered types), executes, and decodes rows
    /// through the registry. Result columns arrive binary where their OID is
    /// registered, text otherwise.
    pub async fn exec<H: RowHandler>(
        &mut self,
        sql: &str,
        params: &[Option<PgValue>],
        handler: &mut H,
    ) -> Result<()> {
        self.check_usable(sql)?;
        let hints = param_oid_hints(params);
        let statement = self.prepare_with_hints(sql, &hints).await?;
        self.exec_prepared(&statement, params, handler).await
    }

    /// Execute an already-prepared statement.
    pub async fn exec_prepared<H: RowHandler>(
        &mut self,
        statement: &PreparedStatement,
        params: &[Option<PgValue>],
        handler: &mut H,
    ) -> Result<()> {
        self.check_usable(statement.sql())?;
        let encoded = self.registry.encode_params(params)?;
        let columns = statement.result_columns(&self.registry);
        let mut machine = ExecuteMachine::bind_execute(
            handler,
            self.registry.clone(),
            statement.name(),
            encoded,
            columns,
            0,
        );
        let result = self.drive_timed(&mut machine).await;
        self.queries_executed += 1;
        result
    }

    /// Execute parameterized SQL and discard rows.
    pub async fn exec_drop(
        &mut self,
        sql: &str,
        params: &[Option<PgValue>],
    ) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.exec(sql, params, &mut handler).await?;
        Ok(handler.rows_affected())
    }

    /// Execute parameterized SQL and collect all rows.
    pub async fn exec_collect(
        &mut self,
        sql: &str,
        params: &[Option<PgValue>],
    ) -> Result<Vec<Row>> {
        let mut handler = CollectHandler::new();
        self.exec(sql, params, &mut handler).await?;
        Ok(handler.into_rows())
    }

    /// Execute parameterized SQL and return the first row.
    pub async fn exec_first(
        &mut self,
        sql: &str,
        params: &[Option<PgValue>],
    ) -> Result<Option<Row>> {
        let mut handler = FirstRowHandler::new();
        self.exec(sql, params, &mut handler).await?;
        Ok(handler.into_row())
    }

    /// Bind a named portal for incremental fetching.
    ///
    /// Within an explicit transaction the portal survives Sync, so it can
    /// be resumed with [`Portal::fetch`] until complete.
    pub async fn exec_portal(
        &mut self,
        sql: &str,
        params: &[Option<PgValue>],
    ) -> Result<Portal> {
        self.check_usable(sql)?;
        let hints = param_oid_hints(params);
        let statement = self.prepare_with_hints(sql, &hints).await?;

        self.portal_counter += 1;
        let name = format!("p{}", self.portal_counter);
        let encoded = self.registry.encode_params(params)?;
        let columns = statement.result_columns(&self.registry);

        let mut handler = DropHandler::new();
        let mut machine = ExecuteMachine::bind_portal(
            &mut handler,
            self.registry.clone(),
            statement.name(),
            &name,
            encoded,
            columns.clone(),
        );
        self.drive_timed(&mut machine).await?;

        Ok(Portal::new(name, columns, self.connection_id()))
    }

    /// Resume a portal: Execute(max_rows) + Sync. Returns true while the
    /// portal is suspended (more rows remain).
    pub(crate) async fn execute_portal<H: RowHandler>(
        &mut self,
        portal: &str,
        max_rows: u32,
        columns: Arc<[Column]>,
        handler: &mut H,
    ) -> Result<bool> {
        self.check_usable("")?;
        let mut machine = ExecuteMachine::execute_portal(
            handler,
            self.registry.clone(),
            portal,
            max_rows,
            columns,
        );
        let result = self.drive_timed(&mut machine).await;
        self.queries_executed += 1;
        result.map(|_| machine.suspended())
    }

    /// Close a portal on the server.
    pub(crate) async fn close_portal(&mut self, portal: &str) -> Result<()> {
        let mut handler = DropHandler::new();
        let mut machine =
            ExecuteMachine::close_portal(&mut handler, self.registry.clone(), portal);
        self.drive_timed(&mut machine).await
    }

    /// Close a prepared statement and evict it from the cache.
    pub async fn close_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        self.statements.remove(statement.sql());
        let mut handler = DropHandler::new();
        let mut machine =
            ExecuteMachine::close_statement(&mut handler, self.registry.clone(), statement.name());
        self.drive_timed(&mut machine).await
    }

    /// Close the session gracefully: send Terminate and drop the transport.
    pub async fn close(mut self) -> Result<()> {
        self.buffers.write_buffer.clear();
        write_terminate(&mut self.buffers.write_buffer);
        self.stream.send(&mut self.buffers).await?;
        Ok(())
    }

    // === Internals ===

    /// Refuse operations on a broken session, and everything except
    /// transaction-exit statements while the transaction is failed.
    fn check_usable(&self, sql: &str) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionLost);
        }
        if self.transaction_status.is_failed() && !is_transaction_exit(sql) {
            return Err(Error::TransactionAborted);
        }
        Ok(())
    }

    /// Roll back whatever transaction is open; used by the pool on dirty
    /// returns.
    pub(crate) async fn force_rollback(&mut self) -> Result<()> {
        self.query_drop("ROLLBACK").await?;
        self.tx_depth = 0;
        Ok(())
    }

    async fn drive_timed<M: StateMachine>(&mut self, machine: &mut M) -> Result<()> {
        let deadline = match self.opts.query_timeout {
            None => return self.drive(machine).await,
            Some(deadline) => deadline,
        };

        let cancel = self
            .backend_key
            .map(|key| (self.opts.host.clone(), self.opts.port, key));

        let outcome = {
            let fut = self.drive(machine);
            tokio::pin!(fut);
            match tokio::time::timeout(deadline, &mut fut).await {
                Ok(result) => Some(result),
                Err(_) => {
                    // Deadline passed: fire a CancelRequest over a second,
                    // short-lived connection, then keep reading. The server
                    // normally answers with SQLSTATE 57014 on this stream.
                    if let Some((host, port, key)) = &cancel {
                        let _ = send_cancel_request(host, *port, *key).await;
                    }
                    match tokio::time::timeout(CANCEL_GRACE_PERIOD, &mut fut).await {
                        Ok(result) => Some(result),
                        Err(_) => None,
                    }
                }
            }
        };

        match outcome {
            Some(result) => result,
            None => {
                // Nothing came back at all, not even the cancel error
                self.is_broken = true;
                self.statements.clear();
                Err(Error::Timeout(format!(
                    "no response within {:?} after cancel request",
                    deadline
                )))
            }
        }
    }

    async fn drive<M: StateMachine>(&mut self, machine: &mut M) -> Result<()> {
        let result = self.drive_inner(machine).await;
        if let Err(err) = &result {
            if err.is_connection_broken() {
                self.is_broken = true;
                // Cache entries are tied to the dead server-side session
                self.statements.clear();
            }
        }
        result
    }

    async fn drive_inner<M: StateMachine>(&mut self, machine: &mut M) -> Result<()> {
        loop {
            match machine.step(&mut self.buffers)? {
                Action::Write => self.stream.send(&mut self.buffers).await?,
                Action::ReadMessage => self.stream.read_message(&mut self.buffers).await?,
                Action::WriteAndReadMessage => {
                    self.stream.send(&mut self.buffers).await?;
                    self.stream.read_message(&mut self.buffers).await?;
                }
                Action::HandleAsyncMessage(msg) => {
                    self.dispatch_async(msg);
                    self.stream.read_message(&mut self.buffers).await?;
                }
                Action::WriteAndReadByte | Action::TlsHandshake => {
                    return Err(Error::Protocol(
                        "unexpected startup action in query flow".into(),
                    ));
                }
                Action::Finished => break,
            }
        }

        self.transaction_status = machine.transaction_status();
        if self.transaction_status == TransactionStatus::Idle {
            self.tx_depth = 0;
        }
        log::trace!(
            target: "pgnet::session",
            "ready_for_query status={:?}",
            self.transaction_status
        );

        if let Some(error) = machine.take_error() {
            if let Error::Server(fields) = &error {
                log::debug!(
                    target: "pgnet::session",
                    "error_response sqlstate={}",
                    fields.code().unwrap_or("?")
                );
            }
            return Err(error);
        }
        Ok(())
    }

    fn dispatch_async(&mut self, msg: AsyncMessage) {
        match msg {
            AsyncMessage::Notice(notice) => {
                log::debug!(
                    target: "pgnet::session",
                    "notice severity={}",
                    notice.severity()
                );
                deliver(&mut self.notice_subs, notice);
            }
            AsyncMessage::ParameterChanged { name, value } => {
                match self.server_params.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = value,
                    None => self.server_params.push((name, value)),
                }
            }
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => {
                deliver(
                    &mut self.notification_subs,
                    Notification {
                        pid,
                        channel,
                        payload,
                    },
                );
            }
        }
    }
}

/// Deliver to bounded subscriber channels: full channels drop the message,
/// closed channels drop the subscriber.
fn deliver<T: Clone>(subscribers: &mut Vec<mpsc::Sender<T>>, message: T) {
    subscribers.retain(|tx| match tx.try_send(message.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => true,
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    });
}

/// Natural parameter OIDs, used as Parse-time type hints.
fn param_oid_hints(params: &[Option<PgValue>]) -> Vec<Oid> {
    params
        .iter()
        .map(|p| p.as_ref().and_then(PgValue::oid).unwrap_or(0))
        .collect()
}

/// Leading keyword check for statements allowed in a failed transaction.
fn is_transaction_exit(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == ';')
        .next()
        .unwrap_or("");
    keyword.eq_ignore_ascii_case("ROLLBACK")
        || keyword.eq_ignore_ascii_case("ABORT")
        || keyword.eq_ignore_ascii_case("COMMIT")
        || keyword.eq_ignore_ascii_case("END")
}

/// Open a second, short-lived connection and send a CancelRequest for the
/// session identified by `key`. Best-effort: races with completion are
/// silently dropped by the server.
pub(crate) async fn send_cancel_request(
    host: &str,
    port: u16,
    key: BackendKeyData,
) -> Result<()> {
    let tcp = TcpStream::connect((host, port)).await?;
    let mut stream = Stream::tcp(tcp);
    let mut buf = Vec::new();
    write_cancel_request(&mut buf, key.process_id(), key.secret());
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_exit_keywords() {
        assert!(is_transaction_exit("ROLLBACK"));
        assert!(is_transaction_exit("rollback to savepoint s1"));
        assert!(is_transaction_exit("  COMMIT;"));
        assert!(is_transaction_exit("abort"));
        assert!(is_transaction_exit("END"));
        assert!(!is_transaction_exit("SELECT 1"));
        assert!(!is_transaction_exit("SAVEPOINT s1"));
        assert!(!is_transaction_exit(""));
    }

    #[test]
    fn param_hints_use_natural_oids() {
        use crate::protocol::types::oid;
        let hints = param_oid_hints(&[
            Some(PgValue::Int4(1)),
            None,
            Some(PgValue::Text("x".into())),
        ]);
        assert_eq!(hints, vec![oid::INT4, 0, oid::TEXT]);
    }

    #[test]
    fn bounded_subscriber_drops_on_overflow() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut subs = vec![tx];
        deliver(&mut subs, 1);
        deliver(&mut subs, 2); // dropped, channel full
        assert_eq!(subs.len(), 1);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());

        drop(rx);
        deliver(&mut subs, 3); // closed subscriber is removed
        assert!(subs.is_empty());
    }
}
