//! An asynchronous PostgreSQL client library.
//!
//! # Features
//!
//! - **Sans-I/O state machines**: Protocol logic is separated from I/O
//! - **Extended query protocol**: Automatic statement caching, binary
//!   parameter and result encoding through a per-OID codec registry
//! - **SCRAM-SHA-256**: Plus MD5 and cleartext password authentication
//! - **Connection pool**: Bounded, FIFO-fair, with age/idle/use expiry
//!
//! # Example
//!
//! ```no_run
//! use pgnet::{Conn, PgValue};
//!
//! #[tokio::main]
//! async fn main() -> pgnet::Result<()> {
//!     let mut conn = Conn::connect_url("postgres://postgres@localhost/mydb").await?;
//!
//!     let rows = conn
//!         .exec_collect("SELECT id, name FROM users WHERE id = $1", &[Some(PgValue::Int4(1))])
//!         .await?;
//!     for row in rows {
//!         println!("{:?} {:?}", row.get(0), row.get(1));
//!     }
//!
//!     conn.close().await?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod conn;
pub mod error;
pub mod opts;
pub mod protocol;
pub mod registry;
pub mod row;
pub mod state;
pub mod statement;
pub mod value;

pub use conn::{
    Conn, IsolationLevel, Notification, Pool, PoolOpts, PooledConn, Portal, ReplicationStream,
    Transaction, TxOpts,
};
pub use error::{Error, Result, ServerError};
pub use opts::{ClientEncoding, Endpoint, Opts, ReplicationMode, SslMode};
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use registry::{EncodedParams, TypeCodec, TypeRegistry};
pub use row::{CollectHandler, Column, DropHandler, FirstRowHandler, Row, RowHandler};
pub use statement::PreparedStatement;
pub use value::PgValue;
