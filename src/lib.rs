//! PostgreSQL frontend/backend wire protocol client.
//!
//! `postwire` speaks protocol v3 over any duplex byte stream: it performs
//! startup and authentication, multiplexes a single connection between
//! sequential queries and asynchronous server traffic, and encodes/decodes
//! values in the binary wire format through a type catalogue loaded from
//! `pg_type` at runtime.
//!
//! # Examples
//!
//! Buffered query:
//!
//! ```no_run
//! use postwire::Connection;
//!
//! # async fn app() -> postwire::Result<()> {
//! let conn = Connection::connect_env().await?;
//!
//! let rows = conn.query("SELECT 420, $1", &["Foo".into()]).await?;
//!
//! assert_eq!(rows.rows()[0][0].as_i32(), Some(420));
//! assert_eq!(rows.rows()[0][1].as_str(), Some("Foo"));
//! # Ok(())
//! # }
//! ```
//!
//! Streaming, with early exit:
//!
//! ```no_run
//! use postwire::Connection;
//!
//! # async fn app() -> postwire::Result<()> {
//! let conn = Connection::connect_env().await?;
//!
//! let mut stream = conn.query_stream("SELECT generate_series(1, 100)", &[]).await?;
//! while let Some(row) = stream.next().await {
//!     let row = row?;
//!     if row[0].as_i32() == Some(10) {
//!         break; // remaining rows are drained in the background
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Notifications:
//!
//! ```no_run
//! use postwire::Connection;
//!
//! # async fn app() -> postwire::Result<()> {
//! let conn = Connection::connect_env().await?;
//!
//! let mut events = conn.listen("events").await?;
//! while let Some(n) = events.recv().await {
//!     println!("{} from {}: {}", n.channel(), n.process_id(), n.payload());
//! }
//! # Ok(())
//! # }
//! ```

pub mod common;
mod ext;
mod net;
pub mod tls;

// Protocol
pub mod postgres;

// Typing
pub mod types;

// Component
mod statement;
pub mod row;
mod sync;

// Operation
pub mod query;

// Connection
pub mod config;
pub mod connection;

mod error;

#[doc(inline)]
pub use config::{Config, SslMode};
#[doc(inline)]
pub use connection::{Connection, Done, Listener, Notification};
#[doc(inline)]
pub use error::{AuthError, Error, ErrorKind, Result};
#[doc(inline)]
pub use postgres::{PgError, Severity};
#[doc(inline)]
pub use query::{CompletionInfo, RowStream, Rows};
#[doc(inline)]
pub use row::{ColumnMetadata, Row};
#[doc(inline)]
pub use statement::PreparedStatement;
#[doc(inline)]
pub use types::{PgValue, TypeRegistry};

pub use net::Socket;
