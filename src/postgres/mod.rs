//! Postgres Frontend and Backend Protocol
//!
//! Docs here mostly quoted from the official postgres documentation.
//!
//! ## Messaging Overview
//!
//! All communication is through a stream of messages. The first byte of a message identifies the message type,
//! and the next four bytes specify the length of the rest of the message (this length count includes itself,
//! but not the message-type byte). The remaining contents of the message are determined by the message type.
//!
//! ```text
//! ┏━━━━┳━━━━━━━━━━━━━━━━━━━┳━━━━━━┓
//! ┃ Ty ┃       Length      ┃ Body ┃
//! ┣━━━━╋━━━━━━━━━━━━━━━━━━━╋━━━━━━┫
//! ┃ u8 ┃        i32        ┃ [u8] ┃
//! ┗━━━━┻━━━━━━━━━━━━━━━━━━━┻━━━━━━┛
//! ```
//!
//! For historical reasons, the very first message sent by the client (the startup message)
//! has no initial message-type byte. The `SSLRequest` sentinel shares this
//! exception.
//!
//! ## [`Format`][PgFormat] and Format Codes
//!
//! Data of a particular data type might be transmitted in any of several different formats.
//! As of PostgreSQL 7.4 the only supported formats are "text" and "binary". Text has format
//! code zero, and Binary has format code one.
//!
//! This client transmits every parameter and requests every result column in
//! binary format.
//!
//! <https://www.postgresql.org/docs/17/protocol-overview.html>

mod pg_format;
mod pg_error;

pub mod frontend;
pub mod backend;

mod error;

pub use pg_format::PgFormat;
pub use pg_error::{PgError, Severity};

pub use frontend::FrontendProtocol;
pub use backend::{BackendMessage, BackendProtocol};
pub use error::ProtocolError;

/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;
