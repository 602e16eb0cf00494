//! Generated statement names and the [`PreparedStatement`] handle.
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU16, Ordering},
};

use crate::{
    Error, Result,
    connection::Shared,
    postgres::Oid,
    query::{self, RowStream, Rows},
    row::ColumnMetadata,
    types::PgValue,
};

/// A server-side statement name, `s0`-style zero padded so names sort the
/// way they were created.
#[derive(Clone, PartialEq, Eq)]
pub(crate) struct StatementName([u8; 6]);

impl StatementName {
    pub fn next(counter: &AtomicU16) -> Self {
        let id = counter.fetch_add(1, Ordering::SeqCst);
        let mut buf = [b's', b'0', b'0', b'0', b'0', b'0'];
        let len = buf.len();

        let mut b = itoa::Buffer::new();
        let id = b.format(id);
        let i = id.as_bytes();
        buf[len - i.len()..].copy_from_slice(i);

        Self(buf)
    }

    pub fn as_str(&self) -> &str {
        // SAFETY: string only construction and is immutable
        unsafe { std::str::from_utf8_unchecked(&self.0[..]) }
    }
}

impl std::fmt::Display for StatementName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Debug for StatementName {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_tuple("StatementName").field(&self.as_str()).finish()
    }
}

/// A named server-side prepared statement.
///
/// Created by [`Connection::prepare`][crate::Connection::prepare], carrying
/// the parameter types and result columns the server reported at Describe
/// time. The statement is a server resource: [`close`][Self::close] it
/// when done, or the server keeps it for the session's lifetime.
///
/// The statement must not outlive its connection; any call after the
/// connection terminated fails with the lifecycle error.
pub struct PreparedStatement {
    shared: Weak<Shared>,
    name: StatementName,
    params: Arc<[Oid]>,
    columns: Arc<[ColumnMetadata]>,
}

impl PreparedStatement {
    pub(crate) fn new(
        shared: Weak<Shared>,
        name: StatementName,
        params: Arc<[Oid]>,
        columns: Arc<[ColumnMetadata]>,
    ) -> Self {
        Self { shared, name, params, columns }
    }

    /// The server-side statement name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Parameter type oids, in `$1..$n` order.
    pub fn param_types(&self) -> &[Oid] {
        &self.params
    }

    /// Result column metadata; empty for statements returning no rows.
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Bind `params` and execute, streaming rows.
    pub async fn query(&self, params: &[PgValue]) -> Result<RowStream> {
        let shared = self.shared.upgrade().ok_or_else(Error::closed)?;
        query::execute_statement(&shared, self.name.as_str(), &self.params, &self.columns, params)
            .await
    }

    /// Bind `params` and execute, buffering all rows.
    pub async fn execute(&self, params: &[PgValue]) -> Result<Rows> {
        self.query(params).await?.buffer().await
    }

    /// Deallocate the statement on the server.
    pub async fn close(self) -> Result<()> {
        let shared = self.shared.upgrade().ok_or_else(Error::closed)?;
        query::close_statement(&shared, self.name.as_str()).await
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
