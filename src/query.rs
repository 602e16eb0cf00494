//! The extended-query pipeline: Parse/Describe/Bind/Execute/Sync, row
//! streaming and buffered results.
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, ready},
};

use bytes::{Bytes, BytesMut};

use crate::{
    Error, Result,
    connection::Shared,
    postgres::{BackendMessage, Oid, frontend},
    row::{ColumnMetadata, ContractError, Row},
    sync::QueryPermit,
    types::{PgValue, TypeRegistry},
};

/// Serialize parameter values against the statement's parameter types.
///
/// NULL encodes as the absent value; everything else goes through the type
/// registry. Failures name the parameter the way the server would,
/// 1-based.
pub(crate) fn encode_params(
    registry: &TypeRegistry,
    oids: &[Oid],
    values: &[PgValue],
) -> Result<Vec<Option<Bytes>>> {
    if oids.len() != values.len() {
        return Err(ContractError::ParamCount { expected: oids.len(), got: values.len() }.into());
    }

    let mut out = Vec::with_capacity(values.len());
    for (i, (value, oid)) in values.iter().zip(oids).enumerate() {
        if value.is_null() {
            out.push(None);
            continue;
        }
        let mut buf = BytesMut::new();
        registry
            .send(*oid, value, &mut buf)
            .map_err(|e| Error::from(e).context(format!("Error sending param ${}", i + 1)))?;
        out.push(Some(buf.freeze()));
    }
    Ok(out)
}

/// Information parsed from the `CommandComplete` tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionInfo {
    tag: String,
    rows_affected: Option<u64>,
}

impl CompletionInfo {
    /// `INSERT oid rows` carries the count third, the other row-reporting
    /// commands carry it second.
    pub(crate) fn parse(tag: &str) -> CompletionInfo {
        let mut whs = tag.split_whitespace();
        let rows_affected = match (whs.next(), whs.next(), whs.next()) {
            (Some("INSERT"), Some(_oid), Some(rows)) => rows.parse().ok(),
            (
                Some("SELECT" | "UPDATE" | "DELETE" | "MERGE" | "FETCH" | "MOVE" | "COPY"),
                Some(rows),
                _,
            ) => rows.parse().ok(),
            _ => None,
        };
        CompletionInfo { tag: tag.into(), rows_affected }
    }

    /// The raw command tag, e.g. `SELECT 1`.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows_affected
    }
}

// ===== message flow helpers =====

/// Receive the next query-flow message while holding the turn token.
///
/// A non-fatal `ErrorResponse` is recovered locally: the protocol cycle is
/// consumed through its `ReadyForQuery`, the token released, and the error
/// raised to the caller. A FATAL/PANIC error retires the token — the
/// connection is terminating and never returns to the clean state.
async fn next_message(
    shared: &Arc<Shared>,
    permit: QueryPermit,
    synced: bool,
) -> Result<(BackendMessage, QueryPermit)> {
    match shared.recv_sync().await {
        Err(err) => {
            permit.poison();
            Err(err)
        }
        Ok(BackendMessage::ErrorResponse(err)) => {
            let err = err.0;
            if err.is_fatal() {
                permit.poison();
                return Err(err.into());
            }
            Err(recover(shared, err.into(), synced, permit).await)
        }
        Ok(msg) => Ok((msg, permit)),
    }
}

/// Read through the next `ReadyForQuery`, release the turn token, and hand
/// back `err`.
///
/// When the failing cycle has no `Sync` on the wire yet (the fused
/// Parse/Describe phase runs on `Flush`), one is sent first — the server
/// discards messages until it sees one, and only then emits the
/// `ReadyForQuery` this recovery waits for.
async fn recover(
    shared: &Arc<Shared>,
    err: Error,
    synced: bool,
    permit: QueryPermit,
) -> Error {
    if !synced && shared.write_batch(|w| w.send(frontend::Sync)).await.is_err() {
        permit.poison();
        return err;
    }
    loop {
        match shared.recv_sync().await {
            Ok(BackendMessage::ReadyForQuery(_)) => {
                drop(permit);
                return err;
            }
            Ok(_) => continue,
            Err(_) => {
                permit.poison();
                return err;
            }
        }
    }
}

/// An out-of-order message is a protocol violation: the framing can no
/// longer be trusted, so the connection is failed as a whole.
fn unexpected(
    shared: &Shared,
    permit: QueryPermit,
    msg: &BackendMessage,
    phase: &'static str,
) -> Error {
    permit.poison();
    shared.fail_protocol(msg.unexpected(phase))
}

// ===== operations =====

/// `Parse` + `Describe(statement)` + `Sync` for a named statement.
///
/// Responses: `ParseComplete`, `ParameterDescription`, then
/// `RowDescription` or `NoData`, then `ReadyForQuery`.
pub(crate) async fn prepare(
    shared: &Arc<Shared>,
    name: &str,
    sql: &str,
) -> Result<(Arc<[Oid]>, Arc<[ColumnMetadata]>)> {
    let permit = shared.acquire().await?;

    shared
        .write_batch(|w| {
            w.send(frontend::Parse { prepare_name: name, sql, oids_len: 0, oids: [] });
            w.send(frontend::Describe { kind: b'S', name });
            w.send(frontend::Sync);
        })
        .await?;

    let (msg, permit) = next_message(shared, permit, true).await?;
    let permit = match msg {
        BackendMessage::ParseComplete(_) => permit,
        msg => return Err(unexpected(shared, permit, &msg, "prepare")),
    };

    let (msg, permit) = next_message(shared, permit, true).await?;
    let (oids, permit) = match msg {
        BackendMessage::ParameterDescription(desc) => (desc.oids, permit),
        msg => return Err(unexpected(shared, permit, &msg, "prepare describe")),
    };

    let (msg, permit) = next_message(shared, permit, true).await?;
    let (columns, permit) = match msg {
        BackendMessage::RowDescription(rd) => (rd.columns, permit),
        BackendMessage::NoData(_) => (Vec::new(), permit),
        msg => return Err(unexpected(shared, permit, &msg, "prepare describe")),
    };

    let (msg, permit) = next_message(shared, permit, true).await?;
    match msg {
        BackendMessage::ReadyForQuery(_) => drop(permit),
        msg => return Err(unexpected(shared, permit, &msg, "prepare")),
    }

    Ok((oids.into(), columns.into()))
}

/// One-shot query through the unnamed statement.
///
/// Parse, Describe, Bind and Execute are fused under a single turn of the
/// lock: the describe phase runs on `Flush` (no intervening
/// `ReadyForQuery`), parameters are serialized against the reported types,
/// and the same turn then carries the row stream.
pub(crate) async fn query_unnamed(
    shared: &Arc<Shared>,
    sql: &str,
    params: &[PgValue],
) -> Result<RowStream> {
    let permit = shared.acquire().await?;
    run_unnamed(shared, permit, sql, params).await
}

/// Run a parameterless statement through the unnamed portal with an
/// already-held turn token, waiting for completion.
pub(crate) async fn execute_simple(
    shared: &Arc<Shared>,
    permit: QueryPermit,
    sql: &str,
) -> Result<()> {
    run_unnamed(shared, permit, sql, &[]).await?.buffer().await.map(drop)
}

async fn run_unnamed(
    shared: &Arc<Shared>,
    permit: QueryPermit,
    sql: &str,
    params: &[PgValue],
) -> Result<RowStream> {
    shared
        .write_batch(|w| {
            w.send(frontend::Parse { prepare_name: "", sql, oids_len: 0, oids: [] });
            w.send(frontend::Describe { kind: b'S', name: "" });
            w.send(frontend::Flush);
        })
        .await?;

    let (msg, permit) = next_message(shared, permit, false).await?;
    let permit = match msg {
        BackendMessage::ParseComplete(_) => permit,
        msg => return Err(unexpected(shared, permit, &msg, "query parse")),
    };

    let (msg, permit) = next_message(shared, permit, false).await?;
    let (oids, permit) = match msg {
        BackendMessage::ParameterDescription(desc) => (desc.oids, permit),
        msg => return Err(unexpected(shared, permit, &msg, "query describe")),
    };

    let (msg, permit) = next_message(shared, permit, false).await?;
    let (columns, permit) = match msg {
        BackendMessage::RowDescription(rd) => (rd.columns, permit),
        BackendMessage::NoData(_) => (Vec::new(), permit),
        msg => return Err(unexpected(shared, permit, &msg, "query describe")),
    };

    // the parse cycle is open until a Sync reaches the server, so a
    // serialization failure still has to sync out of it
    let encoded = match encode_params(&shared.types, &oids, params) {
        Ok(encoded) => encoded,
        Err(err) => return Err(recover(shared, err, false, permit).await),
    };

    if let Err(err) = shared
        .write_batch(|w| {
            w.send(frontend::Bind { portal_name: "", stmt_name: "", params: &encoded });
            w.send(frontend::Execute { portal_name: "", max_row: 0 });
            w.send(frontend::Sync);
        })
        .await
    {
        permit.poison();
        return Err(err);
    }

    let (msg, permit) = next_message(shared, permit, true).await?;
    match msg {
        BackendMessage::BindComplete(_) => {}
        msg => return Err(unexpected(shared, permit, &msg, "query bind")),
    }

    Ok(RowStream::new(shared.clone(), permit, columns.into()))
}

/// `Bind` + `Execute` + `Sync` against a previously prepared statement.
pub(crate) async fn execute_statement(
    shared: &Arc<Shared>,
    name: &str,
    oids: &[Oid],
    columns: &Arc<[ColumnMetadata]>,
    params: &[PgValue],
) -> Result<RowStream> {
    let permit = shared.acquire().await?;

    // nothing is on the wire yet: release the turn and raise
    let encoded = match encode_params(&shared.types, oids, params) {
        Ok(encoded) => encoded,
        Err(err) => {
            drop(permit);
            return Err(err);
        }
    };

    if let Err(err) = shared
        .write_batch(|w| {
            w.send(frontend::Bind { portal_name: "", stmt_name: name, params: &encoded });
            w.send(frontend::Execute { portal_name: "", max_row: 0 });
            w.send(frontend::Sync);
        })
        .await
    {
        permit.poison();
        return Err(err);
    }

    let (msg, permit) = next_message(shared, permit, true).await?;
    match msg {
        BackendMessage::BindComplete(_) => {}
        msg => return Err(unexpected(shared, permit, &msg, "execute bind")),
    }

    Ok(RowStream::new(shared.clone(), permit, columns.clone()))
}

/// `Close(statement)` + `Sync`.
pub(crate) async fn close_statement(shared: &Arc<Shared>, name: &str) -> Result<()> {
    let permit = shared.acquire().await?;

    shared
        .write_batch(|w| {
            w.send(frontend::Close { variant: b'S', name });
            w.send(frontend::Sync);
        })
        .await?;

    let (msg, permit) = next_message(shared, permit, true).await?;
    let permit = match msg {
        BackendMessage::CloseComplete(_) => permit,
        msg => return Err(unexpected(shared, permit, &msg, "close statement")),
    };

    let (msg, permit) = next_message(shared, permit, true).await?;
    match msg {
        BackendMessage::ReadyForQuery(_) => drop(permit),
        msg => return Err(unexpected(shared, permit, &msg, "close statement")),
    }
    Ok(())
}

// ===== results =====

/// A streaming query result.
///
/// Holds the connection's turn token for the whole iteration: rows are
/// decoded as the server sends them, and the token returns to the queue
/// when the stream observes `ReadyForQuery`. Dropping the stream early
/// drains the remaining rows in the background to preserve that invariant.
///
/// The stream must yield `Err` at most once; iteration ends after it.
#[must_use = "streams do nothing unless polled"]
pub struct RowStream {
    shared: Arc<Shared>,
    permit: Option<QueryPermit>,
    columns: Arc<[ColumnMetadata]>,
    completion: Option<CompletionInfo>,
    state: StreamState,
}

enum StreamState {
    /// Expecting `DataRow` or `CommandComplete`.
    Reading,
    /// Completion seen; expecting `ReadyForQuery`.
    AwaitReady,
    /// A recoverable error occurred mid-stream; consuming to the clean
    /// state before yielding it.
    Recovering(Option<Error>),
    Done,
    Failed,
}

impl RowStream {
    pub(crate) fn new(
        shared: Arc<Shared>,
        permit: QueryPermit,
        columns: Arc<[ColumnMetadata]>,
    ) -> RowStream {
        RowStream {
            shared,
            permit: Some(permit),
            columns,
            completion: None,
            state: StreamState::Reading,
        }
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    /// Parsed `CommandComplete` info; present once the stream finished.
    pub fn completion(&self) -> Option<&CompletionInfo> {
        self.completion.as_ref()
    }

    /// `true` once the stream observed the end of its command cycle.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, StreamState::Done | StreamState::Failed)
    }

    /// Next row.
    pub async fn next(&mut self) -> Option<Result<Row>> {
        std::future::poll_fn(|cx| Pin::new(&mut *self).poll_next_row(cx)).await
    }

    /// Collect the remaining rows into a buffered result.
    pub async fn buffer(mut self) -> Result<Rows> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await {
            rows.push(row?);
        }
        Ok(Rows {
            columns: self.columns.clone(),
            rows,
            completion: self.completion.take(),
        })
    }

    fn poll_next_row(&mut self, cx: &mut Context<'_>) -> Poll<Option<Result<Row>>> {
        loop {
            match &mut self.state {
                StreamState::Reading => {
                    let msg = match ready!(self.shared.slot.poll_recv(cx)) {
                        Ok(msg) => msg,
                        Err(_) => return Poll::Ready(Some(Err(self.abort()))),
                    };
                    match msg {
                        BackendMessage::DataRow(dr) => {
                            match Row::decode(&self.columns, &self.shared.types, dr) {
                                Ok(row) => return Poll::Ready(Some(Ok(row))),
                                // client-side decode failure: the server
                                // keeps sending rows, drain to clean state
                                Err(err) => self.state = StreamState::Recovering(Some(err)),
                            }
                        }
                        BackendMessage::CommandComplete(cc) => {
                            self.completion = Some(CompletionInfo::parse(&cc.tag));
                            self.state = StreamState::AwaitReady;
                        }
                        BackendMessage::EmptyQueryResponse(_) => {
                            self.state = StreamState::AwaitReady;
                        }
                        BackendMessage::ErrorResponse(err) => {
                            let err = err.0;
                            if err.is_fatal() {
                                let _ = self.abort();
                                return Poll::Ready(Some(Err(err.into())));
                            }
                            self.state = StreamState::Recovering(Some(err.into()));
                        }
                        msg => return Poll::Ready(Some(Err(self.protocol(&msg, "row stream")))),
                    }
                }
                StreamState::AwaitReady => {
                    let msg = match ready!(self.shared.slot.poll_recv(cx)) {
                        Ok(msg) => msg,
                        Err(_) => return Poll::Ready(Some(Err(self.abort()))),
                    };
                    match msg {
                        BackendMessage::ReadyForQuery(_) => {
                            // clean state: the token may circulate again
                            drop(self.permit.take());
                            self.state = StreamState::Done;
                            return Poll::Ready(None);
                        }
                        BackendMessage::ErrorResponse(err) => {
                            let err = err.0;
                            if err.is_fatal() {
                                let _ = self.abort();
                                return Poll::Ready(Some(Err(err.into())));
                            }
                            self.state = StreamState::Recovering(Some(err.into()));
                        }
                        msg => return Poll::Ready(Some(Err(self.protocol(&msg, "row stream")))),
                    }
                }
                StreamState::Recovering(err) => {
                    match ready!(self.shared.slot.poll_recv(cx)) {
                        Ok(BackendMessage::ReadyForQuery(_)) => {
                            let err = err.take().unwrap_or_else(Error::closed);
                            drop(self.permit.take());
                            self.state = StreamState::Done;
                            return Poll::Ready(Some(Err(err)));
                        }
                        Ok(_) => continue,
                        Err(_) => {
                            let err = err.take().unwrap_or_else(Error::closed);
                            if let Some(permit) = self.permit.take() {
                                permit.poison();
                            }
                            self.state = StreamState::Failed;
                            return Poll::Ready(Some(Err(err)));
                        }
                    }
                }
                StreamState::Done | StreamState::Failed => return Poll::Ready(None),
            }
        }
    }

    /// The connection is terminating; the token never returns to the queue.
    fn abort(&mut self) -> Error {
        if let Some(permit) = self.permit.take() {
            permit.poison();
        }
        self.state = StreamState::Failed;
        Error::closed()
    }

    fn protocol(&mut self, msg: &BackendMessage, phase: &'static str) -> Error {
        let err = msg.unexpected(phase);
        if let Some(permit) = self.permit.take() {
            permit.poison();
        }
        self.state = StreamState::Failed;
        self.shared.fail_protocol(err)
    }
}

impl futures_core::Stream for RowStream {
    type Item = Result<Row>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll_next_row(cx)
    }
}

impl Drop for RowStream {
    fn drop(&mut self) {
        let Some(permit) = self.permit.take() else {
            return;
        };
        // consumer walked away mid-stream: drain the remaining rows and the
        // ReadyForQuery before the token circulates again
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = self.shared.clone();
                handle.spawn(drain(shared, permit));
            }
            Err(_) => permit.poison(),
        }
    }
}

impl std::fmt::Debug for RowStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RowStream")
            .field("columns", &self.columns.len())
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

async fn drain(shared: Arc<Shared>, permit: QueryPermit) {
    loop {
        match shared.recv_sync().await {
            Ok(BackendMessage::ReadyForQuery(_)) => {
                drop(permit);
                return;
            }
            Ok(_) => continue,
            Err(_) => {
                permit.poison();
                return;
            }
        }
    }
}

/// A fully buffered query result.
#[derive(Debug)]
pub struct Rows {
    columns: Arc<[ColumnMetadata]>,
    rows: Vec<Row>,
    completion: Option<CompletionInfo>,
}

impl Rows {
    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn completion(&self) -> Option<&CompletionInfo> {
        self.completion.as_ref()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// The result's single row.
    pub fn single(&self) -> Result<&Row> {
        match self.rows.as_slice() {
            [row] => Ok(row),
            rows => Err(ContractError::RowCount(rows.len()).into()),
        }
    }

    /// The result's single value: exactly one row with exactly one column.
    pub fn single_value(&self) -> Result<&PgValue> {
        let row = self.single()?;
        if self.columns.len() != 1 {
            return Err(ContractError::ColumnWidth(self.columns.len()).into());
        }
        Ok(&row[0])
    }
}

impl IntoIterator for Rows {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Rows {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn completion_tags() {
        let info = CompletionInfo::parse("SELECT 42");
        assert_eq!(info.tag(), "SELECT 42");
        assert_eq!(info.rows_affected(), Some(42));

        assert_eq!(CompletionInfo::parse("INSERT 0 3").rows_affected(), Some(3));
        assert_eq!(CompletionInfo::parse("UPDATE 7").rows_affected(), Some(7));
        assert_eq!(CompletionInfo::parse("DELETE 0").rows_affected(), Some(0));
        assert_eq!(CompletionInfo::parse("FETCH 5").rows_affected(), Some(5));
        assert_eq!(CompletionInfo::parse("MOVE 2").rows_affected(), Some(2));
        assert_eq!(CompletionInfo::parse("COPY 100").rows_affected(), Some(100));
        assert_eq!(CompletionInfo::parse("CREATE TABLE").rows_affected(), None);
        assert_eq!(CompletionInfo::parse("LISTEN").rows_affected(), None);
        assert_eq!(CompletionInfo::parse("").rows_affected(), None);
    }

    #[test]
    fn param_count_checked() {
        let registry = TypeRegistry::bootstrap();
        let err = encode_params(&registry, &[23], &[]).unwrap_err();
        assert!(err.to_string().contains("expected 1 parameters, got 0"));
    }

    #[test]
    fn param_errors_name_the_parameter() {
        let registry = TypeRegistry::bootstrap();
        let err =
            encode_params(&registry, &[23], &[PgValue::Text("one".into())]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Error sending param $1: Expected number, got string"
        );
    }

    #[test]
    fn null_param_is_absent() {
        let registry = TypeRegistry::bootstrap();
        let encoded = encode_params(
            &registry,
            &[23, 25],
            &[PgValue::Null, PgValue::Text("x".into())],
        )
        .unwrap();
        assert!(encoded[0].is_none());
        assert_eq!(encoded[1].as_deref(), Some(&b"x"[..]));
    }
}
