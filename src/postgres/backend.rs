//! Postgres Backend Messages
use bytes::{Buf, Bytes};

use crate::{common::ByteStr, ext::BytesExt, row::ColumnMetadata};

use super::{Oid, PgError, ProtocolError};

/// A type that can be decoded from a postgres backend message.
///
/// Decoders consume the message body in full; trailing bytes after a decode
/// are a protocol violation.
pub trait BackendProtocol: Sized {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError>;
}

/// Postgres backend messages.
#[derive(Debug)]
pub enum BackendMessage {
    Authentication(Authentication),
    BackendKeyData(BackendKeyData),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    EmptyQueryResponse(EmptyQueryResponse),
    ErrorResponse(ErrorResponse),
    NoData(NoData),
    NoticeResponse(NoticeResponse),
    NotificationResponse(NotificationResponse),
    ParameterDescription(ParameterDescription),
    ParameterStatus(ParameterStatus),
    ParseComplete(ParseComplete),
    ReadyForQuery(ReadyForQuery),
    RowDescription(RowDescription),
}

macro_rules! match_backend {
    ($($name:ident,)*) => {
        impl BackendMessage {
            pub fn msgtype(&self) -> u8 {
                match self {
                    $(Self::$name(_) => $name::MSGTYPE,)*
                }
            }

            /// Get message name from message type.
            ///
            /// Returns `"Unknown"` for unknown message type.
            pub fn message_name(msgtype: u8) -> &'static str {
                match msgtype {
                    $($name::MSGTYPE => stringify!($name),)*
                    _ => "Unknown",
                }
            }

            /// The protocol error for this message arriving in `phase`.
            pub(crate) fn unexpected(&self, phase: &'static str) -> ProtocolError {
                ProtocolError::unexpected(self.msgtype(), phase)
            }
        }
        impl BackendProtocol for BackendMessage {
            fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                let message = match msgtype {
                    $($name::MSGTYPE => Self::$name(<$name as BackendProtocol>::decode(msgtype, body)?),)*
                    _ => return Err(ProtocolError::unknown(msgtype)),
                };
                Ok(message)
            }
        }
    };
}

match_backend! {
    Authentication,
    BackendKeyData,
    BindComplete,
    CloseComplete,
    CommandComplete,
    DataRow,
    EmptyQueryResponse,
    ErrorResponse,
    NoData,
    NoticeResponse,
    NotificationResponse,
    ParameterDescription,
    ParameterStatus,
    ParseComplete,
    ReadyForQuery,
    RowDescription,
}

macro_rules! assert_msgtype {
    ($typ:ident) => {
        if Self::MSGTYPE != $typ {
            return Err(ProtocolError::unexpected($typ, "decode"))
        }
    };
}

/// The decoder consumed less than the advertised body length.
fn assert_consumed(msgtype: u8, body: &Bytes) -> Result<(), ProtocolError> {
    match body.has_remaining() {
        true => Err(ProtocolError::Trailing { msgtype, remaining: body.remaining() }),
        false => Ok(()),
    }
}

macro_rules! need {
    ($body:expr, $n:expr) => {
        if bytes::Buf::remaining(&$body) < $n {
            return Err(ProtocolError::truncated(Self::MSGTYPE));
        }
    };
}

fn nul_string(body: &mut Bytes, msgtype: u8) -> Result<ByteStr, ProtocolError> {
    match body.get_nul_bytestr() {
        Some(Ok(value)) => Ok(value),
        Some(Err(_)) | None => Err(ProtocolError::truncated(msgtype)),
    }
}

/// Identifies the message as an authentication request.
#[derive(Debug)]
pub enum Authentication {
    /// Specifies that the authentication was successful.
    Ok,
    /// Specifies that a clear-text password is required.
    CleartextPassword,
    /// Specifies that an MD5-encrypted password is required.
    Md5Password {
        /// The salt to use when encrypting the password.
        salt: [u8; 4],
    },
    /// Specifies that SASL authentication is required.
    ///
    /// Recognized so the `scram-sha-256` family can be reported as
    /// unsupported rather than as a protocol violation.
    Sasl {
        /// SASL authentication mechanisms in the server's order of preference.
        mechanisms: Vec<ByteStr>,
    },
}

impl Authentication {
    pub const MSGTYPE: u8 = b'R';
}

impl BackendProtocol for Authentication {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 4);
        let auth = match body.get_u32() {
            0 => Authentication::Ok,
            3 => Authentication::CleartextPassword,
            5 => {
                need!(body, 4);
                Authentication::Md5Password { salt: body.get_u32().to_be_bytes() }
            }
            10 => {
                let mut mechanisms = Vec::new();
                while body.first().is_some_and(|b| *b != 0) {
                    mechanisms.push(nul_string(&mut body, msgtype)?);
                }
                need!(body, 1);
                body.advance(1); // terminator
                Authentication::Sasl { mechanisms }
            }
            auth => return Err(ProtocolError::unknown_auth(auth)),
        };
        assert_consumed(msgtype, &body)?;
        Ok(auth)
    }
}

/// Identifies the message as cancellation key data.
///
/// The frontend must save these values if it wishes to be able to issue CancelRequest messages later.
#[derive(Debug)]
pub struct BackendKeyData {
    /// The process ID of this backend.
    pub process_id: i32,
    /// The secret key of this backend.
    pub secret_key: i32,
}

impl BackendKeyData {
    pub const MSGTYPE: u8 = b'K';
}

impl BackendProtocol for BackendKeyData {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 8);
        let me = Self {
            process_id: body.get_i32(),
            secret_key: body.get_i32(),
        };
        assert_consumed(msgtype, &body)?;
        Ok(me)
    }
}

/// Identifies the message as a run-time parameter status report.
#[derive(Debug)]
pub struct ParameterStatus {
    /// The name of the run-time parameter being reported.
    pub name: ByteStr,
    /// The current value of the parameter.
    pub value: ByteStr,
}

impl ParameterStatus {
    pub const MSGTYPE: u8 = b'S';
}

impl BackendProtocol for ParameterStatus {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let me = Self {
            name: nul_string(&mut body, msgtype)?,
            value: nul_string(&mut body, msgtype)?,
        };
        assert_consumed(msgtype, &body)?;
        Ok(me)
    }
}

/// A warning message. The frontend should display the message.
///
/// Shares the field layout of [`ErrorResponse`].
#[derive(Debug)]
pub struct NoticeResponse(pub PgError);

impl NoticeResponse {
    pub const MSGTYPE: u8 = b'N';
}

impl BackendProtocol for NoticeResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self(PgError::parse(body)?))
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
#[derive(Debug)]
pub struct ErrorResponse(pub PgError);

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        Ok(Self(PgError::parse(body)?))
    }
}

/// Identifies the message as an asynchronous notification from `NOTIFY`.
#[derive(Debug)]
pub struct NotificationResponse {
    /// The process ID of the notifying backend process.
    pub process_id: i32,
    /// The name of the channel that the notify has been raised on.
    pub channel: ByteStr,
    /// The "payload" string passed from the notifying process.
    pub payload: ByteStr,
}

impl NotificationResponse {
    pub const MSGTYPE: u8 = b'A';
}

impl BackendProtocol for NotificationResponse {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 4);
        let me = Self {
            process_id: body.get_i32(),
            channel: nul_string(&mut body, msgtype)?,
            payload: nul_string(&mut body, msgtype)?,
        };
        assert_consumed(msgtype, &body)?;
        Ok(me)
    }
}

/// Identifies the message as a row description.
///
/// Indicates that rows are about to be returned in response to the query.
/// The contents of this message describe the column layout of the rows,
/// which will follow as [`DataRow`] messages.
#[derive(Debug)]
pub struct RowDescription {
    pub columns: Vec<ColumnMetadata>,
}

impl RowDescription {
    pub const MSGTYPE: u8 = b'T';
}

impl BackendProtocol for RowDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 2);
        let field_len = body.get_i16();
        let mut columns = Vec::with_capacity(field_len as usize);
        for _ in 0..field_len {
            columns.push(ColumnMetadata::decode(&mut body)?);
        }
        assert_consumed(msgtype, &body)?;
        Ok(Self { columns })
    }
}

/// Identifies the message as a data row.
#[derive(Debug)]
pub struct DataRow {
    /// Column values in server order; `None` is SQL NULL.
    pub values: Vec<Option<Bytes>>,
}

impl DataRow {
    pub const MSGTYPE: u8 = b'D';
}

impl BackendProtocol for DataRow {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 2);
        let column_len = body.get_i16();
        let mut values = Vec::with_capacity(column_len as usize);
        for _ in 0..column_len {
            need!(body, 4);
            let len = body.get_i32();
            if len < 0 {
                values.push(None);
                continue;
            }
            need!(body, len as usize);
            values.push(Some(body.split_to(len as usize)));
        }
        assert_consumed(msgtype, &body)?;
        Ok(Self { values })
    }
}

/// Identifies the message as a command-completed response.
///
/// For an INSERT command, the tag is `INSERT oid rows`, where rows is the number of rows inserted.
/// oid used to be the object ID of the inserted row if rows was 1 and the target table had OIDs,
/// but OIDs system columns are not supported anymore; therefore oid is always 0.
///
/// For SELECT, UPDATE, DELETE, MERGE, MOVE, FETCH and COPY the tag is the
/// command word followed by the affected row count.
#[derive(Debug)]
pub struct CommandComplete {
    /// The command tag. This is usually a single word that identifies which SQL command was completed.
    pub tag: ByteStr,
}

impl CommandComplete {
    pub const MSGTYPE: u8 = b'C';
}

impl BackendProtocol for CommandComplete {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        let me = Self { tag: nul_string(&mut body, msgtype)? };
        assert_consumed(msgtype, &body)?;
        Ok(me)
    }
}

/// Identifies the message as a parameter description.
#[derive(Debug)]
pub struct ParameterDescription {
    /// The object IDs of the statement's parameter data types.
    pub oids: Vec<Oid>,
}

impl ParameterDescription {
    pub const MSGTYPE: u8 = b't';
}

impl BackendProtocol for ParameterDescription {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 2);
        let param_len = body.get_i16();
        let mut oids = Vec::with_capacity(param_len as usize);
        for _ in 0..param_len {
            need!(body, 4);
            oids.push(body.get_u32());
        }
        assert_consumed(msgtype, &body)?;
        Ok(Self { oids })
    }
}

/// Identifies the message type. ReadyForQuery is sent whenever the backend is ready for a new query cycle.
#[derive(Debug)]
pub struct ReadyForQuery {
    /// Current backend transaction status indicator. Possible values are
    /// 'I' if idle (not in a transaction block); 'T' if in a transaction
    /// block; or 'E' if in a failed transaction block.
    pub tx_status: u8,
}

impl ReadyForQuery {
    pub const MSGTYPE: u8 = b'Z';
}

impl BackendProtocol for ReadyForQuery {
    fn decode(msgtype: u8, mut body: Bytes) -> Result<Self, ProtocolError> {
        assert_msgtype!(msgtype);
        need!(body, 1);
        let me = Self { tx_status: body.get_u8() };
        assert_consumed(msgtype, &body)?;
        Ok(me)
    }
}

macro_rules! unit_msg {
    ($(
        $(#[$doc:meta])* struct $name:ident, $ty:literal;
    )*) => {$(
            $(#[$doc])*
            #[derive(Debug)]
            pub struct $name;

            impl $name {
                pub const MSGTYPE: u8 = $ty;
            }

            impl BackendProtocol for $name {
                fn decode(msgtype: u8, body: Bytes) -> Result<Self, ProtocolError> {
                    assert_msgtype!(msgtype);
                    assert_consumed(msgtype, &body)?;
                    Ok(Self)
                }
            }
    )*};
}

unit_msg! {
    /// Identifies the message as a Bind-complete indicator.
    struct BindComplete, b'2';

    /// Identifies the message as a Close-complete indicator.
    struct CloseComplete, b'3';

    /// Identifies the message as a response to an empty query string.
    ///
    /// This substitutes for CommandComplete.
    struct EmptyQueryResponse, b'I';

    /// Identifies the message as a no-data indicator.
    struct NoData, b'n';

    /// Identifies the message as a Parse-complete indicator.
    struct ParseComplete, b'1';
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;

    #[test]
    fn data_row_with_null() {
        let mut buf = Vec::new();
        buf.put_i16(2);
        buf.put_i32(-1);
        buf.put_i32(4);
        buf.put_i32(42);
        let row = DataRow::decode(b'D', Bytes::from(buf)).unwrap();
        assert_eq!(row.values.len(), 2);
        assert!(row.values[0].is_none());
        assert_eq!(row.values[1].as_deref(), Some(&42i32.to_be_bytes()[..]));
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut buf = Vec::new();
        buf.put_u8(b'I');
        buf.put_u8(b'x');
        let err = ReadyForQuery::decode(b'Z', Bytes::from(buf)).unwrap_err();
        assert!(matches!(err, ProtocolError::Trailing { remaining: 1, .. }));
    }

    #[test]
    fn truncated_body_rejected() {
        let err = BackendKeyData::decode(b'K', Bytes::from_static(&[0, 0])).unwrap_err();
        assert!(matches!(err, ProtocolError::Truncated { .. }));
    }

    #[test]
    fn unknown_type_byte_rejected() {
        let err = BackendMessage::decode(b'@', Bytes::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::Unknown { found: b'@' }));
    }

    #[test]
    fn sasl_mechanisms() {
        let mut buf = Vec::new();
        buf.put_u32(10);
        buf.put_slice(b"SCRAM-SHA-256\0");
        buf.put_u8(0);
        let auth = Authentication::decode(b'R', Bytes::from(buf)).unwrap();
        let Authentication::Sasl { mechanisms } = auth else {
            panic!("expected sasl");
        };
        assert_eq!(mechanisms[0], "SCRAM-SHA-256");
    }

    #[test]
    fn notification() {
        let mut buf = Vec::new();
        buf.put_i32(4211);
        buf.put_slice(b"events\0");
        buf.put_slice(b"payload\0");
        let n = NotificationResponse::decode(b'A', Bytes::from(buf)).unwrap();
        assert_eq!(n.process_id, 4211);
        assert_eq!(n.channel, "events");
        assert_eq!(n.payload, "payload");
    }
}
