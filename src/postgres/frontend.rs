//! Postgres Frontend Messages
//!
//! All struct fields here mirror the actual message sent to postgres.
use bytes::{BufMut, Bytes, BytesMut};

use crate::ext::{BufMutExt, StrExt, UsizeExt};

use super::{Oid, PgFormat};

// Other Frontend Message:
// CancelRequest
// CopyData('d')
// CopyDone('c')
// CopyFail('f')
// FunctionCall('F')
// GSSENCRequest
// GSSENCResponse('p')
// SASLInitialResponse('p')
// SASLResponse('p')

/// Write a frontend message to `buf`.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    // msgtype + length
    const PREFIX: usize = 1 + 4;

    let size = msg.size_hint();
    buf.reserve(PREFIX + size as usize);

    let offset = buf.len();
    buf.put_u8(F::MSGTYPE);
    buf.put_i32(4 + size);

    msg.encode(&mut *buf);

    assert_eq!(
        buf.len() - offset,
        PREFIX + size as usize,
        "[BUG] Frontend Message body not equal to size hint"
    );
}

/// A type which can be encoded into postgres frontend message.
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] and [`SslRequest`] do not implement [`FrontendProtocol`].
pub trait FrontendProtocol {
    /// message type
    const MSGTYPE: u8;

    /// size of the main body
    ///
    /// note that this is *only* the size of main body as oppose of actual postgres message
    fn size_hint(&self) -> i32;

    /// write the main body of the message
    ///
    /// `buf` have the length returned from `size_hint`
    ///
    /// writing less or past length results in panic
    fn encode(self, buf: impl BufMut);
}

/// Postgres Startup frontend message.
///
/// For historical reasons, the very first message sent by the client (the startup message)
/// has no initial message-type byte.
///
/// Thus, [`Startup`] does not implement [`FrontendProtocol`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Additional run-time parameters, applied as session defaults
    /// during backend start.
    pub params: &'a [(String, String)],
}

impl Startup<'_> {
    pub fn write(self, buf: &mut BytesMut) {
        let offset = buf.len();

        // Length of message contents in bytes, including self.
        // reserve 4 bytes for length
        buf.put_i32(0);

        // Int32(196608)
        // The protocol version number.
        // The most significant 16 bits are the major version number (3 for the protocol described here).
        // The least significant 16 bits are the minor version number (0 for the protocol described here).
        buf.put_i32(196608);

        // The protocol version number is followed by one or more pairs of parameter name and value strings.

        // user: The database user name to connect as. Required; there is no default.

        buf.put_nul_string("user");
        buf.put_nul_string(self.user);

        // database: The database to connect to. Defaults to the user name.

        if let Some(db) = self.database {
            buf.put_nul_string("database");
            buf.put_nul_string(db);
        }

        // Parameter names beginning with _pq_. are reserved for use as protocol extensions,
        // while others are treated as run-time parameters to be set at backend start time.

        for (name, value) in self.params {
            buf.put_nul_string(name);
            buf.put_nul_string(value);
        }

        // A zero byte is required as a terminator after the last name/value pair.
        buf.put_u8(b'\0');

        // write the length
        let mut written_buf = &mut buf[offset..];
        written_buf.put_i32(written_buf.len().to_i32());
    }
}

/// The SSL negotiation sentinel, sent before [`Startup`] when TLS is
/// requested.
///
/// The server answers with a single byte, `'S'` to proceed with the TLS
/// handshake or `'N'` to refuse. Like [`Startup`], this message has no
/// message-type byte.
#[derive(Debug)]
pub struct SslRequest;

impl SslRequest {
    /// The SSL request code: most significant 16 bits 1234, least 5679.
    pub const CODE: i32 = 80877103;

    pub fn write(self, buf: &mut BytesMut) {
        buf.put_i32(8);
        buf.put_i32(Self::CODE);
    }
}

/// Identifies the message as a password response.
#[derive(Debug)]
pub struct PasswordMessage<'a> {
    /// The password (encrypted, if requested).
    pub password: &'a str,
}

impl FrontendProtocol for PasswordMessage<'_> {
    const MSGTYPE: u8 = b'p';

    fn size_hint(&self) -> i32 {
        self.password.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.password);
    }
}

/// Identifies the message as a Parse command.
pub struct Parse<'a, I> {
    /// prepared statement name (an empty string selects the unnamed prepared statement).
    pub prepare_name: &'a str,
    /// The query string to be parsed.
    pub sql: &'a str,
    /// The number of parameter data types specified (can be zero).
    ///
    /// Note that this is not an indication of the number of parameters that might appear in the query string,
    /// only the number that the frontend wants to prespecify types for.
    pub oids_len: i16,
    /// Specifies the object ID of the parameter data type.
    ///
    /// Placing a zero here is equivalent to leaving the type unspecified.
    pub oids: I,
}

impl<I> FrontendProtocol for Parse<'_, I>
where
    I: IntoIterator<Item = Oid>,
{
    const MSGTYPE: u8 = b'P';

    fn size_hint(&self) -> i32 {
        self.prepare_name.nul_string_len() +
        self.sql.nul_string_len() +
        2 +
        (self.oids_len as i32 * 4)
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.prepare_name);
        buf.put_nul_string(self.sql);
        buf.put_i16(self.oids_len);
        for oid in self.oids {
            buf.put_u32(oid);
        }
    }
}

/// Identifies the message as a Bind command.
///
/// Parameter values carried here are already encoded in the binary format by
/// the type registry; `None` is the NULL parameter.
pub struct Bind<'a> {
    /// The name of the destination portal (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// The name of the source prepared statement (an empty string selects the unnamed prepared statement).
    pub stmt_name: &'a str,
    /// The parameter values. A single [`PgFormat::Binary`] format code is
    /// written for all of them.
    pub params: &'a [Option<Bytes>],
}

impl FrontendProtocol for Bind<'_> {
    const MSGTYPE: u8 = b'B';

    fn size_hint(&self) -> i32 {
        self.portal_name.nul_string_len() +
        self.stmt_name.nul_string_len() +
        // param format codes (i16 len + one code)
        2 + 2 +
        // params_len (i16)
        2 +
        self.params.iter().fold(0i32, |acc, p| {
            acc + 4 + p.as_ref().map_or(0, |b| b.len().to_i32())
        }) +
        // result format codes (i16 len + one code)
        2 + 2
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_nul_string(self.stmt_name);

        buf.put_i16(1);
        buf.put_i16(PgFormat::Binary.format_code());

        buf.put_i16(self.params.len().to_i16());
        for param in self.params {
            match param {
                // The length of the parameter value, in bytes (this count does not include itself).
                // As a special case, -1 indicates a NULL parameter value.
                // No value bytes follow in the NULL case.
                None => buf.put_i32(-1),
                Some(value) => {
                    buf.put_i32(value.len().to_i32());
                    buf.put_slice(value);
                }
            }
        }

        buf.put_i16(1);
        buf.put_i16(PgFormat::Binary.format_code());
    }
}

/// Identifies the message as an Execute command.
pub struct Execute<'a> {
    /// The name of the portal to execute (an empty string selects the unnamed portal).
    pub portal_name: &'a str,
    /// Maximum number of rows to return, if portal contains a query that returns rows
    /// (ignored otherwise). Zero denotes "no limit".
    pub max_row: i32,
}

impl FrontendProtocol for Execute<'_> {
    const MSGTYPE: u8 = b'E';

    fn size_hint(&self) -> i32 {
        self.portal_name.nul_string_len() + 4
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_nul_string(self.portal_name);
        buf.put_i32(self.max_row);
    }
}

/// Identifies the message as a Describe command.
pub struct Describe<'a> {
    /// 'S' to describe a prepared statement; or 'P' to describe a portal.
    pub kind: u8,
    /// The name of the prepared statement or portal to describe
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Describe<'_> {
    const MSGTYPE: u8 = b'D';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.kind);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Close command.
pub struct Close<'a> {
    /// 'S' to close a prepared statement; or 'P' to close a portal.
    pub variant: u8,
    /// The name of the prepared statement or portal to close
    /// (an empty string selects the unnamed prepared statement or portal).
    pub name: &'a str,
}

impl FrontendProtocol for Close<'_> {
    const MSGTYPE: u8 = b'C';

    fn size_hint(&self) -> i32 {
        1 + self.name.nul_string_len()
    }

    fn encode(self, mut buf: impl BufMut) {
        buf.put_u8(self.variant);
        buf.put_nul_string(self.name);
    }
}

/// Identifies the message as a Sync command.
pub struct Sync;

impl FrontendProtocol for Sync {
    const MSGTYPE: u8 = b'S';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a Flush command.
pub struct Flush;

impl FrontendProtocol for Flush {
    const MSGTYPE: u8 = b'H';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

/// Identifies the message as a termination.
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn size_hint(&self) -> i32 { 0 }

    fn encode(self, _: impl BufMut) { }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn framing_prefix() {
        let mut buf = BytesMut::new();
        write(PasswordMessage { password: "hunter2" }, &mut buf);
        assert_eq!(buf[0], b'p');
        assert_eq!(&buf[1..5], (4 + 7 + 1i32).to_be_bytes());
        assert_eq!(&buf[5..], b"hunter2\0");
    }

    #[test]
    fn startup_has_no_type_byte() {
        let mut buf = BytesMut::new();
        Startup { user: "u", database: Some("db"), params: &[] }.write(&mut buf);
        assert_eq!(&buf[..4], (buf.len() as i32).to_be_bytes());
        assert_eq!(&buf[4..8], 196608i32.to_be_bytes());
        assert_eq!(buf[buf.len() - 1], 0);
    }

    #[test]
    fn ssl_request_sentinel() {
        let mut buf = BytesMut::new();
        SslRequest.write(&mut buf);
        assert_eq!(&buf[..], [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn bind_null_param() {
        let mut buf = BytesMut::new();
        let params = [None, Some(Bytes::from_static(&[0, 0, 0, 42]))];
        write(Bind { portal_name: "", stmt_name: "s0", params: &params }, &mut buf);

        // portal nul, stmt nul, one binary format code, two params
        let body = &buf[5..];
        assert_eq!(&body[..1], b"\0");
        assert_eq!(&body[1..4], b"s0\0");
        assert_eq!(&body[4..8], [0, 1, 0, 1]);
        assert_eq!(&body[8..10], [0, 2]);
        assert_eq!(&body[10..14], (-1i32).to_be_bytes());
        assert_eq!(&body[14..18], 4i32.to_be_bytes());
        assert_eq!(&body[18..22], [0, 0, 0, 42]);
    }
}
