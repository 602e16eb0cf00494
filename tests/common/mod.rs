//! A scripted postgres backend over an in-memory duplex pipe.
//!
//! Tests drive the protocol from the server side: they read the frontend
//! frames the client writes and answer with hand-built backend frames,
//! which exercises the real connection machinery end to end without a
//! database.
#![allow(dead_code)]

use std::collections::HashMap;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use postwire::{Config, Connection};

pub struct FakeServer {
    io: DuplexStream,
}

/// A frontend frame as the server read it.
#[derive(Debug)]
pub struct Frame {
    pub msgtype: u8,
    pub body: Vec<u8>,
}

impl FakeServer {
    /// Read the startup packet and return its parameter map.
    pub async fn expect_startup(&mut self) -> HashMap<String, String> {
        let len = self.io.read_i32().await.unwrap();
        let mut body = vec![0u8; len as usize - 4];
        self.io.read_exact(&mut body).await.unwrap();

        let version = i32::from_be_bytes(body[..4].try_into().unwrap());
        assert_eq!(version, 196608, "protocol version 3.0");

        let mut params = HashMap::new();
        let mut rest = &body[4..];
        while rest.first().is_some_and(|b| *b != 0) {
            let name = take_cstr(&mut rest);
            let value = take_cstr(&mut rest);
            params.insert(name, value);
        }
        params
    }

    /// Read one typed frontend frame.
    pub async fn recv(&mut self) -> Frame {
        self.try_recv().await.expect("client hung up")
    }

    /// Read one typed frontend frame, `None` at EOF.
    pub async fn try_recv(&mut self) -> Option<Frame> {
        let msgtype = self.io.read_u8().await.ok()?;
        let len = self.io.read_i32().await.ok()?;
        let mut body = vec![0u8; len as usize - 4];
        self.io.read_exact(&mut body).await.ok()?;
        Some(Frame { msgtype, body })
    }

    /// Read frames until one of type `msgtype` (inclusive); returns all of
    /// them in order.
    pub async fn recv_until(&mut self, msgtype: u8) -> Vec<Frame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.recv().await;
            let done = frame.msgtype == msgtype;
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    pub async fn send(&mut self, frame: Vec<u8>) {
        self.io.write_all(&frame).await.unwrap();
        self.io.flush().await.unwrap();
    }

    pub async fn send_many(&mut self, frames: impl IntoIterator<Item = Vec<u8>>) {
        for frame in frames {
            self.io.write_all(&frame).await.unwrap();
        }
        self.io.flush().await.unwrap();
    }

    /// Serve the `pg_type` catalogue query issued right after startup.
    pub async fn serve_type_load(&mut self) {
        let parse = self.recv_until(b'H').await;
        assert_eq!(parse[0].msgtype, b'P');

        self.send_many([parse_complete(), parameter_description(&[]), row_description(&TYPE_COLUMNS)])
            .await;

        self.recv_until(b'S').await; // Bind, Execute, Sync
        let mut frames = vec![bind_complete()];
        frames.extend(default_catalogue());
        frames.push(command_complete("SELECT 8"));
        frames.push(ready_for_query(b'I'));
        self.send_many(frames).await;
    }

    /// Full trust-auth startup plus the catalogue load.
    pub async fn handshake(&mut self) {
        let params = self.expect_startup().await;
        assert!(params.contains_key("user"));

        self.send_many([
            auth_ok(),
            parameter_status("integer_datetimes", "on"),
            parameter_status("client_encoding", "UTF8"),
            parameter_status("server_version", "16.3"),
            backend_key_data(4242, 117),
            ready_for_query(b'I'),
        ])
        .await;

        self.serve_type_load().await;
    }

    /// Serve one fused unnamed-statement query returning int4 rows.
    ///
    /// `rows` are the single-column values; `tag` is the completion tag.
    pub async fn serve_int4_query(&mut self, rows: &[i32], tag: &str) {
        self.recv_until(b'H').await;
        self.send_many([
            parse_complete(),
            parameter_description(&[]),
            row_description(&[int4_col("value")]),
        ])
        .await;

        self.recv_until(b'S').await;
        let mut frames = vec![bind_complete()];
        for value in rows {
            frames.push(data_row(&[Some(&value.to_be_bytes())]));
        }
        frames.push(command_complete(tag));
        frames.push(ready_for_query(b'I'));
        self.send_many(frames).await;
    }
}

/// Connect a real `Connection` against a scripted server, running `script`
/// as the backend.
pub async fn connect_scripted<F, Fut>(script: F) -> (Connection, tokio::task::JoinHandle<()>)
where
    F: FnOnce(FakeServer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (conn, handle) = try_connect_scripted(Config::new().user("test"), script).await;
    (conn.unwrap(), handle)
}

/// [`connect_scripted`], but the handshake outcome is the caller's to
/// assert on.
pub async fn try_connect_scripted<F, Fut>(
    config: Config,
    script: F,
) -> (postwire::Result<Connection>, tokio::task::JoinHandle<()>)
where
    F: FnOnce(FakeServer) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let (client, server) = tokio::io::duplex(1 << 16);
    let handle = tokio::spawn(async move {
        script(FakeServer { io: server }).await;
    });

    let conn = Connection::handshake(client, &config).await;
    (conn, handle)
}

fn take_cstr(rest: &mut &[u8]) -> String {
    let end = rest.iter().position(|b| *b == 0).unwrap();
    let value = String::from_utf8(rest[..end].to_vec()).unwrap();
    *rest = &rest[end + 1..];
    value
}

// ===== backend frame builders =====

pub fn frame(msgtype: u8, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + body.len());
    out.push(msgtype);
    out.extend((body.len() as i32 + 4).to_be_bytes());
    out.extend(body);
    out
}

pub fn auth_ok() -> Vec<u8> {
    frame(b'R', &0i32.to_be_bytes())
}

pub fn auth_cleartext() -> Vec<u8> {
    frame(b'R', &3i32.to_be_bytes())
}

pub fn auth_md5(salt: [u8; 4]) -> Vec<u8> {
    let mut body = 5i32.to_be_bytes().to_vec();
    body.extend(salt);
    frame(b'R', &body)
}

pub fn parameter_status(name: &str, value: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend(name.as_bytes());
    body.push(0);
    body.extend(value.as_bytes());
    body.push(0);
    frame(b'S', &body)
}

pub fn backend_key_data(pid: i32, secret: i32) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend(secret.to_be_bytes());
    frame(b'K', &body)
}

pub fn ready_for_query(status: u8) -> Vec<u8> {
    frame(b'Z', &[status])
}

pub fn parse_complete() -> Vec<u8> {
    frame(b'1', &[])
}

pub fn bind_complete() -> Vec<u8> {
    frame(b'2', &[])
}

pub fn close_complete() -> Vec<u8> {
    frame(b'3', &[])
}

pub fn no_data() -> Vec<u8> {
    frame(b'n', &[])
}

pub fn empty_query_response() -> Vec<u8> {
    frame(b'I', &[])
}

pub fn parameter_description(oids: &[u32]) -> Vec<u8> {
    let mut body = (oids.len() as i16).to_be_bytes().to_vec();
    for oid in oids {
        body.extend(oid.to_be_bytes());
    }
    frame(b't', &body)
}

/// A `RowDescription` field: name, type oid, type size.
pub struct Col(pub &'static str, pub u32, pub i16);

pub fn int4_col(name: &'static str) -> Col {
    Col(name, 23, 4)
}

pub fn text_col(name: &'static str) -> Col {
    Col(name, 25, -1)
}

pub fn row_description(cols: &[Col]) -> Vec<u8> {
    let mut body = (cols.len() as i16).to_be_bytes().to_vec();
    for Col(name, oid, size) in cols {
        body.extend(name.as_bytes());
        body.push(0);
        body.extend(0u32.to_be_bytes()); // table oid
        body.extend(0i16.to_be_bytes()); // attnum
        body.extend(oid.to_be_bytes());
        body.extend(size.to_be_bytes());
        body.extend((-1i32).to_be_bytes()); // typmod
        body.extend(0i16.to_be_bytes()); // format: text at describe time
    }
    frame(b'T', &body)
}

pub fn data_row(values: &[Option<&[u8]>]) -> Vec<u8> {
    let mut body = (values.len() as i16).to_be_bytes().to_vec();
    for value in values {
        match value {
            None => body.extend((-1i32).to_be_bytes()),
            Some(value) => {
                body.extend((value.len() as i32).to_be_bytes());
                body.extend(*value);
            }
        }
    }
    frame(b'D', &body)
}

pub fn command_complete(tag: &str) -> Vec<u8> {
    let mut body = tag.as_bytes().to_vec();
    body.push(0);
    frame(b'C', &body)
}

pub fn error_response(severity: &str, code: &str, message: &str) -> Vec<u8> {
    error_like(b'E', severity, code, message)
}

pub fn notice_response(severity: &str, code: &str, message: &str) -> Vec<u8> {
    error_like(b'N', severity, code, message)
}

fn error_like(msgtype: u8, severity: &str, code: &str, message: &str) -> Vec<u8> {
    let mut body = Vec::new();
    for (tag, value) in [(b'V', severity), (b'S', severity), (b'C', code), (b'M', message)] {
        body.push(tag);
        body.extend(value.as_bytes());
        body.push(0);
    }
    body.push(0);
    frame(msgtype, &body)
}

pub fn notification(pid: i32, channel: &str, payload: &str) -> Vec<u8> {
    let mut body = pid.to_be_bytes().to_vec();
    body.extend(channel.as_bytes());
    body.push(0);
    body.extend(payload.as_bytes());
    body.push(0);
    frame(b'A', &body)
}

// ===== catalogue rows =====

pub const TYPE_COLUMNS: [Col; 7] = [
    Col("oid", 23, 4),
    Col("typname", 25, -1),
    Col("typtype", 25, -1),
    Col("typelem", 23, 4),
    Col("typreceive", 25, -1),
    Col("typsend", 25, -1),
    Col("attrtypids", 1007, -1),
];

/// One `pg_type` row in the loader query's column order.
pub fn type_row(oid: i32, name: &str, typtype: &str, elem: i32, recv: &str, send: &str) -> Vec<u8> {
    // attrtypids: the zero-dimensional int4 array
    let mut attrs = Vec::new();
    attrs.extend(0i32.to_be_bytes()); // ndim
    attrs.extend(0i32.to_be_bytes()); // flags
    attrs.extend(23u32.to_be_bytes()); // element oid

    data_row(&[
        Some(&oid.to_be_bytes()),
        Some(name.as_bytes()),
        Some(typtype.as_bytes()),
        Some(&elem.to_be_bytes()),
        Some(recv.as_bytes()),
        Some(send.as_bytes()),
        Some(&attrs),
    ])
}

/// The catalogue served by [`FakeServer::serve_type_load`].
pub fn default_catalogue() -> Vec<Vec<u8>> {
    vec![
        type_row(16, "bool", "b", 0, "boolrecv", "boolsend"),
        type_row(20, "int8", "b", 0, "int8recv", "int8send"),
        type_row(23, "int4", "b", 0, "int4recv", "int4send"),
        type_row(25, "text", "b", 0, "textrecv", "textsend"),
        type_row(701, "float8", "b", 0, "float8recv", "float8send"),
        type_row(1007, "_int4", "b", 23, "array_recv", "array_send"),
        type_row(1009, "_text", "b", 25, "array_recv", "array_send"),
        type_row(1042, "bpchar", "b", 0, "bpcharrecv", "bpcharsend"),
    ]
}
