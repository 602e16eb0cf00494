//! TLS support.
//!
//! TLS is negotiated in-band: the client sends an `SSLRequest` sentinel
//! before the startup packet and, when the server answers `'S'`, hands the
//! raw socket to a [`TlsConnect`] implementation. Actual TLS stacks live in
//! external crates; [`NoTls`] is provided for plaintext connections.
use std::{
    error::Error as StdError,
    fmt,
    path::Path,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// An asynchronous function wrapping a stream in a TLS session.
pub trait TlsConnect<S> {
    /// The negotiated stream type.
    type Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static;
    /// The error returned by the handshake.
    type Error: Into<Box<dyn StdError + Send + Sync>>;

    /// Perform a TLS handshake over `stream`.
    ///
    /// `domain` is the server hostname for certificate verification and SNI.
    /// `root_cert` is the trust anchor file from the connection options, when
    /// one was given.
    fn connect(
        self,
        domain: &str,
        root_cert: Option<&Path>,
        stream: S,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send;
}

/// A `TlsConnect` implementation which simply returns an error.
///
/// This can be used when `sslmode` is `disable`.
#[derive(Debug, Clone, Copy)]
pub struct NoTls;

impl<S: Send> TlsConnect<S> for NoTls {
    type Stream = NoTlsStream;
    type Error = NoTlsError;

    async fn connect(
        self,
        _: &str,
        _: Option<&Path>,
        _: S,
    ) -> Result<NoTlsStream, NoTlsError> {
        Err(NoTlsError(()))
    }
}

/// The TLS "stream" type produced by the [`NoTls`] connector.
///
/// Since `NoTls` doesn't support TLS, this type is uninhabited.
pub enum NoTlsStream {}

impl AsyncRead for NoTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        _: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match *self {}
    }
}

impl AsyncWrite for NoTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _: &mut Context<'_>,
        _: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match *self {}
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match *self {}
    }

    fn poll_shutdown(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match *self {}
    }
}

/// The error returned by [`NoTls`].
#[derive(Debug)]
pub struct NoTlsError(());

impl fmt::Display for NoTlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no TLS implementation configured")
    }
}

impl StdError for NoTlsError {}

/// A stream that may or may not have been upgraded to TLS.
pub enum MaybeTlsStream<S, T> {
    Raw(S),
    Tls(T),
}

impl<S, T> AsyncRead for MaybeTlsStream<S, T>
where
    S: AsyncRead + Unpin,
    T: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_read(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl<S, T> AsyncWrite for MaybeTlsStream<S, T>
where
    S: AsyncWrite + Unpin,
    T: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_write(cx, buf),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_flush(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match &mut *self {
            MaybeTlsStream::Raw(s) => Pin::new(s).poll_shutdown(cx),
            MaybeTlsStream::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
