use std::io;

/// An either `TcpStream` or `UnixStream`, which implement
/// `AsyncRead` and `AsyncWrite` transparently.
pub struct Socket {
    kind: Kind,
}

enum Kind {
    Tcp(tokio::net::TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
}

impl Socket {
    pub async fn connect_tcp(host: &str, port: u16) -> io::Result<Socket> {
        let socket = tokio::net::TcpStream::connect((host, port)).await?;
        socket.set_nodelay(true)?;
        Ok(Socket { kind: Kind::Tcp(socket) })
    }

    pub async fn connect_unix(path: &str) -> io::Result<Socket> {
        #[cfg(unix)]
        {
            let socket = tokio::net::UnixStream::connect(path).await?;
            Ok(Socket { kind: Kind::Unix(socket) })
        }

        #[cfg(not(unix))]
        {
            let _ = path;
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix domain sockets are not available on this platform",
            ))
        }
    }
}

impl tokio::io::AsyncRead for Socket {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_read(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for Socket {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::result::Result<usize, std::io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_write(cx, buf),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_flush(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), std::io::Error>> {
        use std::pin::Pin;
        match &mut self.kind {
            Kind::Tcp(t) => Pin::new(t).poll_shutdown(cx),
            #[cfg(unix)]
            Kind::Unix(u) => Pin::new(u).poll_shutdown(cx),
        }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Kind::Tcp(ref tcp) => std::fmt::Debug::fmt(tcp, f),
            #[cfg(unix)]
            Kind::Unix(ref unix) => std::fmt::Debug::fmt(&unix, f),
        }
    }
}
