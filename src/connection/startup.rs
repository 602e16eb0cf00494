//! Startup and authentication.
//!
//! <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
use bytes::BytesMut;
use md5::{Digest, Md5};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    Error, Result,
    config::{Config, SslMode},
    error::AuthError,
    net::Socket,
    postgres::{BackendMessage, ProtocolError, backend::Authentication, frontend},
    tls::TlsConnect,
};

use super::{BoxStream, Shared};

/// Send the `SSLRequest` sentinel and upgrade the socket when the server
/// agrees.
///
/// The reply is a single raw byte, not a framed message: `'S'` proceeds
/// with the TLS handshake, `'N'` refuses.
pub(super) async fn negotiate_tls<T>(
    mut socket: Socket,
    config: &Config,
    tls: T,
) -> Result<BoxStream>
where
    T: TlsConnect<Socket>,
{
    match config.ssl_mode {
        SslMode::Disable => Ok(Box::new(socket)),
        SslMode::VerifyFull => {
            let mut buf = BytesMut::new();
            frontend::SslRequest.write(&mut buf);
            socket.write_all(&buf).await?;
            socket.flush().await?;

            let mut reply = [0u8; 1];
            socket.read_exact(&mut reply).await?;
            match reply[0] {
                b'S' => {
                    let stream = tls
                        .connect(&config.host, config.ssl_root_cert.as_deref(), socket)
                        .await
                        .map_err(|e| Error::from(std::io::Error::other(e.into())))?;
                    Ok(Box::new(stream))
                }
                b'N' => Err(ProtocolError::SslRefused.into()),
                found => Err(ProtocolError::SslReply { found }.into()),
            }
        }
    }
}

/// Drive the startup flow to the first `ReadyForQuery`.
///
/// The read dispatcher is already running: authentication requests and the
/// backend key arrive through the synchronous slot, while the
/// `ParameterStatus` burst is folded into the parameter map before the
/// `ReadyForQuery` that follows it can be observed here.
pub(super) async fn startup(shared: &Shared, config: &Config) -> Result<()> {
    let database = match config.dbname.as_str() {
        "" => None,
        name => Some(name),
    };

    shared
        .write_batch(|w| {
            w.send_startup(frontend::Startup {
                user: &config.user,
                database,
                params: &config.params,
            })
        })
        .await?;

    // For all authentication methods except GSSAPI, SSPI and SASL, there is
    // at most one request and one response.
    loop {
        match shared.recv_sync().await? {
            BackendMessage::Authentication(auth) => match auth {
                Authentication::Ok => break,
                Authentication::CleartextPassword => {
                    let password = require_password(config, "cleartext")?;
                    shared
                        .write_batch(|w| w.send(frontend::PasswordMessage { password }))
                        .await?;
                }
                Authentication::Md5Password { salt } => {
                    require_password(config, "md5")?;
                    let hashed = md5_password(&config.user, &config.pass, salt);
                    shared
                        .write_batch(|w| w.send(frontend::PasswordMessage { password: &hashed }))
                        .await?;
                }
                Authentication::Sasl { .. } => {
                    return Err(AuthError::Unsupported("scram-sha-256").into());
                }
            },
            BackendMessage::ErrorResponse(err) => return Err(err.0.into()),
            msg => return Err(msg.unexpected("authentication").into()),
        }
    }

    // In this phase a backend process is being started, and the frontend is
    // just an interested bystander: ParameterStatus messages (handled by the
    // dispatcher), BackendKeyData, and finally ReadyForQuery.
    loop {
        match shared.recv_sync().await? {
            BackendMessage::BackendKeyData(key) => {
                let _ = shared.key.set((key.process_id, key.secret_key));
            }
            BackendMessage::ReadyForQuery(_) => break,
            BackendMessage::ErrorResponse(err) => return Err(err.0.into()),
            msg => return Err(msg.unexpected("startup").into()),
        }
    }

    // deposit the turn token: the connection is in the clean state
    shared.lock.release_initial();

    // the binary timestamp codec and every nul-terminated string depend on
    // these two
    shared.expect_param("integer_datetimes", "on")?;
    shared.expect_param("client_encoding", "UTF8")?;

    Ok(())
}

fn require_password<'a>(config: &'a Config, method: &'static str) -> Result<&'a str> {
    match config.pass.as_str() {
        "" => Err(AuthError::PasswordRequired(method).into()),
        pass => Ok(pass),
    }
}

/// `"md5" + hex(md5(hex(md5(password || username)) || salt))`
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = md5.finalize_reset();
    md5.update(format!("{inner:x}"));
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn md5_password_shape() {
        let hashed = md5_password("user", "secret", [1, 2, 3, 4]);
        assert!(hashed.starts_with("md5"));
        assert_eq!(hashed.len(), 3 + 32);
        assert!(hashed[3..].bytes().all(|b| b.is_ascii_hexdigit()));
        // salt and identity are both folded in
        assert_ne!(hashed, md5_password("user", "secret", [4, 3, 2, 1]));
        assert_ne!(hashed, md5_password("user2", "secret", [1, 2, 3, 4]));
        assert_ne!(hashed, md5_password("user", "secret2", [1, 2, 3, 4]));
    }

    #[test]
    fn md5_inner_hash_is_hex_encoded() {
        // the outer digest covers the *hex encoding* of md5(password||user),
        // not its raw bytes
        let mut inner = Md5::new();
        inner.update(b"secretuser");
        let mut outer = Md5::new();
        outer.update(format!("{:x}", inner.finalize()));
        outer.update([1, 2, 3, 4]);
        assert_eq!(
            md5_password("user", "secret", [1, 2, 3, 4]),
            format!("md5{:x}", outer.finalize()),
        );
    }
}
