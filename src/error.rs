//! `postwire` error types.
use std::{fmt, io};

use crate::{
    config::ParseError,
    postgres::{PgError, ProtocolError},
    row::ContractError,
    types::CodecError,
};

/// A specialized [`Result`] type for `postwire` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from the `postwire` library.
pub struct Error {
    context: String,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Server reported error, if this error originates from an `ErrorResponse`.
    pub fn as_db_error(&self) -> Option<&PgError> {
        match &self.kind {
            ErrorKind::Db(e) => Some(e),
            _ => None,
        }
    }

    /// Returns `true` if the connection was already closed when the
    /// operation ran.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    pub(crate) fn closed() -> Error {
        ErrorKind::Closed.into()
    }

    /// Prefix the error message, identifying the failed operation.
    pub(crate) fn context(mut self, context: impl Into<String>) -> Error {
        self.context = context.into();
        self
    }
}

/// All possible error kind from the `postwire` library.
pub enum ErrorKind {
    /// Malformed connection url.
    Config(ParseError),
    /// Violation of the wire protocol, fatal to the connection.
    Protocol(ProtocolError),
    Io(io::Error),
    /// Server reported `ErrorResponse`.
    Db(PgError),
    /// Value encode/decode failure.
    Codec(CodecError),
    /// Authentication could not proceed.
    Auth(AuthError),
    /// Caller-side misuse, e.g. wrong parameter count or an ambiguous
    /// column projection.
    Contract(ContractError),
    /// The connection terminated while the operation was pending, or the
    /// operation started after termination.
    Closed,
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                Self { context: String::new(), kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<io::Error>e => ErrorKind::Io(e));
from!(<PgError>e => ErrorKind::Db(e));
from!(<CodecError>e => ErrorKind::Codec(e));
from!(<AuthError>e => ErrorKind::Auth(e));
from!(<ContractError>e => ErrorKind::Contract(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }
        fmt::Display::fmt(&self.kind, f)
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
            Self::Db(e) => e.fmt(f),
            Self::Codec(e) => e.fmt(f),
            Self::Auth(e) => e.fmt(f),
            Self::Contract(e) => e.fmt(f),
            Self::Closed => f.write_str("Connection closed before query finished."),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// Error during the authentication exchange.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("password is required for {0} authentication")]
    PasswordRequired(&'static str),
    #[error("unsupported authentication method: {0}")]
    Unsupported(&'static str),
}
