use super::backend::BackendMessage;

fn name(msgtype: &u8) -> &'static str {
    BackendMessage::message_name(*msgtype)
}

/// An error when translating buffer from postgres.
///
/// Protocol errors are fatal to the connection: once framing or message
/// order cannot be trusted, no further traffic can be interpreted.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown message type 0x{found:02x}")]
    Unknown {
        found: u8,
    },
    #[error("unexpected {} during {phase}", name(.found))]
    Unexpected {
        found: u8,
        phase: &'static str,
    },
    #[error("unknown authentication request {auth}")]
    UnknownAuth {
        auth: u32,
    },
    #[error("{} body ended prematurely", name(.msgtype))]
    Truncated {
        msgtype: u8,
    },
    #[error("{} carried {remaining} undecoded trailing bytes", name(.msgtype))]
    Trailing {
        msgtype: u8,
        remaining: usize,
    },
    #[error("invalid error severity: {0}")]
    InvalidSeverity(String),
    #[error("unknown format code {0}")]
    UnknownFormat(i16),
    #[error("Server does not allow SSL connections")]
    SslRefused,
    #[error("unexpected SSL negotiation reply 0x{found:02x}")]
    SslReply {
        found: u8,
    },
    #[error("unexpected server parameter {name}: expected {expected}, got {got}")]
    Parameter {
        name: &'static str,
        expected: &'static str,
        got: String,
    },
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unknown { found }
    }

    pub(crate) fn unexpected(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected { found, phase }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn truncated(msgtype: u8) -> ProtocolError {
        Self::Truncated { msgtype }
    }
}
