//! Server-reported errors and notices.
//!
//! `ErrorResponse` and `NoticeResponse` share a body layout: a stream of
//! `(field-type byte, nul terminated string)` pairs terminated by a zero
//! byte. Fields can appear in any order; unrecognized field types are
//! silently ignored, since more might be added in future.
use std::fmt;

use bytes::{Buf, Bytes};

use crate::{common::ByteStr, ext::BytesExt};

use super::ProtocolError;

/// Message severity, as reported in the `V` (or, for pre-9.6 servers, the
/// localized `S`) field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    /// Errors only.
    Error,
    /// The session is terminated.
    Fatal,
    /// All sessions are terminated.
    Panic,
    /// Notices only.
    Warning,
    Notice,
    Debug,
    Info,
    Log,
}

impl Severity {
    fn parse(value: &str) -> Option<Severity> {
        Some(match value {
            "ERROR" => Self::Error,
            "FATAL" => Self::Fatal,
            "PANIC" => Self::Panic,
            "WARNING" => Self::Warning,
            "NOTICE" => Self::Notice,
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "LOG" => Self::Log,
            _ => return None,
        })
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "ERROR",
            Self::Fatal => "FATAL",
            Self::Panic => "PANIC",
            Self::Warning => "WARNING",
            Self::Notice => "NOTICE",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Log => "LOG",
        })
    }
}

/// An error or notice reported by the server.
///
/// Carries the diagnostic fields of the `ErrorResponse`/`NoticeResponse`
/// verbatim. `FATAL` and `PANIC` severities additionally terminate the
/// connection.
#[derive(Clone)]
pub struct PgError {
    severity: Severity,
    severity_localized: ByteStr,
    code: ByteStr,
    message: ByteStr,
    detail: Option<ByteStr>,
    hint: Option<ByteStr>,
    position: Option<u32>,
    internal_position: Option<u32>,
    internal_query: Option<ByteStr>,
    where_: Option<ByteStr>,
    schema: Option<ByteStr>,
    table: Option<ByteStr>,
    column: Option<ByteStr>,
    data_type: Option<ByteStr>,
    constraint: Option<ByteStr>,
    file: Option<ByteStr>,
    line: Option<u32>,
    routine: Option<ByteStr>,
}

impl PgError {
    pub(crate) fn parse(mut body: Bytes) -> Result<PgError, ProtocolError> {
        let mut severity = None;
        let mut severity_localized = ByteStr::default();
        let mut code = ByteStr::default();
        let mut message = ByteStr::default();
        let mut detail = None;
        let mut hint = None;
        let mut position = None;
        let mut internal_position = None;
        let mut internal_query = None;
        let mut where_ = None;
        let mut schema = None;
        let mut table = None;
        let mut column = None;
        let mut data_type = None;
        let mut constraint = None;
        let mut file = None;
        let mut line = None;
        let mut routine = None;

        loop {
            if !body.has_remaining() {
                return Err(ProtocolError::truncated(b'E'));
            }
            let tag = body.get_u8();
            if tag == 0 {
                break;
            }
            let value = match body.get_nul_bytestr() {
                Some(Ok(value)) => value,
                Some(Err(_)) | None => return Err(ProtocolError::truncated(b'E')),
            };
            match tag {
                b'V' => {
                    severity = Some(
                        Severity::parse(&value)
                            .ok_or_else(|| ProtocolError::InvalidSeverity(value.to_string()))?,
                    )
                }
                b'S' => severity_localized = value,
                b'C' => code = value,
                b'M' => message = value,
                b'D' => detail = Some(value),
                b'H' => hint = Some(value),
                b'P' => position = value.parse().ok(),
                b'p' => internal_position = value.parse().ok(),
                b'q' => internal_query = Some(value),
                b'W' => where_ = Some(value),
                b's' => schema = Some(value),
                b't' => table = Some(value),
                b'c' => column = Some(value),
                b'd' => data_type = Some(value),
                b'n' => constraint = Some(value),
                b'F' => file = Some(value),
                b'L' => line = value.parse().ok(),
                b'R' => routine = Some(value),
                // frontends should silently ignore fields of unrecognized type
                _ => {}
            }
        }

        // pre-9.6 servers only send the localized S field
        let severity = match severity {
            Some(severity) => severity,
            None => Severity::parse(&severity_localized)
                .ok_or_else(|| ProtocolError::InvalidSeverity(severity_localized.to_string()))?,
        };

        Ok(PgError {
            severity,
            severity_localized,
            code,
            message,
            detail,
            hint,
            position,
            internal_position,
            internal_query,
            where_,
            schema,
            table,
            column,
            data_type,
            constraint,
            file,
            line,
            routine,
        })
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    /// The severity in the session's configured language, when the server
    /// sent one.
    pub fn severity_localized(&self) -> &str {
        &self.severity_localized
    }

    /// `true` for `FATAL` and `PANIC`, which terminate the connection.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity, Severity::Fatal | Severity::Panic)
    }

    /// The SQLSTATE code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The primary human-readable error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Cursor position in the original query string, counted in characters
    /// from 1.
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    pub fn internal_position(&self) -> Option<u32> {
        self.internal_position
    }

    pub fn internal_query(&self) -> Option<&str> {
        self.internal_query.as_deref()
    }

    /// Context in which the error occurred (call stack traceback).
    pub fn where_(&self) -> Option<&str> {
        self.where_.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// Source file of the reporting server code.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<u32> {
        self.line
    }

    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }
}

impl std::error::Error for PgError { }

impl fmt::Display for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.message)
    }
}

impl fmt::Debug for PgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgError")
            .field("severity", &self.severity)
            .field("code", &self.code)
            .field("message", &self.message)
            .field("detail", &self.detail)
            .field("hint", &self.hint)
            .field("position", &self.position)
            .finish_non_exhaustive()
    }
}
