
/// Postgres data transmission format.
///
/// For specific information, see its variant documentation.
///
/// In this library, all format uses [`Binary`][b].
///
/// <https://www.postgresql.org/docs/current/protocol-overview.html#PROTOCOL-FORMAT-CODES>
///
/// [b]: PgFormat::Binary
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PgFormat {
    /// Text has format code zero.
    ///
    /// In the text transmitted representation, there is no trailing null character;
    /// the frontend must add one to received values if it wants to process them as C strings.
    /// (The text format does not allow embedded nulls, by the way.)
    Text,
    /// Binary has format code one.
    ///
    /// Binary representations for integers use network byte order (most significant byte first).
    /// For other data types consult the documentation or source code to learn about the binary representation.
    /// Keep in mind that binary representations for complex data types might change across server versions.
    Binary,
}

impl PgFormat {
    /// Return format code for current format.
    pub fn format_code(&self) -> i16 {
        match self {
            PgFormat::Text => 0,
            PgFormat::Binary => 1,
        }
    }

    /// Parse a wire format code.
    pub fn from_code(code: i16) -> Option<PgFormat> {
        match code {
            0 => Some(PgFormat::Text),
            1 => Some(PgFormat::Binary),
            _ => None,
        }
    }
}
