use bytes::Bytes;
use time::{OffsetDateTime, PrimitiveDateTime};

/// A decoded postgres value.
///
/// Every supported binary wire representation maps onto one of these
/// variants; arrays and composite records nest recursively.
#[derive(Clone, Debug, PartialEq)]
pub enum PgValue {
    /// SQL NULL, and the `void` pseudo-type.
    Null,
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    /// `text`, `varchar`, `char(n)`, `name` and enum labels.
    Text(String),
    /// `bytea`.
    Bytes(Bytes),
    /// `timestamp without time zone`.
    Timestamp(PrimitiveDateTime),
    /// `timestamp with time zone`.
    TimestampTz(OffsetDateTime),
    /// `json` and `jsonb`.
    Json(serde_json::Value),
    /// One- or multi-dimensional array; nesting depth equals the array
    /// dimensionality.
    Array(Vec<PgValue>),
    /// Composite record, fields in attribute order.
    Record(Vec<PgValue>),
}

impl PgValue {
    /// Value category, as used in codec error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::I16(_) | Self::I32(_) | Self::I64(_) | Self::F32(_) | Self::F64(_) => "number",
            Self::Text(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Timestamp(_) | Self::TimestampTz(_) => "timestamp",
            Self::Json(_) => "json",
            Self::Array(_) => "array",
            Self::Record(_) => "record",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Self::I16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Self::I16(v) => Some(*v as i32),
            Self::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Any integer variant, widened.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I16(v) => Some(*v as i64),
            Self::I32(v) => Some(*v as i64),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Self::F32(v) => Some(*v),
            _ => None,
        }
    }

    /// Any float variant, widened.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F32(v) => Some(*v as f64),
            Self::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<PrimitiveDateTime> {
        match self {
            Self::Timestamp(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_timestamptz(&self) -> Option<OffsetDateTime> {
        match self {
            Self::TimestampTz(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[PgValue]> {
        match self {
            Self::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&[PgValue]> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }
}

impl From<()> for PgValue {
    fn from(_: ()) -> Self {
        Self::Null
    }
}

impl From<bool> for PgValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i16> for PgValue {
    fn from(value: i16) -> Self {
        Self::I16(value)
    }
}

impl From<i32> for PgValue {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<i64> for PgValue {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl From<f32> for PgValue {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<f64> for PgValue {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<&str> for PgValue {
    fn from(value: &str) -> Self {
        Self::Text(value.into())
    }
}

impl From<String> for PgValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&[u8]> for PgValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for PgValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<Bytes> for PgValue {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<PrimitiveDateTime> for PgValue {
    fn from(value: PrimitiveDateTime) -> Self {
        Self::Timestamp(value)
    }
}

impl From<OffsetDateTime> for PgValue {
    fn from(value: OffsetDateTime) -> Self {
        Self::TimestampTz(value)
    }
}

impl From<serde_json::Value> for PgValue {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

impl From<Vec<PgValue>> for PgValue {
    fn from(value: Vec<PgValue>) -> Self {
        Self::Array(value)
    }
}

impl<T: Into<PgValue>> From<Option<T>> for PgValue {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Self::Null,
        }
    }
}
