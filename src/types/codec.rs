//! Binary value codecs.
//!
//! Every codec speaks postgres' binary wire format and is indexed by the
//! `typreceive`/`typsend` function name of its type, the way the server
//! itself dispatches. Scalars are pure functions over byte buffers; the
//! array and record codecs are type-aware and recurse through the
//! [`TypeRegistry`][super::TypeRegistry].
use bytes::{Buf, BufMut, Bytes, BytesMut};
use time::{Date, Duration, Month, PrimitiveDateTime};

use crate::postgres::Oid;

use super::{PgValue, TypeKind, TypeRegistry, TypeRow};

/// Microseconds are counted from 2000-01-01T00:00:00Z, 946684800 seconds
/// after the unix epoch.
fn pg_epoch() -> PrimitiveDateTime {
    Date::from_calendar_date(2000, Month::January, 1)
        .expect("statically valid date")
        .midnight()
}

/// An error raised synchronously from value encode/decode.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Unknown type: oid {0}")]
    UnknownType(Oid),
    #[error("Unsupported type: {name} (oid {oid}, typsend {func})")]
    UnsupportedType {
        name: String,
        oid: Oid,
        func: String,
    },
    #[error("Expected {expected}, got {got}")]
    Unexpected {
        expected: &'static str,
        got: &'static str,
    },
    #[error("Multidimensional arrays must have sub-arrays with matching dimensions.")]
    DimensionMismatch,
    #[error("array lower bound must be 1, got {0}")]
    LowerBound(i32),
    #[error("jsonb version {0} not supported")]
    JsonbVersion(u8),
    #[error("{0} is not a composite type")]
    NotComposite(String),
    #[error("record has {got} fields, type has {expected} attributes")]
    RecordLength {
        expected: usize,
        got: usize,
    },
    #[error("Record field {index}: {source}")]
    RecordField {
        index: usize,
        #[source]
        source: Box<CodecError>,
    },
    #[error("row contained {got} values for {expected} columns")]
    ColumnCount {
        expected: usize,
        got: usize,
    },
    #[error("malformed {0} value")]
    Malformed(&'static str),
    #[error("invalid UTF-8 in {0} value")]
    Utf8(&'static str),
    #[error("invalid JSON value: {0}")]
    Json(#[from] serde_json::Error),
    #[error("timestamp out of range")]
    TimestampRange,
}

fn expected(expected: &'static str, got: &PgValue) -> CodecError {
    CodecError::Unexpected { expected, got: got.kind() }
}

fn text(name: &'static str, buf: Bytes) -> Result<PgValue, CodecError> {
    match String::from_utf8(buf.into()) {
        Ok(s) => Ok(PgValue::Text(s)),
        Err(_) => Err(CodecError::Utf8(name)),
    }
}

macro_rules! fixed {
    ($buf:ident, $name:literal, $n:literal) => {
        if $buf.remaining() != $n {
            return Err(CodecError::Malformed($name));
        }
    };
}

/// Decode a scalar by `typreceive` name.
///
/// Returns `Ok(None)` when the name has no codec, so the caller can report
/// the type as unsupported with its catalogue identity.
pub(crate) fn recv_scalar(name: &str, mut buf: Bytes) -> Result<Option<PgValue>, CodecError> {
    let value = match name {
        "textrecv" | "varcharrecv" | "bpcharrecv" | "namerecv" | "enum_recv" => {
            text("text", buf)?
        }
        "boolrecv" => {
            fixed!(buf, "bool", 1);
            match buf.get_u8() {
                0 => PgValue::Bool(false),
                1 => PgValue::Bool(true),
                _ => return Err(CodecError::Malformed("bool")),
            }
        }
        "int2recv" => {
            fixed!(buf, "int2", 2);
            PgValue::I16(buf.get_i16())
        }
        "int4recv" | "oidrecv" => {
            fixed!(buf, "int4", 4);
            PgValue::I32(buf.get_i32())
        }
        "int8recv" => {
            fixed!(buf, "int8", 8);
            PgValue::I64(buf.get_i64())
        }
        "float4recv" => {
            fixed!(buf, "float4", 4);
            PgValue::F32(buf.get_f32())
        }
        "float8recv" => {
            fixed!(buf, "float8", 8);
            PgValue::F64(buf.get_f64())
        }
        "bytearecv" => PgValue::Bytes(buf),
        "timestamp_recv" => {
            fixed!(buf, "timestamp", 8);
            let micros = buf.get_i64();
            match pg_epoch().checked_add(Duration::microseconds(micros)) {
                Some(ts) => PgValue::Timestamp(ts),
                None => return Err(CodecError::TimestampRange),
            }
        }
        "timestamptz_recv" => {
            fixed!(buf, "timestamptz", 8);
            let micros = buf.get_i64();
            match pg_epoch().assume_utc().checked_add(Duration::microseconds(micros)) {
                Some(ts) => PgValue::TimestampTz(ts),
                None => return Err(CodecError::TimestampRange),
            }
        }
        "json_recv" => PgValue::Json(serde_json::from_slice(&buf)?),
        "jsonb_recv" => {
            if !buf.has_remaining() {
                return Err(CodecError::Malformed("jsonb"));
            }
            let version = buf.get_u8();
            if version != 1 {
                return Err(CodecError::JsonbVersion(version));
            }
            PgValue::Json(serde_json::from_slice(&buf)?)
        }
        "void_recv" => {
            fixed!(buf, "void", 0);
            PgValue::Null
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

/// Encode a scalar by `typsend` name.
///
/// Returns `Ok(false)` when the name has no codec.
pub(crate) fn send_scalar(
    name: &str,
    value: &PgValue,
    out: &mut BytesMut,
) -> Result<bool, CodecError> {
    match name {
        "textsend" | "varcharsend" | "bpcharsend" | "namesend" | "enum_send" => match value {
            PgValue::Text(s) => out.put_slice(s.as_bytes()),
            v => return Err(expected("string", v)),
        },
        "boolsend" => match value {
            PgValue::Bool(b) => out.put_u8(*b as u8),
            v => return Err(expected("boolean", v)),
        },
        "int2send" => match value.as_i64() {
            Some(v) => match i16::try_from(v) {
                Ok(v) => out.put_i16(v),
                Err(_) => return Err(CodecError::Malformed("int2")),
            },
            None => return Err(expected("number", value)),
        },
        "int4send" | "oidsend" => match value.as_i64() {
            Some(v) => match i32::try_from(v) {
                Ok(v) => out.put_i32(v),
                Err(_) => return Err(CodecError::Malformed("int4")),
            },
            None => return Err(expected("number", value)),
        },
        "int8send" => match value.as_i64() {
            Some(v) => out.put_i64(v),
            None => return Err(expected("number", value)),
        },
        // the wire format mandates big-endian floats; `put_f32`/`put_f64`
        // write network byte order
        "float4send" => match value {
            PgValue::F32(v) => out.put_f32(*v),
            v => match v.as_i64() {
                Some(i) => out.put_f32(i as f32),
                None => return Err(expected("number", v)),
            },
        },
        "float8send" => match value.as_f64() {
            Some(v) => out.put_f64(v),
            None => match value.as_i64() {
                Some(i) => out.put_f64(i as f64),
                None => return Err(expected("number", value)),
            },
        },
        "byteasend" => match value {
            PgValue::Bytes(b) => out.put_slice(b),
            v => return Err(expected("bytes", v)),
        },
        "timestamp_send" => match value {
            PgValue::Timestamp(ts) => put_micros(out, *ts - pg_epoch())?,
            v => return Err(expected("timestamp", v)),
        },
        "timestamptz_send" => match value {
            PgValue::TimestampTz(ts) => put_micros(out, *ts - pg_epoch().assume_utc())?,
            // a naive timestamp bound to a timestamptz parameter is taken
            // as UTC
            PgValue::Timestamp(ts) => put_micros(out, ts.assume_utc() - pg_epoch().assume_utc())?,
            v => return Err(expected("timestamp", v)),
        },
        "json_send" => match value {
            PgValue::Json(v) => out.put_slice(&serde_json::to_vec(v)?),
            PgValue::Text(s) => out.put_slice(s.as_bytes()),
            v => return Err(expected("json", v)),
        },
        "jsonb_send" => {
            out.put_u8(1);
            match value {
                PgValue::Json(v) => out.put_slice(&serde_json::to_vec(v)?),
                PgValue::Text(s) => out.put_slice(s.as_bytes()),
                v => return Err(expected("json", v)),
            }
        }
        "void_send" => match value {
            PgValue::Null => {}
            v => return Err(expected("null", v)),
        },
        _ => return Ok(false),
    }
    Ok(true)
}

fn put_micros(out: &mut BytesMut, elapsed: Duration) -> Result<(), CodecError> {
    match i64::try_from(elapsed.whole_microseconds()) {
        Ok(micros) => {
            out.put_i64(micros);
            Ok(())
        }
        Err(_) => Err(CodecError::TimestampRange),
    }
}

// ===== Arrays =====

/// Compute array dimensions from a nested value.
///
/// A scalar has dimensions `[]`, an empty sequence `[0]`, and a non-empty
/// sequence prepends its length to the dimensions of its elements, which
/// must all agree.
pub(crate) fn infer_dims(value: &PgValue) -> Result<Vec<i32>, CodecError> {
    let PgValue::Array(items) = value else {
        return Ok(Vec::new());
    };
    let Some(first) = items.first() else {
        return Ok(vec![0]);
    };

    let inner = infer_dims(first)?;
    for item in &items[1..] {
        if infer_dims(item)? != inner {
            return Err(CodecError::DimensionMismatch);
        }
    }

    let mut dims = Vec::with_capacity(inner.len() + 1);
    dims.push(items.len() as i32);
    dims.extend(inner);
    Ok(dims)
}

/// `array_send`: `ndim | flags | elem_oid | (dim_len, lower_bound)* | elements`.
pub(crate) fn array_send(
    registry: &TypeRegistry,
    elem_oid: Oid,
    value: &PgValue,
    out: &mut BytesMut,
) -> Result<(), CodecError> {
    let PgValue::Array(_) = value else {
        return Err(expected("array", value));
    };
    let dims = infer_dims(value)?;

    out.put_i32(dims.len() as i32);
    out.put_i32(0); // flags: no null bitmap
    out.put_u32(elem_oid);
    for dim in &dims {
        out.put_i32(*dim);
        out.put_i32(1); // lower bound
    }

    array_send_elems(registry, elem_oid, value, dims.len(), out)
}

fn array_send_elems(
    registry: &TypeRegistry,
    elem_oid: Oid,
    value: &PgValue,
    depth: usize,
    out: &mut BytesMut,
) -> Result<(), CodecError> {
    let PgValue::Array(items) = value else {
        // leaf element, length-prefixed
        return put_element(registry, elem_oid, value, out);
    };
    if depth == 0 {
        return put_element(registry, elem_oid, value, out);
    }
    for item in items {
        array_send_elems(registry, elem_oid, item, depth - 1, out)?;
    }
    Ok(())
}

fn put_element(
    registry: &TypeRegistry,
    elem_oid: Oid,
    value: &PgValue,
    out: &mut BytesMut,
) -> Result<(), CodecError> {
    if value.is_null() {
        out.put_i32(-1);
        return Ok(());
    }
    let mut elem = BytesMut::new();
    registry.send(elem_oid, value, &mut elem)?;
    out.put_i32(elem.len() as i32);
    out.put_slice(&elem);
    Ok(())
}

/// `array_recv`: inverse of [`array_send`]; produces nesting whose depth
/// equals `ndim`, and an empty sequence for the zero-dimensional array.
pub(crate) fn array_recv(
    registry: &TypeRegistry,
    elem_oid: Oid,
    mut buf: Bytes,
) -> Result<PgValue, CodecError> {
    if buf.remaining() < 12 {
        return Err(CodecError::Malformed("array"));
    }
    let ndim = buf.get_i32();
    let flags = buf.get_i32();
    let wire_elem = buf.get_u32();
    if !matches!(flags, 0 | 1) {
        return Err(CodecError::Malformed("array"));
    }
    if ndim < 0 {
        return Err(CodecError::Malformed("array"));
    }
    // bootstrap rows for anonymous arrays carry no element oid
    let elem_oid = match elem_oid {
        0 => wire_elem,
        oid => oid,
    };

    let mut dims = Vec::with_capacity(ndim as usize);
    for _ in 0..ndim {
        if buf.remaining() < 8 {
            return Err(CodecError::Malformed("array"));
        }
        let len = buf.get_i32();
        let lower_bound = buf.get_i32();
        if lower_bound != 1 {
            return Err(CodecError::LowerBound(lower_bound));
        }
        if len < 0 {
            return Err(CodecError::Malformed("array"));
        }
        dims.push(len as usize);
    }

    // the zero-dimensional array has no dimensions and no elements; an
    // empty product would claim one
    let total = match dims.is_empty() {
        true => 0,
        false => dims.iter().product::<usize>(),
    };
    let mut flat = Vec::with_capacity(total);
    for _ in 0..total {
        if buf.remaining() < 4 {
            return Err(CodecError::Malformed("array"));
        }
        let len = buf.get_i32();
        if len < 0 {
            flat.push(PgValue::Null);
            continue;
        }
        if buf.remaining() < len as usize {
            return Err(CodecError::Malformed("array"));
        }
        flat.push(registry.recv(elem_oid, buf.split_to(len as usize))?);
    }
    if buf.has_remaining() {
        return Err(CodecError::Malformed("array"));
    }

    let mut iter = flat.into_iter();
    Ok(nest(&dims, &mut iter))
}

fn nest(dims: &[usize], flat: &mut std::vec::IntoIter<PgValue>) -> PgValue {
    match dims {
        [] => PgValue::Array(Vec::new()),
        [len] => PgValue::Array(flat.by_ref().take(*len).collect()),
        [len, rest @ ..] => PgValue::Array((0..*len).map(|_| nest(rest, &mut *flat)).collect()),
    }
}

// ===== Composite records =====

/// `record_send`: `nelems | (elem_oid, length, bytes)*`, fields in
/// attribute order.
pub(crate) fn record_send(
    registry: &TypeRegistry,
    row: &TypeRow,
    value: &PgValue,
    out: &mut BytesMut,
) -> Result<(), CodecError> {
    if row.kind != TypeKind::Composite {
        return Err(CodecError::NotComposite(row.name.clone()));
    }
    let PgValue::Record(fields) = value else {
        return Err(expected("record", value));
    };
    if fields.len() != row.attrs.len() {
        return Err(CodecError::RecordLength { expected: row.attrs.len(), got: fields.len() });
    }

    out.put_i32(fields.len() as i32);
    for (index, (field, attr)) in fields.iter().zip(&row.attrs).enumerate() {
        out.put_u32(*attr);
        if field.is_null() {
            out.put_i32(-1);
            continue;
        }
        let mut elem = BytesMut::new();
        registry
            .send(*attr, field, &mut elem)
            .map_err(|source| CodecError::RecordField { index, source: source.into() })?;
        out.put_i32(elem.len() as i32);
        out.put_slice(&elem);
    }
    Ok(())
}

/// `record_recv`: inverse of [`record_send`]; the inline element oid must
/// match the declared attribute oid.
pub(crate) fn record_recv(
    registry: &TypeRegistry,
    row: &TypeRow,
    mut buf: Bytes,
) -> Result<PgValue, CodecError> {
    if buf.remaining() < 4 {
        return Err(CodecError::Malformed("record"));
    }
    let nelems = buf.get_i32();
    if nelems < 0 || nelems as usize != row.attrs.len() {
        return Err(CodecError::RecordLength {
            expected: row.attrs.len(),
            got: nelems.max(0) as usize,
        });
    }

    let mut fields = Vec::with_capacity(nelems as usize);
    for (index, attr) in row.attrs.iter().enumerate() {
        if buf.remaining() < 8 {
            return Err(CodecError::Malformed("record"));
        }
        let oid = buf.get_u32();
        if oid != *attr {
            return Err(CodecError::RecordField {
                index,
                source: Box::new(CodecError::Malformed("attribute oid")),
            });
        }
        let len = buf.get_i32();
        if len < 0 {
            fields.push(PgValue::Null);
            continue;
        }
        if buf.remaining() < len as usize {
            return Err(CodecError::Malformed("record"));
        }
        let field = registry
            .recv(oid, buf.split_to(len as usize))
            .map_err(|source| CodecError::RecordField { index, source: source.into() })?;
        fields.push(field);
    }
    if buf.has_remaining() {
        return Err(CodecError::Malformed("record"));
    }
    Ok(PgValue::Record(fields))
}
