//! Runtime-loaded type catalogue and value codecs.
//!
//! The registry is bootstrapped with just enough of `pg_type` to execute the
//! catalogue loader query, then refreshed from the server after startup (and
//! again on [`Connection::reload_types`][crate::Connection::reload_types],
//! e.g. after creating new enum or composite types).
mod codec;
mod value;

use std::{collections::HashMap, sync::Arc};

use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::postgres::Oid;

pub use codec::CodecError;
pub use value::PgValue;

/// `pg_type.typtype` category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Base,
    Composite,
    Domain,
    Enum,
    Pseudo,
    Range,
    Multirange,
}

impl TypeKind {
    pub(crate) fn from_code(code: &str) -> TypeKind {
        match code {
            "c" => Self::Composite,
            "d" => Self::Domain,
            "e" => Self::Enum,
            "p" => Self::Pseudo,
            "r" => Self::Range,
            "m" => Self::Multirange,
            _ => Self::Base,
        }
    }
}

/// One row of the type catalogue.
#[derive(Clone, Debug)]
pub struct TypeRow {
    pub oid: Oid,
    pub name: String,
    pub kind: TypeKind,
    /// Element type for arrays, zero otherwise.
    pub elem: Oid,
    /// Attribute types for composites, in attribute order.
    pub attrs: Vec<Oid>,
    /// `typreceive` function name, the binary decoder index.
    pub recv: String,
    /// `typsend` function name, the binary encoder index.
    pub send: String,
}

impl TypeRow {
    fn base(oid: Oid, name: &str, elem: Oid, recv: &str, send: &str) -> TypeRow {
        TypeRow {
            oid,
            name: name.into(),
            kind: TypeKind::Base,
            elem,
            attrs: Vec::new(),
            recv: recv.into(),
            send: send.into(),
        }
    }
}

/// Loads `pg_type` with the attribute types of composites attached.
///
/// Every column is cast to one of the bootstrap types so the query is
/// decodable before the full catalogue exists.
pub(crate) const TYPE_LOAD_SQL: &str = "\
SELECT oid::int4, typname::text, typtype::text, typelem::int4, \
typreceive::text, typsend::text, \
array(SELECT atttypid::int4 FROM pg_attribute \
WHERE attrelid = typrelid AND NOT attisdropped AND attnum > 0 \
ORDER BY attnum) AS attrtypids \
FROM pg_type WHERE typisdefined";

/// In-memory catalogue of `pg_type` rows, mapping a type oid to its binary
/// codec.
///
/// Cheap to clone; clones share the catalogue.
#[derive(Clone, Debug)]
pub struct TypeRegistry {
    types: Arc<RwLock<HashMap<Oid, Arc<TypeRow>>>>,
}

impl TypeRegistry {
    /// The minimal catalogue: int4, text, their one-dimensional arrays, and
    /// the oid/name aliases the loader query's casts rely on.
    pub fn bootstrap() -> TypeRegistry {
        let rows = [
            TypeRow::base(19, "name", 0, "namerecv", "namesend"),
            TypeRow::base(23, "int4", 0, "int4recv", "int4send"),
            TypeRow::base(25, "text", 0, "textrecv", "textsend"),
            TypeRow::base(26, "oid", 0, "oidrecv", "oidsend"),
            TypeRow::base(1007, "_int4", 23, "array_recv", "array_send"),
            TypeRow::base(1009, "_text", 25, "array_recv", "array_send"),
        ];
        let types = rows.into_iter().map(|row| (row.oid, Arc::new(row))).collect();
        TypeRegistry { types: Arc::new(RwLock::new(types)) }
    }

    /// Replace the whole catalogue with freshly loaded rows.
    pub(crate) fn replace(&self, rows: impl IntoIterator<Item = TypeRow>) {
        let types = rows.into_iter().map(|row| (row.oid, Arc::new(row))).collect();
        *self.types.write() = types;
    }

    /// Register a single row, for tests and out-of-band extensions.
    pub fn insert(&self, row: TypeRow) {
        self.types.write().insert(row.oid, Arc::new(row));
    }

    pub fn lookup(&self, oid: Oid) -> Result<Arc<TypeRow>, CodecError> {
        self.types
            .read()
            .get(&oid)
            .cloned()
            .ok_or(CodecError::UnknownType(oid))
    }

    /// Decode a binary wire value of type `oid`.
    pub fn recv(&self, oid: Oid, buf: Bytes) -> Result<PgValue, CodecError> {
        let row = self.lookup(oid)?;
        self.recv_as(&row, &row.recv, buf)
    }

    fn recv_as(&self, row: &TypeRow, name: &str, buf: Bytes) -> Result<PgValue, CodecError> {
        match name {
            "array_recv" => codec::array_recv(self, row.elem, buf),
            "record_recv" => codec::record_recv(self, row, buf),
            // domains decode with their base type's codec; pg_type keeps
            // the base's typsend while typreceive is domain_recv, so the
            // receive function is derived from the send name
            "domain_recv" => match row.send.strip_suffix("send") {
                Some(prefix) if prefix != "domain_" => {
                    self.recv_as(row, &format!("{prefix}recv"), buf)
                }
                _ => Err(self.unsupported(row)),
            },
            name => match codec::recv_scalar(name, buf)? {
                Some(value) => Ok(value),
                None => Err(self.unsupported(row)),
            },
        }
    }

    /// Encode `value` as the binary wire form of type `oid`.
    pub fn send(&self, oid: Oid, value: &PgValue, out: &mut BytesMut) -> Result<(), CodecError> {
        let row = self.lookup(oid)?;
        match row.send.as_str() {
            "array_send" => codec::array_send(self, row.elem, value, out),
            "record_send" => codec::record_send(self, &row, value, out),
            name => match codec::send_scalar(name, value, out)? {
                true => Ok(()),
                false => Err(self.unsupported(&row)),
            },
        }
    }

    fn unsupported(&self, row: &TypeRow) -> CodecError {
        CodecError::UnsupportedType {
            name: row.name.clone(),
            oid: row.oid,
            func: row.send.clone(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::bootstrap()
    }

    fn send(reg: &TypeRegistry, oid: Oid, value: &PgValue) -> Result<Bytes, CodecError> {
        let mut out = BytesMut::new();
        reg.send(oid, value, &mut out)?;
        Ok(out.freeze())
    }

    #[test]
    fn unknown_oid() {
        let err = registry().recv(9999, Bytes::new()).unwrap_err();
        assert_eq!(err.to_string(), "Unknown type: oid 9999");
    }

    #[test]
    fn unsupported_codec() {
        let reg = registry();
        reg.insert(TypeRow::base(790, "money", 0, "cash_recv", "cash_send"));
        let err = reg.recv(790, Bytes::new()).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported type: money (oid 790, typsend cash_send)");
    }

    #[test]
    fn int4_array_round_trip() {
        let reg = registry();
        let value = PgValue::Array(vec![
            PgValue::Array(vec![1.into(), PgValue::Null]),
            PgValue::Array(vec![3.into(), 4.into()]),
        ]);
        let wire = send(&reg, 1007, &value).unwrap();
        assert_eq!(reg.recv(1007, wire).unwrap(), value);
    }

    #[test]
    fn empty_array_round_trip() {
        let reg = registry();
        let wire = send(&reg, 1009, &PgValue::Array(vec![])).unwrap();
        // a [0]-dimension encode comes back as one empty dimension
        assert_eq!(reg.recv(1009, wire).unwrap(), PgValue::Array(vec![]));
    }

    #[test]
    fn three_dimensional_array() {
        let reg = registry();
        let value = PgValue::Array(vec![PgValue::Array(vec![PgValue::Array(vec![
            PgValue::Text("a".into()),
            PgValue::Null,
        ])])]);
        let wire = send(&reg, 1009, &value).unwrap();
        assert_eq!(reg.recv(1009, wire).unwrap(), value);
    }

    #[test]
    fn array_dimension_mismatch_message() {
        let reg = registry();
        let value = PgValue::Array(vec![
            PgValue::Array(vec![1.into()]),
            PgValue::Array(vec![1.into(), 2.into()]),
        ]);
        let err = send(&reg, 1007, &value).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Multidimensional arrays must have sub-arrays with matching dimensions."
        );
    }

    #[test]
    fn record_round_trip() {
        let reg = registry();
        reg.insert(TypeRow {
            oid: 16400,
            name: "pair".into(),
            kind: TypeKind::Composite,
            elem: 0,
            attrs: vec![23, 25],
            recv: "record_recv".into(),
            send: "record_send".into(),
        });

        let value = PgValue::Record(vec![7.into(), PgValue::Text("seven".into())]);
        let wire = send(&reg, 16400, &value).unwrap();
        assert_eq!(reg.recv(16400, wire).unwrap(), value);

        let null_field = PgValue::Record(vec![PgValue::Null, PgValue::Text("x".into())]);
        let wire = send(&reg, 16400, &null_field).unwrap();
        assert_eq!(reg.recv(16400, wire).unwrap(), null_field);
    }

    #[test]
    fn record_field_error_annotated() {
        let reg = registry();
        reg.insert(TypeRow {
            oid: 16400,
            name: "pair".into(),
            kind: TypeKind::Composite,
            elem: 0,
            attrs: vec![23, 25],
            recv: "record_recv".into(),
            send: "record_send".into(),
        });

        let bad = PgValue::Record(vec![PgValue::Text("not a number".into()), PgValue::Null]);
        let err = send(&reg, 16400, &bad).unwrap_err();
        assert_eq!(err.to_string(), "Record field 0: Expected number, got string");
    }

    #[test]
    fn record_send_requires_composite_kind() {
        let reg = registry();
        reg.insert(TypeRow::base(16500, "fake", 0, "record_recv", "record_send"));
        let err = send(&reg, 16500, &PgValue::Record(vec![])).unwrap_err();
        assert!(matches!(err, CodecError::NotComposite(_)));
    }

    #[test]
    fn enum_codec() {
        let reg = registry();
        reg.insert(TypeRow {
            oid: 16600,
            name: "mood".into(),
            kind: TypeKind::Enum,
            elem: 0,
            attrs: Vec::new(),
            recv: "enum_recv".into(),
            send: "enum_send".into(),
        });
        let wire = send(&reg, 16600, &PgValue::Text("happy".into())).unwrap();
        assert_eq!(reg.recv(16600, wire).unwrap(), PgValue::Text("happy".into()));
    }

    #[test]
    fn domain_recv_uses_base_send_name() {
        let reg = registry();
        reg.insert(TypeRow {
            oid: 16700,
            name: "posint".into(),
            kind: TypeKind::Domain,
            elem: 0,
            attrs: Vec::new(),
            recv: "domain_recv".into(),
            send: "int4send".into(),
        });
        let wire = send(&reg, 16700, &PgValue::I32(5)).unwrap();
        assert_eq!(reg.recv(16700, wire).unwrap(), PgValue::I32(5));
    }

    #[test]
    fn bpchar_alias() {
        let reg = registry();
        reg.insert(TypeRow::base(1042, "bpchar", 0, "bpcharrecv", "bpcharsend"));
        let wire = send(&reg, 1042, &PgValue::Text("shrt ".into())).unwrap();
        assert_eq!(reg.recv(1042, wire).unwrap(), PgValue::Text("shrt ".into()));
    }
}
