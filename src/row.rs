//! Postgres row operation.
use std::sync::Arc;

use bytes::{Buf, Bytes};

use crate::{
    Result,
    common::ByteStr,
    ext::BytesExt,
    postgres::{Oid, PgFormat, ProtocolError, backend::DataRow},
    types::{CodecError, PgValue, TypeRegistry},
};

/// One field of a `RowDescription` message.
///
/// <https://www.postgresql.org/docs/current/protocol-message-formats.html#PROTOCOL-MESSAGE-FORMATS-ROWDESCRIPTION>
#[derive(Clone, Debug)]
pub struct ColumnMetadata {
    /// The field name.
    pub name: ByteStr,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: u32,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub column_attnum: i16,
    /// The object ID of the field's data type.
    pub type_oid: Oid,
    /// The data type size (see pg_type.typlen).
    /// Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod).
    /// The meaning of the modifier is type-specific.
    pub type_mod: i32,
    /// The format code being used for the field. In a RowDescription
    /// returned from the statement variant of Describe, the format is not
    /// yet known and will always be text; actual data rows arrive in the
    /// format requested at Bind time, which this client pins to binary.
    pub format: PgFormat,
}

impl ColumnMetadata {
    pub(crate) fn decode(body: &mut Bytes) -> Result<Self, ProtocolError> {
        const MSGTYPE: u8 = b'T';

        let name = match body.get_nul_bytestr() {
            Some(Ok(name)) => name,
            Some(Err(_)) | None => return Err(ProtocolError::truncated(MSGTYPE)),
        };
        if body.remaining() < 18 {
            return Err(ProtocolError::truncated(MSGTYPE));
        }
        Ok(Self {
            name,
            table_oid: body.get_u32(),
            column_attnum: body.get_i16(),
            type_oid: body.get_u32(),
            type_size: body.get_i16(),
            type_mod: body.get_i32(),
            format: {
                let code = body.get_i16();
                PgFormat::from_code(code).ok_or(ProtocolError::UnknownFormat(code))?
            },
        })
    }
}

/// One decoded result row.
#[derive(Clone, Debug)]
pub struct Row {
    columns: Arc<[ColumnMetadata]>,
    values: Vec<PgValue>,
}

impl Row {
    /// Decode a `DataRow` against its column metadata through the registry.
    pub(crate) fn decode(
        columns: &Arc<[ColumnMetadata]>,
        registry: &TypeRegistry,
        row: DataRow,
    ) -> Result<Row> {
        if row.values.len() != columns.len() {
            return Err(CodecError::ColumnCount {
                expected: columns.len(),
                got: row.values.len(),
            }
            .into());
        }

        let mut values = Vec::with_capacity(columns.len());
        for (i, (value, column)) in row.values.into_iter().zip(columns.iter()).enumerate() {
            let value = match value {
                None => PgValue::Null,
                Some(buf) => registry
                    .recv(column.type_oid, buf)
                    .map_err(|e| crate::Error::from(e).context(format!("Error receiving column {i}")))?,
            };
            values.push(value);
        }
        Ok(Row { columns: columns.clone(), values })
    }

    #[cfg(test)]
    pub(crate) fn from_values(columns: Arc<[ColumnMetadata]>, values: Vec<PgValue>) -> Row {
        Row { columns, values }
    }

    pub fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PgValue> {
        self.values.get(index)
    }

    /// Value of the uniquely named column.
    ///
    /// Fails when the name is absent, and when it is ambiguous.
    pub fn get_named(&self, name: &str) -> Result<&PgValue> {
        let mut found = None;
        for (i, column) in self.columns.iter().enumerate() {
            if column.name == *name {
                if found.is_some() {
                    return Err(ContractError::DuplicateColumn(name.into()).into());
                }
                found = Some(i);
            }
        }
        match found {
            Some(i) => Ok(&self.values[i]),
            None => Err(ContractError::ColumnNotFound(name.into()).into()),
        }
    }

    pub fn values(&self) -> &[PgValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<PgValue> {
        self.values
    }
}

impl std::ops::Index<usize> for Row {
    type Output = PgValue;

    fn index(&self, index: usize) -> &PgValue {
        &self.values[index]
    }
}

/// A caller-side contract violation, raised synchronously from the
/// accessor.
#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("expected {expected} parameters, got {got}")]
    ParamCount {
        expected: usize,
        got: usize,
    },
    #[error("duplicate column name: {0}")]
    DuplicateColumn(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("expected exactly one row, got {0}")]
    RowCount(usize),
    #[error("expected a single column, got {0}")]
    ColumnWidth(usize),
    #[error("invalid channel name: {0}")]
    InvalidChannel(String),
}
