use bytes::{Buf, BufMut, Bytes};

use crate::common::ByteStr;

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `i32`,
    /// this will panic when overflow instead of wrapping.
    fn to_i32(self) -> i32;
    /// Length is `usize` in rust, while sometime postgres want `i16`,
    /// this will panic when overflow instead of wrapping.
    fn to_i16(self) -> i16;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }

    fn to_i16(self) -> i16 {
        self.try_into().expect("message size too large for protocol")
    }
}

/// Nul string operation.
pub trait StrExt {
    /// String length plus nul (1).
    fn nul_string_len(&self) -> i32;
}

impl StrExt for str {
    fn nul_string_len(&self) -> i32 {
        self.len().to_i32() + 1/* nul */
    }
}

/// Nul string operation in [`BufMut`].
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

/// Nul string operation in [`Bytes`].
pub trait BytesExt {
    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`].
    ///
    /// Returns [`None`] when no nul terminator remains in the buffer.
    fn get_nul_bytestr(&mut self) -> Option<Result<ByteStr, std::str::Utf8Error>>;
}

impl BytesExt for Bytes {
    fn get_nul_bytestr(&mut self) -> Option<Result<ByteStr, std::str::Utf8Error>> {
        let end = self.iter().position(|e| matches!(e, b'\0'))?;
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Some(ByteStr::from_utf8(me))
    }
}

