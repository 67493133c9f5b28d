//! Binary Codec - Program Wire Format
//!
//! Outbound instructions are an 8-byte tag followed by fixed-width
//! positional fields; inbound accounts are an opaque 8-byte discriminator
//! followed by the record at fixed offsets. Events read back from
//! transaction logs use the same field encoding. Every integer is unsigned
//! little-endian. Nothing in this layer is a float.
//!
//! Decoding never reads past the end of a buffer: every read goes through
//! [`ByteReader`], which fails with a typed error instead.

pub mod account;
pub mod event;
pub mod instruction;

pub use account::{
    decode_market, decode_markets, decode_position, decode_positions, encode_market,
    encode_position, BatchDecoded, MARKET_DISCRIMINATOR, POSITION_DISCRIMINATOR,
};
pub use event::{parse_logs, VaporEvent};
pub use instruction::{tags, VaporInstruction, MAX_NAME_LEN, SYSTEM_PROGRAM_ID};

use solana_pubkey::Pubkey;

use super::error::EngineError;

/// Bounds-checked little-endian cursor over a byte slice.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
    fail: fn(String) -> EngineError,
}

impl<'a> ByteReader<'a> {
    /// Cursor whose short reads fail with `fail`, labelled with `what`.
    pub(crate) const fn new(buf: &'a [u8], what: &'static str, fail: fn(String) -> EngineError) -> Self {
        Self { buf, pos: 0, what, fail }
    }

    pub(crate) const fn position(&self) -> usize {
        self.pos
    }

    pub(crate) const fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn error(&self, msg: impl Into<String>) -> EngineError {
        (self.fail)(format!("{}: {}", self.what, msg.into()))
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], EngineError> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.buf.len());
        match end {
            Some(end) => {
                let slice = &self.buf[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(self.error(format!(
                "need {n} bytes at offset {}, buffer is {} bytes",
                self.pos,
                self.buf.len()
            ))),
        }
    }

    pub(crate) fn array<const N: usize>(&mut self) -> Result<[u8; N], EngineError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, EngineError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u32(&mut self) -> Result<u32, EngineError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, EngineError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub(crate) fn pubkey(&mut self) -> Result<Pubkey, EngineError> {
        Ok(Pubkey::new_from_array(self.array()?))
    }

    /// u32 length prefix followed by that many UTF-8 bytes.
    pub(crate) fn string(&mut self) -> Result<String, EngineError> {
        let len = self.u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| self.error(format!("invalid utf-8: {e}")))
    }
}

/// Length-prefixed string, the way the program serializes `String`.
pub(crate) fn put_string(out: &mut Vec<u8>, s: &str) {
    // Callers bound the name to MAX_NAME_LEN before encoding.
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}
