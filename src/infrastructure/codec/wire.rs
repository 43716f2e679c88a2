//! Wire primitives.
//!
//! Every integer (lengths, counts, multiplicities, flags, tags) is a
//! zigzag LEB128 varint. Strings are a length followed by UTF-8 bytes,
//! floats are 8 big-endian bytes, and a nullable field is a presence
//! boolean followed by the field when present.

use crate::infrastructure::codec::error::{CodecError, CodecResult};

/// Decoding limits guarding against corrupt or hostile snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    pub max_depth: usize,
    pub max_collection_len: usize,
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self {
            max_depth: 256,
            max_collection_len: 1_000_000,
        }
    }
}

const MAX_VARINT_BYTES: usize = 10;

#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(u8::from(value));
    }

    pub fn write_numeric(&mut self, value: i64) {
        let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
        loop {
            let byte = (zigzag & 0x7f) as u8;
            zigzag >>= 7;
            if zigzag == 0 {
                self.buf.push(byte);
                break;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub fn write_len(&mut self, len: usize) {
        self.write_numeric(len as i64);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.extend_from_slice(&value.to_bits().to_be_bytes());
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_len(value.len());
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub fn write_bytes(&mut self, value: &[u8]) {
        self.write_len(value.len());
        self.buf.extend_from_slice(value);
    }

    pub fn write_nullable_string(&mut self, value: Option<&str>) {
        self.write_bool(value.is_some());
        if let Some(v) = value {
            self.write_string(v);
        }
    }
}

#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
    limits: CodecLimits,
    depth: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8], limits: CodecLimits) -> Self {
        Self {
            buf,
            pos: 0,
            limits,
            depth: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn limits(&self) -> CodecLimits {
        self.limits
    }

    /// Enters one nesting level; fails past the configured depth.
    pub fn descend(&mut self) -> CodecResult<()> {
        if self.depth >= self.limits.max_depth {
            return Err(CodecError::DepthExceeded(self.limits.max_depth));
        }
        self.depth += 1;
        Ok(())
    }

    pub fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn read_raw(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(CodecError::UnexpectedEof {
                offset: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        let offset = self.pos;
        match self.read_raw(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::invalid(
                "boolean",
                format!("{} at offset {}", other, offset),
            )),
        }
    }

    pub fn read_numeric(&mut self) -> CodecResult<i64> {
        let start = self.pos;
        let mut zigzag: u64 = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.read_raw(1)?[0];
            zigzag |= u64::from(byte & 0x7f) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64));
            }
        }
        Err(CodecError::VarintOverflow(start))
    }

    pub fn read_i32(&mut self, field: &'static str) -> CodecResult<i32> {
        let value = self.read_numeric()?;
        i32::try_from(value).map_err(|_| CodecError::invalid(field, value))
    }

    /// Reads a length and checks it against the collection limit.
    pub fn read_len(&mut self) -> CodecResult<usize> {
        let value = self.read_numeric()?;
        let len = u64::try_from(value).map_err(|_| CodecError::invalid("length", value))?;
        if len > self.limits.max_collection_len as u64 {
            return Err(CodecError::LengthExceeded {
                len,
                max: self.limits.max_collection_len,
            });
        }
        Ok(len as usize)
    }

    pub fn read_f64(&mut self) -> CodecResult<f64> {
        let raw = self.read_raw(8)?;
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(raw);
        Ok(f64::from_bits(u64::from_be_bytes(bytes)))
    }

    pub fn read_string(&mut self) -> CodecResult<String> {
        let len = self.read_len()?;
        let offset = self.pos;
        let raw = self.read_raw(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    pub fn read_bytes(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_len()?;
        Ok(self.read_raw(len)?.to_vec())
    }

    pub fn read_nullable_string(&mut self) -> CodecResult<Option<String>> {
        if self.read_bool()? {
            Ok(Some(self.read_string()?))
        } else {
            Ok(None)
        }
    }
}
