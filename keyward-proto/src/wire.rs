//! Field-level primitives: big-endian integers and length-prefixed strings.

use crate::ProtoError;

/// Sequential reader over a message body.
///
/// Never reads past the end of the buffer; a short field yields
/// [`ProtoError::Truncated`] and leaves the reader unusable for further
/// progress, which is fine — decode failures abort the whole message.
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// The unread tail of the buffer.
    pub fn rest(&self) -> &'a [u8] {
        self.buf
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtoError> {
        if self.buf.len() < n {
            return Err(ProtoError::Truncated);
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtoError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtoError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtoError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtoError> {
        let b = self.take(8)?;
        let mut out = [0u8; 8];
        out.copy_from_slice(b);
        Ok(u64::from_be_bytes(out))
    }

    /// Read one length-prefixed byte string, borrowing from the buffer.
    pub fn read_string(&mut self) -> Result<&'a [u8], ProtoError> {
        let len = self.read_u32()? as usize;
        self.take(len)
    }

    /// Read a length-prefixed byte string that must be valid UTF-8.
    pub fn read_utf8(&mut self, field: &'static str) -> Result<String, ProtoError> {
        let raw = self.read_string()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| ProtoError::BadUtf8(field))
    }

    /// Require that every byte of the body has been consumed.
    pub fn finish(self) -> Result<(), ProtoError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtoError::TrailingBytes)
        }
    }
}

/// Appending writer for a message body.
#[derive(Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_bool(&mut self, v: bool) -> &mut Self {
        self.write_u8(u8::from(v))
    }

    pub fn write_u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_be_bytes());
        self
    }

    pub fn write_string(&mut self, s: &[u8]) -> &mut Self {
        self.write_u32(s.len() as u32);
        self.buf.extend_from_slice(s);
        self
    }

    pub fn write_utf8(&mut self, s: &str) -> &mut Self {
        self.write_string(s.as_bytes())
    }

    /// Append raw bytes with no length prefix.
    pub fn write_raw(&mut self, s: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(s);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
