//! Save state stream format.
//!
//! ```text
//! magic    4 bytes  "GBAS"
//! version  u32 LE
//! length   u32 LE   payload byte count
//! payload  length bytes
//! ```
//!
//! Each component writes its fields in a fixed order with `write_to` and
//! reads them back with `read_from`. All integers are little-endian.
//! Nothing is applied to a live machine until the whole payload has parsed.

use crate::error::GbaError;

/// Magic bytes for save state identification.
pub const STATE_MAGIC: &[u8; 4] = b"GBAS";

/// Current save state format version.
pub const STATE_VERSION: u32 = 1;

const HEADER_LEN: usize = 12;

/// Why a payload failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    Truncated { needed: usize, available: usize },
    Invalid(&'static str),
}

impl From<SnapshotError> for GbaError {
    fn from(err: SnapshotError) -> Self {
        match err {
            SnapshotError::Truncated { needed, available } => {
                GbaError::SaveStateTruncated { needed, available }
            }
            SnapshotError::Invalid(what) => GbaError::SaveStateCorrupt(what.to_string()),
        }
    }
}

/// A component that can be written to and restored from a state stream.
pub trait Snapshot {
    fn write_to(&self, w: &mut StateWriter);
    fn read_from(&mut self, r: &mut StateReader<'_>) -> Result<(), SnapshotError>;
}

#[derive(Debug, Default)]
pub struct StateWriter {
    buf: Vec<u8>,
}

impl StateWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Fixed-size block; the reader must know the length.
    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    /// Length-prefixed block.
    pub fn vec(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[derive(Debug)]
pub struct StateReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> StateReader<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let available = self.data.len() - self.pos;
        if n > available {
            return Err(SnapshotError::Truncated {
                needed: self.pos + n,
                available: self.data.len(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], SnapshotError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, SnapshotError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SnapshotError::Invalid("boolean out of range")),
        }
    }

    pub fn u16(&mut self) -> Result<u16, SnapshotError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, SnapshotError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, SnapshotError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, SnapshotError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn bytes_into(&mut self, out: &mut [u8]) -> Result<(), SnapshotError> {
        out.copy_from_slice(self.take(out.len())?);
        Ok(())
    }

    pub fn vec(&mut self) -> Result<Vec<u8>, SnapshotError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    #[cfg(test)]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
}

/// Wrap a payload in the versioned header.
#[must_use]
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(STATE_MAGIC);
    out.extend_from_slice(&STATE_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validate the header and declared length, returning the payload.
/// Bytes after the declared payload are ignored.
pub fn decode(data: &[u8]) -> Result<&[u8], GbaError> {
    if data.len() < HEADER_LEN {
        // Too short to even carry a version: a non-state or a cut-off stream.
        if data.len() >= 4 && &data[0..4] != STATE_MAGIC {
            return Err(GbaError::SaveStateVersionMismatch { found: 0, expected: STATE_VERSION });
        }
        return Err(GbaError::SaveStateTruncated { needed: HEADER_LEN, available: data.len() });
    }
    if &data[0..4] != STATE_MAGIC {
        return Err(GbaError::SaveStateVersionMismatch { found: 0, expected: STATE_VERSION });
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != STATE_VERSION {
        return Err(GbaError::SaveStateVersionMismatch { found: version, expected: STATE_VERSION });
    }
    let length = u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize;
    let available = data.len() - HEADER_LEN;
    if length > available {
        return Err(GbaError::SaveStateTruncated { needed: HEADER_LEN + length, available: data.len() });
    }
    Ok(&data[HEADER_LEN..HEADER_LEN + length])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wraps_payload() {
        let bytes = encode(&[1, 2, 3]);
        assert_eq!(&bytes[0..4], b"GBAS");
        assert_eq!(decode(&bytes).expect("valid"), &[1, 2, 3]);
    }

    #[test]
    fn wrong_version_rejected() {
        let mut bytes = encode(&[0; 8]);
        bytes[4] = 99;
        assert!(matches!(
            decode(&bytes),
            Err(GbaError::SaveStateVersionMismatch { found: 99, .. })
        ));
    }

    #[test]
    fn wrong_magic_rejected() {
        let mut bytes = encode(&[0; 8]);
        bytes[0] = b'X';
        assert!(matches!(decode(&bytes), Err(GbaError::SaveStateVersionMismatch { .. })));
    }

    #[test]
    fn short_payload_rejected() {
        let bytes = encode(&[0; 64]);
        let cut = &bytes[..bytes.len() - 1];
        assert!(matches!(decode(cut), Err(GbaError::SaveStateTruncated { .. })));
        assert!(matches!(decode(&bytes[..6]), Err(GbaError::SaveStateTruncated { .. })));
    }

    #[test]
    fn reader_reports_truncation() {
        let mut w = StateWriter::new();
        w.u16(0xBEEF);
        let data = w.into_inner();
        let mut r = StateReader::new(&data);
        assert_eq!(r.u16(), Ok(0xBEEF));
        assert_eq!(r.u32(), Err(SnapshotError::Truncated { needed: 6, available: 2 }));
    }

    #[test]
    fn reader_rejects_bad_bool() {
        let mut r = StateReader::new(&[2]);
        assert_eq!(r.bool(), Err(SnapshotError::Invalid("boolean out of range")));
    }

    #[test]
    fn vec_is_length_prefixed() {
        let mut w = StateWriter::new();
        w.vec(&[9, 8, 7]);
        w.i32(-5);
        let data = w.into_inner();
        let mut r = StateReader::new(&data);
        assert_eq!(r.vec().expect("vec"), vec![9, 8, 7]);
        assert_eq!(r.i32(), Ok(-5));
        assert_eq!(r.remaining(), 0);
    }
}
