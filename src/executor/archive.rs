//! Minimal little-endian binary archive for executor program serialization
//! (spec.md §4.8 "Serialization": "writing class ID + per-class
//! `serialize(archive)`"; §6: "a versioned envelope (class ID + payload)").
//! Every multi-byte integer is little-endian; an optional byte string is
//! length-prefixed, with `u32::MAX` standing for `None` (mirroring
//! `CompositeKey`'s own per-field NULL convention).

use crate::engine_err;
use crate::error::{EngineResult, ErrorKind};

const NULL_LEN: u32 = u32::MAX;

#[derive(Default)]
pub struct ArchiveWriter {
    buf: Vec<u8>,
}

impl ArchiveWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.put_u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_opt_bytes(&mut self, bytes: Option<&[u8]>) {
        match bytes {
            Some(b) => self.put_bytes(b),
            None => self.put_u32(NULL_LEN),
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

pub struct ArchiveReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ArchiveReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> EngineResult<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(engine_err!(
                ErrorKind::Unexpected,
                "archive truncated: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn get_u8(&mut self) -> EngineResult<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn get_u16(&mut self) -> EngineResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn get_u32(&mut self) -> EngineResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn get_bytes(&mut self) -> EngineResult<Vec<u8>> {
        let len = self.get_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn get_opt_bytes(&mut self) -> EngineResult<Option<Vec<u8>>> {
        let mark = self.pos;
        let len = self.get_u32()?;
        if len == NULL_LEN {
            Ok(None)
        } else {
            self.pos = mark;
            Ok(Some(self.get_bytes()?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_scalars_and_optional_bytes() {
        let mut w = ArchiveWriter::new();
        w.put_u8(7);
        w.put_u16(300);
        w.put_u32(70_000);
        w.put_opt_bytes(Some(b"hi"));
        w.put_opt_bytes(None);
        let bytes = w.into_bytes();

        let mut r = ArchiveReader::new(&bytes);
        assert_eq!(r.get_u8().unwrap(), 7);
        assert_eq!(r.get_u16().unwrap(), 300);
        assert_eq!(r.get_u32().unwrap(), 70_000);
        assert_eq!(r.get_opt_bytes().unwrap(), Some(b"hi".to_vec()));
        assert_eq!(r.get_opt_bytes().unwrap(), None);
    }

    #[test]
    fn truncated_archive_errors_instead_of_panicking() {
        let mut r = ArchiveReader::new(&[1, 2]);
        assert!(r.get_u32().is_err());
    }
}
