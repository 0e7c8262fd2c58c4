//! Primitive (de)serialization over a plain byte buffer.
//!
//! All integers are little-endian. Sizes are `u32`. A reader that would need to consume
//! more bytes than remain in its input fails with [`ShapeError::InsufficientCapacity`]
//! rather than panicking.

use crate::error::ShapeError;

/// A cursor over an encoded message being written.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn write_bytes(&mut self, v: &[u8]) {
        self.write_u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    pub fn write_string(&mut self, v: &str) {
        self.write_bytes(v.as_bytes());
    }

    /// Writes a nullable byte region: a one-byte presence tag followed by the payload,
    /// or nothing when the value is absent.
    pub fn write_option_bytes(&mut self, v: Option<&[u8]>) {
        match v {
            Some(v) => {
                self.write_u8(1);
                self.write_bytes(v);
            }
            None => self.write_u8(0),
        }
    }

    /// Appends an object reference. Object values themselves are never serialized, only
    /// the identifier of the registry slot that stands in for them.
    pub fn write_object_id(&mut self, id: u64) {
        self.write_u64(id);
    }
}

impl Default for Writer {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor over an encoded message being read.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ShapeError> {
        if self.remaining() < n {
            return Err(ShapeError::InsufficientCapacity);
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_u8(&mut self) -> Result<u8, ShapeError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, ShapeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64(&mut self) -> Result<u64, ShapeError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64, ShapeError> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>, ShapeError> {
        let len = self.read_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn read_string(&mut self) -> Result<String, ShapeError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|_| ShapeError::UnsupportedFormat)
    }

    pub fn read_option_bytes(&mut self) -> Result<Option<Vec<u8>>, ShapeError> {
        match self.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.read_bytes()?)),
            _ => Err(ShapeError::UnsupportedFormat),
        }
    }

    pub fn read_object_id(&mut self) -> Result<u64, ShapeError> {
        self.read_u64()
    }

    /// Reads a homogeneous sequence: a `u32` element count followed by `count`
    /// applications of `f`.
    pub fn read_seq<T>(
        &mut self,
        mut f: impl FnMut(&mut Self) -> Result<T, ShapeError>,
    ) -> Result<Vec<T>, ShapeError> {
        let len = self.read_u32()? as usize;
        let mut out = Vec::with_capacity(len.min(4096));
        for _ in 0..len {
            out.push(f(self)?);
        }
        Ok(out)
    }
}

pub fn write_seq<T>(w: &mut Writer, items: &[T], mut f: impl FnMut(&mut Writer, &T)) {
    w.write_u32(items.len() as u32);
    for item in items {
        f(w, item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_primitives() {
        let mut w = Writer::new();
        w.write_u8(7);
        w.write_u32(0xdead_beef);
        w.write_u64(0x1122_3344_5566_7788);
        w.write_string("hello");
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 7);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64().unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(r.read_string().unwrap(), "hello");
    }

    #[test]
    fn truncated_input_is_insufficient_capacity() {
        let mut r = Reader::new(&[0, 1]);
        assert!(matches!(
            r.read_u32(),
            Err(ShapeError::InsufficientCapacity)
        ));
    }

    #[test]
    fn option_round_trip() {
        let mut w = Writer::new();
        w.write_option_bytes(Some(b"payload"));
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_option_bytes().unwrap(), Some(b"payload".to_vec()));

        let mut w = Writer::new();
        w.write_option_bytes(None);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_option_bytes().unwrap(), None);
    }

    #[test]
    fn seq_round_trip() {
        let mut w = Writer::new();
        write_seq(&mut w, &[1u32, 2, 3], |w, v| w.write_u32(*v));
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        let items = r.read_seq(|r| r.read_u32()).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }
}
