//! Big-endian primitive decoding over a seekable byte source.
//!
//! Two concrete readers are provided: [`StreamBitReader`] wraps any
//! [`Read`] implementation, [`SliceBitReader`] wraps an in-memory byte
//! slice and additionally supports true (non-monotonic) seeking. Both
//! implement the dyn-safe [`BitReader`] trait so a [`crate::GraphParser`]
//! can hand `&mut dyn BitReader` to transformer hooks without becoming
//! generic over the transformer's own stream type.

use crate::error::Error;
use byteorder::ByteOrder;
use std::io::{self, Read};

/// Byte-level decoder over a seekable source of Java Object Serialization
/// Stream bytes. All multi-byte integers are big-endian.
pub trait BitReader {
    /// Look at the next byte without consuming it. Returns `Ok(None)` at a
    /// clean end of stream, never an error for that case.
    fn peek_u8(&mut self) -> Result<Option<u8>, Error>;

    fn read_u8(&mut self) -> Result<u8, Error>;
    fn read_i8(&mut self) -> Result<i8, Error>;
    fn read_u16(&mut self) -> Result<u16, Error>;
    fn read_i16(&mut self) -> Result<i16, Error>;
    fn read_u32(&mut self) -> Result<u32, Error>;
    fn read_i32(&mut self) -> Result<i32, Error>;
    fn read_u64(&mut self) -> Result<u64, Error>;
    fn read_i64(&mut self) -> Result<i64, Error>;
    fn read_f32(&mut self) -> Result<f32, Error>;
    fn read_f64(&mut self) -> Result<f64, Error>;

    /// Read exactly `n` raw bytes.
    fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>, Error>;

    /// Read a short-form (`u16`-length-prefixed) modified-UTF-8 string.
    fn read_utf_short(&mut self) -> Result<String, Error>;

    /// Read a long-form (`u64`-length-prefixed) modified-UTF-8 string.
    fn read_utf_long(&mut self) -> Result<String, Error>;

    /// Current byte offset from the start of the stream.
    fn position(&self) -> u64;

    /// Reposition to an absolute byte offset. Streaming readers only
    /// support seeking forward (by skipping); slice readers support
    /// arbitrary repositioning.
    fn seek(&mut self, offset: u64) -> Result<(), Error>;
}

/// Decode a modified-UTF-8 byte string per the Java rules (null encoded
/// as the two-byte `0xC0 0x80` form, supplementary code points as a pair
/// of three-byte surrogate sequences). Delegates to `cesu8`, which
/// accepts exactly this encoding.
fn decode_modified_utf8(bytes: &[u8], offset: u64) -> Result<String, Error> {
    cesu8::from_java_cesu8(bytes)
        .map(|cow| cow.into_owned())
        .map_err(|_| Error::malformed(offset, None, "invalid modified UTF-8 string"))
}

fn io_err(e: io::Error, offset: u64) -> Error {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => Error::truncated(offset, None),
        _ => Error::Io(e),
    }
}

/// [`BitReader`] over any [`Read`] implementation. Keeps a single
/// look-ahead byte for [`BitReader::peek_u8`]; reads never buffer beyond
/// that one byte, so a `BLOCKDATA` payload's length prefix is always
/// read from the true current stream position.
pub struct StreamBitReader<R: Read> {
    inner: R,
    pos: u64,
    peeked: Option<u8>,
}

impl<R: Read> StreamBitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pos: 0,
            peeked: None,
        }
    }

    fn fill_peek(&mut self) -> Result<(), Error> {
        if self.peeked.is_some() {
            return Ok(());
        }
        loop {
            let mut buf = [0u8; 1];
            match self.inner.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(_) => {
                    self.peeked = Some(buf[0]);
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(io_err(e, self.pos)),
            }
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        let mut filled = 0;
        if let Some(b) = self.peeked.take() {
            if !buf.is_empty() {
                buf[0] = b;
                filled = 1;
                self.pos += 1;
            } else {
                self.peeked = Some(b);
            }
        }
        if filled < buf.len() {
            self.inner
                .read_exact(&mut buf[filled..])
                .map_err(|e| io_err(e, self.pos))?;
            self.pos += (buf.len() - filled) as u64;
        }
        Ok(())
    }
}

macro_rules! fixed_width_reads {
    ($($read_fn:ident -> $ty:ty, $width:expr, $from_be:expr;)*) => {
        $(
            fn $read_fn(&mut self) -> Result<$ty, Error> {
                let mut buf = [0u8; $width];
                self.fill(&mut buf)?;
                Ok($from_be(buf))
            }
        )*
    };
}

impl<R: Read> BitReader for StreamBitReader<R> {
    fn peek_u8(&mut self) -> Result<Option<u8>, Error> {
        self.fill_peek()?;
        Ok(self.peeked)
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        let mut buf = [0u8; 1];
        self.fill(&mut buf)?;
        Ok(buf[0])
    }

    fixed_width_reads! {
        read_i8 -> i8, 1, |b: [u8; 1]| b[0] as i8;
        read_u16 -> u16, 2, |b: [u8; 2]| byteorder::BigEndian::read_u16(&b);
        read_i16 -> i16, 2, |b: [u8; 2]| byteorder::BigEndian::read_i16(&b);
        read_u32 -> u32, 4, |b: [u8; 4]| byteorder::BigEndian::read_u32(&b);
        read_i32 -> i32, 4, |b: [u8; 4]| byteorder::BigEndian::read_i32(&b);
        read_u64 -> u64, 8, |b: [u8; 8]| byteorder::BigEndian::read_u64(&b);
        read_i64 -> i64, 8, |b: [u8; 8]| byteorder::BigEndian::read_i64(&b);
        read_f32 -> f32, 4, |b: [u8; 4]| byteorder::BigEndian::read_f32(&b);
        read_f64 -> f64, 8, |b: [u8; 8]| byteorder::BigEndian::read_f64(&b);
    }

    fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>, Error> {
        let len = usize::try_from(n)
            .map_err(|_| Error::unsupported(None, "length exceeds addressable memory"))?;
        let mut buf = vec![0u8; len];
        self.fill(&mut buf)?;
        Ok(buf)
    }

    fn read_utf_short(&mut self) -> Result<String, Error> {
        let offset = self.pos;
        let len = self.read_u16()?;
        let bytes = self.read_bytes(len as u64)?;
        decode_modified_utf8(&bytes, offset)
    }

    fn read_utf_long(&mut self) -> Result<String, Error> {
        let offset = self.pos;
        let len = self.read_u64()?;
        let bytes = self.read_bytes(len)?;
        decode_modified_utf8(&bytes, offset)
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn seek(&mut self, offset: u64) -> Result<(), Error> {
        if offset < self.pos {
            return Err(Error::unsupported(
                None,
                "cannot seek backward on a non-seekable stream",
            ));
        }
        let to_skip = offset - self.pos;
        if to_skip > 0 {
            self.read_bytes(to_skip)?;
        }
        Ok(())
    }
}

/// [`BitReader`] over an in-memory byte slice. Strings and byte arrays
/// are still copied out (the public `Value` type has no zero-copy
/// variant), but arbitrary seeking is cheap since the whole buffer is
/// addressable.
pub struct SliceBitReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.pos + n > self.data.len() {
            return Err(Error::truncated(self.pos as u64, None));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}

macro_rules! slice_fixed_width_reads {
    ($($read_fn:ident -> $ty:ty, $width:expr, $from_be:expr;)*) => {
        $(
            fn $read_fn(&mut self) -> Result<$ty, Error> {
                let slice = self.take($width)?;
                Ok($from_be(slice))
            }
        )*
    };
}

impl<'a> BitReader for SliceBitReader<'a> {
    fn peek_u8(&mut self) -> Result<Option<u8>, Error> {
        Ok(self.data.get(self.pos).copied())
    }

    fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    slice_fixed_width_reads! {
        read_i8 -> i8, 1, |s: &[u8]| s[0] as i8;
        read_u16 -> u16, 2, |s: &[u8]| byteorder::BigEndian::read_u16(s);
        read_i16 -> i16, 2, |s: &[u8]| byteorder::BigEndian::read_i16(s);
        read_u32 -> u32, 4, |s: &[u8]| byteorder::BigEndian::read_u32(s);
        read_i32 -> i32, 4, |s: &[u8]| byteorder::BigEndian::read_i32(s);
        read_u64 -> u64, 8, |s: &[u8]| byteorder::BigEndian::read_u64(s);
        read_i64 -> i64, 8, |s: &[u8]| byteorder::BigEndian::read_i64(s);
        read_f32 -> f32, 4, |s: &[u8]| byteorder::BigEndian::read_f32(s);
        read_f64 -> f64, 8, |s: &[u8]| byteorder::BigEndian::read_f64(s);
    }

    fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>, Error> {
        let len = usize::try_from(n)
            .map_err(|_| Error::unsupported(None, "length exceeds addressable memory"))?;
        Ok(self.take(len)?.to_vec())
    }

    fn read_utf_short(&mut self) -> Result<String, Error> {
        let offset = self.pos as u64;
        let len = self.read_u16()?;
        let bytes = self.take(len as usize)?;
        decode_modified_utf8(bytes, offset)
    }

    fn read_utf_long(&mut self) -> Result<String, Error> {
        let offset = self.pos as u64;
        let len = self.read_u64()?;
        let len = usize::try_from(len)
            .map_err(|_| Error::unsupported(None, "length exceeds addressable memory"))?;
        let bytes = self.take(len)?;
        decode_modified_utf8(bytes, offset)
    }

    fn position(&self) -> u64 {
        self.pos as u64
    }

    fn seek(&mut self, offset: u64) -> Result<(), Error> {
        let offset = usize::try_from(offset)
            .map_err(|_| Error::unsupported(None, "seek offset exceeds addressable memory"))?;
        if offset > self.data.len() {
            return Err(Error::unsupported(None, "seek past end of buffer"));
        }
        self.pos = offset;
        Ok(())
    }
}
