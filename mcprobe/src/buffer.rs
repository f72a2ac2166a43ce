//! In-memory send/receive buffer and the primitive codecs every protocol is built from.
//!
//! All fixed-width integers are big-endian. [`ByteBuffer::read`] never returns
//! fewer bytes than requested: a short buffer is a [`Error::Protocol`].

use std::num::TryFromIntError;

use crate::Error;

/// Maximum encoded length of a 32 bit VarInt.
pub const MAX_VARINT_LEN: usize = 5;
/// Maximum encoded length of a 64 bit VarLong.
pub const MAX_VARLONG_LEN: usize = 10;

/// Incremental decoder for the 7-bit continuation encoding.
///
/// Fed one byte at a time so the same state machine serves in-memory buffers
/// and sockets that are read byte by byte.
#[derive(Debug, Clone, Copy)]
pub(crate) struct VarIntDecoder {
    value: u64,
    position: usize,
    max_len: usize,
}

impl VarIntDecoder {
    pub(crate) const fn varint() -> Self {
        Self {
            value: 0,
            position: 0,
            max_len: MAX_VARINT_LEN,
        }
    }

    pub(crate) const fn varlong() -> Self {
        Self {
            value: 0,
            position: 0,
            max_len: MAX_VARLONG_LEN,
        }
    }

    /// Returns the accumulated bit pattern once a byte without the continuation bit arrives.
    pub(crate) fn push(&mut self, byte: u8) -> Result<Option<u64>, Error> {
        self.value |= u64::from(byte & 0x7F) << (7 * self.position);
        self.position += 1;
        if byte & 0x80 == 0 {
            return Ok(Some(self.value));
        }
        if self.position >= self.max_len {
            return Err(Error::Protocol(format!(
                "received a variable-length integer longer than {} bytes",
                self.max_len
            )));
        }
        Ok(None)
    }

    /// Truncates to 32 bits and reinterprets as two's complement.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) const fn as_i32(bits: u64) -> i32 {
        bits as u32 as i32
    }

    #[allow(clippy::cast_possible_wrap)]
    pub(crate) const fn as_i64(bits: u64) -> i64 {
        bits as i64
    }
}

fn push_var(out: &mut Vec<u8>, mut remaining: u64) {
    loop {
        if remaining & !0x7F == 0 {
            #[allow(clippy::cast_possible_truncation)]
            out.push(remaining as u8);
            return;
        }
        #[allow(clippy::cast_possible_truncation)]
        out.push((remaining as u8 & 0x7F) | 0x80);
        remaining >>= 7;
    }
}

pub(crate) fn decode_latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}

macro_rules! fixed_width {
    ($($read:ident, $write:ident => $ty:ty;)*) => {
        $(
            #[doc = concat!("Reads a big-endian `", stringify!($ty), "`.")]
            ///
            /// # Errors
            /// If not enough bytes remain.
            pub fn $read(&mut self) -> Result<$ty, Error> {
                const LEN: usize = std::mem::size_of::<$ty>();
                let mut bytes = [0; LEN];
                bytes.copy_from_slice(self.read(LEN)?);
                Ok(<$ty>::from_be_bytes(bytes))
            }

            #[doc = concat!("Writes a big-endian `", stringify!($ty), "`.")]
            pub fn $write(&mut self, value: $ty) {
                self.outgoing.extend_from_slice(&value.to_be_bytes());
            }
        )*
    };
}

/// A pair of byte queues: bytes waiting to be sent and bytes received but not yet decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    outgoing: Vec<u8>,
    incoming: Vec<u8>,
    cursor: usize,
}

impl From<Vec<u8>> for ByteBuffer {
    /// Creates a buffer whose incoming side holds `data`.
    fn from(data: Vec<u8>) -> Self {
        Self {
            outgoing: Vec::new(),
            incoming: data,
            cursor: 0,
        }
    }
}

impl From<&[u8]> for ByteBuffer {
    fn from(data: &[u8]) -> Self {
        Self::from(data.to_vec())
    }
}

impl ByteBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `data` to the incoming side.
    pub fn receive(&mut self, data: &[u8]) {
        self.compact();
        self.incoming.extend_from_slice(data);
    }

    /// Number of received bytes not yet read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.incoming.len() - self.cursor
    }

    /// The received bytes not yet read, without consuming them.
    #[must_use]
    pub fn unread(&self) -> &[u8] {
        &self.incoming[self.cursor..]
    }

    /// Returns and clears everything written so far.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.outgoing)
    }

    fn compact(&mut self) {
        if self.cursor > 0 {
            self.incoming.drain(..self.cursor);
            self.cursor = 0;
        }
    }

    /// Appends raw bytes to the outgoing side.
    pub fn write(&mut self, data: &[u8]) {
        self.outgoing.extend_from_slice(data);
    }

    /// Removes exactly `len` bytes from the front of the incoming side.
    ///
    /// # Errors
    /// If fewer than `len` bytes remain; nothing is consumed in that case.
    pub fn read(&mut self, len: usize) -> Result<&[u8], Error> {
        if self.remaining() < len {
            return Err(Error::Protocol(format!(
                "not enough data to read: {} < {len}",
                self.remaining()
            )));
        }
        let start = self.cursor;
        self.cursor += len;
        Ok(&self.incoming[start..self.cursor])
    }

    /// Discards `len` bytes of the incoming side.
    ///
    /// # Errors
    /// If fewer than `len` bytes remain.
    pub fn skip(&mut self, len: usize) -> Result<(), Error> {
        self.read(len).map(|_| ())
    }

    /// # Errors
    /// If the buffer is empty.
    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read(1)?[0])
    }

    pub fn write_u8(&mut self, value: u8) {
        self.outgoing.push(value);
    }

    /// # Errors
    /// If the buffer is empty.
    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8()? != 0)
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    fixed_width! {
        read_short, write_short => i16;
        read_ushort, write_ushort => u16;
        read_int, write_int => i32;
        read_uint, write_uint => u32;
        read_long, write_long => i64;
        read_ulong, write_ulong => u64;
    }

    #[allow(clippy::cast_sign_loss)]
    pub fn write_varint(&mut self, value: i32) {
        push_var(&mut self.outgoing, u64::from(value as u32));
    }

    /// Writes a VarInt from a wider integer, checking the range first.
    ///
    /// # Errors
    /// [`Error::InvalidVarInt`] if `value` doesn't fit in an `i32`; nothing is written then.
    pub fn try_write_varint<T>(&mut self, value: T) -> Result<(), Error>
    where
        T: TryInto<i32, Error = TryFromIntError>,
    {
        self.write_varint(value.try_into()?);
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    pub fn write_varlong(&mut self, value: i64) {
        push_var(&mut self.outgoing, value as u64);
    }

    fn read_var(&mut self, mut decoder: VarIntDecoder) -> Result<u64, Error> {
        loop {
            if let Some(bits) = decoder.push(self.read_u8()?)? {
                return Ok(bits);
            }
        }
    }

    /// # Errors
    /// If the VarInt is longer than five bytes or the buffer ends inside it.
    pub fn read_varint(&mut self) -> Result<i32, Error> {
        self.read_var(VarIntDecoder::varint()).map(VarIntDecoder::as_i32)
    }

    /// # Errors
    /// If the VarLong is longer than ten bytes or the buffer ends inside it.
    pub fn read_varlong(&mut self) -> Result<i64, Error> {
        self.read_var(VarIntDecoder::varlong())
            .map(VarIntDecoder::as_i64)
    }

    /// Writes a VarInt byte length followed by the UTF-8 bytes of `value`.
    ///
    /// # Errors
    /// If the string is longer than `i32::MAX` bytes.
    pub fn write_utf(&mut self, value: &str) -> Result<(), Error> {
        self.try_write_varint(value.len())?;
        self.write(value.as_bytes());
        Ok(())
    }

    /// # Errors
    /// If the length is negative, the data is short, or the bytes aren't UTF-8.
    pub fn read_utf(&mut self) -> Result<String, Error> {
        let len = usize::try_from(self.read_varint()?)?;
        let bytes = self.read(len)?;
        std::str::from_utf8(bytes)
            .map(ToOwned::to_owned)
            .map_err(|e| Error::Protocol(format!("invalid UTF-8 string: {e}")))
    }

    /// Writes `value` as Latin-1 followed by a null byte.
    ///
    /// # Errors
    /// If `value` contains characters outside Latin-1.
    pub fn write_ascii(&mut self, value: &str) -> Result<(), Error> {
        let encoded = value
            .chars()
            .map(|c| u8::try_from(u32::from(c)))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| Error::Protocol(format!("{value:?} cannot be encoded as Latin-1")))?;
        self.write(&encoded);
        self.write_u8(0);
        Ok(())
    }

    /// Reads a null-terminated Latin-1 string; the terminator is consumed.
    ///
    /// # Errors
    /// If no null byte remains.
    pub fn read_ascii(&mut self) -> Result<String, Error> {
        let Some(end) = self.unread().iter().position(|&b| b == 0) else {
            return Err(Error::Protocol("unterminated string".to_owned()));
        };
        let value = decode_latin1(self.read(end)?);
        self.skip(1)?;
        Ok(value)
    }

    /// Flushes `buffer` and writes its bytes prefixed with their VarInt length.
    ///
    /// # Errors
    /// If the flushed data is longer than `i32::MAX` bytes.
    pub fn write_buffer(&mut self, buffer: &mut Self) -> Result<(), Error> {
        let data = buffer.flush();
        self.try_write_varint(data.len())?;
        self.write(&data);
        Ok(())
    }

    /// Reads a VarInt length and moves that many bytes into a fresh buffer.
    ///
    /// # Errors
    /// If the length is negative or more than the remaining data.
    pub fn read_buffer(&mut self) -> Result<Self, Error> {
        let len = usize::try_from(self.read_varint()?)?;
        Ok(Self::from(self.read(len)?))
    }
}
