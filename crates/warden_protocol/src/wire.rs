//! Little-endian wire primitives.
//!
//! Every scalar on the wire is little-endian and packed with no padding.
//! Booleans are one byte (any nonzero value reads as `true`). Strings carry
//! a `u16` byte-length prefix followed by raw UTF-8 with no terminator.
//! Timestamps are `u64` milliseconds since a configurable epoch. Lists carry
//! a `u16` element count followed by the serialized elements.

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

/// Milliseconds between the Unix epoch and the default wire epoch,
/// 2015-01-01T00:00:00 UTC.
pub const DEFAULT_EPOCH_MILLIS: i64 = 1_420_070_400_000;

/// Returns the default wire epoch (2015-01-01T00:00:00 UTC).
pub fn default_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(DEFAULT_EPOCH_MILLIS)
        .expect("default epoch constant is a valid timestamp")
}

/// Errors surfaced by the wire layer.
///
/// `ReadPastEnd` is the distinguished "short payload" condition: dispatch
/// maps it to the `INVALID_PARAMETERS` response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WireError {
    /// The reader ran out of bytes mid-value.
    #[error("read past the end of the stream")]
    ReadPastEnd,

    /// A string's bytes were not valid UTF-8.
    #[error("string bytes are not valid UTF-8")]
    InvalidUtf8,

    /// A string was too long for its `u16` length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    /// A list had too many elements for its `u16` count prefix.
    #[error("list of {0} elements exceeds the u16 count prefix")]
    ListTooLong(usize),

    /// A timestamp predates the wire epoch and cannot be encoded.
    #[error("timestamp predates the wire epoch")]
    TimestampBeforeEpoch,

    /// A timestamp delta does not fit the supported range.
    #[error("timestamp is out of the representable range")]
    TimestampOutOfRange,
}

macro_rules! write_scalar_fn {
    ($name:ident, $ty:ty) => {
        /// Writes the value little-endian.
        pub fn $name(&mut self, value: $ty) {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    };
}

macro_rules! read_scalar_fn {
    ($name:ident, $ty:ty, $len:expr) => {
        /// Reads the value little-endian.
        pub fn $name(&mut self) -> Result<$ty, WireError> {
            let bytes = self.take($len)?;
            let mut raw = [0u8; $len];
            raw.copy_from_slice(bytes);
            Ok(<$ty>::from_le_bytes(raw))
        }
    };
}

/// Growable little-endian writer backing one outgoing frame body.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether nothing has been written yet.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the writer, returning the accumulated bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Borrows the accumulated bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    write_scalar_fn!(write_u8, u8);
    write_scalar_fn!(write_i8, i8);
    write_scalar_fn!(write_u16, u16);
    write_scalar_fn!(write_i16, i16);
    write_scalar_fn!(write_u32, u32);
    write_scalar_fn!(write_i32, i32);
    write_scalar_fn!(write_u64, u64);
    write_scalar_fn!(write_i64, i64);
    write_scalar_fn!(write_f32, f32);
    write_scalar_fn!(write_f64, f64);

    /// Writes a boolean as a single `0`/`1` byte.
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(value as u8);
    }

    /// Writes raw bytes with no prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Writes a `u16` byte-length prefix followed by the string's UTF-8.
    pub fn write_str(&mut self, value: &str) -> Result<(), WireError> {
        let len =
            u16::try_from(value.len()).map_err(|_| WireError::StringTooLong(value.len()))?;
        self.write_u16(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    /// Writes a `u16` list-element count.
    pub fn write_count(&mut self, count: usize) -> Result<(), WireError> {
        let count = u16::try_from(count).map_err(|_| WireError::ListTooLong(count))?;
        self.write_u16(count);
        Ok(())
    }

    /// Writes a timestamp as `u64` milliseconds since `epoch`.
    pub fn write_timestamp(
        &mut self,
        value: DateTime<Utc>,
        epoch: DateTime<Utc>,
    ) -> Result<(), WireError> {
        let delta = value.signed_duration_since(epoch).num_milliseconds();
        if delta < 0 {
            return Err(WireError::TimestampBeforeEpoch);
        }
        self.write_u64(delta as u64);
        Ok(())
    }
}

/// Cursor over a borrowed frame body.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::ReadPastEnd);
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    read_scalar_fn!(read_u8, u8, 1);
    read_scalar_fn!(read_i8, i8, 1);
    read_scalar_fn!(read_u16, u16, 2);
    read_scalar_fn!(read_i16, i16, 2);
    read_scalar_fn!(read_u32, u32, 4);
    read_scalar_fn!(read_i32, i32, 4);
    read_scalar_fn!(read_u64, u64, 8);
    read_scalar_fn!(read_i64, i64, 8);
    read_scalar_fn!(read_f32, f32, 4);
    read_scalar_fn!(read_f64, f64, 8);

    /// Reads a boolean byte; any nonzero value is `true`.
    pub fn read_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.read_u8()? != 0)
    }

    /// Reads a `u16`-prefixed UTF-8 string.
    pub fn read_str(&mut self) -> Result<String, WireError> {
        let len = self.read_u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    /// Reads a `u16` list-element count.
    pub fn read_count(&mut self) -> Result<usize, WireError> {
        Ok(self.read_u16()? as usize)
    }

    /// Reads a timestamp encoded as `u64` milliseconds since `epoch`.
    pub fn read_timestamp(&mut self, epoch: DateTime<Utc>) -> Result<DateTime<Utc>, WireError> {
        let millis = self.read_u64()?;
        let millis = i64::try_from(millis).map_err(|_| WireError::TimestampOutOfRange)?;
        let delta =
            TimeDelta::try_milliseconds(millis).ok_or(WireError::TimestampOutOfRange)?;
        epoch
            .checked_add_signed(delta)
            .ok_or(WireError::TimestampOutOfRange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip_little_endian() {
        let mut writer = WireWriter::new();
        writer.write_u16(0x1234);
        writer.write_i32(-7);
        writer.write_u64(u64::MAX);
        writer.write_f64(2.5);
        writer.write_bool(true);

        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..2], &[0x34, 0x12]);

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_u16(), Ok(0x1234));
        assert_eq!(reader.read_i32(), Ok(-7));
        assert_eq!(reader.read_u64(), Ok(u64::MAX));
        assert_eq!(reader.read_f64(), Ok(2.5));
        assert_eq!(reader.read_bool(), Ok(true));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn strings_are_length_prefixed_utf8() {
        let mut writer = WireWriter::new();
        writer.write_str("Hi").expect("short string fits");
        assert_eq!(writer.as_bytes(), &[0x02, 0x00, b'H', b'i']);

        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_str().expect("valid string"), "Hi");
    }

    #[test]
    fn short_reads_report_read_past_end() {
        let mut reader = WireReader::new(&[0x01]);
        assert_eq!(reader.read_u32(), Err(WireError::ReadPastEnd));

        // A truncated string body is also a short read.
        let mut reader = WireReader::new(&[0x05, 0x00, b'a']);
        assert_eq!(reader.read_str(), Err(WireError::ReadPastEnd));
    }

    #[test]
    fn timestamps_are_millis_since_epoch() {
        let epoch = default_epoch();
        let value = epoch + TimeDelta::milliseconds(1_500);

        let mut writer = WireWriter::new();
        writer.write_timestamp(value, epoch).expect("after epoch");
        let bytes = writer.into_bytes();
        assert_eq!(&bytes[..2], &[0xDC, 0x05]);

        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_timestamp(epoch), Ok(value));
    }

    #[test]
    fn pre_epoch_timestamps_are_rejected() {
        let epoch = default_epoch();
        let mut writer = WireWriter::new();
        assert_eq!(
            writer.write_timestamp(epoch - TimeDelta::milliseconds(1), epoch),
            Err(WireError::TimestampBeforeEpoch)
        );
    }
}
