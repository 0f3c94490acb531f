//! Frame layouts and registry key packing.
//!
//! Every frame on a stream is `u32 length | body`, little-endian, where
//! `length` counts exactly the bytes of `body`:
//!
//! - request body: `u8 category | u8 method | payload`
//! - response body: `u16 response_code | payload?` (payload only on success)
//! - notification body: `u64 kind | u64 object_id`
//!
//! Broker-forwarded envelopes are a complete frame followed by a `u64`
//! target id suffix outside the length prefix.

use crate::codes::{self, ResponseCode};
use crate::wire::{WireError, WireReader, WireWriter};

/// Byte width of the `u32` length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Byte width of the broker envelope's trailing target id.
pub const TARGET_SUFFIX: usize = 8;

/// Packs a `(category, method)` pair into the registry key.
pub fn pack_key(category: u8, method: u8) -> u16 {
    (category as u16) << 8 | method as u16
}

/// A decoded request frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub category: u8,
    pub method: u8,
    pub payload: Vec<u8>,
}

impl RequestFrame {
    /// The registry key addressed by this frame.
    pub fn key(&self) -> u16 {
        pack_key(self.category, self.method)
    }

    /// Encodes the frame with its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = WireWriter::new();
        writer.write_u32((2 + self.payload.len()) as u32);
        writer.write_u8(self.category);
        writer.write_u8(self.method);
        writer.write_bytes(&self.payload);
        writer.into_bytes()
    }

    /// Decodes a frame body (the bytes after the length prefix).
    pub fn decode(body: &[u8]) -> Result<Self, WireError> {
        let mut reader = WireReader::new(body);
        let category = reader.read_u8()?;
        let method = reader.read_u8()?;
        Ok(Self {
            category,
            method,
            payload: body[2..].to_vec(),
        })
    }
}

/// Encodes a response frame; the payload is included only on `SUCCESS`.
pub fn encode_response(code: ResponseCode, payload: &[u8]) -> Vec<u8> {
    let payload = if code == codes::SUCCESS { payload } else { &[] };
    let mut writer = WireWriter::new();
    writer.write_u32((2 + payload.len()) as u32);
    writer.write_u16(code);
    writer.write_bytes(payload);
    writer.into_bytes()
}

/// Encodes a notification frame.
pub fn encode_notification(kind: u64, object_id: u64) -> Vec<u8> {
    let mut writer = WireWriter::new();
    writer.write_u32(16);
    writer.write_u64(kind);
    writer.write_u64(object_id);
    writer.into_bytes()
}

/// Appends the broker-envelope target suffix to an encoded frame.
pub fn append_target(mut frame: Vec<u8>, target: u64) -> Vec<u8> {
    frame.extend_from_slice(&target.to_le_bytes());
    frame
}

/// Splits a broker envelope into the frame bytes and the target suffix.
pub fn split_target(envelope: &[u8]) -> Result<(&[u8], u64), WireError> {
    if envelope.len() < TARGET_SUFFIX {
        return Err(WireError::ReadPastEnd);
    }
    let (frame, suffix) = envelope.split_at(envelope.len() - TARGET_SUFFIX);
    let mut raw = [0u8; TARGET_SUFFIX];
    raw.copy_from_slice(suffix);
    Ok((frame, u64::from_le_bytes(raw)))
}
