mod message;

pub use message::ChainMessage;

use crate::error::{ChainError, Result};

/// Width of a length or offset announcement on the wire.
pub const U64_WIRE_BYTES: usize = 8;

/// Encode a control message with rkyv.
pub fn encode_message(msg: &ChainMessage) -> Result<Vec<u8>> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(msg)
        .map_err(|e| ChainError::EncodeFailed(e.to_string()))?;
    Ok(bytes.to_vec())
}

/// Decode a control message produced by [`encode_message`].
///
/// The payload is copied into an aligned buffer first: received frames carry
/// no alignment guarantee.
pub fn decode_message(buf: &[u8]) -> Result<ChainMessage> {
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(buf.len());
    aligned.extend_from_slice(buf);
    rkyv::from_bytes::<ChainMessage, rkyv::rancor::Error>(&aligned)
        .map_err(|e| ChainError::DecodeFailed(e.to_string()))
}

/// Encode a length or offset as 8 little-endian bytes.
pub fn encode_u64(value: u64) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

/// Decode an 8-byte little-endian length or offset.
pub fn decode_u64(buf: &[u8]) -> Result<u64> {
    let bytes: [u8; U64_WIRE_BYTES] = buf.try_into().map_err(|_| {
        ChainError::DecodeFailed(format!(
            "expected {U64_WIRE_BYTES}-byte integer, got {} bytes",
            buf.len()
        ))
    })?;
    Ok(u64::from_le_bytes(bytes))
}
