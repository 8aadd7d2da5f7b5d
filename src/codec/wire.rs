//! Wire header parsing and low-level byte helpers.
//!
//! Binary parsing follows the same discipline as the rest of the crate's
//! fixed-layout structures: explicit little-endian byte order, bounds
//! checking on every read, and no allocation during header parsing.

use thiserror::Error;

/// Magic value at offset 0 of every frame ("SIMB").
pub const WIRE_MAGIC: u32 = 0x5349_4D42;

/// Protocol version spoken by this crate: major in the high byte, minor in
/// the low byte. Peers are compatible when the major bytes match.
pub const PROTOCOL_VERSION: u16 = 0x0100;

/// Size of the fixed wire header in bytes.
pub const HEADER_SIZE: usize = 40;

/// Upper bound on payload size; anything larger is treated as corruption.
pub const MAX_PAYLOAD_LEN: u32 = 64 * 1024;

/// Extract the major byte of a protocol version.
pub fn protocol_major(version: u16) -> u8 {
    (version >> 8) as u8
}

/// Two protocol versions are compatible when their major bytes match.
pub fn versions_compatible(a: u16, b: u16) -> bool {
    protocol_major(a) == protocol_major(b)
}

/// Decode failure classification.
///
/// Every variant except `VersionMismatch` is recoverable: the offending
/// frame is discarded and counted while the session stays up.
/// `VersionMismatch` is fatal only when it occurs during the initial
/// handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("Malformed frame: {details}")]
    Malformed { details: String },

    #[error("Frame version incompatible: expected major {expected:#04x}, found {found:#06x}")]
    VersionMismatch { expected: u8, found: u16 },

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Checksum failed: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumFailed { expected: u32, actual: u32 },
}

impl DecodeError {
    /// Whether the session survives this error (frame discarded and counted).
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, DecodeError::VersionMismatch { .. })
    }

    pub(crate) fn malformed(details: impl Into<String>) -> Self {
        DecodeError::Malformed { details: details.into() }
    }
}

/// Fixed wire header preceding every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub version: u16,
    pub kind: u8,
    pub sequence: u64,
    pub tick_id: u64,
    pub timestamp_ns: u64,
    pub payload_len: u32,
    pub checksum: u32,
}

impl WireHeader {
    /// Append the encoded header to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        buf.resize(start + HEADER_SIZE, 0);
        self.write_to(&mut buf[start..start + HEADER_SIZE]);
    }

    /// Write the header into a caller-provided `HEADER_SIZE` region,
    /// allowing the header to be backfilled after the payload is encoded.
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert_eq!(out.len(), HEADER_SIZE);
        out[0..4].copy_from_slice(&WIRE_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6] = self.kind;
        out[7] = 0; // reserved, keeps the header 8-byte aligned
        out[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        out[16..24].copy_from_slice(&self.tick_id.to_le_bytes());
        out[24..32].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[32..36].copy_from_slice(&self.payload_len.to_le_bytes());
        out[36..40].copy_from_slice(&self.checksum.to_le_bytes());
    }

    /// Parse and validate a header from the start of `data`.
    ///
    /// Validates the magic, version major, and payload length bound. The
    /// payload itself is not inspected here.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated { needed: HEADER_SIZE, available: data.len() });
        }

        let magic = read_u32_le(data, 0)?;
        if magic != WIRE_MAGIC {
            return Err(DecodeError::malformed(format!(
                "bad magic {magic:#010x}, expected {WIRE_MAGIC:#010x}"
            )));
        }

        let version = read_u16_le(data, 4)?;
        if !versions_compatible(version, PROTOCOL_VERSION) {
            return Err(DecodeError::VersionMismatch {
                expected: protocol_major(PROTOCOL_VERSION),
                found: version,
            });
        }

        let kind = data[6];
        let sequence = read_u64_le(data, 8)?;
        let tick_id = read_u64_le(data, 16)?;
        let timestamp_ns = read_u64_le(data, 24)?;
        let payload_len = read_u32_le(data, 32)?;
        let checksum = read_u32_le(data, 36)?;

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(DecodeError::malformed(format!(
                "payload length {payload_len} exceeds maximum {MAX_PAYLOAD_LEN}"
            )));
        }

        Ok(Self { version, kind, sequence, tick_id, timestamp_ns, payload_len, checksum })
    }
}

/// CRC-32 over the payload bytes only.
pub(crate) fn payload_checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

// Bounds-checked little-endian readers shared by the header and payload
// decoders.

pub(crate) fn read_u16_le(data: &[u8], offset: usize) -> Result<u16, DecodeError> {
    let bytes = read_array::<2>(data, offset)?;
    Ok(u16::from_le_bytes(bytes))
}

pub(crate) fn read_u32_le(data: &[u8], offset: usize) -> Result<u32, DecodeError> {
    let bytes = read_array::<4>(data, offset)?;
    Ok(u32::from_le_bytes(bytes))
}

pub(crate) fn read_u64_le(data: &[u8], offset: usize) -> Result<u64, DecodeError> {
    let bytes = read_array::<8>(data, offset)?;
    Ok(u64::from_le_bytes(bytes))
}

pub(crate) fn read_f32_le(data: &[u8], offset: usize) -> Result<f32, DecodeError> {
    let bytes = read_array::<4>(data, offset)?;
    Ok(f32::from_le_bytes(bytes))
}

pub(crate) fn read_f64_le(data: &[u8], offset: usize) -> Result<f64, DecodeError> {
    let bytes = read_array::<8>(data, offset)?;
    Ok(f64::from_le_bytes(bytes))
}

pub(crate) fn read_u8(data: &[u8], offset: usize) -> Result<u8, DecodeError> {
    data.get(offset)
        .copied()
        .ok_or(DecodeError::Truncated { needed: offset + 1, available: data.len() })
}

fn read_array<const N: usize>(data: &[u8], offset: usize) -> Result<[u8; N], DecodeError> {
    let end = offset.checked_add(N).ok_or_else(|| DecodeError::malformed("offset overflow"))?;
    let slice = data
        .get(offset..end)
        .ok_or(DecodeError::Truncated { needed: end, available: data.len() })?;
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(slice);
    Ok(bytes)
}
