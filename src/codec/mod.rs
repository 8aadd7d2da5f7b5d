//! Versioned binary message codec.
//!
//! # Wire Format
//!
//! Every message exchanged with the autonomy stack is one *frame*: a fixed
//! 40-byte little-endian header followed by a kind-specific payload.
//!
//! ```text
//! ┌───────────────────────────────┬──────────────────────────┐
//! │ Header (40 bytes, LE)         │ Payload (payload_len)    │
//! ├───────────────────────────────┼──────────────────────────┤
//! │ magic        u32  @ 0         │ State / Command /        │
//! │ version      u16  @ 4         │ Heartbeat / Control body │
//! │ kind         u8   @ 6         │ (fixed-width LE fields)  │
//! │ reserved     u8   @ 7         │                          │
//! │ sequence     u64  @ 8         │                          │
//! │ tick_id      u64  @ 16        │                          │
//! │ timestamp_ns u64  @ 24        │                          │
//! │ payload_len  u32  @ 32        │                          │
//! │ checksum     u32  @ 36        │                          │
//! └───────────────────────────────┴──────────────────────────┘
//! ```
//!
//! - **Byte order**: little-endian everywhere; no host-endianness dependence
//! - **Checksum**: CRC-32 over the payload bytes only
//! - **Version**: major in the high byte, minor in the low byte; a frame is
//!   accepted when the major matches [`PROTOCOL_VERSION`]
//! - **Sequence**: strictly increasing per direction per session; gaps are
//!   counted by the session layer, never fatal
//!
//! Decoding is pure and side-effect-free; any violation yields a
//! [`DecodeError`] classified as `Malformed`, `VersionMismatch`, `Truncated`,
//! or `ChecksumFailed`. Encoding allocates exactly one contiguous buffer per
//! frame. Unit saturation (e.g. clamping negative speeds) happens at the
//! dispatcher, not here.

mod frame;
mod payload;
mod wire;

pub use frame::{Frame, FrameKind, FramePayload};
pub use payload::{
    ControlMessage, DriveMode, GearState, StateSnapshot, VehicleCommand, Vector3, WheelState,
};
pub use wire::{
    DecodeError, HEADER_SIZE, PROTOCOL_VERSION, WIRE_MAGIC, WireHeader, protocol_major,
    versions_compatible,
};
