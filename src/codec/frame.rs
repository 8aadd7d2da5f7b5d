//! Frame: the atomic wire unit.

use super::payload::{ControlMessage, StateSnapshot, VehicleCommand};
use super::wire::{DecodeError, HEADER_SIZE, PROTOCOL_VERSION, WireHeader, payload_checksum};

/// Frame kind discriminant, on the wire as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    State = 0,
    Command = 1,
    Heartbeat = 2,
    Control = 3,
}

impl FrameKind {
    fn from_wire(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(FrameKind::State),
            1 => Ok(FrameKind::Command),
            2 => Ok(FrameKind::Heartbeat),
            3 => Ok(FrameKind::Control),
            other => Err(DecodeError::malformed(format!("unknown frame kind {other}"))),
        }
    }
}

/// Kind-specific frame body.
#[derive(Debug, Clone, PartialEq)]
pub enum FramePayload {
    State(StateSnapshot),
    Command(VehicleCommand),
    /// Liveness probe; carries no body, the header timestamp is the signal.
    Heartbeat,
    Control(ControlMessage),
}

impl FramePayload {
    /// The wire kind this payload encodes as.
    pub fn kind(&self) -> FrameKind {
        match self {
            FramePayload::State(_) => FrameKind::State,
            FramePayload::Command(_) => FrameKind::Command,
            FramePayload::Heartbeat => FrameKind::Heartbeat,
            FramePayload::Control(_) => FrameKind::Control,
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            FramePayload::State(snapshot) => snapshot.encode_into(buf),
            FramePayload::Command(command) => command.encode_into(buf),
            FramePayload::Heartbeat => {}
            FramePayload::Control(control) => control.encode_into(buf),
        }
    }

    fn decode(kind: FrameKind, data: &[u8]) -> Result<Self, DecodeError> {
        match kind {
            FrameKind::State => Ok(FramePayload::State(StateSnapshot::decode(data)?)),
            FrameKind::Command => Ok(FramePayload::Command(VehicleCommand::decode(data)?)),
            FrameKind::Heartbeat => {
                if !data.is_empty() {
                    return Err(DecodeError::malformed("heartbeat carries a payload"));
                }
                Ok(FramePayload::Heartbeat)
            }
            FrameKind::Control => Ok(FramePayload::Control(ControlMessage::decode(data)?)),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            FramePayload::State(_) => StateSnapshot::ENCODED_LEN,
            FramePayload::Command(_) => VehicleCommand::ENCODED_LEN,
            FramePayload::Heartbeat => 0,
            FramePayload::Control(ControlMessage::Bye) => 1,
            FramePayload::Control(_) => 3,
        }
    }
}

/// One versioned binary message exchanged over the transport.
///
/// Frames are created per send/receive and consumed exactly once. `sequence`
/// strictly increases per direction per session; gaps signal loss.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Per-direction monotonic counter, assigned by the session.
    pub sequence: u64,
    /// Simulation tick this frame corresponds to.
    pub tick_id: u64,
    /// Producer wall clock at emission, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
    pub payload: FramePayload,
}

impl Frame {
    pub fn new(sequence: u64, tick_id: u64, timestamp_ns: u64, payload: FramePayload) -> Self {
        Self { sequence, tick_id, timestamp_ns, payload }
    }

    /// The wire kind of this frame.
    pub fn kind(&self) -> FrameKind {
        self.payload.kind()
    }

    /// Encode to a single contiguous buffer: header, then payload.
    pub fn encode(&self) -> Vec<u8> {
        let payload_len = self.payload.encoded_len();
        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);

        // Reserve the header region, encode the payload in place, then
        // backfill the header once length and checksum are known.
        buf.resize(HEADER_SIZE, 0);
        self.payload.encode_into(&mut buf);
        debug_assert_eq!(buf.len(), HEADER_SIZE + payload_len);

        let header = WireHeader {
            version: PROTOCOL_VERSION,
            kind: self.payload.kind() as u8,
            sequence: self.sequence,
            tick_id: self.tick_id,
            timestamp_ns: self.timestamp_ns,
            payload_len: payload_len as u32,
            checksum: payload_checksum(&buf[HEADER_SIZE..]),
        };
        header.write_to(&mut buf[..HEADER_SIZE]);
        buf
    }

    /// Decode a frame from a complete received datagram.
    ///
    /// Pure and side-effect-free. Validates magic, version major, payload
    /// length against the physically available buffer, and checksum; any
    /// violation yields a [`DecodeError`], never a panic.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let header = WireHeader::decode(data)?;

        let payload_end = HEADER_SIZE + header.payload_len as usize;
        if data.len() < payload_end {
            return Err(DecodeError::Truncated { needed: payload_end, available: data.len() });
        }
        if data.len() > payload_end {
            return Err(DecodeError::malformed(format!(
                "{} bytes past declared payload",
                data.len() - payload_end
            )));
        }

        let body = &data[HEADER_SIZE..payload_end];
        let actual = payload_checksum(body);
        if actual != header.checksum {
            return Err(DecodeError::ChecksumFailed { expected: header.checksum, actual });
        }

        let kind = FrameKind::from_wire(header.kind)?;
        let payload = FramePayload::decode(kind, body)?;

        Ok(Self {
            sequence: header.sequence,
            tick_id: header.tick_id,
            timestamp_ns: header.timestamp_ns,
            payload,
        })
    }
}
