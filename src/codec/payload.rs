//! Kind-specific frame payload bodies.
//!
//! The state body carries the generic wheeled-vehicle state the simulation
//! produces each tick; the command body carries the actuation request the
//! autonomy stack sends back. Both are fixed-layout little-endian structures
//! so the encoded size is deterministic across platforms.

use serde::{Deserialize, Serialize};

use super::wire::{DecodeError, read_f32_le, read_f64_le, read_u8, read_u16_le};

/// 3-component vector, SI units, encoded as three little-endian f64.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ENCODED_LEN: usize = 24;

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.x.to_le_bytes());
        buf.extend_from_slice(&self.y.to_le_bytes());
        buf.extend_from_slice(&self.z.to_le_bytes());
    }

    fn decode_at(data: &[u8], offset: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            x: read_f64_le(data, offset)?,
            y: read_f64_le(data, offset + 8)?,
            z: read_f64_le(data, offset + 16)?,
        })
    }
}

/// Per-wheel state: wheel order is FL, FR, RL, RR.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WheelState {
    /// Wheel angular velocity \[rad/s\].
    pub angular_velocity: f32,
    /// Drive torque at the wheel \[N·m\].
    pub torque: f32,
    /// Brake torque at the wheel \[N·m\].
    pub brake_torque: f32,
}

impl WheelState {
    pub const ENCODED_LEN: usize = 12;

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.angular_velocity.to_le_bytes());
        buf.extend_from_slice(&self.torque.to_le_bytes());
        buf.extend_from_slice(&self.brake_torque.to_le_bytes());
    }

    fn decode_at(data: &[u8], offset: usize) -> Result<Self, DecodeError> {
        Ok(Self {
            angular_velocity: read_f32_le(data, offset)?,
            torque: read_f32_le(data, offset + 4)?,
            brake_torque: read_f32_le(data, offset + 8)?,
        })
    }
}

/// Gearbox state, on the wire as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GearState {
    #[default]
    Neutral = 0,
    Drive = 1,
    Reverse = 2,
    Park = 3,
}

impl GearState {
    fn from_wire(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(GearState::Neutral),
            1 => Ok(GearState::Drive),
            2 => Ok(GearState::Reverse),
            3 => Ok(GearState::Park),
            other => Err(DecodeError::malformed(format!("unknown gear state {other}"))),
        }
    }
}

/// Vehicle drive mode, on the wire as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DriveMode {
    /// Human input drives the vehicle.
    #[default]
    Manual = 0,
    /// Controlled stop requested.
    SafeStop = 1,
    /// Autonomy requested but not yet engaged.
    ReadyToAutonomous = 2,
    /// Autonomy stack drives the vehicle.
    Autonomous = 3,
}

impl DriveMode {
    fn from_wire(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(DriveMode::Manual),
            1 => Ok(DriveMode::SafeStop),
            2 => Ok(DriveMode::ReadyToAutonomous),
            3 => Ok(DriveMode::Autonomous),
            other => Err(DecodeError::malformed(format!("unknown drive mode {other}"))),
        }
    }
}

/// Immutable, tick-scoped aggregate of vehicle state produced once per tick.
///
/// Ownership transfers from the simulation to the outgoing frame on publish
/// (copy-on-publish); the simulation's live state is never aliased across
/// the transport boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StateSnapshot {
    /// World position \[m\].
    pub position: Vector3,
    /// Roll/pitch/yaw \[rad\].
    pub rotation: Vector3,
    /// Velocity in the world frame \[m/s\].
    pub world_velocity: Vector3,
    /// Velocity in the body frame \[m/s\].
    pub local_velocity: Vector3,
    /// Body angular velocity \[rad/s\].
    pub angular_velocity: Vector3,
    /// Per-wheel state, FL/FR/RL/RR.
    pub wheels: [WheelState; 4],
    /// Mean front steer angle \[rad\].
    pub steer: f32,
    pub gear_state: GearState,
    /// Engaged gear number; 0 = automatic/undefined.
    pub gear_num: i8,
    pub mode: DriveMode,
}

impl StateSnapshot {
    pub const ENCODED_LEN: usize =
        Vector3::ENCODED_LEN * 5 + WheelState::ENCODED_LEN * 4 + 4 + 1 + 1 + 1;

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        self.position.encode_into(buf);
        self.rotation.encode_into(buf);
        self.world_velocity.encode_into(buf);
        self.local_velocity.encode_into(buf);
        self.angular_velocity.encode_into(buf);
        for wheel in &self.wheels {
            wheel.encode_into(buf);
        }
        buf.extend_from_slice(&self.steer.to_le_bytes());
        buf.push(self.gear_state as u8);
        buf.extend_from_slice(&self.gear_num.to_le_bytes());
        buf.push(self.mode as u8);
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        check_exact_len(data, Self::ENCODED_LEN)?;

        let mut wheels = [WheelState::default(); 4];
        for (i, wheel) in wheels.iter_mut().enumerate() {
            *wheel = WheelState::decode_at(data, 120 + i * WheelState::ENCODED_LEN)?;
        }

        Ok(Self {
            position: Vector3::decode_at(data, 0)?,
            rotation: Vector3::decode_at(data, 24)?,
            world_velocity: Vector3::decode_at(data, 48)?,
            local_velocity: Vector3::decode_at(data, 72)?,
            angular_velocity: Vector3::decode_at(data, 96)?,
            wheels,
            steer: read_f32_le(data, 168)?,
            gear_state: GearState::from_wire(read_u8(data, 172)?)?,
            gear_num: read_u8(data, 173)? as i8,
            mode: DriveMode::from_wire(read_u8(data, 174)?)?,
        })
    }
}

/// Actuation request produced by the autonomy stack.
///
/// Field ranges are validated by the dispatcher, not here: the codec decodes
/// whatever the peer sent, so out-of-range values surface as `RangeViolation`
/// rejections rather than decode failures.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VehicleCommand {
    /// Steer ratio, nominally \[-1, 1\].
    pub steer: f32,
    /// Drive effort ratio, nominally \[0, 1\].
    pub throttle: f32,
    /// Brake effort ratio, nominally \[0, 1\].
    pub brake: f32,
    /// Target speed \[m/s\]; negative values saturate to zero downstream.
    pub target_speed: f32,
    pub gear_state: GearState,
    /// Requested gear number for Drive/Reverse; 0 = automatic/undefined.
    pub gear_num: i8,
}

impl VehicleCommand {
    pub const ENCODED_LEN: usize = 4 * 4 + 1 + 1;

    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.steer.to_le_bytes());
        buf.extend_from_slice(&self.throttle.to_le_bytes());
        buf.extend_from_slice(&self.brake.to_le_bytes());
        buf.extend_from_slice(&self.target_speed.to_le_bytes());
        buf.push(self.gear_state as u8);
        buf.extend_from_slice(&self.gear_num.to_le_bytes());
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        check_exact_len(data, Self::ENCODED_LEN)?;
        Ok(Self {
            steer: read_f32_le(data, 0)?,
            throttle: read_f32_le(data, 4)?,
            brake: read_f32_le(data, 8)?,
            target_speed: read_f32_le(data, 12)?,
            gear_state: GearState::from_wire(read_u8(data, 16)?)?,
            gear_num: read_u8(data, 17)? as i8,
        })
    }
}

/// Session-control messages: handshake and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    /// Opens version negotiation; sent by the bridge at startup.
    Hello { version: u16 },
    /// Accepts the handshake; sent by the peer.
    HelloAck { version: u16 },
    /// Graceful teardown notification.
    Bye,
}

const CONTROL_HELLO: u8 = 0;
const CONTROL_HELLO_ACK: u8 = 1;
const CONTROL_BYE: u8 = 2;

impl ControlMessage {
    pub(crate) fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            ControlMessage::Hello { version } => {
                buf.push(CONTROL_HELLO);
                buf.extend_from_slice(&version.to_le_bytes());
            }
            ControlMessage::HelloAck { version } => {
                buf.push(CONTROL_HELLO_ACK);
                buf.extend_from_slice(&version.to_le_bytes());
            }
            ControlMessage::Bye => buf.push(CONTROL_BYE),
        }
    }

    pub(crate) fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        match read_u8(data, 0)? {
            CONTROL_HELLO => {
                check_exact_len(data, 3)?;
                Ok(ControlMessage::Hello { version: read_u16_le(data, 1)? })
            }
            CONTROL_HELLO_ACK => {
                check_exact_len(data, 3)?;
                Ok(ControlMessage::HelloAck { version: read_u16_le(data, 1)? })
            }
            CONTROL_BYE => {
                check_exact_len(data, 1)?;
                Ok(ControlMessage::Bye)
            }
            other => Err(DecodeError::malformed(format!("unknown control tag {other}"))),
        }
    }
}

fn check_exact_len(data: &[u8], expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::Truncated { needed: expected, available: data.len() });
    }
    if data.len() > expected {
        return Err(DecodeError::malformed(format!(
            "{} trailing payload bytes",
            data.len() - expected
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot() -> StateSnapshot {
        StateSnapshot {
            position: Vector3::new(12.5, -3.0, 0.4),
            rotation: Vector3::new(0.01, -0.02, 1.57),
            world_velocity: Vector3::new(8.2, 0.1, 0.0),
            local_velocity: Vector3::new(8.2, 0.0, 0.0),
            angular_velocity: Vector3::new(0.0, 0.0, 0.12),
            wheels: [
                WheelState { angular_velocity: 24.0, torque: 110.0, brake_torque: 0.0 },
                WheelState { angular_velocity: 24.1, torque: 110.0, brake_torque: 0.0 },
                WheelState { angular_velocity: 23.9, torque: 0.0, brake_torque: 5.0 },
                WheelState { angular_velocity: 24.0, torque: 0.0, brake_torque: 5.0 },
            ],
            steer: 0.05,
            gear_state: GearState::Drive,
            gear_num: 3,
            mode: DriveMode::Autonomous,
        }
    }

    #[test]
    fn snapshot_round_trip() {
        let snapshot = sample_snapshot();
        let mut buf = Vec::new();
        snapshot.encode_into(&mut buf);
        assert_eq!(buf.len(), StateSnapshot::ENCODED_LEN);
        assert_eq!(StateSnapshot::decode(&buf).unwrap(), snapshot);
    }

    #[test]
    fn command_round_trip() {
        let command = VehicleCommand {
            steer: -0.3,
            throttle: 0.6,
            brake: 0.0,
            target_speed: 14.0,
            gear_state: GearState::Drive,
            gear_num: 0,
        };
        let mut buf = Vec::new();
        command.encode_into(&mut buf);
        assert_eq!(buf.len(), VehicleCommand::ENCODED_LEN);
        assert_eq!(VehicleCommand::decode(&buf).unwrap(), command);
    }

    #[test]
    fn negative_gear_num_survives_round_trip() {
        let command = VehicleCommand { gear_num: -1, ..VehicleCommand::default() };
        let mut buf = Vec::new();
        command.encode_into(&mut buf);
        assert_eq!(VehicleCommand::decode(&buf).unwrap().gear_num, -1);
    }

    #[test]
    fn control_round_trips() {
        for msg in [
            ControlMessage::Hello { version: 0x0100 },
            ControlMessage::HelloAck { version: 0x0102 },
            ControlMessage::Bye,
        ] {
            let mut buf = Vec::new();
            msg.encode_into(&mut buf);
            assert_eq!(ControlMessage::decode(&buf).unwrap(), msg);
        }
    }

    #[test]
    fn unknown_gear_state_is_malformed() {
        let mut buf = Vec::new();
        VehicleCommand::default().encode_into(&mut buf);
        buf[16] = 9;
        assert!(matches!(VehicleCommand::decode(&buf), Err(DecodeError::Malformed { .. })));
    }

    #[test]
    fn short_command_is_truncated() {
        let mut buf = Vec::new();
        VehicleCommand::default().encode_into(&mut buf);
        buf.truncate(10);
        assert!(matches!(VehicleCommand::decode(&buf), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let mut buf = Vec::new();
        VehicleCommand::default().encode_into(&mut buf);
        buf.push(0);
        assert!(matches!(VehicleCommand::decode(&buf), Err(DecodeError::Malformed { .. })));
    }
}
