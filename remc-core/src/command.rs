//! Ground-station command decoding.
//!
//! Command datagrams carry a 64-byte header (ignored) followed by a one-byte
//! opcode; the collect opcode is followed by two little-endian `i32` window
//! bounds. Unknown opcodes are logged and dropped.

use tracing::debug;

use crate::io::ActuatorMove;

/// Offset of the opcode byte within a command datagram.
pub const OPCODE_OFFSET: usize = 64;

/// A decoded controller command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Arm,
    Fire,
    Disarm,
    ManualActuator(ActuatorMove),
    ManualEmOn,
    ManualEmOff,
    ManualModeEnable,
    ManualModeDisable,
    HoldModeEnable,
    HoldModeDisable,
    /// Extract a capture window relative to the moment of receipt.
    Collect { start: i32, stop: i32 },
}

impl Command {
    /// Decode a full command datagram. Returns `None` for short datagrams
    /// and unknown opcodes.
    pub fn from_datagram(buf: &[u8]) -> Option<Command> {
        if buf.len() <= OPCODE_OFFSET {
            return None;
        }
        let opcode = buf[OPCODE_OFFSET];
        let command = match opcode {
            0x01 => Command::Arm,
            0x02 => Command::Fire,
            0x03 => Command::Disarm,
            0x04 => {
                let rest = &buf[OPCODE_OFFSET + 1..];
                if rest.len() < 8 {
                    debug!("collect command truncated");
                    return None;
                }
                let start = i32::from_le_bytes([rest[0], rest[1], rest[2], rest[3]]);
                let stop = i32::from_le_bytes([rest[4], rest[5], rest[6], rest[7]]);
                Command::Collect { start, stop }
            }
            0x11 => Command::ManualActuator(ActuatorMove::Fwd),
            0x12 => Command::ManualActuator(ActuatorMove::Stop),
            0x13 => Command::ManualActuator(ActuatorMove::Bwd),
            0x15 => Command::ManualEmOn,
            0x16 => Command::ManualEmOff,
            0x1E => Command::ManualModeDisable,
            0x1F => Command::ManualModeEnable,
            0x20 => Command::HoldModeEnable,
            0x21 => Command::HoldModeDisable,
            other => {
                debug!(opcode = other, "unknown command opcode");
                return None;
            }
        };
        Some(command)
    }
}

/// Anything that yields decoded commands, one per poll.
pub trait CommandSource: Send {
    fn poll_command(&mut self) -> Option<Command>;
}
