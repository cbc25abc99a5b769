//! Host-to-device control frames
//!
//! ```text
//! header(0x5A) | opcode | args.. | checksum
//! ```
//!
//! The checksum is the low byte of the sum of every preceding byte. The WiFi
//! firmware expects a configure frame followed by a start frame after each
//! connect.

use crate::device::DeviceProfile;

pub const COMMAND_HEADER: u8 = 0x5A;
const OP_CONFIGURE: u8 = 0x01;
const OP_START: u8 = 0x02;

/// Rate code sent when the sample rate has no entry in the table (1000 Hz)
pub const DEFAULT_RATE_CODE: u8 = 0x94;

const RATE_CODES: [(u32, u8); 7] = [
    (250, 0x96),
    (500, 0x95),
    (1000, 0x94),
    (2000, 0x93),
    (4000, 0x92),
    (8000, 0x91),
    (16000, 0x90),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Configure { rate_code: u8, channel_mask: u8 },
    Start,
}

impl DeviceCommand {
    /// Configure frame matching a profile's sample rate and channel count
    pub fn configure(profile: &DeviceProfile) -> Self {
        DeviceCommand::Configure {
            rate_code: rate_code(profile.sample_rate),
            channel_mask: channel_mask(profile.channel_count),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut frame = match *self {
            DeviceCommand::Configure {
                rate_code,
                channel_mask,
            } => vec![COMMAND_HEADER, OP_CONFIGURE, rate_code, channel_mask],
            DeviceCommand::Start => vec![COMMAND_HEADER, OP_START],
        };
        frame.push(checksum(&frame));
        frame
    }

    /// Sample rate in Hz a configure frame asks for, if the code is known
    pub fn sample_rate(&self) -> Option<u32> {
        match *self {
            DeviceCommand::Configure { rate_code, .. } => RATE_CODES
                .iter()
                .find(|(_, code)| *code == rate_code)
                .map(|(rate, _)| *rate),
            DeviceCommand::Start => None,
        }
    }
}

pub fn rate_code(sample_rate: f32) -> u8 {
    RATE_CODES
        .iter()
        .find(|(rate, _)| *rate as f32 == sample_rate)
        .map_or(DEFAULT_RATE_CODE, |(_, code)| *code)
}

/// One bit per active channel; the mask byte covers at most eight channels
pub fn channel_mask(channels: usize) -> u8 {
    ((1u16 << channels.min(8)) - 1) as u8
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Incremental parser for the device side of the command link
///
/// Bytes before a header are skipped, and so is a header whose opcode is
/// unknown or whose checksum does not match.
#[derive(Debug, Default)]
pub struct CommandParser {
    buffer: Vec<u8>,
    rejected: u64,
}

impl CommandParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Headers discarded for an unknown opcode or a bad checksum
    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<DeviceCommand> {
        self.buffer.extend_from_slice(bytes);
        let mut commands = Vec::new();
        loop {
            let Some(start) = self.buffer.iter().position(|b| *b == COMMAND_HEADER) else {
                self.buffer.clear();
                break;
            };
            self.buffer.drain(..start);
            let Some(&opcode) = self.buffer.get(1) else {
                break;
            };
            let len = match opcode {
                OP_CONFIGURE => 5,
                OP_START => 3,
                _ => {
                    self.rejected += 1;
                    self.buffer.drain(..1);
                    continue;
                }
            };
            if self.buffer.len() < len {
                break;
            }
            if checksum(&self.buffer[..len - 1]) != self.buffer[len - 1] {
                self.rejected += 1;
                self.buffer.drain(..1);
                continue;
            }
            let command = match opcode {
                OP_CONFIGURE => DeviceCommand::Configure {
                    rate_code: self.buffer[2],
                    channel_mask: self.buffer[3],
                },
                _ => DeviceCommand::Start,
            };
            self.buffer.drain(..len);
            commands.push(command);
        }
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_frame_bytes() {
        let profile = DeviceProfile::default().with_channels(8).with_sample_rate(250.0);
        let frame = DeviceCommand::configure(&profile).encode();
        assert_eq!(frame, vec![0x5A, 0x01, 0x96, 0xFF, 0xF0]);
        assert_eq!(DeviceCommand::Start.encode(), vec![0x5A, 0x02, 0x5C]);
    }

    #[test]
    fn test_rate_codes() {
        assert_eq!(rate_code(16000.0), 0x90);
        assert_eq!(rate_code(500.0), 0x95);
        assert_eq!(rate_code(300.0), DEFAULT_RATE_CODE);
        assert_eq!(channel_mask(4), 0x0F);
        assert_eq!(channel_mask(16), 0xFF);
    }

    #[test]
    fn test_parser_skips_noise_and_split_frames() {
        let profile = DeviceProfile::default().with_channels(2);
        let mut stream = vec![0x00, 0x5A, 0x07, 0x13];
        stream.extend(DeviceCommand::configure(&profile).encode());
        stream.extend(DeviceCommand::Start.encode());

        let mut parser = CommandParser::new();
        let (head, tail) = stream.split_at(6);
        assert!(parser.push(head).is_empty());
        let commands = parser.push(tail);
        assert_eq!(
            commands,
            vec![
                DeviceCommand::Configure {
                    rate_code: 0x94,
                    channel_mask: 0x03
                },
                DeviceCommand::Start
            ]
        );
        assert_eq!(commands[0].sample_rate(), Some(1000));
        assert_eq!(parser.rejected(), 1);
    }

    #[test]
    fn test_bad_checksum_rejected() {
        let mut parser = CommandParser::new();
        assert!(parser.push(&[0x5A, 0x02, 0x00]).is_empty());
        assert_eq!(parser.rejected(), 1);
        assert_eq!(parser.push(&DeviceCommand::Start.encode()), vec![DeviceCommand::Start]);
    }
}
