use std::fmt;

use super::error::{Error, Result};

pub const COMMAND_SIZE: usize = 3;
pub const MAX_CHANNEL_INDEX: u8 = 7;

/* Bit offsets in the 24 bit record. Bit n is bit (n % 8) of byte (n / 8). */
const START_BIT: usize = 0;
const CHANNEL_SHIFT: usize = 12;
const CHANNEL_WIDTH: usize = 3;
const SINGLE_ENDED_BIT: usize = 15;

/// Request to convert one input of a multiplexed ADC chip.
///
/// Layout: bit 0 start (1), bits 1-7 zero, bits 8-11 don't care,
/// bits 12-14 channel address, bit 15 single ended mode (1).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command {
    bytes: [u8; COMMAND_SIZE],
}

fn set_bit(bytes: &mut [u8; COMMAND_SIZE], bit: usize) {
    bytes[bit / 8] |= 1 << (bit % 8);
}

fn get_bit(bytes: &[u8; COMMAND_SIZE], bit: usize) -> bool {
    bytes[bit / 8] & (1 << (bit % 8)) != 0
}

impl Command {
    pub fn new(channel: u8) -> Result<Self> {
        if channel > MAX_CHANNEL_INDEX {
            return Err(Error::InvalidChannelIndex(channel));
        }

        let mut bytes = [0u8; COMMAND_SIZE];
        set_bit(&mut bytes, START_BIT);
        for i in 0..CHANNEL_WIDTH {
            if channel & (1 << i) != 0 {
                set_bit(&mut bytes, CHANNEL_SHIFT + i);
            }
        }
        set_bit(&mut bytes, SINGLE_ENDED_BIT);

        Ok(Self { bytes })
    }

    /// Channel address encoded in bits 12-14.
    pub fn channel(&self) -> u8 {
        (0..CHANNEL_WIDTH).fold(0, |acc, i| {
            if get_bit(&self.bytes, CHANNEL_SHIFT + i) {
                acc | (1 << i)
            } else {
                acc
            }
        })
    }

    pub fn as_bytes(&self) -> &[u8; COMMAND_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Command {{ channel: {}, bytes: {:02X} {:02X} {:02X} }}",
            self.channel(),
            self.bytes[0],
            self.bytes[1],
            self.bytes[2]
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_layout() {
        assert_eq!(Command::new(0).unwrap().as_bytes(), &[0x01, 0x80, 0x00]);
        assert_eq!(Command::new(1).unwrap().as_bytes(), &[0x01, 0x90, 0x00]);
        assert_eq!(Command::new(5).unwrap().as_bytes(), &[0x01, 0xD0, 0x00]);
        assert_eq!(Command::new(7).unwrap().as_bytes(), &[0x01, 0xF0, 0x00]);
    }

    #[test]
    fn test_channel_decodes_back() {
        for ch in 0..=MAX_CHANNEL_INDEX {
            let cmd = Command::new(ch).unwrap();
            assert_eq!(cmd.channel(), ch);
            // Don't care nibble and the zero bits stay clear
            assert_eq!(cmd.as_bytes()[0] & 0xFE, 0);
            assert_eq!(cmd.as_bytes()[1] & 0x0F, 0);
            assert_eq!(cmd.as_bytes()[2], 0);
        }
    }

    #[test]
    fn test_rejects_out_of_range_channel() {
        assert!(matches!(Command::new(8), Err(Error::InvalidChannelIndex(8))));
    }
}
