use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use nix::{ioctl_write_buf, ioctl_write_ptr};

use super::clock;
use super::command::{Command, COMMAND_SIZE};
use super::error::Result;
use super::transport::AdcTransport;
use super::types::Reading;

pub const ADC_BITS: u32 = 10;
pub const ADC_MASK: u32 = (1 << ADC_BITS) - 1;

pub const DEFAULT_SPI_SPEED_HZ: u32 = 1_000_000;
pub const DEFAULT_DEVICE_PREFIX: &str = "/dev/spidev0.";

/* spidev IOCTL commands, see linux/spi/spidev.h */
const SPI_IOC_MAGIC: u8 = b'k';
const SPI_IOC_NR_MESSAGE: u8 = 0;
const SPI_IOC_NR_MODE: u8 = 1;
const SPI_IOC_NR_BITS_PER_WORD: u8 = 3;
const SPI_IOC_NR_MAX_SPEED_HZ: u8 = 4;

const SPI_MODE_0: u8 = 0;
const BITS_PER_WORD: u8 = 8;

/// struct spi_ioc_transfer
#[repr(C)]
#[derive(Debug, Default)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    pad: u8,
}

ioctl_write_ptr!(spi_write_mode, SPI_IOC_MAGIC, SPI_IOC_NR_MODE, u8);
ioctl_write_ptr!(spi_write_bits_per_word, SPI_IOC_MAGIC, SPI_IOC_NR_BITS_PER_WORD, u8);
ioctl_write_ptr!(spi_write_max_speed_hz, SPI_IOC_MAGIC, SPI_IOC_NR_MAX_SPEED_HZ, u32);
ioctl_write_buf!(spi_message, SPI_IOC_MAGIC, SPI_IOC_NR_MESSAGE, SpiIocTransfer);

/*
* @brief Convert a 3 byte reply to a normalized sample.
* @param reply Bytes clocked in while the command was sent
* @return Conversion result in [0, 1]
* @note Only the low ADC_BITS bits carry the conversion result.
*/
pub fn decode_reply(reply: &[u8; COMMAND_SIZE]) -> f64 {
    let value = reply.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32) & ADC_MASK;
    value as f64 / ADC_MASK as f64
}

/// MCP3008 style converters on the Linux spidev interface, one device per chip select.
pub struct SpiTransport {
    prefix: String,
    chips: Vec<u32>,
    speed_hz: u32,
    devices: Vec<Option<File>>,
}

impl SpiTransport {
    pub fn new(prefix: impl Into<String>, chips: &[u32], speed_hz: u32) -> Self {
        Self {
            prefix: prefix.into(),
            chips: chips.to_vec(),
            speed_hz,
            devices: Vec::new(),
        }
    }

    fn device_path(&self, chip: u32) -> PathBuf {
        PathBuf::from(format!("{}{}", self.prefix, chip))
    }

    fn open_device(&self, chip: u32) -> Result<File> {
        let path = self.device_path(chip);
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let fd = file.as_raw_fd();

        let mode = SPI_MODE_0;
        let bits = BITS_PER_WORD;
        unsafe {
            spi_write_mode(fd, &mode)?;
            spi_write_bits_per_word(fd, &bits)?;
            spi_write_max_speed_hz(fd, &self.speed_hz)?;
        }

        log::info!("Opened {} at {} Hz", path.display(), self.speed_hz);
        Ok(file)
    }

    fn transfer(&self, file: &File, command: &Command) -> Result<[u8; COMMAND_SIZE]> {
        let tx = *command.as_bytes();
        let mut rx = [0u8; COMMAND_SIZE];
        let transfer = SpiIocTransfer {
            tx_buf: tx.as_ptr() as u64,
            rx_buf: rx.as_mut_ptr() as u64,
            len: COMMAND_SIZE as u32,
            speed_hz: self.speed_hz,
            bits_per_word: BITS_PER_WORD,
            ..Default::default()
        };

        unsafe {
            spi_message(file.as_raw_fd(), std::slice::from_ref(&transfer))?;
        }
        Ok(rx)
    }
}

impl AdcTransport for SpiTransport {
    fn open(&mut self) -> Result<()> {
        let max_chip = self.chips.iter().copied().max().unwrap_or(0) as usize;
        let mut devices: Vec<Option<File>> = (0..=max_chip).map(|_| None).collect();
        for &chip in &self.chips {
            devices[chip as usize] = Some(self.open_device(chip)?);
        }
        self.devices = devices;
        Ok(())
    }

    fn close(&mut self) {
        self.devices.clear();
    }

    fn read(&mut self, chip: u32, commands: &[Command], readings: &mut Vec<Reading>) -> Result<()> {
        let file = match self.devices.get(chip as usize).and_then(Option::as_ref) {
            Some(file) => file,
            None => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{} is not open", self.device_path(chip).display()),
                )
                .into())
            }
        };

        for command in commands {
            let reply = self.transfer(file, command)?;
            let time = clock::try_now_us()?;
            readings.push(Reading {
                time,
                raw: decode_reply(&reply),
            });
        }
        Ok(())
    }
}
