use std::collections::HashMap;
use std::f64::consts::PI;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::clock;
use super::command::Command;
use super::error::{Error, Result};
use super::types::{Reading, Timestamp, FREQ_NOMINAL_50};

/// Access to the ADC chips.
pub trait AdcTransport: Send {
    /// Setup hook, called before the engine worker starts.
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    /// Teardown hook, called after the engine worker stopped.
    fn close(&mut self) {}

    /// Current time on the clock readings are stamped with.
    fn now(&mut self) -> Result<Timestamp> {
        clock::try_now_us()
    }

    /// Convert every command on `chip` and append one reading per command, in order.
    fn read(&mut self, chip: u32, commands: &[Command], readings: &mut Vec<Reading>) -> Result<()>;
}

impl<T: AdcTransport + ?Sized> AdcTransport for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn now(&mut self) -> Result<Timestamp> {
        (**self).now()
    }

    fn read(&mut self, chip: u32, commands: &[Command], readings: &mut Vec<Reading>) -> Result<()> {
        (**self).read(chip, commands, readings)
    }
}

/* Mid scale of a unipolar ADC whose inputs are biased to half the reference voltage */
pub const MID_SCALE: f64 = 0.5;

/// Sine wave on one synthetic input, in normalized ADC units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Waveform {
    pub dc: f64,
    pub amplitude: f64,
    pub phase_deg: f64,
}

impl Waveform {
    pub fn sine(amplitude: f64) -> Self {
        Self {
            dc: MID_SCALE,
            amplitude,
            phase_deg: 0.0,
        }
    }

    /*
    * @brief Waveform producing a given RMS value once calibrated.
    * @param rms RMS value in physical units
    * @param offset Calibration offset of the reading channel
    * @param factor Calibration factor of the reading channel
    */
    pub fn for_rms(rms: f64, offset: f64, factor: f64) -> Self {
        Self {
            dc: -offset,
            amplitude: rms * 2f64.sqrt() / factor,
            phase_deg: 0.0,
        }
    }

    pub fn with_phase(mut self, phase_deg: f64) -> Self {
        self.phase_deg = phase_deg;
        self
    }

    fn at(&self, seconds: f64, frequency: f64) -> f64 {
        self.dc + self.amplitude * (2.0 * PI * frequency * seconds + self.phase_deg.to_radians()).sin()
    }
}

/// Signal generator standing in for the ADC chips.
pub struct SyntheticTransport {
    frequency: f64,
    waves: HashMap<(u32, u8), Waveform>,
    conversion_time: Duration,
    noise: f64,
    rng: StdRng,
    start: Option<Timestamp>,
    virtual_time: Option<Timestamp>, // Replaces the monotonic clock when set
    fail_reads: bool,
    short_reads: bool,
}

impl Default for SyntheticTransport {
    fn default() -> Self {
        Self::new(FREQ_NOMINAL_50)
    }
}

impl SyntheticTransport {
    pub fn new(frequency: f64) -> Self {
        Self {
            frequency,
            waves: HashMap::new(),
            conversion_time: Duration::from_micros(50),
            noise: 0.0,
            rng: StdRng::seed_from_u64(0x5eed),
            start: None,
            virtual_time: None,
            fail_reads: false,
            short_reads: false,
        }
    }

    pub fn with_channel(mut self, chip: u32, index: u8, wave: Waveform) -> Self {
        self.waves.insert((chip, index), wave);
        self
    }

    /// Busy wait per conversion, emulating the bus transfer.
    pub fn with_conversion_time(mut self, conversion_time: Duration) -> Self {
        self.conversion_time = conversion_time;
        self
    }

    /// Stamp readings on a simulated clock that advances by `step` per conversion.
    ///
    /// Nothing sleeps, sample spacing is exact and bursts run as fast as the host allows.
    pub fn with_virtual_clock(mut self, step: Duration) -> Self {
        self.conversion_time = step.max(Duration::from_micros(1));
        self.virtual_time = Some(0);
        self
    }

    /// Uniform noise of +- `noise` normalized units added to every conversion.
    pub fn with_noise(mut self, noise: f64, seed: u64) -> Self {
        self.noise = noise;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Every read fails as a bus error would.
    pub fn failing(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    /// Every read drops its last reading.
    pub fn short_reads(mut self) -> Self {
        self.short_reads = true;
        self
    }

    /// Bench preset: line voltage on chip 1 input 7, seven CT inputs on chip 0.
    pub fn bench(frequency: f64) -> Self {
        let mut transport = Self::new(frequency).with_noise(0.002, 1);
        for index in 0..7u8 {
            transport = transport.with_channel(0, index, Waveform::sine(0.05 * (index + 1) as f64));
        }
        transport.with_channel(1, 7, Waveform::for_rms(230.0, -MID_SCALE, 100.0))
    }
}

impl AdcTransport for SyntheticTransport {
    fn open(&mut self) -> Result<()> {
        self.start = Some(self.now()?);
        log::info!("Running in simulation mode, {} Hz", self.frequency);
        Ok(())
    }

    fn now(&mut self) -> Result<Timestamp> {
        match self.virtual_time {
            Some(time) => Ok(time),
            None => clock::try_now_us(),
        }
    }

    fn read(&mut self, chip: u32, commands: &[Command], readings: &mut Vec<Reading>) -> Result<()> {
        if self.fail_reads {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("synthetic bus timeout on chip {}", chip),
            )));
        }

        let start = match self.start {
            Some(start) => start,
            None => {
                let now = self.now()?;
                *self.start.insert(now)
            }
        };
        let count = if self.short_reads {
            commands.len().saturating_sub(1)
        } else {
            commands.len()
        };

        for command in &commands[..count] {
            let time = match self.virtual_time.as_mut() {
                Some(time) => {
                    *time += self.conversion_time.as_micros() as Timestamp;
                    *time
                }
                None => {
                    if !self.conversion_time.is_zero() {
                        spin_sleep::sleep(self.conversion_time);
                    }
                    clock::try_now_us()?
                }
            };
            let seconds = (time - start) as f64 / 1_000_000.0;
            let wave = self
                .waves
                .get(&(chip, command.channel()))
                .copied()
                .unwrap_or(Waveform::sine(0.0));
            let mut raw = wave.at(seconds, self.frequency);
            if self.noise > 0.0 {
                raw += self.rng.gen_range(-self.noise..=self.noise);
            }
            readings.push(Reading { time, raw });
        }

        Ok(())
    }
}
