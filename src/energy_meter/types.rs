use serde::Serialize;

pub const FREQ_NOMINAL_50: f64 = 50.0;
pub const FREQ_NOMINAL_60: f64 = 60.0;

pub const DEFAULT_PERIODS_TO_READ: u32 = 20;

/* CT sensor phase lag at line frequency (YHDC SCT-013 report: about 7 degrees) */
pub const DEFAULT_CT_PHASE_CORRECTION_DEG: f64 = 7.0;

/* Extra periods sampled around the integration window for phase shifted lookups */
pub const MARGIN_PERIODS: u32 = 2;

/// Microseconds on the monotonic clock.
pub type Timestamp = i64;

/// One calibrated sample of an analog channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    pub time: Timestamp,
    pub value: f64,
}

/// One conversion result as delivered by a transport, before calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub time: Timestamp,
    pub raw: f64,
}

/// Timing constants derived from the line frequency.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineTiming {
    pub line_frequency: f64,
    pub periods_to_read: u32,
    pub ct_phase_correction_deg: f64,
}

impl Default for LineTiming {
    fn default() -> Self {
        Self {
            line_frequency: FREQ_NOMINAL_50,
            periods_to_read: DEFAULT_PERIODS_TO_READ,
            ct_phase_correction_deg: DEFAULT_CT_PHASE_CORRECTION_DEG,
        }
    }
}

impl LineTiming {
    pub fn period_us(&self) -> Timestamp {
        (1_000_000.0 / self.line_frequency).round() as Timestamp
    }

    /// Time shift compensating the CT phase lag.
    pub fn phase_correction_us(&self) -> Timestamp {
        (self.period_us() as f64 * self.ct_phase_correction_deg / 360.0).round() as Timestamp
    }

    /// Length of one acquisition burst (+2 periods for phase correction).
    pub fn burst_us(&self) -> Timestamp {
        self.period_us() * (self.periods_to_read + MARGIN_PERIODS) as Timestamp
    }

    /// Integration window, starting one period after the first sample.
    pub fn window(&self, first_sample: Timestamp) -> (Timestamp, Timestamp) {
        let start = first_sample + self.period_us();
        (start, start + self.period_us() * self.periods_to_read as Timestamp)
    }

    /// Time offset of a channel on grid phase `phase` against a voltage reference on `voltage_phase`.
    pub fn phase_offset_us(&self, voltage_phase: u8, phase: u8) -> Timestamp {
        self.period_us() * (voltage_phase as Timestamp - phase as Timestamp) / 3
    }
}

/// Result of integrating one current channel against the voltage reference.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PowerMetrics {
    pub real_power: f64,
    pub voltage_rms: f64,
    pub current_rms: f64,
    pub apparent_power: f64,
    pub power_factor: f64,
    pub samples: usize,
    pub out_of_range: usize, // Voltage lookups outside of the captured range
}
