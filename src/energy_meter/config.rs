use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::command::MAX_CHANNEL_INDEX;
use super::error::{Error, Result};
use super::spi::DEFAULT_SPI_SPEED_HZ;
use super::types::{LineTiming, Timestamp, DEFAULT_CT_PHASE_CORRECTION_DEG, DEFAULT_PERIODS_TO_READ, FREQ_NOMINAL_50};

pub const DEFAULT_CONFIG_PATH: &str = "config.json";
pub const DEFAULT_UPDATE_PERIOD_SECS: u64 = 10;
pub const DEFAULT_REFERENCE_VOLTAGE: f64 = 3.3;

/* Turns ratio of the SCT-013 current transformers */
pub const DEFAULT_CT_TURNS: f64 = 1860.0;

/* Grid phases L1..L3 */
const MAX_PHASE: u8 = 2;

pub const VOLTAGE_SUFFIX: &str = "_voltage";

fn default_reference_voltage() -> f64 {
    DEFAULT_REFERENCE_VOLTAGE
}

fn default_line_frequency() -> f64 {
    FREQ_NOMINAL_50
}

fn default_periods_to_read() -> u32 {
    DEFAULT_PERIODS_TO_READ
}

fn default_ct_phase_correction_deg() -> f64 {
    DEFAULT_CT_PHASE_CORRECTION_DEG
}

fn default_spi_speed_hz() -> u32 {
    DEFAULT_SPI_SPEED_HZ
}

fn default_update_period_secs() -> u64 {
    DEFAULT_UPDATE_PERIOD_SECS
}

fn default_ct_turns() -> f64 {
    DEFAULT_CT_TURNS
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HardwareConfig {
    #[serde(default = "default_reference_voltage")]
    pub reference_voltage: f64,
    #[serde(default = "default_line_frequency")]
    pub line_frequency: f64,
    #[serde(default = "default_periods_to_read")]
    pub periods_to_read: u32,
    #[serde(default = "default_ct_phase_correction_deg")]
    pub ct_phase_correction_deg: f64,
    #[serde(default = "default_spi_speed_hz")]
    pub spi_speed_hz: u32,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            reference_voltage: DEFAULT_REFERENCE_VOLTAGE,
            line_frequency: FREQ_NOMINAL_50,
            periods_to_read: DEFAULT_PERIODS_TO_READ,
            ct_phase_correction_deg: DEFAULT_CT_PHASE_CORRECTION_DEG,
            spi_speed_hz: DEFAULT_SPI_SPEED_HZ,
        }
    }
}

/// One analog input.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelDescriptor {
    pub name: String,
    pub chip: u32,
    pub index: u8,
    #[serde(default)]
    pub offset: f64,
    /// Calibration factor, or derive it from `burden_ohms`
    #[serde(default)]
    pub factor: Option<f64>,
    #[serde(default)]
    pub burden_ohms: Option<f64>,
    #[serde(default = "default_ct_turns")]
    pub ct_turns: f64,
    /// Grid phase (0-2) the input is wired to
    #[serde(default)]
    pub phase: Option<u8>,
    /// Explicit phase compensation, wins over `phase`
    #[serde(default)]
    pub time_offset_us: Option<Timestamp>,
}

impl ChannelDescriptor {
    pub fn new(name: impl Into<String>, chip: u32, index: u8, offset: f64, factor: f64) -> Self {
        Self {
            name: name.into(),
            chip,
            index,
            offset,
            factor: Some(factor),
            burden_ohms: None,
            ct_turns: DEFAULT_CT_TURNS,
            phase: None,
            time_offset_us: None,
        }
    }

    pub fn with_time_offset(mut self, time_offset_us: Timestamp) -> Self {
        self.time_offset_us = Some(time_offset_us);
        self
    }

    pub fn with_phase(mut self, phase: u8) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Calibration factor, from `factor` or from the CT burden resistor: (Uref / R) * turns.
    pub fn calibration_factor(&self, reference_voltage: f64) -> Result<f64> {
        match (self.factor, self.burden_ohms) {
            (Some(factor), _) => Ok(factor),
            (None, Some(ohms)) if ohms > 0.0 => Ok(reference_voltage * self.ct_turns / ohms),
            (None, Some(ohms)) => Err(Error::Config(format!(
                "channel {} has invalid burden resistance {}",
                self.name, ohms
            ))),
            (None, None) => Err(Error::Config(format!(
                "channel {} needs either factor or burden_ohms",
                self.name
            ))),
        }
    }

    /// Phase compensation against a voltage reference wired to `voltage_phase`.
    pub fn time_offset(&self, timing: &LineTiming, voltage_phase: u8) -> Timestamp {
        match (self.time_offset_us, self.phase) {
            (Some(offset), _) => offset,
            (None, Some(phase)) => timing.phase_offset_us(voltage_phase, phase),
            (None, None) => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SumDescriptor {
    pub name: String,
    pub sources: Vec<String>,
}

/// Daemon configuration, loaded once at start.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default = "default_update_period_secs")]
    pub update_period_secs: u64,
    pub voltage_channel: ChannelDescriptor,
    #[serde(default)]
    pub current_channels: Vec<ChannelDescriptor>,
    #[serde(default)]
    pub sum_channels: Vec<SumDescriptor>,
}

impl Config {
    pub fn new(voltage_channel: ChannelDescriptor) -> Self {
        Self {
            hardware: HardwareConfig::default(),
            update_period_secs: DEFAULT_UPDATE_PERIOD_SECS,
            voltage_channel,
            current_channels: Vec::new(),
            sum_channels: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&text)?;
        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn timing(&self) -> LineTiming {
        LineTiming {
            line_frequency: self.hardware.line_frequency,
            periods_to_read: self.hardware.periods_to_read,
            ct_phase_correction_deg: self.hardware.ct_phase_correction_deg,
        }
    }

    pub fn update_period(&self) -> Duration {
        Duration::from_secs(self.update_period_secs)
    }

    /// Distinct chip selects in use.
    pub fn chips(&self) -> Vec<u32> {
        let mut chips: Vec<u32> = std::iter::once(&self.voltage_channel)
            .chain(&self.current_channels)
            .map(|c| c.chip)
            .collect();
        chips.sort_unstable();
        chips.dedup();
        chips
    }

    pub fn validate(&self) -> Result<()> {
        let hw = &self.hardware;
        if !(hw.line_frequency > 0.0) || !hw.line_frequency.is_finite() {
            return Err(Error::Config(format!("invalid line frequency {}", hw.line_frequency)));
        }
        if self.timing().period_us() < 1 {
            return Err(Error::Config(format!(
                "line frequency {} Hz has no period in whole microseconds",
                hw.line_frequency
            )));
        }
        if hw.periods_to_read == 0 {
            return Err(Error::Config("periods_to_read must be at least 1".into()));
        }
        if self.update_period_secs == 0 {
            return Err(Error::Config("update period must be positive".into()));
        }

        let mut names = HashSet::new();
        for channel in std::iter::once(&self.voltage_channel).chain(&self.current_channels) {
            if channel.index > MAX_CHANNEL_INDEX {
                return Err(Error::InvalidChannelIndex(channel.index));
            }
            if let Some(phase) = channel.phase {
                if phase > MAX_PHASE {
                    return Err(Error::Config(format!("channel {} has invalid phase {}", channel.name, phase)));
                }
            }
            channel.calibration_factor(hw.reference_voltage)?;
            if !names.insert(channel.name.clone()) {
                return Err(Error::DuplicateChannel(channel.name.clone()));
            }
        }

        // Each current channel carries a diagnostic copy of the voltage it was multiplied with
        for channel in &self.current_channels {
            let name = format!("{}{}", channel.name, VOLTAGE_SUFFIX);
            if !names.insert(name.clone()) {
                return Err(Error::DuplicateChannel(name));
            }
        }

        for sum in &self.sum_channels {
            if !names.insert(sum.name.clone()) {
                return Err(Error::DuplicateChannel(sum.name.clone()));
            }
            if sum.sources.is_empty() {
                return Err(Error::Config(format!("sum channel {} has no sources", sum.name)));
            }
            for source in &sum.sources {
                if !self.current_channels.iter().any(|c| &c.name == source) {
                    return Err(Error::UnknownChannel {
                        name: source.clone(),
                        sum: sum.name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "hardware": { "reference_voltage": 3.3, "line_frequency": 50.0, "periods_to_read": 10 },
        "update_period_secs": 5,
        "voltage_channel": { "name": "L1", "chip": 1, "index": 7, "offset": -0.5, "factor": 100.0, "phase": 0 },
        "current_channels": [
            { "name": "I0", "chip": 0, "index": 0, "offset": -0.5, "factor": 30.0 },
            { "name": "I1", "chip": 0, "index": 1, "offset": -0.5, "burden_ohms": 62.0, "phase": 1 },
            { "name": "I2", "chip": 1, "index": 2, "offset": -0.5, "factor": 30.0, "time_offset_us": 250 }
        ],
        "sum_channels": [ { "name": "total", "sources": ["I0", "I1", "I2"] } ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let config = Config::from_json(SAMPLE).unwrap();
        assert_eq!(config.update_period(), Duration::from_secs(5));
        assert_eq!(config.timing().periods_to_read, 10);
        assert_eq!(config.timing().ct_phase_correction_deg, DEFAULT_CT_PHASE_CORRECTION_DEG);
        assert_eq!(config.chips(), vec![0, 1]);
        assert_eq!(config.current_channels.len(), 3);
        assert_eq!(config.sum_channels[0].sources.len(), 3);
    }

    #[test]
    fn test_calibration_factor_from_burden() {
        let config = Config::from_json(SAMPLE).unwrap();
        let i1 = &config.current_channels[1];
        let factor = i1.calibration_factor(config.hardware.reference_voltage).unwrap();
        assert!((factor - 3.3 * 1860.0 / 62.0).abs() < 1e-9);
    }

    #[test]
    fn test_time_offsets() {
        let config = Config::from_json(SAMPLE).unwrap();
        let timing = config.timing();
        let offsets: Vec<Timestamp> = config
            .current_channels
            .iter()
            .map(|c| c.time_offset(&timing, 0))
            .collect();
        assert_eq!(offsets, vec![0, -6_666, 250]);
    }

    #[test]
    fn test_unknown_sum_source() {
        let text = SAMPLE.replace(r#"["I0", "I1", "I2"]"#, r#"["I0", "I9"]"#);
        match Config::from_json(&text) {
            Err(Error::UnknownChannel { name, sum }) => {
                assert_eq!(name, "I9");
                assert_eq!(sum, "total");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sum_of_voltage_channel_is_unknown() {
        let text = SAMPLE.replace(r#"["I0", "I1", "I2"]"#, r#"["L1"]"#);
        assert!(matches!(Config::from_json(&text), Err(Error::UnknownChannel { .. })));
    }

    #[test]
    fn test_rejects_invalid_values() {
        let cases = [
            SAMPLE.replace(r#""periods_to_read": 10"#, r#""periods_to_read": 0"#),
            SAMPLE.replace(r#""line_frequency": 50.0"#, r#""line_frequency": 0.0"#),
            SAMPLE.replace(r#""update_period_secs": 5"#, r#""update_period_secs": 0"#),
            SAMPLE.replace(r#""index": 7"#, r#""index": 8"#),
            SAMPLE.replace(r#""phase": 1"#, r#""phase": 3"#),
            SAMPLE.replace(r#", "burden_ohms": 62.0"#, ""),
            SAMPLE.replace(r#"["I0", "I1", "I2"]"#, "[]"),
        ];
        for text in &cases {
            assert!(Config::from_json(text).is_err(), "accepted {}", text);
        }
    }

    #[test]
    fn test_line_period_resolution() {
        let text = SAMPLE.replace(r#""line_frequency": 50.0"#, r#""line_frequency": 3e6"#);
        assert!(matches!(Config::from_json(&text), Err(Error::Config(_))));

        // Rounds up to a 1 us period, still usable
        let text = SAMPLE.replace(r#""line_frequency": 50.0"#, r#""line_frequency": 7e5"#);
        assert_eq!(Config::from_json(&text).unwrap().timing().period_us(), 1);
    }

    #[test]
    fn test_duplicate_names() {
        let text = SAMPLE.replace(r#""name": "I2""#, r#""name": "I0""#);
        assert!(matches!(Config::from_json(&text), Err(Error::DuplicateChannel(n)) if n == "I0"));

        let text = SAMPLE.replace(r#""name": "total""#, r#""name": "I1_voltage""#);
        assert!(matches!(Config::from_json(&text), Err(Error::DuplicateChannel(n)) if n == "I1_voltage"));
    }

    #[test]
    fn test_parse_error_and_missing_file() {
        assert!(matches!(Config::from_json("{"), Err(Error::ConfigParse(_))));
        assert!(matches!(
            Config::load("/nonexistent/config.json"),
            Err(Error::ConfigRead { .. })
        ));
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_json(
            r#"{ "voltage_channel": { "name": "L1", "chip": 1, "index": 7, "offset": -0.5, "factor": 100.0 } }"#,
        )
        .unwrap();
        assert_eq!(config.hardware, HardwareConfig::default());
        assert_eq!(config.update_period(), Duration::from_secs(DEFAULT_UPDATE_PERIOD_SECS));
        assert!(config.current_channels.is_empty());
    }
}
