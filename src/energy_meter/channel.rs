use serde::Serialize;

use super::clock;
use super::command::Command;
use super::error::Result;
use super::types::{Sample, Timestamp};

/// Capabilities shared by every kind of channel.
pub trait Measurement {
    fn name(&self) -> &str;
    fn value(&self) -> f64;
    fn timestamp(&self) -> Timestamp;
    fn set(&mut self, value: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ChannelKind {
    Scalar,
    Analog,
    Sum,
}

/// Latest value channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    name: String,
    value: f64,
    timestamp: Timestamp,
}

impl Channel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: 0.0,
            timestamp: 0,
        }
    }
}

impl Measurement for Channel {
    fn name(&self) -> &str {
        &self.name
    }

    fn value(&self) -> f64 {
        self.value
    }

    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    fn set(&mut self, value: f64) {
        self.value = value;
        self.timestamp = clock::now_us();
    }
}

/// Analog channel of one ADC chip, holding the samples of the last burst.
#[derive(Debug, Clone)]
pub struct ChannelAD {
    base: Channel,
    chip: u32,                   // Chip select line
    command: Command,            // Read request for the channel index
    offset: f64,                 // Added to the raw code
    factor: f64,                 // Applied after the offset
    time_offset: Timestamp,      // Phase compensation against the voltage reference
    samples: Vec<Sample>,        // Calibrated samples, non-decreasing in time
}

impl ChannelAD {
    pub fn new(name: impl Into<String>, chip: u32, index: u8, offset: f64, factor: f64) -> Result<Self> {
        Ok(Self {
            base: Channel::new(name),
            chip,
            command: Command::new(index)?,
            offset,
            factor,
            time_offset: 0,
            samples: Vec::new(),
        })
    }

    pub fn with_time_offset(mut self, time_offset: Timestamp) -> Self {
        self.time_offset = time_offset;
        self
    }

    pub fn chip(&self) -> u32 {
        self.chip
    }

    pub fn index(&self) -> u8 {
        self.command.channel()
    }

    pub fn command(&self) -> Command {
        self.command
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn time_offset(&self) -> Timestamp {
        self.time_offset
    }

    pub fn calibrate(&self, raw: f64) -> f64 {
        (raw + self.offset) * self.factor
    }

    pub fn clear_samples(&mut self) {
        self.samples.clear();
    }

    /// Append a raw conversion result, calibrated.
    pub fn set_sample(&mut self, time: Timestamp, raw: f64) {
        let value = self.calibrate(raw);
        self.push_sample(time, value);
    }

    /// Append an already calibrated value.
    pub fn push_sample(&mut self, time: Timestamp, value: f64) {
        debug_assert!(self.samples.last().map_or(true, |s| s.time <= time));
        self.samples.push(Sample { time, value });
    }

    /// Swap in a complete buffer, non-decreasing in time.
    pub fn replace_samples(&mut self, samples: Vec<Sample>) {
        debug_assert!(samples.windows(2).all(|w| w[0].time <= w[1].time));
        self.samples = samples;
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn first_time(&self) -> Option<Timestamp> {
        self.samples.first().map(|s| s.time)
    }

    pub fn last_time(&self) -> Option<Timestamp> {
        self.samples.last().map(|s| s.time)
    }

    /// True when `time` lies within the captured samples.
    pub fn covers(&self, time: Timestamp) -> bool {
        match (self.first_time(), self.last_time()) {
            (Some(first), Some(last)) => time >= first && time <= last,
            _ => false,
        }
    }

    /*
    * @brief Value of the channel at an arbitrary time.
    * @param time Time on the sample clock
    * @return Linear interpolation between the bracketing samples, the first or
    *         last sample value outside of the captured range, 0 without samples
    */
    pub fn sample_at_time(&self, time: Timestamp) -> f64 {
        let samples = &self.samples;
        let (first, last) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 0.0,
        };

        if time <= first.time {
            return first.value;
        }
        if time >= last.time {
            return last.value;
        }

        // First sample strictly after `time`, never 0 and never past the end here
        let upper = samples.partition_point(|s| s.time <= time);
        let s1 = samples[upper - 1];
        let s2 = samples[upper];

        let dt = s2.time - s1.time;
        if dt == 0 {
            return s1.value;
        }
        s1.value + (s2.value - s1.value) * (time - s1.time) as f64 / dt as f64
    }
}

impl Measurement for ChannelAD {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn value(&self) -> f64 {
        self.base.value()
    }

    fn timestamp(&self) -> Timestamp {
        self.base.timestamp()
    }

    fn set(&mut self, value: f64) {
        self.base.set(value)
    }
}

/// Derived channel summing other channels of the engine.
///
/// Sources are indices into the current channel list, so the sum never owns them.
#[derive(Debug, Clone)]
pub struct ChannelSum {
    base: Channel,
    sources: Vec<usize>,
}

impl ChannelSum {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            base: Channel::new(name),
            sources: Vec::new(),
        }
    }

    pub fn add(&mut self, source: usize) {
        self.sources.push(source);
    }

    pub fn sources(&self) -> &[usize] {
        &self.sources
    }

    /// Recompute the value from the latest values of the sources.
    pub fn update<M: Measurement>(&mut self, channels: &[M]) {
        let sum = self
            .sources
            .iter()
            .filter_map(|&index| channels.get(index))
            .map(|channel| channel.value())
            .sum();
        self.base.set(sum);
    }
}

impl Measurement for ChannelSum {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn value(&self) -> f64 {
        self.base.value()
    }

    fn timestamp(&self) -> Timestamp {
        self.base.timestamp()
    }

    fn set(&mut self, value: f64) {
        self.base.set(value)
    }
}

/// Any channel, for storage in one collection.
#[derive(Debug, Clone)]
pub enum AnyChannel {
    Scalar(Channel),
    Analog(ChannelAD),
    Sum(ChannelSum),
}

impl AnyChannel {
    pub fn kind(&self) -> ChannelKind {
        match self {
            AnyChannel::Scalar(_) => ChannelKind::Scalar,
            AnyChannel::Analog(_) => ChannelKind::Analog,
            AnyChannel::Sum(_) => ChannelKind::Sum,
        }
    }

    fn inner(&self) -> &dyn Measurement {
        match self {
            AnyChannel::Scalar(c) => c,
            AnyChannel::Analog(c) => c,
            AnyChannel::Sum(c) => c,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Measurement {
        match self {
            AnyChannel::Scalar(c) => c,
            AnyChannel::Analog(c) => c,
            AnyChannel::Sum(c) => c,
        }
    }

    pub fn samples(&self) -> &[Sample] {
        match self {
            AnyChannel::Analog(c) => c.samples(),
            _ => &[],
        }
    }
}

impl Measurement for AnyChannel {
    fn name(&self) -> &str {
        self.inner().name()
    }

    fn value(&self) -> f64 {
        self.inner().value()
    }

    fn timestamp(&self) -> Timestamp {
        self.inner().timestamp()
    }

    fn set(&mut self, value: f64) {
        self.inner_mut().set(value)
    }
}
