use std::sync::Arc;

use super::background_task::Task;
use super::channel::{ChannelAD, ChannelSum, Measurement};
use super::command::Command;
use super::config::{ChannelDescriptor, Config, VOLTAGE_SUFFIX};
use super::error::{Error, Result};
use super::power;
use super::print::print_power_metrics;
use super::scheduler::RealtimeGuard;
use super::snapshot::{ChannelSnapshot, Publisher, Snapshot, SnapshotHandle};
use super::transport::AdcTransport;
use super::types::{LineTiming, PowerMetrics, Timestamp};

/// Channel a reading is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Voltage,
    Current(usize),
}

/// Commands issued to one chip per sampling round.
#[derive(Debug, Clone)]
struct ChipBatch {
    chip: u32,
    commands: Vec<Command>,
    targets: Vec<Target>,
}

/// Samples the configured channels and computes real power per current channel.
pub struct PowerEngine<T: AdcTransport> {
    timing: LineTiming,
    transport: T,
    voltage: ChannelAD,
    currents: Vec<ChannelAD>,
    shifted: Vec<ChannelAD>, // Voltage as multiplied with each current channel
    sums: Vec<ChannelSum>,
    batches: Vec<ChipBatch>,
    metrics: Vec<PowerMetrics>,
    publishers: Vec<Box<dyn Publisher>>,
    latest: SnapshotHandle,
    ticks: u64,
    realtime_warned: bool,
}

fn build_channel(descriptor: &ChannelDescriptor, config: &Config, time_offset: Timestamp) -> Result<ChannelAD> {
    let factor = descriptor.calibration_factor(config.hardware.reference_voltage)?;
    Ok(
        ChannelAD::new(&descriptor.name, descriptor.chip, descriptor.index, descriptor.offset, factor)?
            .with_time_offset(time_offset),
    )
}

/* Voltage first when it shares the chip, then current channels in configuration order */
fn build_batches(voltage: &ChannelAD, currents: &[ChannelAD]) -> Vec<ChipBatch> {
    let mut batches: Vec<ChipBatch> = Vec::new();
    let channels = std::iter::once((Target::Voltage, voltage))
        .chain(currents.iter().enumerate().map(|(i, c)| (Target::Current(i), c)));

    for (target, channel) in channels {
        let position = match batches.iter().position(|b| b.chip == channel.chip()) {
            Some(position) => position,
            None => {
                batches.push(ChipBatch {
                    chip: channel.chip(),
                    commands: Vec::new(),
                    targets: Vec::new(),
                });
                batches.len() - 1
            }
        };
        batches[position].commands.push(channel.command());
        batches[position].targets.push(target);
    }

    batches.sort_by_key(|b| b.chip);
    batches
}

impl<T: AdcTransport> PowerEngine<T> {
    pub fn new(config: &Config, transport: T) -> Result<Self> {
        config.validate()?;
        let timing = config.timing();
        let hw = &config.hardware;

        log::info!("refVoltage {}", hw.reference_voltage);
        log::info!(
            "line frequency {} Hz, {} periods per burst, CT correction {} deg",
            hw.line_frequency,
            hw.periods_to_read,
            hw.ct_phase_correction_deg
        );

        let vd = &config.voltage_channel;
        let voltage_phase = vd.phase.unwrap_or(0);
        let voltage = build_channel(vd, config, 0)?;
        log::info!(
            "Adding voltage channel {} at {}:{} phase {}",
            vd.name,
            vd.chip,
            vd.index,
            voltage_phase
        );

        log::info!("Adding current channels...");
        let mut currents = Vec::with_capacity(config.current_channels.len());
        let mut shifted = Vec::with_capacity(config.current_channels.len());
        for cd in &config.current_channels {
            let channel = build_channel(cd, config, cd.time_offset(&timing, voltage_phase))?;
            log::info!(
                " {} at {}:{} offset {} factor {} time offset {} us",
                cd.name,
                cd.chip,
                cd.index,
                channel.offset(),
                channel.factor(),
                channel.time_offset()
            );
            currents.push(channel);
            shifted.push(build_channel(
                &ChannelDescriptor {
                    name: format!("{}{}", cd.name, VOLTAGE_SUFFIX),
                    ..vd.clone()
                },
                config,
                0,
            )?);
        }

        log::info!("Adding sum channels...");
        let mut sums = Vec::with_capacity(config.sum_channels.len());
        for sd in &config.sum_channels {
            let mut sum = ChannelSum::new(&sd.name);
            for source in &sd.sources {
                let index = currents
                    .iter()
                    .position(|c| c.name() == source)
                    .ok_or_else(|| Error::UnknownChannel {
                        name: source.clone(),
                        sum: sd.name.clone(),
                    })?;
                sum.add(index);
            }
            log::info!(" {} sources {:?}", sd.name, sd.sources);
            sums.push(sum);
        }

        let batches = build_batches(&voltage, &currents);
        for batch in &batches {
            log::debug!("chip {}: {:?}", batch.chip, batch.commands);
        }
        log::info!("..done");

        Ok(Self {
            timing,
            transport,
            voltage,
            metrics: vec![PowerMetrics::default(); currents.len()],
            currents,
            shifted,
            sums,
            batches,
            publishers: Vec::new(),
            latest: SnapshotHandle::default(),
            ticks: 0,
            realtime_warned: false,
        })
    }

    pub fn with_publisher(mut self, publisher: impl Publisher + 'static) -> Self {
        self.publishers.push(Box::new(publisher));
        self
    }

    pub fn timing(&self) -> &LineTiming {
        &self.timing
    }

    pub fn voltage_channel(&self) -> &ChannelAD {
        &self.voltage
    }

    pub fn current_channels(&self) -> &[ChannelAD] {
        &self.currents
    }

    pub fn sum_channels(&self) -> &[ChannelSum] {
        &self.sums
    }

    /// Metrics of the last computation, in current channel order.
    pub fn metrics(&self) -> &[PowerMetrics] {
        &self.metrics
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Reader for the snapshots published after each tick.
    pub fn snapshots(&self) -> SnapshotHandle {
        self.latest.clone()
    }

    /// Chip selects and read order of each sampling round.
    pub fn command_plan(&self) -> Vec<(u32, Vec<u8>)> {
        self.batches
            .iter()
            .map(|b| (b.chip, b.commands.iter().map(Command::channel).collect()))
            .collect()
    }

    fn channel_mut(&mut self, target: Target) -> &mut ChannelAD {
        match target {
            Target::Voltage => &mut self.voltage,
            Target::Current(index) => &mut self.currents[index],
        }
    }

    /// Fill the sample buffers with one burst of all chips.
    pub fn acquire(&mut self) -> Result<()> {
        self.voltage.clear_samples();
        for channel in &mut self.currents {
            channel.clear_samples();
        }

        let burst_us = self.timing.burst_us();
        let mut readings = Vec::new();

        // Real time priority for the burst only
        let guard = RealtimeGuard::elevate();
        if !guard.elevated() && !self.realtime_warned {
            log::warn!("Sampling without real time priority, power values may jitter");
            self.realtime_warned = true;
        }

        let start = self.transport.now()?;
        loop {
            let now = self.transport.now()?;

            for b in 0..self.batches.len() {
                readings.clear();
                let (chip, expected) = (self.batches[b].chip, self.batches[b].commands.len());
                self.transport.read(chip, &self.batches[b].commands, &mut readings)?;
                if readings.len() < expected {
                    return Err(Error::ShortRead {
                        chip,
                        expected,
                        received: readings.len(),
                    });
                }

                for (i, reading) in readings.iter().enumerate().take(expected) {
                    let target = self.batches[b].targets[i];
                    self.channel_mut(target).set_sample(reading.time, reading.raw);
                }
            }

            if now - start >= burst_us {
                break;
            }
        }
        drop(guard);

        log::debug!(
            "Burst done, {} voltage samples in {} us",
            self.voltage.sample_count(),
            self.transport.now()? - start
        );
        Ok(())
    }

    /// Integrate power for every current channel, then update the sums.
    ///
    /// Channel values change only when every channel could be integrated.
    pub fn compute(&mut self) -> Result<()> {
        let voltage_rms = power::calculate_rms(&self.voltage, &self.timing)?;

        let mut results = Vec::with_capacity(self.currents.len());
        for current in &self.currents {
            let mut shifted = Vec::with_capacity(current.sample_count());
            let metrics = power::calculate_power_metrics(current, &self.voltage, &self.timing, &mut shifted)?;
            results.push((metrics, shifted));
        }

        self.voltage.set(voltage_rms);
        for (i, (metrics, samples)) in results.into_iter().enumerate() {
            let current = &mut self.currents[i];
            current.set(metrics.real_power);
            print_power_metrics(current.name(), &metrics);

            let shifted = &mut self.shifted[i];
            shifted.replace_samples(samples);
            shifted.set(metrics.voltage_rms);
            self.metrics[i] = metrics;
        }

        for sum in &mut self.sums {
            sum.update(&self.currents);
        }
        Ok(())
    }

    /// Copy of every channel: voltage, currents, shifted voltages, sums.
    pub fn snapshot(&self) -> Snapshot {
        let channels = std::iter::once(&self.voltage)
            .chain(&self.currents)
            .chain(&self.shifted)
            .map(ChannelSnapshot::from)
            .chain(self.sums.iter().map(ChannelSnapshot::from))
            .collect();

        Snapshot {
            tick: self.ticks,
            channels,
        }
    }

    fn publish(&mut self) {
        let snapshot = Arc::new(self.snapshot());
        self.latest.store(Arc::clone(&snapshot));

        for publisher in &mut self.publishers {
            if let Err(e) = publisher.publish(&snapshot) {
                log::error!("Failed to publish tick {}: {}", snapshot.tick, e);
            }
        }
    }

    /// One complete cycle: burst, computation, publication.
    pub fn tick(&mut self) -> Result<()> {
        self.acquire()?;
        self.compute()?;
        self.ticks += 1;
        self.publish();
        Ok(())
    }
}

impl<T: AdcTransport + 'static> Task for PowerEngine<T> {
    fn pre_start(&mut self) -> Result<()> {
        self.transport.open()
    }

    fn post_stop(&mut self) {
        self.transport.close();
    }

    fn run(&mut self) -> Result<()> {
        self.tick()
    }
}
