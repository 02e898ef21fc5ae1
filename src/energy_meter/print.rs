use super::channel::ChannelKind;
use super::error::Result;
use super::snapshot::{Publisher, Snapshot};
use super::types::PowerMetrics;

/*
* @brief Print the power metrics of one current channel.
* @param name Name of the current channel
* @param metrics Metrics computed in the last tick
*/
pub fn print_power_metrics(name: &str, metrics: &PowerMetrics) {
    log::debug!("{}:", name);
    log::debug!("  Active: {:.3} W", metrics.real_power);
    log::debug!("  Apparent: {:.3} VA", metrics.apparent_power);
    log::debug!("  Factor: {:.3}", metrics.power_factor);
    log::debug!("  U RMS: {:.3} V", metrics.voltage_rms);
    log::debug!("  I RMS: {:.3} A", metrics.current_rms);
    log::debug!("  Samples: {} ({} out of range)", metrics.samples, metrics.out_of_range);
}

/*
* @brief Print all channel values of a snapshot.
* @param snapshot Channels after a tick
*/
pub fn print_snapshot(snapshot: &Snapshot) {
    log::info!("Tick {}:", snapshot.tick);
    for channel in &snapshot.channels {
        match channel.kind {
            ChannelKind::Analog => log::info!(
                "  {}: {:.3} ({} samples)",
                channel.name,
                channel.value,
                channel.samples.len()
            ),
            ChannelKind::Scalar | ChannelKind::Sum => log::info!("  {}: {:.3}", channel.name, channel.value),
        }
    }
}

/// Reports every snapshot to the log.
#[derive(Debug, Default)]
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<()> {
        print_snapshot(snapshot);
        Ok(())
    }
}
