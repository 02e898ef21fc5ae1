use super::channel::{ChannelAD, Measurement};
use super::error::{Error, Result};
use super::types::{LineTiming, PowerMetrics, Sample, Timestamp};

/*
* @brief Check that a channel covers the integration window.
* @param channel Channel holding the samples of the last burst
* @param timing Line timing
* @return Window start and end
* @note A short burst skips the tick instead of integrating a partial window.
*/
fn integration_window(channel: &ChannelAD, timing: &LineTiming) -> Result<(Timestamp, Timestamp)> {
    let (first, last) = match (channel.first_time(), channel.last_time()) {
        (Some(first), Some(last)) if channel.sample_count() >= 2 => (first, last),
        _ => {
            return Err(Error::NoSamples {
                channel: channel.name().to_string(),
            })
        }
    };

    let (start, end) = timing.window(first);
    if last < end {
        return Err(Error::InsufficientSamples {
            channel: channel.name().to_string(),
            needed_until: end,
            last_sample: last,
        });
    }

    Ok((start, end))
}

/*
* @brief Calculate real power, RMS values and power factor of a current channel.
* @param current Current channel with the samples of the last burst
* @param voltage Shared voltage reference of the same burst
* @param timing Line timing
* @param shifted Cleared, then receives the phase shifted voltage samples that were multiplied
* @return Power metrics of the channel
* @note Voltage lookups outside of the captured voltage range are counted and
*       logged, the value is taken from the nearest end of the voltage buffer.
*/
pub fn calculate_power_metrics(
    current: &ChannelAD,
    voltage: &ChannelAD,
    timing: &LineTiming,
    shifted: &mut Vec<Sample>,
) -> Result<PowerMetrics> {
    let (start, end) = integration_window(current, timing)?;
    let shift = current.time_offset() - timing.phase_correction_us();

    let mut metrics = PowerMetrics::default();
    let mut power = 0.0;
    let mut v_square = 0.0;
    let mut i_square = 0.0;
    let mut first_out_of_range: Option<Timestamp> = None;

    shifted.clear();
    for pair in current.samples().windows(2) {
        let (sample, next) = (pair[0], pair[1]);
        if sample.time < start {
            continue;
        }
        // Next sample beyond the window, done
        if next.time > end {
            break;
        }

        let dt = (next.time - sample.time) as f64;
        let voltage_time = sample.time + shift;
        if !voltage.covers(voltage_time) {
            metrics.out_of_range += 1;
            first_out_of_range.get_or_insert(voltage_time);
        }
        let u = voltage.sample_at_time(voltage_time);
        let i = sample.value;
        shifted.push(Sample { time: voltage_time, value: u });

        power += u * i * dt;
        v_square += u * u * dt;
        i_square += i * i * dt;
        metrics.samples += 1;
    }

    if let Some(time) = first_out_of_range {
        log::warn!(
            "{}: {} voltage lookups out of range ({}, {}), first at {}",
            current.name(),
            metrics.out_of_range,
            voltage.first_time().unwrap_or(0),
            voltage.last_time().unwrap_or(0),
            time
        );
    }

    let inv_range = 1.0 / (end - start) as f64;
    metrics.real_power = power * inv_range;
    metrics.voltage_rms = (v_square * inv_range).sqrt();
    metrics.current_rms = (i_square * inv_range).sqrt();
    metrics.apparent_power = calculate_apparent_power(metrics.voltage_rms, metrics.current_rms);
    metrics.power_factor = calculate_power_factor(metrics.apparent_power, metrics.real_power);

    Ok(metrics)
}

/*
* @brief Calculate the RMS value of a channel over the integration window.
* @param channel Channel with the samples of the last burst
* @param timing Line timing
* @return RMS value in calibrated units
*/
pub fn calculate_rms(channel: &ChannelAD, timing: &LineTiming) -> Result<f64> {
    let (start, end) = integration_window(channel, timing)?;

    let mut square = 0.0;
    for pair in channel.samples().windows(2) {
        let (sample, next) = (pair[0], pair[1]);
        if sample.time < start {
            continue;
        }
        if next.time > end {
            break;
        }
        square += sample.value * sample.value * (next.time - sample.time) as f64;
    }

    Ok((square / (end - start) as f64).sqrt())
}

pub fn calculate_apparent_power(voltage_rms: f64, current_rms: f64) -> f64 {
    voltage_rms * current_rms
}

pub fn calculate_power_factor(apparent_power: f64, real_power: f64) -> f64 {
    if apparent_power == 0.0 {
        // cannot calculate power factor
        return 0.0;
    }
    (real_power / apparent_power).clamp(-1.0, 1.0)
}
