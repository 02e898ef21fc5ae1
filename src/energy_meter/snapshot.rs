use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use super::channel::{AnyChannel, ChannelAD, ChannelKind, ChannelSum, Measurement};
use super::error::Result;
use super::types::{Sample, Timestamp};

/// Copy of one channel after a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChannelSnapshot {
    pub name: String,
    pub kind: ChannelKind,
    pub value: f64,
    pub timestamp: Timestamp,
    pub samples: Vec<Sample>,
}

impl ChannelSnapshot {
    fn capture<M: Measurement>(channel: &M, kind: ChannelKind, samples: &[Sample]) -> Self {
        Self {
            name: channel.name().to_string(),
            kind,
            value: channel.value(),
            timestamp: channel.timestamp(),
            samples: samples.to_vec(),
        }
    }

    /// Samples as `[time since first sample, value]`, the format plot consumers expect.
    pub fn relative_samples(&self) -> Vec<[f64; 2]> {
        let t0 = match self.samples.first() {
            Some(first) => first.time,
            None => return Vec::new(),
        };
        self.samples
            .iter()
            .map(|s| [(s.time - t0) as f64, s.value])
            .collect()
    }
}

impl From<&ChannelAD> for ChannelSnapshot {
    fn from(channel: &ChannelAD) -> Self {
        Self::capture(channel, ChannelKind::Analog, channel.samples())
    }
}

impl From<&ChannelSum> for ChannelSnapshot {
    fn from(channel: &ChannelSum) -> Self {
        Self::capture(channel, ChannelKind::Sum, &[])
    }
}

impl From<&AnyChannel> for ChannelSnapshot {
    fn from(channel: &AnyChannel) -> Self {
        Self::capture(channel, channel.kind(), channel.samples())
    }
}

/// All channels of the engine after one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub channels: Vec<ChannelSnapshot>,
}

impl Snapshot {
    pub fn find(&self, name: &str) -> Option<&ChannelSnapshot> {
        self.channels.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Shared view of the latest snapshot.
///
/// The engine only swaps the pointer under the lock, readers clone the `Arc`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    latest: Arc<Mutex<Arc<Snapshot>>>,
}

impl SnapshotHandle {
    pub fn latest(&self) -> Arc<Snapshot> {
        Arc::clone(&self.latest.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn store(&self, snapshot: Arc<Snapshot>) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = snapshot;
    }
}

/// Consumer of the channel values after each tick.
pub trait Publisher: Send {
    fn publish(&mut self, snapshot: &Snapshot) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::energy_meter::channel::{Channel, ChannelAD, ChannelSum};

    fn analog() -> AnyChannel {
        let mut ch = ChannelAD::new("I0", 0, 0, 0.0, 2.0).unwrap();
        ch.set_sample(1_000, 0.5);
        ch.set_sample(1_250, 1.0);
        ch.set(42.0);
        AnyChannel::Analog(ch)
    }

    #[test]
    fn test_snapshot_of_each_kind() {
        let mut scalar = Channel::new("use");
        scalar.set(3.0);

        let snapshot = Snapshot {
            tick: 1,
            channels: vec![
                ChannelSnapshot::from(&AnyChannel::Scalar(scalar)),
                ChannelSnapshot::from(&analog()),
                ChannelSnapshot::from(&AnyChannel::Sum(ChannelSum::new("total"))),
            ],
        };

        assert_eq!(snapshot.names(), vec!["use", "I0", "total"]);
        let i0 = snapshot.find("I0").unwrap();
        assert_eq!(i0.kind, ChannelKind::Analog);
        assert_eq!(i0.value, 42.0);
        assert_eq!(i0.samples.len(), 2);
        assert!(snapshot.find("total").unwrap().samples.is_empty());
        assert!(snapshot.find("missing").is_none());
    }

    #[test]
    fn test_borrowed_channels_match_tagged() {
        let analog = match analog() {
            AnyChannel::Analog(ch) => ch,
            _ => unreachable!(),
        };
        let mut sum = ChannelSum::new("total");
        sum.set(5.5);

        assert_eq!(
            ChannelSnapshot::from(&analog),
            ChannelSnapshot::from(&AnyChannel::Analog(analog.clone()))
        );
        assert_eq!(
            ChannelSnapshot::from(&sum),
            ChannelSnapshot::from(&AnyChannel::Sum(sum.clone()))
        );
        assert_eq!(ChannelSnapshot::from(&analog).samples, analog.samples());
    }

    #[test]
    fn test_relative_samples() {
        let snapshot = ChannelSnapshot::from(&analog());
        assert_eq!(snapshot.relative_samples(), vec![[0.0, 1.0], [250.0, 2.0]]);
    }

    #[test]
    fn test_json_export() {
        let snapshot = Snapshot {
            tick: 7,
            channels: vec![ChannelSnapshot::from(&analog())],
        };
        let json: serde_json::Value = serde_json::from_str(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(json["tick"], 7);
        assert_eq!(json["channels"][0]["name"], "I0");
        assert_eq!(json["channels"][0]["kind"], "Analog");
        assert_eq!(json["channels"][0]["samples"][1]["time"], 1_250);
    }

    #[test]
    fn test_handle_swaps_snapshot() {
        let handle = SnapshotHandle::default();
        let reader = handle.clone();
        let before = reader.latest();
        assert_eq!(before.tick, 0);

        handle.store(Arc::new(Snapshot { tick: 3, channels: Vec::new() }));
        assert_eq!(reader.latest().tick, 3);
        // Readers keep their copy
        assert_eq!(before.tick, 0);
    }
}
