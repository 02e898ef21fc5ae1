pub mod background_task;
pub mod channel;
pub mod clock;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod meter;
pub mod power;
pub mod print;
pub mod scheduler;
pub mod snapshot;
pub mod spi;
pub mod transport;
pub mod types;

pub use background_task::{BackgroundTask, Schedule, Task};
pub use channel::{AnyChannel, Channel, ChannelAD, ChannelKind, ChannelSum, Measurement};
pub use command::Command;
pub use config::{ChannelDescriptor, Config, HardwareConfig, SumDescriptor};
pub use engine::PowerEngine;
pub use error::{Error, Result};
pub use meter::PowerMeter;
pub use print::LogPublisher;
pub use snapshot::{ChannelSnapshot, Publisher, Snapshot, SnapshotHandle};
pub use spi::SpiTransport;
pub use transport::{AdcTransport, SyntheticTransport, Waveform};
pub use types::{LineTiming, PowerMetrics, Reading, Sample, Timestamp};
