use std::time::Duration;

use super::background_task::{BackgroundTask, Schedule};
use super::config::Config;
use super::engine::PowerEngine;
use super::error::Result;
use super::snapshot::SnapshotHandle;
use super::transport::AdcTransport;

/// Power engine ticking on its own worker thread.
pub struct PowerMeter<T: AdcTransport + 'static> {
    task: BackgroundTask<PowerEngine<T>>,
    snapshots: SnapshotHandle,
}

impl<T: AdcTransport + 'static> PowerMeter<T> {
    pub fn new(config: &Config, transport: T) -> Result<Self> {
        let engine = PowerEngine::new(config, transport)?;
        Ok(Self::from_engine(engine, config.update_period()))
    }

    /// Wrap an engine that already has its publishers attached.
    pub fn from_engine(engine: PowerEngine<T>, update_period: Duration) -> Self {
        let snapshots = engine.snapshots();
        Self {
            task: BackgroundTask::new("power-engine", engine, Schedule::Periodic(update_period)),
            snapshots,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.task.start()
    }

    pub fn stop(&mut self) {
        self.task.stop()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    /// Start the next tick now instead of waiting for the period.
    pub fn wake(&self) {
        self.task.wake()
    }

    pub fn snapshots(&self) -> SnapshotHandle {
        self.snapshots.clone()
    }

    /// The engine, available while stopped.
    pub fn engine(&self) -> Option<&PowerEngine<T>> {
        self.task.task()
    }

    pub fn engine_mut(&mut self) -> Option<&mut PowerEngine<T>> {
        self.task.task_mut()
    }
}
