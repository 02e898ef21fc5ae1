use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::{Error, Result};

/// Work executed by a [`BackgroundTask`] worker thread.
pub trait Task: Send + 'static {
    /// Called on the owner thread before the worker is spawned.
    fn pre_start(&mut self) -> Result<()> {
        Ok(())
    }

    /// Called on the owner thread after the worker has been joined.
    fn post_stop(&mut self) {}

    /// One tick.
    fn run(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run, then wait for the period to elapse.
    Periodic(Duration),
    /// Run, then wait for [`BackgroundTask::wake`].
    OnWake,
}

#[derive(Default)]
struct Control {
    stop: bool,
    wake: bool,
}

#[derive(Default)]
struct Shared {
    control: Mutex<Control>,
    condvar: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs a [`Task`] on its own worker thread.
///
/// Idle holds the task, Running hands it to the worker until `stop()` joins it back.
pub struct BackgroundTask<T: Task> {
    name: String,
    schedule: Schedule,
    shared: Arc<Shared>,
    task: Option<T>,
    worker: Option<JoinHandle<T>>,
}

impl<T: Task> BackgroundTask<T> {
    pub fn new(name: impl Into<String>, task: T, schedule: Schedule) -> Self {
        Self {
            name: name.into(),
            schedule,
            shared: Arc::new(Shared::default()),
            task: Some(task),
            worker: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// The task, while idle.
    pub fn task(&self) -> Option<&T> {
        self.task.as_ref()
    }

    pub fn task_mut(&mut self) -> Option<&mut T> {
        self.task.as_mut()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::AlreadyRunning);
        }
        let mut task = self.task.take().ok_or(Error::TaskLost)?;

        if let Err(e) = task.pre_start() {
            self.task = Some(task);
            return Err(e);
        }

        {
            let mut control = self.shared.lock();
            control.stop = false;
            control.wake = false;
        }

        let shared = Arc::clone(&self.shared);
        let schedule = self.schedule;
        let name = self.name.clone();
        let spawned = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || worker_loop(&name, task, &shared, schedule));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::debug!("{} started", self.name);
                Ok(())
            }
            // The closure and the task inside it are gone with the failed spawn
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Signal the worker, join it and run the teardown hook. No-op when idle.
    pub fn stop(&mut self) {
        let worker = match self.worker.take() {
            Some(worker) => worker,
            None => return,
        };

        {
            let mut control = self.shared.lock();
            control.stop = true;
        }
        self.shared.condvar.notify_all();

        match worker.join() {
            Ok(mut task) => {
                task.post_stop();
                self.task = Some(task);
                log::debug!("{} stopped", self.name);
            }
            Err(_) => log::error!("{} worker thread panicked, task is lost", self.name),
        }
    }

    /// Trigger one run of an [`Schedule::OnWake`] task, or cut a periodic wait short.
    pub fn wake(&self) {
        {
            let mut control = self.shared.lock();
            control.wake = true;
        }
        self.shared.condvar.notify_all();
    }
}

impl<T: Task> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop<T: Task>(name: &str, mut task: T, shared: &Shared, schedule: Schedule) -> T {
    loop {
        if shared.lock().stop {
            break;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::error!("{}: tick failed: {}", name, e),
            Err(_) => log::error!("{}: tick panicked", name),
        }

        let mut control = shared.lock();
        match schedule {
            Schedule::Periodic(period) => {
                let deadline = Instant::now() + period;
                while !control.stop && !control.wake {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    control = shared
                        .condvar
                        .wait_timeout(control, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
            Schedule::OnWake => {
                while !control.stop && !control.wake {
                    control = shared.condvar.wait(control).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        control.wake = false;
    }

    task
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counter {
        runs: Arc<AtomicUsize>,
        started: usize,
        stopped: usize,
        fail_every_run: bool,
        panic_on_run: bool,
    }

    impl Task for Counter {
        fn pre_start(&mut self) -> Result<()> {
            self.started += 1;
            Ok(())
        }

        fn post_stop(&mut self) {
            self.stopped += 1;
        }

        fn run(&mut self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.panic_on_run {
                panic!("tick");
            }
            if self.fail_every_run {
                return Err(Error::Config("tick".into()));
            }
            Ok(())
        }
    }

    fn wait_for(runs: &AtomicUsize, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while runs.load(Ordering::SeqCst) < count {
            assert!(Instant::now() < deadline, "task did not run");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_double_start_fails() {
        let mut task = BackgroundTask::new("t", Counter::default(), Schedule::Periodic(Duration::from_secs(60)));
        task.start().unwrap();
        assert!(matches!(task.start(), Err(Error::AlreadyRunning)));
        task.stop();
        assert!(!task.is_running());
        task.start().unwrap();
        task.stop();

        let counter = task.task().unwrap();
        assert_eq!(counter.started, 2);
        assert_eq!(counter.stopped, 2);
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut task = BackgroundTask::new("t", Counter::default(), Schedule::OnWake);
        task.stop();
        task.stop();
        assert_eq!(task.task().unwrap().stopped, 0);
    }

    #[test]
    fn test_periodic_runs_repeatedly() {
        let counter = Counter::default();
        let runs = Arc::clone(&counter.runs);
        let mut task = BackgroundTask::new("t", counter, Schedule::Periodic(Duration::from_millis(5)));
        task.start().unwrap();
        wait_for(&runs, 3);
        task.stop();
    }

    #[test]
    fn test_stop_interrupts_long_period() {
        let counter = Counter::default();
        let runs = Arc::clone(&counter.runs);
        let mut task = BackgroundTask::new("t", counter, Schedule::Periodic(Duration::from_secs(3600)));
        task.start().unwrap();
        wait_for(&runs, 1);

        let begin = Instant::now();
        task.stop();
        assert!(begin.elapsed() < Duration::from_secs(1));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_wake_runs_once_per_wake() {
        let counter = Counter::default();
        let runs = Arc::clone(&counter.runs);
        let mut task = BackgroundTask::new("t", counter, Schedule::OnWake);
        task.start().unwrap();
        wait_for(&runs, 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        task.wake();
        wait_for(&runs, 2);
        task.stop();
    }

    #[test]
    fn test_failing_and_panicking_ticks_keep_worker_alive() {
        let counter = Counter {
            fail_every_run: true,
            ..Default::default()
        };
        let runs = Arc::clone(&counter.runs);
        let mut task = BackgroundTask::new("t", counter, Schedule::Periodic(Duration::from_millis(1)));
        task.start().unwrap();
        wait_for(&runs, 3);
        task.stop();
        assert!(task.task().is_some());

        let counter = Counter {
            panic_on_run: true,
            ..Default::default()
        };
        let runs = Arc::clone(&counter.runs);
        let mut task = BackgroundTask::new("p", counter, Schedule::Periodic(Duration::from_millis(1)));
        task.start().unwrap();
        wait_for(&runs, 3);
        task.stop();
        assert_eq!(task.task().unwrap().stopped, 1);
    }

    #[test]
    fn test_drop_joins_worker() {
        let counter = Counter::default();
        let runs = Arc::clone(&counter.runs);
        {
            let mut task = BackgroundTask::new("t", counter, Schedule::Periodic(Duration::from_secs(3600)));
            task.start().unwrap();
            wait_for(&runs, 1);
        }
        // Only the test's reference remains once the worker is joined and the task dropped
        assert_eq!(Arc::strong_count(&runs), 1);
    }
}
