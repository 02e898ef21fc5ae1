use nix::errno::Errno;
use nix::libc::{self, c_int, sched_param};

use super::error::Result;

/* The calling thread */
const SELF_PID: libc::pid_t = 0;

/// Scheduling policy and priority of the calling thread.
pub fn current_policy() -> Result<(c_int, c_int)> {
    let (policy, param) = read_policy()?;
    Ok((policy, param.sched_priority))
}

fn read_policy() -> Result<(c_int, sched_param)> {
    // sched_param has extra fields on some libcs, start zeroed
    let mut param: sched_param = unsafe { std::mem::zeroed() };
    let policy = Errno::result(unsafe { libc::sched_getscheduler(SELF_PID) })?;
    Errno::result(unsafe { libc::sched_getparam(SELF_PID, &mut param) })?;
    Ok((policy, param))
}

fn set_policy(policy: c_int, param: &sched_param) -> Result<()> {
    Errno::result(unsafe { libc::sched_setscheduler(SELF_PID, policy, param) })?;
    Ok(())
}

/// Runs the calling thread at the highest SCHED_FIFO priority while alive.
///
/// The previous policy is restored on drop. Elevation needs CAP_SYS_NICE,
/// without it the guard is inert and [`RealtimeGuard::elevated`] is false.
pub struct RealtimeGuard {
    saved: Option<(c_int, sched_param)>,
}

impl RealtimeGuard {
    pub fn elevate() -> Self {
        match Self::try_elevate() {
            Ok(saved) => Self { saved: Some(saved) },
            Err(e) => {
                log::debug!("Could not switch to real time scheduling: {}", e);
                Self { saved: None }
            }
        }
    }

    fn try_elevate() -> Result<(c_int, sched_param)> {
        let (policy, param) = read_policy()?;

        let mut realtime = param;
        realtime.sched_priority = Errno::result(unsafe { libc::sched_get_priority_max(libc::SCHED_FIFO) })?;
        set_policy(libc::SCHED_FIFO, &realtime)?;

        Ok((policy, param))
    }

    pub fn elevated(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for RealtimeGuard {
    fn drop(&mut self) {
        if let Some((policy, param)) = self.saved.take() {
            if let Err(e) = set_policy(policy, &param) {
                log::error!("Failed to restore scheduling policy {}: {}", policy, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_guard_restores_policy() {
        // Own thread so a successful elevation never leaks into other tests
        thread::spawn(|| {
            let before = current_policy().unwrap();
            {
                let guard = RealtimeGuard::elevate();
                if guard.elevated() {
                    let (policy, priority) = current_policy().unwrap();
                    assert_eq!(policy, libc::SCHED_FIFO);
                    assert!(priority > 0);
                } else {
                    assert_eq!(current_policy().unwrap(), before);
                }
            }
            assert_eq!(current_policy().unwrap(), before);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_guard_restores_on_unwind() {
        let result = thread::spawn(|| {
            let before = current_policy().unwrap();
            let unwound = std::panic::catch_unwind(|| {
                let _guard = RealtimeGuard::elevate();
                panic!("burst failed");
            });
            assert!(unwound.is_err());
            assert_eq!(current_policy().unwrap(), before);
        })
        .join();
        assert!(result.is_ok());
    }
}
