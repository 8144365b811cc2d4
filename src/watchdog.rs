//! Deadline supervision for Level 3 bring-up.
//!
//! The software engine's initialization can hang on some devices. It runs on
//! a dedicated worker while the caller waits with a deadline; if the deadline
//! passes, the supervisor gives up, leaves a flag file for the next process
//! and escalates according to the [`AbortPolicy`]. A worker that panics ends
//! the wait immediately and is reported as a failed bring-up.
use std::any::Any;
use std::fs;
use std::io::ErrorKind;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::ensure_parent_dir;

/// Default deadline for Level 3 bring-up.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// What to do once the deadline has passed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortPolicy {
    /// Abort the process, the way a stuck DRM service is expected to die.
    #[default]
    Abort,
    /// Return [`Error::FatalAbort`] and let the host decide.
    ReturnError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogState {
    Idle,
    Running,
    Done,
    GaveUp,
}

type Outcome<T> = thread::Result<T>;

struct Shared<T> {
    state: Mutex<(WatchdogState, Option<Outcome<T>>)>,
    finished: Condvar,
}

/// Supervises one bring-up.
#[derive(Debug, Clone)]
pub struct Watchdog {
    timeout: Duration,
    failure_file: PathBuf,
    policy: AbortPolicy,
}

impl Watchdog {
    #[must_use]
    pub fn new(timeout: Duration, failure_file: impl Into<PathBuf>, policy: AbortPolicy) -> Self {
        Self {
            timeout,
            failure_file: failure_file.into(),
            policy,
        }
    }

    #[must_use]
    pub fn failure_file(&self) -> &Path {
        &self.failure_file
    }

    /// Whether the previous process gave up on bring-up. The flag is consumed:
    /// the file is deleted whether or not it was set.
    pub fn check_for_previous_failure(&self) -> bool {
        let bytes = match fs::read(&self.failure_file) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return false,
            Err(err) => {
                warn!("Could not read {}: {}", self.failure_file.display(), err);
                return false;
            }
        };
        if let Err(err) = fs::remove_file(&self.failure_file) {
            warn!("Could not delete {}: {}", self.failure_file.display(), err);
        }
        let failed = bytes.first().is_some_and(|b| *b != 0);
        if failed {
            warn!("Level 3 initialization failed during the previous run");
        }
        failed
    }

    fn save_failure(&self) {
        let result = ensure_parent_dir(&self.failure_file).and_then(|()| fs::write(&self.failure_file, [1u8]));
        match result {
            Ok(()) => {
                debug!("Saved failure flag to {}", self.failure_file.display());
            }
            Err(err) => {
                error!("Could not save failure flag {}: {}", self.failure_file.display(), err);
            }
        }
    }

    /// Run `work` on a worker thread and wait for it until the deadline.
    ///
    /// On timeout `diagnose` is called, the failure flag is written and the
    /// worker is detached. A worker that finishes late drops its own result.
    /// A panic in `work` returns [`Error::InitializationFailure`] without
    /// writing the flag.
    pub fn run<T, W, D>(&self, work: W, diagnose: D) -> Result<T>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        D: FnOnce(),
    {
        let shared = Arc::new(Shared {
            state: Mutex::new((WatchdogState::Idle, None)),
            finished: Condvar::new(),
        });
        let started = Instant::now();

        let worker = Arc::clone(&shared);
        lock(&shared).0 = WatchdogState::Running;
        let spawned = thread::Builder::new()
            .name("l3-initialize".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(work));
                let mut state = lock(&worker);
                if state.0 == WatchdogState::GaveUp {
                    return;
                }
                *state = (WatchdogState::Done, Some(outcome));
                worker.finished.notify_all();
            });
        if let Err(err) = spawned {
            error!("Could not start Level 3 initialization thread: {}", err);
            return Err(Error::InitializationFailure(format!("could not spawn worker: {err}")));
        }

        let guard = lock(&shared);
        let (mut state, _) = shared
            .finished
            .wait_timeout_while(guard, self.timeout, |(s, _)| *s == WatchdogState::Running)
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if state.0 == WatchdogState::Done {
            match state.1.take() {
                Some(Ok(value)) => {
                    trace!("Level 3 initialized in {:?}", started.elapsed());
                    return Ok(value);
                }
                Some(Err(payload)) => {
                    let message = panic_message(&*payload);
                    error!("Level 3 initialization panicked after {:?}: {}", started.elapsed(), message);
                    return Err(Error::InitializationFailure(format!(
                        "Level 3 initialization panicked: {message}"
                    )));
                }
                None => {}
            }
        }

        state.0 = WatchdogState::GaveUp;
        drop(state);

        error!(
            "Level 3 initialization did not finish after {:?} (at {})",
            started.elapsed(),
            timestamp()
        );
        diagnose();
        self.save_failure();

        match self.policy {
            AbortPolicy::Abort => std::process::abort(),
            AbortPolicy::ReturnError => Err(Error::FatalAbort { timeout: self.timeout }),
        }
    }
}

fn lock<T>(shared: &Shared<T>) -> std::sync::MutexGuard<'_, (WatchdogState, Option<Outcome<T>>)> {
    shared.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(feature = "chrono")]
fn timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(not(feature = "chrono"))]
fn timestamp() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    format!("unix {secs}")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc;

    use super::*;

    fn watchdog(dir: &Path, timeout: Duration) -> Watchdog {
        Watchdog::new(timeout, dir.join("l3_failure_file"), AbortPolicy::ReturnError)
    }

    #[test]
    fn finished_work_returns_its_value() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watchdog = watchdog(dir.path(), Duration::from_secs(5));
        let value = watchdog.run(|| 42, || panic!("no diagnosis")).expect("finishes");
        assert_eq!(value, 42);
        assert!(!watchdog.failure_file().exists());
    }

    #[test]
    fn timeout_leaves_a_flag_that_is_read_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watchdog = watchdog(dir.path(), Duration::from_millis(50));
        let (release, hold) = mpsc::channel::<()>();
        let diagnosed = AtomicBool::new(false);

        let err = watchdog
            .run(
                move || {
                    let _ = hold.recv();
                    7
                },
                || diagnosed.store(true, Ordering::SeqCst),
            )
            .expect_err("times out");
        assert!(matches!(err, Error::FatalAbort { .. }));
        assert!(diagnosed.load(Ordering::SeqCst));
        assert_eq!(fs::read(watchdog.failure_file()).expect("flag"), vec![1]);

        // The late worker finishes on its own.
        release.send(()).expect("worker still waiting");

        assert!(watchdog.check_for_previous_failure());
        assert!(!watchdog.failure_file().exists());
        assert!(!watchdog.check_for_previous_failure());
    }

    #[test]
    fn panicking_work_fails_without_waiting_for_the_deadline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watchdog = watchdog(dir.path(), Duration::from_secs(30));
        let started = Instant::now();

        let err = watchdog
            .run(|| -> u32 { panic!("engine blew up") }, || panic!("no diagnosis"))
            .expect_err("worker panicked");
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            Error::InitializationFailure(message) => assert!(message.contains("engine blew up")),
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!watchdog.failure_file().exists());
        assert!(!watchdog.check_for_previous_failure());
    }

    #[test]
    fn zero_flag_is_cleared_but_not_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let watchdog = watchdog(dir.path(), DEFAULT_TIMEOUT);
        fs::write(watchdog.failure_file(), [0u8]).expect("write");
        assert!(!watchdog.check_for_previous_failure());
        assert!(!watchdog.failure_file().exists());
    }

    #[test]
    fn policy_parses_from_yaml() {
        let policy: AbortPolicy = serde_yaml::from_str("return_error").expect("policy");
        assert_eq!(policy, AbortPolicy::ReturnError);
        assert_eq!(AbortPolicy::default(), AbortPolicy::Abort);
    }
}
