//! Drift-compensated recurring task.
//!
//! Each cycle's target time is the previous *target* plus the period, so
//! callback run time does not accumulate as drift. When a callback overruns
//! its slot the next one fires immediately and the schedule restarts from
//! now; missed slots are not replayed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{SessionError, SessionResult};

/// A callback fired at a fixed period on its own thread.
#[derive(Debug)]
pub struct RecurringTask {
    name: String,
    running: Arc<AtomicBool>,
    wake: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl RecurringTask {
    /// Start firing `task` every `period`, first after `initial_delay`.
    pub fn spawn<F>(
        name: impl Into<String>,
        period: Duration,
        initial_delay: Duration,
        task: F,
    ) -> SessionResult<Self>
    where
        F: FnMut() + Send + 'static,
    {
        if period.is_zero() {
            return Err(SessionError::InvalidArgument(
                "recurring task period must be positive".to_string(),
            ));
        }

        let name = name.into();
        let running = Arc::new(AtomicBool::new(true));
        let (wake, wait) = crossbeam_channel::bounded(1);

        let handle = thread::Builder::new().name(name.clone()).spawn({
            let running = Arc::clone(&running);
            let name = name.clone();
            move || run(&name, period, initial_delay, &running, &wait, task)
        })?;

        tracing::debug!(
            task = %name,
            period_ms = period.as_millis(),
            "Recurring task started"
        );

        Ok(Self {
            name,
            running,
            wake,
            handle: Some(handle),
        })
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true until [`stop`](Self::stop) is called.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Ask the task to stop. The callback in flight, if any, completes.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::AcqRel) {
            let _ = self.wake.try_send(());
            tracing::debug!(task = %self.name, "Recurring task stopping");
        }
    }

    /// Stop and wait for the thread to exit.
    ///
    /// Must not be called from inside the task's own callback.
    pub fn join(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!(task = %self.name, "Recurring task panicked");
            }
        }
    }
}

impl Drop for RecurringTask {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F: FnMut()>(
    name: &str,
    period: Duration,
    initial_delay: Duration,
    running: &AtomicBool,
    wait: &Receiver<()>,
    mut task: F,
) {
    if !initial_delay.is_zero() && !pause(wait, initial_delay) {
        return;
    }

    let mut next = Instant::now();
    while running.load(Ordering::Acquire) {
        task();
        next += period;
        let now = Instant::now();
        if next > now {
            if !pause(wait, next - now) {
                break;
            }
        } else {
            tracing::trace!(
                task = name,
                overrun_ms = (now - next).as_millis(),
                "Task overran its period"
            );
            next = now;
        }
    }
    tracing::debug!(task = name, "Recurring task exited");
}

/// Sleep for `duration`; returns false if woken to stop.
fn pause(wait: &Receiver<()>, duration: Duration) -> bool {
    matches!(wait.recv_timeout(duration), Err(RecvTimeoutError::Timeout))
}
