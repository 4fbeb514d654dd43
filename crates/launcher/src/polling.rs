//! Background polling loop
//!
//! A dedicated OS thread runs one cycle, then waits for the poll interval.
//! The wait is interruptible: [`PollingLoop::stop`] wakes the thread through
//! a condition variable and joins it, so stopping never waits out a full
//! interval.

use crate::poll_rate::PollRateRegulator;
use common::error::poisoned;
use common::{Error, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, error, info};

const THREAD_NAME: &str = "launcher-poll";

/// Run state of the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Stopped,
    Starting,
    Running,
    /// Cancelled, waiting for the thread to exit
    Stopping,
}

/// Cancellation flag the worker waits on
#[derive(Debug, Default)]
struct CancelSignal {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancelSignal {
    fn cancel(&self) {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    fn is_cancelled(&self) -> bool {
        *self.cancelled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait one poll interval or until cancelled; returns true if cancelled
    fn wait(&self, regulator: &PollRateRegulator) -> bool {
        let guard = self.cancelled.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _timeout) = self
            .wake
            .wait_timeout_while(guard, regulator.interval(), |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[derive(Debug)]
struct PollControl {
    state: PollState,
    worker: Option<JoinHandle<()>>,
    signal: Arc<CancelSignal>,
}

/// Start/stop control for the polling thread
#[derive(Debug)]
pub struct PollingLoop {
    /// Serializes `start` and `stop`; held across the join
    transition: Mutex<()>,
    control: Mutex<PollControl>,
}

impl Default for PollingLoop {
    fn default() -> Self {
        Self {
            transition: Mutex::new(()),
            control: Mutex::new(PollControl {
                state: PollState::Stopped,
                worker: None,
                signal: Arc::new(CancelSignal::default()),
            }),
        }
    }
}

impl PollingLoop {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, PollControl>> {
        self.control.lock().map_err(poisoned("poll control"))
    }

    pub fn state(&self) -> Result<PollState> {
        Ok(self.lock()?.state)
    }

    pub fn is_polling(&self) -> Result<bool> {
        Ok(self.state()? == PollState::Running)
    }

    /// Start the thread running `cycle` every interval
    ///
    /// Does nothing if the loop is already running. A start that races a
    /// `stop` waits until the old thread has been joined.
    pub fn start<F>(&self, regulator: Arc<PollRateRegulator>, mut cycle: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let _transition = self.transition.lock().map_err(poisoned("poll transition"))?;
        let mut control = self.lock()?;
        if control.state == PollState::Running {
            debug!("Polling already running");
            return Ok(());
        }
        control.state = PollState::Starting;

        let signal = Arc::new(CancelSignal::default());
        control.signal = signal.clone();

        let spawned = std::thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                info!("Polling started");
                while !signal.is_cancelled() {
                    cycle();
                    if signal.wait(&regulator) {
                        break;
                    }
                }
                info!("Polling stopped");
            });

        match spawned {
            Ok(handle) => {
                control.worker = Some(handle);
                control.state = PollState::Running;
                Ok(())
            }
            Err(e) => {
                error!("Failed to spawn polling thread: {}", e);
                control.state = PollState::Stopped;
                Err(Error::PollStartFailed(e.to_string()))
            }
        }
    }

    /// Cancel the thread and wait for it to exit
    ///
    /// Does nothing if the loop is stopped.
    pub fn stop(&self) -> Result<()> {
        let _transition = self.transition.lock().map_err(poisoned("poll transition"))?;
        let worker = {
            let mut control = self.lock()?;
            if control.state == PollState::Stopped {
                return Ok(());
            }
            control.signal.cancel();
            control.state = PollState::Stopping;
            control.worker.take()
        };

        // State queries stay answerable while joining
        let joined = match worker {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::Inconsistent("polling thread panicked".to_string())),
            None => Ok(()),
        };
        self.lock()?.state = PollState::Stopped;
        joined
    }
}

impl Drop for PollingLoop {
    fn drop(&mut self) {
        let control = self.control.get_mut().unwrap_or_else(PoisonError::into_inner);
        control.signal.cancel();
        if let Some(handle) = control.worker.take() {
            let _ = handle.join();
        }
    }
}
