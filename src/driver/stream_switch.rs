// SPDX-License-Identifier: GPL-3.0-only

//! Periodic color/infrared switching for calibration mode
//!
//! The sensor cannot stream color and infrared at the same time, but intrinsic
//! calibration wants both. While calibration mode is on, a timer thread calls
//! its tick closure once per period; the driver's closure flips the active
//! video stream through the configuration gate.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Action returned by the tick closure to control the timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep ticking
    Continue,
    /// Disarm from inside the timer
    Stop,
}

/// Armed stream switch timer
///
/// Dropping the timer disarms it and waits for an in-flight tick to finish.
pub struct StreamSwitchTimer {
    thread_handle: Option<JoinHandle<()>>,
    /// Dropping or sending on this wakes the thread up for shutdown
    stop_tx: Option<Sender<()>>,
    period: Duration,
}

impl StreamSwitchTimer {
    /// Arm the timer; the first tick fires one `period` from now
    pub fn arm<F>(period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        info!(period_ms = period.as_millis() as u64, "Arming stream switch timer");

        let thread_handle = thread::Builder::new()
            .name("stream-switch".to_string())
            .spawn(move || {
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                            debug!("Stream switch timer stop signal received");
                            break;
                        }
                    }

                    if tick() == LoopAction::Stop {
                        debug!("Stream switch tick requested stop");
                        break;
                    }
                }
                debug!("Stream switch timer thread exiting");
            });

        let thread_handle = match thread_handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Failed to spawn stream switch timer");
                None
            }
        };

        Self {
            thread_handle,
            stop_tx: Some(stop_tx),
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Check if the timer thread is still alive
    pub fn is_armed(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Disarm and wait for the thread to finish
    ///
    /// Called from the timer thread itself (a tick tearing the driver down),
    /// the thread is detached instead of joined.
    pub fn disarm(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        let Some(handle) = self.thread_handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            debug!("Stream switch timer disarmed from its own thread");
            return;
        }
        if handle.join().is_err() {
            warn!("Stream switch timer thread panicked");
        } else {
            info!("Stream switch timer disarmed");
        }
    }
}

impl Drop for StreamSwitchTimer {
    fn drop(&mut self) {
        self.disarm();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_ticks_until_stopped() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut timer = StreamSwitchTimer::arm(Duration::from_millis(5), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        });

        thread::sleep(Duration::from_millis(60));
        timer.disarm();
        let after_disarm = counter.load(Ordering::SeqCst);
        assert!(after_disarm > 0);
        assert!(!timer.is_armed());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(counter.load(Ordering::SeqCst), after_disarm);
    }

    #[test]
    fn test_tick_can_stop_timer() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let timer = StreamSwitchTimer::arm(Duration::from_millis(1), move || {
            if counter_clone.fetch_add(1, Ordering::SeqCst) >= 2 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        });

        thread::sleep(Duration::from_millis(100));
        assert!(!timer.is_armed());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_disarm_before_first_tick() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let timer = StreamSwitchTimer::arm(Duration::from_secs(60), move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            LoopAction::Continue
        });
        assert_eq!(timer.period(), Duration::from_secs(60));
        assert!(timer.is_armed());
        drop(timer);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
