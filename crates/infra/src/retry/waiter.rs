//! Cancellable backoff waits.

use std::cell::Cell;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::time::Duration;

/// How a backoff wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    /// The full delay passed.
    Elapsed,
    /// Shutdown was requested before the delay passed.
    Cancelled,
}

/// Suspends a processing unit between retry attempts.
pub trait BackoffWaiter {
    fn wait(&self, delay: Duration) -> Wait;
}

/// Shutdown signal for one processing unit, backed by the unit's control channel.
///
/// The matching `Sender<()>` lives in the worker handle. Sending on it, or
/// dropping it, requests shutdown. Once observed, the request is sticky.
#[derive(Debug)]
pub struct ShutdownSignal {
    rx: mpsc::Receiver<()>,
    triggered: Cell<bool>,
}

impl ShutdownSignal {
    pub fn new(rx: mpsc::Receiver<()>) -> Self {
        Self {
            rx,
            triggered: Cell::new(false),
        }
    }

    /// Create a connected sender/signal pair.
    pub fn channel() -> (mpsc::Sender<()>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self::new(rx))
    }

    /// Non-blocking check.
    pub fn is_triggered(&self) -> bool {
        if self.triggered.get() {
            return true;
        }
        match self.rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                self.triggered.set(true);
                true
            }
            Err(TryRecvError::Empty) => false,
        }
    }
}

impl BackoffWaiter for ShutdownSignal {
    fn wait(&self, delay: Duration) -> Wait {
        if self.triggered.get() {
            return Wait::Cancelled;
        }
        match self.rx.recv_timeout(delay) {
            Err(RecvTimeoutError::Timeout) => Wait::Elapsed,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.triggered.set(true);
                Wait::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn wait_elapses_without_signal() {
        let (_tx, signal) = ShutdownSignal::channel();
        let started = Instant::now();
        assert_eq!(signal.wait(Duration::from_millis(20)), Wait::Elapsed);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!signal.is_triggered());
    }

    #[test]
    fn signal_interrupts_long_wait() {
        let (tx, signal) = ShutdownSignal::channel();
        let sender = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.send(()).unwrap();
            tx
        });

        let started = Instant::now();
        assert_eq!(signal.wait(Duration::from_secs(30)), Wait::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
        let _tx = sender.join().unwrap();
    }

    #[test]
    fn request_is_sticky() {
        let (tx, signal) = ShutdownSignal::channel();
        tx.send(()).unwrap();
        assert!(signal.is_triggered());
        assert!(signal.is_triggered());
        assert_eq!(signal.wait(Duration::from_secs(30)), Wait::Cancelled);
    }

    #[test]
    fn dropped_sender_counts_as_shutdown() {
        let (tx, signal) = ShutdownSignal::channel();
        drop(tx);
        assert_eq!(signal.wait(Duration::from_secs(30)), Wait::Cancelled);
    }
}
