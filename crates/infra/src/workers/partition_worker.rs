use std::io;
use std::ops::ControlFlow;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use orderstream_events::{Message, Subscription};

use crate::retry::ShutdownSignal;

/// Why a worker thread stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Shutdown was requested.
    Stopped,
    /// The subscription closed underneath the worker.
    Disconnected,
    /// The handler hit an error it cannot continue past.
    Failed(String),
}

impl WorkerExit {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    name: String,
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<WorkerExit>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request shutdown without waiting.
    pub fn signal(&self) {
        let _ = self.shutdown.send(());
    }

    /// Whether the thread has already returned.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(thread::JoinHandle::is_finished)
    }

    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) -> WorkerExit {
        self.signal();
        self.wait()
    }

    /// Wait for the worker to stop on its own.
    pub(crate) fn wait(&mut self) -> WorkerExit {
        match self.join.take() {
            Some(join) => join
                .join()
                .unwrap_or_else(|_| WorkerExit::Failed(format!("worker {} panicked", self.name))),
            None => WorkerExit::Stopped,
        }
    }
}

/// Worker loop over one partition subscription.
///
/// - Messages are handed to `handler` one at a time, in delivery order
/// - The handler gets the worker's [`ShutdownSignal`] so long waits can be cut short
/// - `ControlFlow::Break` from the handler ends the loop with that exit
/// - Shutdown is checked between messages and every tick while idle
#[derive(Debug)]
pub struct PartitionWorker;

impl PartitionWorker {
    const TICK: Duration = Duration::from_millis(250);

    /// Spawn a named worker thread.
    pub fn spawn<H>(
        name: impl Into<String>,
        subscription: Subscription,
        mut handler: H,
    ) -> io::Result<WorkerHandle>
    where
        H: FnMut(Message, &ShutdownSignal) -> ControlFlow<WorkerExit> + Send + 'static,
    {
        let name = name.into();
        let (shutdown_tx, shutdown) = ShutdownSignal::channel();

        let thread_name = name.clone();
        let join = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(&thread_name, subscription, shutdown, &mut handler))?;

        Ok(WorkerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop<H>(
    name: &str,
    subscription: Subscription,
    shutdown: ShutdownSignal,
    handler: &mut H,
) -> WorkerExit
where
    H: FnMut(Message, &ShutdownSignal) -> ControlFlow<WorkerExit>,
{
    debug!(worker = name, "worker started");

    let exit = loop {
        if shutdown.is_triggered() {
            break WorkerExit::Stopped;
        }

        match subscription.recv_timeout(PartitionWorker::TICK) {
            Ok(message) => {
                if let ControlFlow::Break(exit) = handler(message, &shutdown) {
                    break exit;
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break WorkerExit::Disconnected,
        }
    };

    match &exit {
        WorkerExit::Failed(reason) => warn!(worker = name, reason = %reason, "worker failed"),
        other => debug!(worker = name, exit = ?other, "worker stopped"),
    }
    exit
}
