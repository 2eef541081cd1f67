//! Runtime wiring: one retrying processing unit per partition.

use std::io;
use std::ops::ControlFlow;
use std::sync::Arc;

use tracing::{error, info};

use orderstream_events::{Broker, BrokerError, Message};

use crate::config::{ConfigError, PipelineConfig};
use crate::retry::{ProcessError, ProcessingCallback, RetryOrchestrator, RetrySettings};
use crate::workers::{PartitionWorker, WorkerExit, WorkerHandle};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}

/// The running processing units of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineHandle {
    workers: Vec<WorkerHandle>,
}

impl PipelineHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, worker: WorkerHandle) {
        self.workers.push(worker);
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Whether any unit has stopped on its own (broker gone or fatal error).
    pub fn any_finished(&self) -> bool {
        self.workers.iter().any(WorkerHandle::is_finished)
    }

    /// Signal every unit, then join them all.
    ///
    /// A unit waiting out a backoff is interrupted; its message stays uncommitted.
    pub fn shutdown(mut self) -> Vec<WorkerExit> {
        for worker in &self.workers {
            worker.signal();
        }
        self.workers
            .iter_mut()
            .map(|worker| {
                let exit = worker.wait();
                if exit.is_failure() {
                    error!(worker = worker.name(), exit = ?exit, "worker ended with failure");
                }
                exit
            })
            .collect()
    }
}

/// Starts retrying consumers for a topic.
#[derive(Debug)]
pub struct RetryPipeline;

impl RetryPipeline {
    /// Start one processing unit per partition of `config.topic`.
    pub fn start<B, C>(
        broker: Arc<B>,
        config: &PipelineConfig,
        callback: Arc<C>,
    ) -> Result<PipelineHandle, PipelineError>
    where
        B: Broker + ?Sized + 'static,
        C: ProcessingCallback + ?Sized + 'static,
    {
        let settings = config.retry_settings()?;
        Self::start_with(broker, &config.topic, settings, callback)
    }

    /// Same as [`RetryPipeline::start`] with already-built settings.
    pub fn start_with<B, C>(
        broker: Arc<B>,
        topic: &str,
        settings: RetrySettings,
        callback: Arc<C>,
    ) -> Result<PipelineHandle, PipelineError>
    where
        B: Broker + ?Sized + 'static,
        C: ProcessingCallback + ?Sized + 'static,
    {
        let partitions = broker.partitions(topic)?;
        let mut handle = PipelineHandle::new();

        for partition in 0..partitions {
            let subscription = broker.subscribe(topic, &settings.group, partition)?;
            let mut orchestrator =
                RetryOrchestrator::new(Arc::clone(&broker), Arc::clone(&callback), settings.clone());

            let worker = PartitionWorker::spawn(
                format!("{topic}-p{partition}"),
                subscription,
                move |message: Message, shutdown| match orchestrator.process(message, shutdown) {
                    Ok(_) => ControlFlow::Continue(()),
                    Err(ProcessError::Cancelled { .. }) => ControlFlow::Break(WorkerExit::Stopped),
                    Err(err) => {
                        error!(error = %err, "processing unit stopping");
                        ControlFlow::Break(WorkerExit::Failed(err.to_string()))
                    }
                },
            )?;
            handle.push(worker);
        }

        info!(
            topic,
            group = %settings.group,
            partitions,
            max_attempts = settings.policy.max_attempts(),
            "retry pipeline started"
        );
        Ok(handle)
    }
}
