//! Background processing units.

pub mod partition_worker;

pub use partition_worker::{PartitionWorker, WorkerExit, WorkerHandle};
