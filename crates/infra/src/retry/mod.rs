//! Retry with bounded backoff, in place, inside one processing unit.
//!
//! ## Design
//!
//! - Every processing failure is transient and retried until the policy is spent
//! - Retries reuse the same in-process callback invocation (no re-publish)
//! - The backoff wait is the only suspension point and can be cancelled by shutdown
//! - Progress is committed only after success or after a dead-letter hand-off
//!
//! ## Components
//!
//! - `RetryPolicy`: delay per attempt and the retry cap
//! - `DeliveryAttemptTracker`: attempt counts and history per message
//! - `ProcessingCallback`: the application handler
//! - `RetryOrchestrator`: drives the attempt loop for one message

pub mod callback;
pub mod orchestrator;
pub mod policy;
pub mod tracker;
pub mod waiter;

pub use callback::{ProcessingCallback, ProcessingFailure};
pub use orchestrator::{ProcessError, RetryOrchestrator, RetrySettings, TerminalOutcome};
pub use policy::{PolicyError, RetryPolicy};
pub use tracker::{AttemptHistory, AttemptOutcome, DeliveryAttempt, DeliveryAttemptTracker};
pub use waiter::{BackoffWaiter, ShutdownSignal, Wait};
