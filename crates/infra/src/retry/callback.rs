use orderstream_events::Message;

/// Why one invocation of the processing callback failed.
///
/// There is a single failure class: every failure is treated as transient and
/// retried until the policy is spent. `kind` is carried into the dead-letter
/// record for diagnosis only.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProcessingFailure {
    kind: String,
    message: String,
}

impl ProcessingFailure {
    pub const TRANSIENT: &'static str = "TransientFailure";

    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Failure of the generic transient kind.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(Self::TRANSIENT, message)
    }

    /// Wrap an error, using its type name as the kind.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        let full = std::any::type_name::<E>();
        let kind = full.rsplit("::").next().unwrap_or(full);
        Self::new(kind, err.to_string())
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// The application handler invoked once per delivery attempt.
///
/// Returning `Err` asks for a retry; the orchestrator decides whether one is
/// left. Implementations must tolerate being called several times with the
/// same message (at-least-once delivery).
pub trait ProcessingCallback: Send + Sync {
    fn process(&self, message: &Message) -> Result<(), ProcessingFailure>;
}

impl<F> ProcessingCallback for F
where
    F: Fn(&Message) -> Result<(), ProcessingFailure> + Send + Sync,
{
    fn process(&self, message: &Message) -> Result<(), ProcessingFailure> {
        self(message)
    }
}
