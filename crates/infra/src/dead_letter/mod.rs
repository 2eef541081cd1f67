//! Dead-letter routing for messages that exhausted their retries.
//!
//! - `DeadLetterRecord`: the exhausted message plus failure metadata
//! - `DeadLetterPublisher`: writes records to `<topic>.DLT`
//! - `DeadLetterObserver`: consumes `<topic>.DLT` and feeds a `DeadLetterSink`

pub mod observer;
pub mod publisher;
pub mod record;

pub use observer::{DeadLetterObserver, DeadLetterSink, LoggingSink, RecordingSink};
pub use publisher::{DeadLetterPolicy, DeadLetterPublisher, PublishError};
pub use record::{
    DLT_SUFFIX, DeadLetterRecord, DeadLetterReport, DecodeError, dead_letter_topic, headers,
};
