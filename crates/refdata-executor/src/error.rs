use refdata_backoff::{Classify, ErrorClass};
use refdata_bus_core::BusError;
use refdata_codec::CodecError;
use refdata_stream_core::StreamError;
use uuid::Uuid;

/// Errors raised while processing the command-topic write path.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// A message's topic did not match any registered entity's command or
    /// update topic.
    #[error("unknown RefData topic: {0}")]
    UnknownTopic(String),
    /// `ARQ_CmdAction` was present but not `Upsert` or `Deactivate`.
    #[error("received refdata command with unknown action [{0}]")]
    UnknownAction(String),
    /// A required message header was absent.
    #[error("missing required header {0}")]
    MissingHeader(&'static str),
    /// `ARQ_CorrID` was present but not a valid UUID.
    #[error("invalid correlation id header: {0}")]
    InvalidCorrId(String),
    /// Decoding or encoding a typed record failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// An accepted Deactivate had no prior serialized record to recover
    /// `data` from (version-store and batch both missed it).
    #[error("unable to find latest record for existing entity with UUID {0}")]
    MissingLatestRecord(Uuid),
    /// A stream producer/consumer operation failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// Publishing a response on the messaging bus failed.
    #[error(transparent)]
    Bus(#[from] BusError),
}

impl Classify for ExecutorError {
    fn error_class(&self) -> ErrorClass {
        match self {
            ExecutorError::UnknownTopic(_)
            | ExecutorError::UnknownAction(_)
            | ExecutorError::MissingHeader(_)
            | ExecutorError::InvalidCorrId(_)
            | ExecutorError::Codec(_)
            | ExecutorError::MissingLatestRecord(_) => ErrorClass::PerMessage,
            ExecutorError::Stream(StreamError::Transient(_) | StreamError::FlushTimeout(_)) => {
                ErrorClass::Transient
            }
            ExecutorError::Stream(StreamError::TransactionAbortRequired(_)) => {
                ErrorClass::TransactionAbortRequired
            }
            ExecutorError::Stream(StreamError::Fatal(_)) => ErrorClass::Fatal,
            ExecutorError::Bus(_) => ErrorClass::Transient,
        }
    }
}
