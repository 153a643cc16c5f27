use refdata_backoff::{Classify, ErrorClass};
use refdata_codec::CodecError;
use refdata_stream_core::StreamError;

/// Errors raised while running the audit projection loop.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// A message's topic did not match any registered entity's update topic.
    #[error("unknown RefData update topic: {0}")]
    UnknownTopic(String),
    /// Decoding a typed record from an update-topic message failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A stream producer/consumer operation failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// The audit store rejected an insert after every configured retry.
    #[error("audit store insert failed for entity {entity} after {attempts} attempts: {source}")]
    StoreExhausted {
        /// The entity bucket that failed to insert.
        entity: &'static str,
        /// Number of attempts made before giving up.
        attempts: u32,
        /// The underlying failure from the last attempt.
        source: String,
    },
}

impl Classify for AuditError {
    fn error_class(&self) -> ErrorClass {
        match self {
            AuditError::UnknownTopic(_) | AuditError::Codec(_) => ErrorClass::PerMessage,
            AuditError::Stream(StreamError::Transient(_) | StreamError::FlushTimeout(_)) => ErrorClass::Transient,
            AuditError::Stream(StreamError::TransactionAbortRequired(_)) => ErrorClass::TransactionAbortRequired,
            AuditError::Stream(StreamError::Fatal(_)) => ErrorClass::Fatal,
            AuditError::StoreExhausted { .. } => ErrorClass::Fatal,
        }
    }
}
