use crate::effects::RegistryError;
use crate::intensity::ArbitratorError;
use crate::rules::RuleError;
use crate::tracker::SourceError;

/// Errors surfaced by a tracking session
///
/// Device write failures never show up here; they are isolated per device and
/// reported through the arbitrator's apply reports.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Effect registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Device transport went away while a connection is required
    #[error("Lost connection to device transport")]
    EnumerationLoss,

    #[error("Arbitrator error: {0}")]
    Arbitrator(ArbitratorError),

    #[error("Rule evaluation failed: {0}")]
    Rule(#[from] RuleError),

    #[error("State source failed: {0}")]
    Source(#[from] SourceError),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Session task panicked: {0}")]
    TaskPanicked(String),
}

impl From<ArbitratorError> for SessionError {
    fn from(err: ArbitratorError) -> Self {
        match err {
            ArbitratorError::TransportUnavailable => SessionError::EnumerationLoss,
            other => SessionError::Arbitrator(other),
        }
    }
}
