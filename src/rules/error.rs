use crate::effects::EventCategory;
use thiserror::Error;

/// Failures while evaluating the rule table
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("{category} rule produced an invalid delta: {value}")]
    InvalidDelta { category: EventCategory, value: f64 },

    #[error("{category} rule has an invalid duration: {secs}s")]
    InvalidDuration { category: EventCategory, secs: f64 },
}
