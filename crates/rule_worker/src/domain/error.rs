use thiserror::Error;

/// Rule engine failures. Every variant raised while evaluating is retryable:
/// the input is redelivered rather than routed to the error sink.
#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid definition for rule {rule_id}: {reason}")]
    InvalidDefinition { rule_id: u64, reason: String },

    #[error("rule {rule_id} does not compile: {message}")]
    Compilation { rule_id: u64, message: String },

    #[error("rule {rule_id} failed to evaluate: {message}")]
    Evaluation { rule_id: u64, message: String },
}
