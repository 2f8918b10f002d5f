//! Error types for the scheduling core.

use thiserror::Error;

use crate::model::ClassId;

/// Result type for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Machine-readable error taxonomy for the scheduling core (spec.md §7).
///
/// No stack traces cross this boundary; every variant carries a
/// human-readable message alongside its code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedulerError {
    /// Violation of the input contract in spec.md §6. Non-retryable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// No feasible coloring exists within the configured look-ahead.
    /// `conflicting` holds the shortest offending subset when identifiable
    /// (vertices whose available set intersected with neighbors' colors is
    /// empty).
    #[error("infeasible: {reason}")]
    Infeasible { reason: String, conflicting: Vec<ClassId> },

    /// The cooperative cancel token tripped before completion.
    #[error("cancelled")]
    Cancelled,

    /// Wall-clock budget exhausted before any feasible coloring was
    /// produced. Distinct from `Infeasible`: a feasible coloring may well
    /// exist, it just wasn't found in time.
    #[error("budget exceeded without a feasible coloring")]
    BudgetExceeded,
}

impl SchedulerError {
    /// Machine-readable error code, stable across versions.
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::InvalidInput(_) => "INVALID_INPUT",
            SchedulerError::Infeasible { .. } => "INFEASIBLE",
            SchedulerError::Cancelled => "CANCELLED",
            SchedulerError::BudgetExceeded => "BUDGET_EXCEEDED_WITHOUT_FEASIBLE",
        }
    }

    pub fn infeasible(reason: impl Into<String>) -> Self {
        SchedulerError::Infeasible { reason: reason.into(), conflicting: Vec::new() }
    }

    pub fn infeasible_with(reason: impl Into<String>, conflicting: Vec<ClassId>) -> Self {
        SchedulerError::Infeasible { reason: reason.into(), conflicting }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SchedulerError::InvalidInput("x".into()).code(), "INVALID_INPUT");
        assert_eq!(SchedulerError::infeasible("x").code(), "INFEASIBLE");
        assert_eq!(SchedulerError::Cancelled.code(), "CANCELLED");
        assert_eq!(SchedulerError::BudgetExceeded.code(), "BUDGET_EXCEEDED_WITHOUT_FEASIBLE");
    }
}
