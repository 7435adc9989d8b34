//! Execution error taxonomy.
//!
//! Every failure mode of the pipeline is a typed, non-fatal outcome. The
//! admission gate and the execution engine never let an internal error escape
//! as a panic or an `Err` to the caller; they map everything into this enum
//! and surface it inside the result object.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Typed outcome for a failed validation or execution.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutionError {
    /// Guest source failed to parse.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Source references a denied import or identifier.
    #[error("forbidden capability: {0}")]
    ForbiddenCapability(String),

    /// No correctly-shaped `strategy` entry function.
    #[error("missing entry point: {0}")]
    MissingEntryPoint(String),

    /// The restricted compiler rejected the source.
    #[error("compilation failed: {0}")]
    Compilation(String),

    /// The entry point raised during execution.
    #[error("strategy execution failed: {0}")]
    GuestRuntime(String),

    /// The isolation unit exceeded its deadline and was terminated.
    #[error("execution timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The isolation unit died without delivering a result or timing out.
    #[error("execution failed: isolation unit terminated unexpectedly")]
    UnitTerminated,

    /// The declared guest language is not implemented.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

impl ExecutionError {
    /// True for deadline kills — callers often branch on this one kind.
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecutionError::Timeout { .. })
    }
}
