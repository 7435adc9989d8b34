//! Stratbox Sandbox — safe execution of untrusted strategy scripts.
//!
//! The pipeline for one request:
//! 1. `validator` — static admission gate (advisory; defense-in-depth)
//! 2. `cache` + `namespace` — fingerprint, compile under the restricted
//!    grammar (authoritative), reuse compiled artifacts
//! 3. `isolation` — run the guest inside an unconditionally terminable unit
//! 4. `executor` — orchestrates 2–3 and maps every failure into the
//!    `ExecutionError` taxonomy; it never returns `Err`
//!
//! Only the compiled artifact is shared across executions. Capability
//! namespaces, market views, and output containers are built fresh per run.

pub mod cache;
pub mod executor;
pub mod isolation;
pub mod namespace;
pub mod validator;

pub use cache::CompiledCache;
pub use executor::{ExecutionResult, SandboxExecutor};
pub use isolation::{GuestOutput, IsolationUnit, UnitOutcome};
pub use namespace::{CapabilitySet, OutputContainers};
pub use validator::{CodeValidator, ValidationReport};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn executor_is_shareable_across_workers() {
        assert_send::<SandboxExecutor>();
        assert_sync::<SandboxExecutor>();
        assert_send::<CompiledCache>();
        assert_sync::<CompiledCache>();
    }

    #[test]
    fn guest_output_crosses_the_unit_channel() {
        assert_send::<GuestOutput>();
        assert_send::<ExecutionResult>();
    }
}
