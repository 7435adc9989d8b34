//! Sandbox executor — compile (with cache), run in an isolation unit, map
//! every failure onto the execution error taxonomy.
//!
//! `execute` never returns `Err`: callers always get an `ExecutionResult`,
//! with `success = false` and a typed error when anything went wrong. A run
//! past its deadline reports a timeout and nothing else, never partial
//! signals.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rhai::{ParseErrorType, AST};
use serde::Serialize;
use tracing::{debug, info, warn};

use stratbox_core::domain::{Bar, Signal};
use stratbox_core::error::ExecutionError;
use stratbox_core::fingerprint::CodeFingerprint;

use crate::cache::CompiledCache;
use crate::isolation::{IsolationUnit, UnitOutcome};
use crate::namespace::{self, CapabilitySet};

/// How long a killed unit is given to stop at its next operation boundary
/// before being abandoned.
const KILL_GRACE: Duration = Duration::from_millis(250);

/// Outcome of one strategy execution, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub signals: Vec<Signal>,
    pub indicators: BTreeMap<String, Vec<f64>>,
    pub logs: Vec<String>,
    pub error: Option<ExecutionError>,
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    fn failure(error: ExecutionError, logs: Vec<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            signals: Vec::new(),
            indicators: BTreeMap::new(),
            logs,
            error: Some(error),
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Shared, thread-safe executor. One instance serves all requests; the only
/// cross-request state is the compile cache.
pub struct SandboxExecutor {
    caps: CapabilitySet,
    cache: CompiledCache,
}

impl SandboxExecutor {
    pub fn new(caps: CapabilitySet, cache_capacity: usize) -> Self {
        Self {
            caps,
            cache: CompiledCache::new(cache_capacity),
        }
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    pub fn cache(&self) -> &CompiledCache {
        &self.cache
    }

    /// Compile `source` under the restricted grammar, reusing a cached
    /// artifact when the fingerprint matches.
    pub fn compile(&self, source: &str) -> Result<Arc<AST>, ExecutionError> {
        let fingerprint = CodeFingerprint::of(source);
        if let Some(ast) = self.cache.get(&fingerprint) {
            debug!(fingerprint = %fingerprint.short(), "compile cache hit");
            return Ok(ast);
        }

        let engine = namespace::compile_engine(&self.caps);
        let ast = engine
            .compile(source)
            .map_err(classify_parse_error)
            .map(Arc::new)?;

        ensure_entry_point(&ast)?;

        debug!(fingerprint = %fingerprint.short(), "compiled and cached");
        self.cache.insert(fingerprint, Arc::clone(&ast));
        Ok(ast)
    }

    /// Run `strategy(data)` against `bars` with a hard deadline.
    pub fn execute(&self, source: &str, bars: &[Bar], timeout: Duration) -> ExecutionResult {
        let started = Instant::now();

        let ast = match self.compile(source) {
            Ok(ast) => ast,
            Err(err) => return ExecutionResult::failure(err, Vec::new(), started.elapsed()),
        };

        let unit = match IsolationUnit::spawn(ast, bars.to_vec(), self.caps.clone()) {
            Ok(unit) => unit,
            Err(err) => return ExecutionResult::failure(err, Vec::new(), started.elapsed()),
        };
        match unit.wait(timeout, KILL_GRACE) {
            UnitOutcome::Completed(report) => {
                let elapsed = started.elapsed();
                match report.outcome {
                    Ok(output) => {
                        info!(
                            signals = output.signals.len(),
                            elapsed_ms = elapsed.as_millis() as u64,
                            "execution completed"
                        );
                        ExecutionResult {
                            success: true,
                            signals: output.signals,
                            indicators: output.indicators,
                            logs: report.logs,
                            error: None,
                            execution_time_ms: elapsed.as_millis() as u64,
                        }
                    }
                    Err(err) => {
                        debug!(%err, "guest execution failed");
                        ExecutionResult::failure(err, report.logs, elapsed)
                    }
                }
            }
            UnitOutcome::TimedOut => {
                warn!(timeout_secs = timeout.as_secs(), "execution timed out");
                ExecutionResult::failure(
                    ExecutionError::Timeout {
                        timeout_secs: timeout.as_secs(),
                    },
                    Vec::new(),
                    started.elapsed(),
                )
            }
            UnitOutcome::Crashed => {
                warn!("isolation unit crashed without a result");
                ExecutionResult::failure(
                    ExecutionError::UnitTerminated,
                    Vec::new(),
                    started.elapsed(),
                )
            }
        }
    }
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(CapabilitySet::default(), crate::cache::DEFAULT_CAPACITY)
    }
}

/// A disabled symbol surfaces as a reserved-symbol parse error. Token-level
/// failures are bad syntax; structural rejections (malformed expressions,
/// duplicate definitions, constant violations) are compilation failures.
fn classify_parse_error(err: rhai::ParseError) -> ExecutionError {
    match *err.0 {
        ParseErrorType::Reserved(ref symbol) => {
            ExecutionError::ForbiddenCapability(symbol.clone())
        }
        ParseErrorType::BadInput(_)
        | ParseErrorType::UnexpectedEOF
        | ParseErrorType::UnknownOperator(_)
        | ParseErrorType::MissingToken(..) => ExecutionError::Syntax(err.to_string()),
        _ => ExecutionError::Compilation(err.to_string()),
    }
}

fn ensure_entry_point(ast: &AST) -> Result<(), ExecutionError> {
    let found = ast
        .iter_functions()
        .find(|f| f.name == "strategy")
        .ok_or_else(|| {
            ExecutionError::MissingEntryPoint(
                "script must define fn strategy(data)".into(),
            )
        })?;
    if found.params.len() != 1 {
        return Err(ExecutionError::MissingEntryPoint(format!(
            "fn strategy must take exactly one parameter, found {}",
            found.params.len()
        )));
    }
    Ok(())
}
