//! Execution service — the one facade callers talk to.
//!
//! Validation, sandboxed execution, and backtesting are strictly sequential
//! within a request; between requests the service runs executions on a
//! private bounded worker pool, so at most `worker_threads` guests run at
//! once no matter how many caller threads pile in. The compile cache inside
//! the executor is the only state shared across requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use stratbox_core::domain::{Bar, Signal};
use stratbox_core::error::ExecutionError;
use stratbox_sandbox::namespace::CapabilitySet;
use stratbox_sandbox::{CodeValidator, SandboxExecutor, ValidationReport};

use crate::backtest::BacktestCalculator;
use crate::config::ServiceConfig;
use crate::report::PerformanceReport;

pub const SUPPORTED_LANGUAGE: &str = "rhai";

/// Errors surfaced on a run outcome. Request-shape problems are
/// `InvalidRequest`; everything downstream carries the execution taxonomy.
#[derive(Debug, Clone, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    #[error("service initialization failed: {0}")]
    Init(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyRunRequest {
    pub source: String,
    pub language: String,
    pub bars: Vec<Bar>,
    /// 0 means "use the configured default".
    pub timeout_seconds: u64,
    pub user_id: Option<String>,
    pub strategy_id: Option<String>,
}

/// One indicator sample aligned with a bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndicatorPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StrategyRunOutcome {
    pub success: bool,
    pub signals: Vec<Signal>,
    pub indicators: BTreeMap<String, Vec<IndicatorPoint>>,
    pub performance: Option<PerformanceReport>,
    pub error: Option<ServiceError>,
    pub logs: Vec<String>,
    pub execution_time_ms: u64,
}

impl StrategyRunOutcome {
    fn failure(error: ServiceError, logs: Vec<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            signals: Vec::new(),
            indicators: BTreeMap::new(),
            performance: None,
            error: Some(error),
            logs,
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: String,
    pub supported_languages: Vec<String>,
    pub max_timeout_seconds: u64,
    pub max_memory_mb: u64,
    pub metadata: BTreeMap<String, String>,
}

pub struct ExecutionService {
    config: ServiceConfig,
    validator: CodeValidator,
    executor: Arc<SandboxExecutor>,
    pool: rayon::ThreadPool,
}

impl ExecutionService {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|e| ServiceError::Init(e.to_string()))?;
        let caps = CapabilitySet::default();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads)
            .thread_name(|i| format!("stratbox-worker-{i}"))
            .build()
            .map_err(|e| ServiceError::Init(e.to_string()))?;
        Ok(Self {
            validator: CodeValidator::new(caps.clone()),
            executor: Arc::new(SandboxExecutor::new(caps, config.cache_capacity)),
            config,
            pool,
        })
    }

    /// Admission gate only; never executes anything.
    pub fn validate_code(&self, source: &str, language: &str) -> ValidationReport {
        if language != SUPPORTED_LANGUAGE {
            return ValidationReport {
                valid: false,
                errors: vec![format!(
                    "unsupported language {language:?}; supported: {SUPPORTED_LANGUAGE}"
                )],
                warnings: Vec::new(),
                suggestions: Vec::new(),
            };
        }
        self.validator.validate(source)
    }

    /// Run a strategy end to end: sandbox execution, then a backtest iff
    /// signals were produced. Never returns `Err`; failures are typed on
    /// the outcome.
    pub fn execute_strategy(&self, request: &StrategyRunRequest) -> StrategyRunOutcome {
        let started = Instant::now();

        if let Err(error) = self.check_request(request) {
            warn!(%error, "rejected strategy request");
            return StrategyRunOutcome::failure(error, Vec::new(), started.elapsed());
        }

        let timeout_seconds = if request.timeout_seconds == 0 {
            self.config.default_timeout_seconds
        } else {
            request.timeout_seconds
        };
        let timeout = Duration::from_secs(timeout_seconds);

        debug!(
            strategy = request.strategy_id.as_deref().unwrap_or("-"),
            user = request.user_id.as_deref().unwrap_or("-"),
            bars = request.bars.len(),
            timeout_seconds,
            "executing strategy"
        );

        let executor = Arc::clone(&self.executor);
        let result = self
            .pool
            .install(|| executor.execute(&request.source, &request.bars, timeout));

        let performance = if result.success && !result.signals.is_empty() {
            Some(
                BacktestCalculator::new(self.config.initial_capital)
                    .calculate(&result.signals, &request.bars),
            )
        } else {
            None
        };

        let indicators = align_indicators(result.indicators, &request.bars);

        info!(
            strategy = request.strategy_id.as_deref().unwrap_or("-"),
            success = result.success,
            signals = result.signals.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "strategy run finished"
        );

        StrategyRunOutcome {
            success: result.success,
            signals: result.signals,
            indicators,
            performance,
            error: result.error.map(ServiceError::Execution),
            logs: result.logs,
            execution_time_ms: started.elapsed().as_millis() as u64,
        }
    }

    pub fn health(&self) -> HealthReport {
        let caps = self.executor.capabilities();
        let cache = self.executor.cache();
        let mut metadata = BTreeMap::new();
        metadata.insert("worker_threads".into(), self.config.worker_threads.to_string());
        metadata.insert("cache_capacity".into(), cache.capacity().to_string());
        metadata.insert("cache_entries".into(), cache.len().to_string());
        metadata.insert("cache_hits".into(), cache.hits().to_string());
        metadata.insert("cache_misses".into(), cache.misses().to_string());

        HealthReport {
            status: "healthy".into(),
            supported_languages: vec![SUPPORTED_LANGUAGE.into()],
            max_timeout_seconds: self.config.max_timeout_seconds,
            max_memory_mb: caps.memory_budget_mb(),
            metadata,
        }
    }

    fn check_request(&self, request: &StrategyRunRequest) -> Result<(), ServiceError> {
        if request.source.trim().is_empty() {
            return Err(ServiceError::InvalidRequest("source code is empty".into()));
        }
        if request.bars.is_empty() {
            return Err(ServiceError::InvalidRequest("no bars supplied".into()));
        }
        if request.timeout_seconds > self.config.max_timeout_seconds {
            return Err(ServiceError::InvalidRequest(format!(
                "timeout {}s exceeds the maximum of {}s",
                request.timeout_seconds, self.config.max_timeout_seconds
            )));
        }
        if request.language != SUPPORTED_LANGUAGE {
            return Err(ServiceError::Execution(ExecutionError::UnsupportedLanguage(
                request.language.clone(),
            )));
        }
        Ok(())
    }
}

/// Pair each indicator value with its bar's timestamp. Series are clipped to
/// the bar count; non-finite warmup values are dropped rather than
/// serialized.
fn align_indicators(
    series: BTreeMap<String, Vec<f64>>,
    bars: &[Bar],
) -> BTreeMap<String, Vec<IndicatorPoint>> {
    series
        .into_iter()
        .map(|(name, values)| {
            let points = values
                .into_iter()
                .take(bars.len())
                .enumerate()
                .filter(|(_, v)| v.is_finite())
                .map(|(i, value)| IndicatorPoint {
                    timestamp: bars[i].timestamp,
                    value,
                })
                .collect();
            (name, points)
        })
        .collect()
}
