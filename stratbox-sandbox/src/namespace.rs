//! Capability namespace — the restricted world a guest program runs in.
//!
//! The engine is built from `Engine::new_raw()` plus an explicit whitelist of
//! packages, the indicator library, and the two output capabilities
//! (`emit_signal`, `record_indicator`). Nothing else exists: no module
//! resolver, no `eval`, no file/network/process surface, no interpreter
//! introspection. `eval` and `import` are additionally disabled as symbols so
//! that referencing them is a compile error, not just a missing function.
//!
//! A fresh engine, market view, and pair of output containers are built for
//! every execution. Only the compiled AST is ever shared between runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use rhai::packages::{BasicArrayPackage, BasicMapPackage, BasicMathPackage, CorePackage, Package};
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position};

use stratbox_core::domain::{Bar, Signal, SignalKind};
use stratbox_core::indicators;

/// Identifiers the admission gate rejects outright.
///
/// This is the gate's deny list, deliberately broader than the language
/// surface: none of these exist in the namespace anyway, so the authoritative
/// enforcement is their absence. The gate names them to fail fast with a
/// useful message.
pub const FORBIDDEN_IDENTIFIERS: &[&str] = &[
    "eval",
    "exec",
    "open",
    "input",
    "system",
    "spawn",
    "require",
    "load_module",
    "read_file",
    "write_file",
    "connect",
    "http_get",
    "http_post",
    "getenv",
    "set_env",
];

/// Identifiers that trigger a non-fatal validation warning.
pub const DISCOURAGED_IDENTIFIERS: &[&str] = &["sleep", "timestamp_now", "rand", "random"];

/// Language symbols disabled in the restricted grammar. Referencing one is a
/// compile error — the authoritative counterpart to the gate's advisory scan.
pub const DISABLED_SYMBOLS: &[&str] = &["eval", "import", "export"];

/// Explicit resource and capability limits for one execution.
///
/// Constructed once and injected; never assembled ad hoc from globals.
#[derive(Debug, Clone)]
pub struct CapabilitySet {
    /// Interpreter operation budget (secondary bound; the deadline is primary).
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_string_size: usize,
}

impl Default for CapabilitySet {
    fn default() -> Self {
        Self {
            max_operations: 100_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_array_size: 1_000_000,
            max_map_size: 100_000,
            max_string_size: 1_000_000,
        }
    }
}

impl CapabilitySet {
    /// Rough upper bound on guest-reachable memory, for health reporting.
    pub fn memory_budget_mb(&self) -> u64 {
        let bytes = self.max_array_size as u64 * 24
            + self.max_map_size as u64 * 48
            + self.max_string_size as u64;
        (bytes / (1024 * 1024)).max(1)
    }
}

/// The two per-execution output containers a guest populates through its
/// capability functions. Never reused across runs.
#[derive(Debug, Default, Clone)]
pub struct OutputContainers {
    signals: Arc<Mutex<Vec<Signal>>>,
    indicators: Arc<Mutex<BTreeMap<String, Vec<f64>>>>,
}

impl OutputContainers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain both containers. Called once, after the guest returns.
    pub fn take(&self) -> (Vec<Signal>, BTreeMap<String, Vec<f64>>) {
        let signals = std::mem::take(&mut *self.signals.lock().expect("signals lock"));
        let indicators = std::mem::take(&mut *self.indicators.lock().expect("indicators lock"));
        (signals, indicators)
    }

    pub fn signal_count(&self) -> usize {
        self.signals.lock().expect("signals lock").len()
    }

    /// Append a signal from the host side, same container the guest's
    /// `emit_signal` writes to.
    pub fn push_signal(&self, signal: Signal) {
        self.signals.lock().expect("signals lock").push(signal);
    }
}

/// Build the restricted engine used for compilation only.
///
/// Same grammar restrictions as the execution engine, but no capabilities
/// bound — compiling never runs guest code.
pub fn compile_engine(caps: &CapabilitySet) -> Engine {
    let mut engine = Engine::new_raw();
    apply_limits(&mut engine, caps);
    for symbol in DISABLED_SYMBOLS {
        engine.disable_symbol(*symbol);
    }
    engine
}

/// Build a fully-equipped execution engine for one run.
///
/// `kill` is the supervisor's kill switch, consulted on every interpreter
/// operation via the progress hook; `logs` captures `print`/`debug` output.
pub fn execution_engine(
    caps: &CapabilitySet,
    outputs: &OutputContainers,
    kill: Arc<AtomicBool>,
    logs: Arc<Mutex<Vec<String>>>,
) -> Engine {
    let mut engine = compile_engine(caps);

    // Whitelisted builtins: language core, arrays, maps, math.
    engine.register_global_module(CorePackage::new().as_shared_module());
    engine.register_global_module(BasicArrayPackage::new().as_shared_module());
    engine.register_global_module(BasicMapPackage::new().as_shared_module());
    engine.register_global_module(BasicMathPackage::new().as_shared_module());

    register_indicators(&mut engine);
    register_outputs(&mut engine, outputs);

    // Unconditional termination: every guest operation passes through here.
    engine.on_progress(move |_ops| {
        if kill.load(Ordering::Relaxed) {
            Some(Dynamic::from("deadline exceeded"))
        } else {
            None
        }
    });

    let print_logs = Arc::clone(&logs);
    engine.on_print(move |msg| {
        print_logs.lock().expect("logs lock").push(msg.to_string());
    });
    engine.on_debug(move |msg, _source, pos| {
        logs.lock()
            .expect("logs lock")
            .push(format!("debug ({pos}): {msg}"));
    });

    engine
}

fn apply_limits(engine: &mut Engine, caps: &CapabilitySet) {
    engine.set_max_operations(caps.max_operations);
    engine.set_max_call_levels(caps.max_call_levels);
    engine.set_max_expr_depths(caps.max_expr_depth, caps.max_expr_depth);
    engine.set_max_array_size(caps.max_array_size);
    engine.set_max_map_size(caps.max_map_size);
    engine.set_max_string_size(caps.max_string_size);
}

/// Columnar view of the bar sequence handed to `strategy(data)`.
///
/// One array per OHLCV field plus RFC 3339 timestamps and a `length` field.
/// Linear in the number of bars; built inside the isolation unit so no view
/// is ever shared between units.
pub fn market_view(bars: &[Bar]) -> Map {
    let n = bars.len();
    let mut timestamps = Array::with_capacity(n);
    let mut opens = Array::with_capacity(n);
    let mut highs = Array::with_capacity(n);
    let mut lows = Array::with_capacity(n);
    let mut closes = Array::with_capacity(n);
    let mut volumes = Array::with_capacity(n);

    for bar in bars {
        timestamps.push(format_timestamp(bar.timestamp).into());
        opens.push(Dynamic::from_float(bar.open));
        highs.push(Dynamic::from_float(bar.high));
        lows.push(Dynamic::from_float(bar.low));
        closes.push(Dynamic::from_float(bar.close));
        volumes.push(Dynamic::from_float(bar.volume));
    }

    let mut view = Map::new();
    view.insert("timestamp".into(), timestamps.into());
    view.insert("open".into(), opens.into());
    view.insert("high".into(), highs.into());
    view.insert("low".into(), lows.into());
    view.insert("close".into(), closes.into());
    view.insert("volume".into(), volumes.into());
    view.insert("length".into(), Dynamic::from_int(n as i64));
    view
}

/// RFC 3339 with seconds precision and a trailing `Z` — matches what
/// `emit_signal` parses back.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn register_indicators(engine: &mut Engine) {
    engine.register_fn("sma", |values: Array, period: i64| {
        indicator_call(&values, period, indicators::sma)
    });
    engine.register_fn("ema", |values: Array, period: i64| {
        indicator_call(&values, period, indicators::ema)
    });
    engine.register_fn("rsi", |values: Array, period: i64| {
        indicator_call(&values, period, indicators::rsi)
    });
    engine.register_fn("roc", |values: Array, period: i64| {
        indicator_call(&values, period, indicators::roc)
    });
    engine.register_fn("highest", |values: Array, period: i64| {
        indicator_call(&values, period, indicators::highest)
    });
    engine.register_fn("lowest", |values: Array, period: i64| {
        indicator_call(&values, period, indicators::lowest)
    });
}

fn register_outputs(engine: &mut Engine, outputs: &OutputContainers) {
    let signals = Arc::clone(&outputs.signals);
    engine.register_fn(
        "emit_signal",
        move |sig: Map| -> Result<(), Box<EvalAltResult>> {
            let signal = signal_from_map(&sig).map_err(guest_error)?;
            signals.lock().expect("signals lock").push(signal);
            Ok(())
        },
    );

    let series = Arc::clone(&outputs.indicators);
    engine.register_fn(
        "record_indicator",
        move |name: ImmutableString, values: Array| -> Result<(), Box<EvalAltResult>> {
            let parsed = to_f64_series(&values).map_err(guest_error)?;
            series
                .lock()
                .expect("indicators lock")
                .insert(name.to_string(), parsed);
            Ok(())
        },
    );
}

fn indicator_call(
    values: &Array,
    period: i64,
    f: fn(&[f64], usize) -> Vec<f64>,
) -> Result<Array, Box<EvalAltResult>> {
    if period < 1 {
        return Err(guest_error(format!("indicator period must be >= 1, got {period}")));
    }
    let series = to_f64_series(values).map_err(guest_error)?;
    Ok(f(&series, period as usize)
        .into_iter()
        .map(Dynamic::from_float)
        .collect())
}

fn guest_error(msg: impl Into<String>) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(Dynamic::from(msg.into()), Position::NONE).into()
}

/// Coerce a guest array into `f64`s. Non-numeric elements are an error.
fn to_f64_series(values: &Array) -> Result<Vec<f64>, String> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            numeric(v).ok_or_else(|| format!("non-numeric value at index {i} in series"))
        })
        .collect()
}

fn numeric(value: &Dynamic) -> Option<f64> {
    value
        .as_float()
        .ok()
        .or_else(|| value.as_int().ok().map(|i| i as f64))
}

/// Parse a guest-supplied signal map into a typed `Signal`.
///
/// Required: `timestamp` (RFC 3339 string), `kind` (or `type`), `price`.
/// Optional with defaults: `quantity` (1), `reason` (""), `confidence` (1).
fn signal_from_map(map: &Map) -> Result<Signal, String> {
    let timestamp = map
        .get("timestamp")
        .ok_or("signal is missing 'timestamp'")?;
    let timestamp = timestamp
        .clone()
        .into_string()
        .map_err(|_| "signal 'timestamp' must be a string".to_string())
        .and_then(|s| parse_timestamp(&s))?;

    let kind = map
        .get("kind")
        .or_else(|| map.get("type"))
        .ok_or("signal is missing 'kind'")?;
    let kind: SignalKind = kind
        .clone()
        .into_string()
        .map_err(|_| "signal 'kind' must be a string".to_string())?
        .parse()?;

    // Non-finite values would poison every report downstream; reject here.
    let price = map
        .get("price")
        .and_then(numeric)
        .filter(|p| p.is_finite())
        .ok_or("signal 'price' must be a finite number")?;

    let quantity = match map.get("quantity") {
        Some(q) => numeric(q)
            .filter(|q| q.is_finite())
            .ok_or("signal 'quantity' must be a finite number")?,
        None => 1.0,
    };
    let confidence = match map.get("confidence") {
        Some(c) => numeric(c)
            .filter(|c| c.is_finite())
            .ok_or("signal 'confidence' must be a finite number")?,
        None => 1.0,
    };
    let reason = match map.get("reason") {
        Some(r) => r
            .clone()
            .into_string()
            .map_err(|_| "signal 'reason' must be a string".to_string())?,
        None => String::new(),
    };

    Ok(Signal {
        timestamp,
        kind,
        price,
        quantity,
        reason,
        confidence,
    })
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid signal timestamp {s:?}: {e}"))
}
