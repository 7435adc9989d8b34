//! Isolation unit — one unconditionally terminable guest run.
//!
//! State machine per unit:
//!
//! ```text
//! Spawned → Running → Completed
//!                   → TimedOut → Terminating → Killed
//!                   → CrashedWithoutResult
//! ```
//!
//! The unit is a dedicated named thread whose interpreter consults the
//! supervisor's kill switch on every guest operation (progress hook). A guest
//! cannot execute anything *between* interpreter operations, so setting the
//! switch always stops it; the grace period only covers the tail of the
//! current operation. The parent owns nothing of the unit's state and
//! communicates only through a one-shot channel.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rhai::{Dynamic, EvalAltResult, Scope, AST};
use tracing::{debug, warn};

use stratbox_core::domain::{Bar, Signal, SignalKind};
use stratbox_core::error::ExecutionError;

use crate::namespace::{self, CapabilitySet, OutputContainers};

/// Everything a successful guest run produced.
#[derive(Debug, Clone)]
pub struct GuestOutput {
    pub signals: Vec<Signal>,
    pub indicators: BTreeMap<String, Vec<f64>>,
}

/// Channel payload: outcome plus captured `print`/`debug` logs, which are
/// delivered on failure too.
#[derive(Debug)]
pub struct UnitReport {
    pub outcome: Result<GuestOutput, ExecutionError>,
    pub logs: Vec<String>,
}

/// Terminal classification of one unit, as observed by the supervisor.
#[derive(Debug)]
pub enum UnitOutcome {
    /// The unit delivered a report (success or guest failure) and exited.
    Completed(UnitReport),
    /// The deadline elapsed; the unit was killed.
    TimedOut,
    /// The unit died without a report and without timing out.
    Crashed,
}

/// A spawned, running isolation unit.
pub struct IsolationUnit {
    kill: Arc<AtomicBool>,
    rx: Receiver<UnitReport>,
    handle: Option<JoinHandle<()>>,
}

impl IsolationUnit {
    /// Spawn a unit executing `strategy(data)` from an already-compiled
    /// artifact. The columnar market view is built inside the unit.
    ///
    /// A unit the OS refuses to spawn never ran at all; that surfaces as
    /// `UnitTerminated`, not a panic.
    pub fn spawn(
        ast: Arc<AST>,
        bars: Vec<Bar>,
        caps: CapabilitySet,
    ) -> Result<Self, ExecutionError> {
        let kill = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let unit_kill = Arc::clone(&kill);
        let handle = thread::Builder::new()
            .name("stratbox-guest".into())
            .spawn(move || {
                let report = run_guest(&ast, &bars, &caps, unit_kill);
                // The parent may have moved on after a timeout; a dead
                // receiver is expected then.
                let _ = tx.send(report);
            })
            .map_err(|e| {
                warn!(error = %e, "failed to spawn isolation unit");
                ExecutionError::UnitTerminated
            })?;

        debug!("isolation unit spawned");
        Ok(Self {
            kill,
            rx,
            handle: Some(handle),
        })
    }

    /// Wait for the unit to finish or for `timeout` to elapse.
    ///
    /// On timeout the kill switch is set, the channel is drained for `grace`,
    /// and the unit is abandoned if still silent. Results delivered during
    /// the grace window are discarded — a run past its deadline never
    /// returns partial signals.
    pub fn wait(mut self, timeout: Duration, grace: Duration) -> UnitOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(report) => {
                self.join();
                debug!("isolation unit completed");
                UnitOutcome::Completed(report)
            }
            Err(RecvTimeoutError::Timeout) => {
                debug!("deadline elapsed, terminating isolation unit");
                self.kill.store(true, Ordering::Relaxed);
                match self.rx.recv_timeout(grace) {
                    Ok(_discarded) => {
                        self.join();
                        debug!("isolation unit stopped within grace period");
                    }
                    Err(_) => {
                        // Abandon the thread; the interpreter stops it at the
                        // next operation boundary.
                        drop(self.handle.take());
                        warn!("isolation unit killed after grace period");
                    }
                }
                UnitOutcome::TimedOut
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join();
                warn!("isolation unit terminated without delivering a result");
                UnitOutcome::Crashed
            }
        }
    }

    fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Body of the isolation unit: build the capability namespace, call the
/// entry point once, collect outputs.
fn run_guest(
    ast: &AST,
    bars: &[Bar],
    caps: &CapabilitySet,
    kill: Arc<AtomicBool>,
) -> UnitReport {
    let outputs = OutputContainers::new();
    let logs: Arc<Mutex<Vec<String>>> = Arc::default();
    let engine = namespace::execution_engine(caps, &outputs, kill, Arc::clone(&logs));

    // Columnar conversion happens here, inside the unit — linear in bars,
    // never shared with another unit.
    let view = namespace::market_view(bars);

    let mut scope = Scope::new();
    let call = engine.call_fn::<Dynamic>(&mut scope, ast, "strategy", (view,));

    let taken_logs = || std::mem::take(&mut *logs.lock().expect("logs lock"));

    match call {
        Ok(returned) => match apply_return_convention(&returned, &outputs, bars) {
            Ok(()) => {
                let (signals, indicators) = outputs.take();
                UnitReport {
                    outcome: Ok(GuestOutput {
                        signals,
                        indicators,
                    }),
                    logs: taken_logs(),
                }
            }
            Err(err) => UnitReport {
                outcome: Err(err),
                logs: taken_logs(),
            },
        },
        Err(err) => UnitReport {
            outcome: Err(classify_eval_error(*err)),
            logs: taken_logs(),
        },
    }
}

/// Convenience return: a bare `"BUY"`/`"SELL"` return with no emitted
/// signals synthesizes one signal at the last bar. `"HOLD"` and non-string
/// returns are ignored; any other string is an invalid signal.
fn apply_return_convention(
    returned: &Dynamic,
    outputs: &OutputContainers,
    bars: &[Bar],
) -> Result<(), ExecutionError> {
    let Ok(text) = returned.clone().into_string() else {
        return Ok(());
    };
    let kind: SignalKind = text
        .parse()
        .map_err(ExecutionError::GuestRuntime)?;
    if kind != SignalKind::Hold && outputs.signal_count() == 0 {
        if let Some(last) = bars.last() {
            let mut signal = Signal::new(last.timestamp, kind, last.close);
            signal.reason = "strategy return value".into();
            outputs.push_signal(signal);
        }
    }
    Ok(())
}

/// Map an interpreter error onto the execution taxonomy.
fn classify_eval_error(err: EvalAltResult) -> ExecutionError {
    match err {
        // Kill-switch stop: the supervisor classifies the timeout itself;
        // this value is only seen if the unit stopped inside the grace window.
        EvalAltResult::ErrorTerminated(..) => {
            ExecutionError::GuestRuntime("terminated by supervisor".into())
        }
        EvalAltResult::ErrorTooManyOperations(..) => {
            ExecutionError::GuestRuntime("operation budget exceeded".into())
        }
        EvalAltResult::ErrorFunctionNotFound(ref sig, ..) if sig.starts_with("strategy") => {
            ExecutionError::MissingEntryPoint(
                "script must define fn strategy(data) taking one parameter".into(),
            )
        }
        other => ExecutionError::GuestRuntime(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| Bar {
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
                open: 100.0,
                high: 101.0,
                low: 99.0,
                close: 100.0 + i as f64,
                volume: 1_000.0,
            })
            .collect()
    }

    fn compile(source: &str) -> Arc<AST> {
        let engine = namespace::compile_engine(&CapabilitySet::default());
        Arc::new(engine.compile(source).unwrap())
    }

    #[test]
    fn unit_completes_with_emitted_signals() {
        let ast = compile(
            r#"
            fn strategy(data) {
                emit_signal(#{
                    timestamp: data.timestamp[0],
                    kind: "BUY",
                    price: data.close[0],
                });
            }
            "#,
        );
        let unit = IsolationUnit::spawn(ast, bars(3), CapabilitySet::default()).expect("spawn unit");
        match unit.wait(Duration::from_secs(5), Duration::from_millis(250)) {
            UnitOutcome::Completed(report) => {
                let output = report.outcome.unwrap();
                assert_eq!(output.signals.len(), 1);
                assert_eq!(output.signals[0].kind, SignalKind::Buy);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn unit_times_out_on_infinite_loop() {
        let ast = compile("fn strategy(data) { loop { } }");
        let unit = IsolationUnit::spawn(ast, bars(3), CapabilitySet::default()).expect("spawn unit");
        let started = std::time::Instant::now();
        match unit.wait(Duration::from_millis(300), Duration::from_millis(250)) {
            UnitOutcome::TimedOut => {}
            other => panic!("expected timeout, got {other:?}"),
        }
        // Deadline + grace, with scheduler slack.
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn unit_reports_guest_runtime_error() {
        let ast = compile("fn strategy(data) { data.close[0] / missing() }");
        let unit = IsolationUnit::spawn(ast, bars(3), CapabilitySet::default()).expect("spawn unit");
        match unit.wait(Duration::from_secs(5), Duration::from_millis(250)) {
            UnitOutcome::Completed(report) => {
                let err = report.outcome.unwrap_err();
                assert!(matches!(err, ExecutionError::GuestRuntime(_)));
            }
            other => panic!("expected completion with error, got {other:?}"),
        }
    }

    #[test]
    fn return_value_synthesizes_signal_at_last_bar() {
        let ast = compile(r#"fn strategy(data) { "BUY" }"#);
        let bars = bars(4);
        let last_close = bars.last().unwrap().close;
        let unit = IsolationUnit::spawn(ast, bars, CapabilitySet::default()).expect("spawn unit");
        match unit.wait(Duration::from_secs(5), Duration::from_millis(250)) {
            UnitOutcome::Completed(report) => {
                let output = report.outcome.unwrap();
                assert_eq!(output.signals.len(), 1);
                assert_eq!(output.signals[0].price, last_close);
                assert_eq!(output.signals[0].reason, "strategy return value");
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn invalid_return_string_is_guest_error() {
        let ast = compile(r#"fn strategy(data) { "INVALID_SIGNAL" }"#);
        let unit = IsolationUnit::spawn(ast, bars(2), CapabilitySet::default()).expect("spawn unit");
        match unit.wait(Duration::from_secs(5), Duration::from_millis(250)) {
            UnitOutcome::Completed(report) => {
                assert!(matches!(
                    report.outcome.unwrap_err(),
                    ExecutionError::GuestRuntime(_)
                ));
            }
            other => panic!("expected completion with error, got {other:?}"),
        }
    }

    #[test]
    fn hold_return_emits_nothing() {
        let ast = compile(r#"fn strategy(data) { "HOLD" }"#);
        let unit = IsolationUnit::spawn(ast, bars(2), CapabilitySet::default()).expect("spawn unit");
        match unit.wait(Duration::from_secs(5), Duration::from_millis(250)) {
            UnitOutcome::Completed(report) => {
                assert!(report.outcome.unwrap().signals.is_empty());
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }

    #[test]
    fn print_output_is_captured_as_logs() {
        let ast = compile(r#"fn strategy(data) { print("hello from guest"); }"#);
        let unit = IsolationUnit::spawn(ast, bars(2), CapabilitySet::default()).expect("spawn unit");
        match unit.wait(Duration::from_secs(5), Duration::from_millis(250)) {
            UnitOutcome::Completed(report) => {
                assert_eq!(report.logs, vec!["hello from guest".to_string()]);
            }
            other => panic!("expected completion, got {other:?}"),
        }
    }
}
