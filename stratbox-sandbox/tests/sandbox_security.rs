//! Security posture tests: everything the gate rejects must independently
//! fail at compile or run time, because the gate is advisory and the
//! namespace is authoritative.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use stratbox_core::domain::Bar;
use stratbox_core::error::ExecutionError;
use stratbox_sandbox::{CodeValidator, SandboxExecutor};

fn bars(n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| Bar {
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1 + i as u32, 0, 0, 0).unwrap(),
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.0,
            volume: 1_000.0,
        })
        .collect()
}

fn run(source: &str) -> stratbox_sandbox::ExecutionResult {
    SandboxExecutor::default().execute(source, &bars(3), Duration::from_secs(5))
}

#[test]
fn import_fails_both_layers() {
    let source = "import \"fs\" as fs;\nfn strategy(data) { }";

    let report = CodeValidator::default().validate(source);
    assert!(!report.valid);

    let result = run(source);
    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(ExecutionError::ForbiddenCapability(_) | ExecutionError::Syntax(_))
    ));
}

#[test]
fn file_and_network_primitives_do_not_exist() {
    for call in ["open(\"/etc/passwd\")", "http_get(\"http://x\")", "system(\"ls\")"] {
        let source = format!("fn strategy(data) {{ {call}; }}");

        let report = CodeValidator::default().validate(&source);
        assert!(!report.valid, "gate must reject {call}");

        // Run anyway: the function simply does not exist in the namespace.
        let result = run(&source);
        assert!(!result.success, "namespace must reject {call}");
        assert!(matches!(
            result.error,
            Some(ExecutionError::GuestRuntime(_))
        ));
    }
}

#[test]
fn operation_budget_stops_hot_loops_without_a_deadline() {
    use stratbox_sandbox::namespace::CapabilitySet;

    let caps = CapabilitySet {
        max_operations: 10_000,
        ..CapabilitySet::default()
    };
    let executor = SandboxExecutor::new(caps, 10);
    let result = executor.execute(
        "fn strategy(data) { let x = 0; loop { x += 1; } }",
        &bars(2),
        Duration::from_secs(30),
    );
    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(ExecutionError::GuestRuntime(_))
    ));
}

#[test]
fn recursion_is_bounded_by_call_levels() {
    let result = run("fn f(n) { f(n + 1) }\nfn strategy(data) { f(0) }");
    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(ExecutionError::GuestRuntime(_))
    ));
}

#[test]
fn guest_cannot_grow_arrays_past_the_limit() {
    use stratbox_sandbox::namespace::CapabilitySet;

    let caps = CapabilitySet {
        max_array_size: 1_000,
        ..CapabilitySet::default()
    };
    let executor = SandboxExecutor::new(caps, 10);
    let result = executor.execute(
        r#"
        fn strategy(data) {
            let hog = [];
            loop { hog.push(0); }
        }
        "#,
        &bars(2),
        Duration::from_secs(30),
    );
    assert!(!result.success);
}

#[test]
fn indicator_library_is_available_but_nothing_else_is() {
    let result = run(
        r#"
        fn strategy(data) {
            let s = sma(data.close, 2);
            record_indicator("sma", s);
        }
        "#,
    );
    assert!(result.success, "{:?}", result.error);
    assert!(result.indicators.contains_key("sma"));
}
