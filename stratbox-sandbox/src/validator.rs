//! Admission gate — static validation of strategy source before execution.
//!
//! The gate is advisory defense-in-depth: the authoritative enforcement is
//! the restricted namespace and grammar the code later compiles and runs
//! under. What the gate adds is fast, readable feedback — a script that
//! references `eval` or has no `strategy` function is rejected here with a
//! message naming the problem, instead of dying mid-execution.
//!
//! Checks, in order:
//! 1. non-empty source
//! 2. identifier scan over the raw text (strings and comments excluded)
//! 3. parse under the restricted grammar
//! 4. entry-point shape: exactly one `strategy` function with one parameter

use serde::Serialize;
use tracing::debug;

use crate::namespace::{
    self, CapabilitySet, DISCOURAGED_IDENTIFIERS, FORBIDDEN_IDENTIFIERS,
};

/// Outcome of validating one script. `valid` is false iff `errors` is
/// non-empty; warnings and suggestions never block admission.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.valid = self.errors.is_empty();
        self
    }
}

/// Static admission gate. Stateless apart from its capability limits, which
/// it shares with the execution path so the gate's parser matches the real
/// one.
pub struct CodeValidator {
    caps: CapabilitySet,
}

impl CodeValidator {
    pub fn new(caps: CapabilitySet) -> Self {
        Self { caps }
    }

    pub fn validate(&self, source: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        if source.trim().is_empty() {
            report.errors.push("code is empty".into());
            return report.finish();
        }

        self.scan_identifiers(source, &mut report);

        // Parse under the same restricted grammar the executor uses.
        // Referencing a disabled symbol surfaces here as a parse error.
        let engine = namespace::compile_engine(&self.caps);
        let ast = match engine.compile(source) {
            Ok(ast) => ast,
            Err(err) => {
                report.errors.push(format!("syntax error: {err}"));
                return report.finish();
            }
        };

        check_entry_point(&ast, &mut report);

        debug!(
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "validation complete"
        );
        report.finish()
    }

    fn scan_identifiers(&self, source: &str, report: &mut ValidationReport) {
        let mut saw_symbol_const = false;
        let mut saw_emit = false;
        let mut flagged: Vec<&str> = Vec::new();

        let words = identifier_stream(source);
        for (i, word) in words.iter().enumerate() {
            let word_str = word.as_str();
            // Report each offender once.
            if FORBIDDEN_IDENTIFIERS.contains(&word_str) && !flagged.contains(&word_str) {
                report
                    .errors
                    .push(format!("forbidden identifier '{word}' is not available"));
                flagged.push(word_str);
            }
            if DISCOURAGED_IDENTIFIERS.contains(&word_str) && !flagged.contains(&word_str) {
                report.warnings.push(format!(
                    "'{word}' is non-deterministic and has no effect in the sandbox"
                ));
                flagged.push(word_str);
            }
            if word == "SYMBOL" && i > 0 && words[i - 1] == "const" {
                saw_symbol_const = true;
            }
            if word == "emit_signal" {
                saw_emit = true;
            }
        }

        if !saw_symbol_const {
            report
                .warnings
                .push("no 'const SYMBOL = ...' declaration found".into());
        }
        let returns_signal_string = source.contains("\"BUY\"") || source.contains("\"SELL\"");
        if !saw_emit && !returns_signal_string {
            report.suggestions.push(
                "script never calls emit_signal; consider returning \"BUY\"/\"SELL\" \
                 or emitting signals explicitly"
                    .into(),
            );
        }
    }
}

impl Default for CodeValidator {
    fn default() -> Self {
        Self::new(CapabilitySet::default())
    }
}

fn check_entry_point(ast: &rhai::AST, report: &mut ValidationReport) {
    let entries: Vec<usize> = ast
        .iter_functions()
        .filter(|f| f.name == "strategy")
        .map(|f| f.params.len())
        .collect();

    match entries.as_slice() {
        [] => report.errors.push(
            "missing entry point: script must define fn strategy(data)".into(),
        ),
        [1] => {}
        [n] => report.errors.push(format!(
            "fn strategy must take exactly one parameter, found {n}"
        )),
        _ => report
            .errors
            .push("script defines fn strategy more than once".into()),
    }
}

/// Extract identifiers from source text, skipping string literals and both
/// comment forms. A hand-rolled scan is enough here: the authoritative
/// parser runs right after, this pass only needs word boundaries.
fn identifier_stream(source: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut chars = source.chars().peekable();
    let mut current = String::new();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                flush(&mut current, &mut words);
                // String literal: consume through the closing quote.
                while let Some(s) = chars.next() {
                    if s == '\\' {
                        chars.next();
                    } else if s == '"' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                flush(&mut current, &mut words);
                for s in chars.by_ref() {
                    if s == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                flush(&mut current, &mut words);
                chars.next();
                let mut prev = ' ';
                for s in chars.by_ref() {
                    if prev == '*' && s == '/' {
                        break;
                    }
                    prev = s;
                }
            }
            c if c.is_ascii_alphanumeric() || c == '_' => current.push(c),
            _ => flush(&mut current, &mut words),
        }
    }
    flush(&mut current, &mut words);
    words
}

fn flush(current: &mut String, words: &mut Vec<String>) {
    if !current.is_empty() && !current.starts_with(|c: char| c.is_ascii_digit()) {
        words.push(std::mem::take(current));
    } else {
        current.clear();
    }
}
