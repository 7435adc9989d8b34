//! Code fingerprinting — content-addressed identity of guest programs.
//!
//! The fingerprint is the compile-cache key: two byte-identical sources share
//! one compiled artifact; any edit produces a new fingerprint.

use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 hex digest of guest source bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeFingerprint(String);

impl CodeFingerprint {
    /// Fingerprint of a guest program's source text.
    pub fn of(source: &str) -> Self {
        Self(blake3::hash(source.as_bytes()).to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened prefix for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Display for CodeFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        let a = CodeFingerprint::of("fn strategy(data) { }");
        let b = CodeFingerprint::of("fn strategy(data) { }");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_for_different_source() {
        let a = CodeFingerprint::of("fn strategy(data) { }");
        let b = CodeFingerprint::of("fn strategy(data) { 1 }");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_sensitive_to_whitespace() {
        // Content-addressed means byte-addressed: formatting changes recompile.
        let a = CodeFingerprint::of("fn strategy(data) {}");
        let b = CodeFingerprint::of("fn strategy(data)  {}");
        assert_ne!(a, b);
    }

    #[test]
    fn short_prefix_is_stable() {
        let fp = CodeFingerprint::of("abc");
        assert_eq!(fp.short(), &fp.as_str()[..12]);
    }
}
