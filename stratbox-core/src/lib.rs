//! Stratbox Core — domain types shared by the sandbox and backtest engines.
//!
//! This crate contains:
//! - Domain types (bars, signals, trades)
//! - Code fingerprinting (content-addressed identity of guest programs)
//! - Indicator math exposed to guest programs through the capability namespace
//! - The execution error taxonomy

pub mod domain;
pub mod error;
pub mod fingerprint;
pub mod indicators;
