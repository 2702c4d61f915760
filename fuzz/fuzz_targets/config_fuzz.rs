//! Fuzz target for `ClosureConfig::from_json`.
//!
//! Arbitrary input must produce either a validated config or a
//! configuration error, never a panic.

#![no_main]

use adjacency_closure::{ClosureConfig, ClosureErrorKind};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    match ClosureConfig::from_json(text) {
        Ok(config) => assert!(config.validate().is_ok()),
        Err(err) => assert_eq!(err.kind(), ClosureErrorKind::Configuration),
    }
});
