//! Fuzz target for the synthesized path column.
//!
//! `parse_path` must never panic on arbitrary text, and whatever it accepts
//! must format back to a string that parses to the same keys.

#![no_main]

use adjacency_closure::{ClosureConfig, HierarchyTable, PathState, TraversalDirection};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let table = HierarchyTable::new("t", "id", "parent_id");
    let path = PathState::new(
        TraversalDirection::Descendants,
        false,
        &table,
        &ClosureConfig::default(),
    );
    if let Ok(keys) = path.parse_path(text) {
        let formatted = path.format_path(&keys);
        assert_eq!(path.parse_path(&formatted).ok(), Some(keys));
    }
});
