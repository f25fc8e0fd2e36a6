//! Fuzz target for escape-sequence stripping
//!
//! The audit log strips terminal escapes from client-supplied text.
//!
//! # Invariants
//!
//! - NEVER panic
//! - Output contains no ESC byte
//! - Output is never longer than the input
//! - Stripping is idempotent

#![no_main]

use devchat_core::strip_ansi;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|text: &str| {
    let stripped = strip_ansi(text);

    assert!(!stripped.contains('\x1b'));
    assert!(stripped.len() <= text.len());
    assert_eq!(strip_ansi(&stripped), stripped);
});
