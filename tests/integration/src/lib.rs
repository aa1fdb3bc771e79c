//! Cross-crate scenario tests for the CareBand pipeline
//!
//! This test suite validates:
//! - Sustain windows and resets end to end, from raw token to alert record
//! - Malformed tokens, artifacts and link loss leaving no stale state
//! - Raw-sample persistence limits
//! - Degraded sessions after a partial subscription
//! - Acknowledgment races and lookups against the store

pub mod test_utils;

#[cfg(test)]
mod pipeline_tests;

#[cfg(test)]
mod acknowledgment_tests;
