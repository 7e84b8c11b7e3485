//! Test suite for the pass crate.
//!
//! `helpers` builds the module fixtures shared across suites, `unit` holds
//! the per-pass tests and `property` the proptest-based rewrite laws.
