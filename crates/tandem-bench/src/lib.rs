//! Benchmarks for the Tandem matchmaking relay.
//!
//! Run with `cargo bench -p tandem-bench`.
