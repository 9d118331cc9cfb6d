//! Performance profiling utilities
//!
//! These are only compiled when the `perf_stats` feature is enabled.
//! Zero overhead when disabled.

pub use tidewater_macros::profile;
