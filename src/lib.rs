pub mod game;

// ============================================================================
// Profiling Macros
// ============================================================================

/// Log a message every 100 simulation ticks when the `perf_stats` feature is enabled.
///
/// Compiles to nothing without the feature; the arguments are not evaluated.
///
/// # Example
/// ```ignore
/// profile_log!(tick, "fluid tick: {} groups read", report.groups_read);
/// ```
#[macro_export]
#[cfg(feature = "perf_stats")]
macro_rules! profile_log {
    ($tick:expr, $($arg:tt)*) => {
        if $tick.0 % 100 == 0 {
            bevy::prelude::info!($($arg)*);
        }
    };
}

#[macro_export]
#[cfg(not(feature = "perf_stats"))]
macro_rules! profile_log {
    ($tick:expr, $($arg:tt)*) => {};
}
