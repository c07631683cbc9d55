//! Metric descriptions for the runtime and the exchange protocol.
//!
//! Metrics are emitted through the `metrics` facade. Nothing is recorded
//! anywhere until the host application installs a recorder; call
//! [`register_metrics`] once after installing it so exporters can show
//! descriptions next to the values.
//!
//! # Example
//!
//! ```
//! use tool_exchange_runtime::metrics::register_metrics;
//!
//! // Safe to call without a recorder; descriptions are simply dropped.
//! register_metrics();
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Actions reduced by stores
pub const ACTIONS_PROCESSED: &str = "store.actions.processed";
/// Effects started, labelled by effect type
pub const EFFECTS_EXECUTED: &str = "store.effects.executed";
/// Reducer run time
pub const REDUCER_DURATION: &str = "store.reducer.duration_seconds";
/// Actions refused during shutdown
pub const SHUTDOWN_REJECTED: &str = "store.shutdown.rejected_actions";
/// Shutdowns that gave up on running effects
pub const SHUTDOWN_TIMEOUT: &str = "store.shutdown.timeout";

/// Signals announced into a registry
pub const SIGNALS_ANNOUNCED: &str = "exchange.signals.announced";
/// Signals removed from a registry (accept, ignore, retract)
pub const SIGNALS_REMOVED: &str = "exchange.signals.removed";
/// Live signals across all targets
pub const SIGNALS_LIVE: &str = "exchange.signals.live";
/// Payload resolutions, labelled by resulting kind
pub const RESOLVE_TOTAL: &str = "exchange.resolve.total";
/// Finished accept attempts, labelled by outcome
pub const ACCEPT_COMPLETED: &str = "exchange.accept.completed";

/// Register all metric descriptions.
pub fn register_metrics() {
    // Store metrics
    describe_counter!(ACTIONS_PROCESSED, "Actions reduced by stores");
    describe_counter!(EFFECTS_EXECUTED, "Effects started, by effect type");
    describe_histogram!(REDUCER_DURATION, "Time taken to run reducers");
    describe_counter!(SHUTDOWN_REJECTED, "Actions refused during shutdown");
    describe_counter!(SHUTDOWN_TIMEOUT, "Shutdowns that timed out with effects running");

    // Exchange metrics
    describe_counter!(SIGNALS_ANNOUNCED, "Signals announced by source tools");
    describe_counter!(SIGNALS_REMOVED, "Signals removed from the registry");
    describe_gauge!(SIGNALS_LIVE, "Signals currently waiting for a target");
    describe_counter!(RESOLVE_TOTAL, "Payload resolutions by resulting kind");
    describe_counter!(ACCEPT_COMPLETED, "Accept attempts by outcome");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_without_recorder() {
        register_metrics();
        counter!(SIGNALS_ANNOUNCED).increment(1);
    }
}
