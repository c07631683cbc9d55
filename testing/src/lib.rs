//! # Tool Exchange Testing
//!
//! Test support for the tool exchange workspace:
//! - Deterministic clocks ([`FixedClock`], [`SteppingClock`])
//! - [`RecordingIngestor`], which captures every payload a target accepts
//! - [`Workbench`], a registry plus in-memory stores wired together
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//!
//! ## Example
//!
//! ```ignore
//! use tool_exchange_testing::{RecordingIngestor, Workbench};
//!
//! #[tokio::test]
//! async fn test_handoff() {
//!     let bench = Workbench::new().with_text_tool("base64-tool", "Base64");
//!     let ingestor = RecordingIngestor::new();
//!     let handler = bench.handler("case-converter-tool", ingestor.clone()).await;
//!
//!     bench.publish_text("base64-tool", "HELLO").await;
//!     bench.announce("base64-tool", "case-converter-tool");
//!
//!     handler.accept_signal(&bench.dir("base64-tool")).await.unwrap();
//!     assert_eq!(ingestor.calls().len(), 1);
//! }
//! ```

use chrono::{DateTime, Utc};
use tool_exchange_core::environment::Clock;

pub mod workbench;

/// Deterministic implementations of environment and collaborator traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex, PoisonError};
    use tool_exchange::handler::{IngestError, IngestFuture, SignalIngestor};
    use tool_exchange::{ResolvedPayload, Signal};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time.
    ///
    /// ```
    /// use tool_exchange_testing::mocks::FixedClock;
    /// use tool_exchange_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a clock stuck at `time`
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that moves forward by a fixed step on every reading
    ///
    /// Successive announcements get strictly increasing timestamps without
    /// sleeping.
    ///
    /// ```
    /// use tool_exchange_testing::mocks::SteppingClock;
    /// use tool_exchange_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = SteppingClock::starting_at(Utc::now());
    /// let first = clock.now();
    /// assert!(clock.now() > first);
    /// ```
    #[derive(Debug)]
    pub struct SteppingClock {
        next: Mutex<DateTime<Utc>>,
        step: chrono::Duration,
    }

    impl SteppingClock {
        /// Start at `time`, advancing one second per reading
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self::with_step(time, chrono::Duration::seconds(1))
        }

        /// Start at `time`, advancing `step` per reading
        #[must_use]
        pub const fn with_step(time: DateTime<Utc>, step: chrono::Duration) -> Self {
            Self {
                next: Mutex::new(time),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now(&self) -> DateTime<Utc> {
            let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
            let now = *next;
            *next = now + self.step;
            now
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Panics if the hardcoded timestamp fails to parse, which never happens.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    #[derive(Debug, Default)]
    struct Recorded {
        calls: Vec<(Signal, ResolvedPayload)>,
        failure: Option<IngestError>,
    }

    /// Ingestor that records every call and can be told to fail
    ///
    /// Clones share the same record.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingIngestor {
        inner: Arc<Mutex<Recorded>>,
    }

    impl RecordingIngestor {
        /// Create an ingestor that accepts everything
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Fail every following call with `error`
        pub fn fail_with(&self, error: IngestError) {
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .failure = Some(error);
        }

        /// Every `(signal, payload)` received so far, in call order
        #[must_use]
        pub fn calls(&self) -> Vec<(Signal, ResolvedPayload)> {
            self.inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .calls
                .clone()
        }

        /// Number of calls received
        #[must_use]
        pub fn call_count(&self) -> usize {
            self.inner.lock().unwrap_or_else(PoisonError::into_inner).calls.len()
        }
    }

    impl SignalIngestor for RecordingIngestor {
        fn ingest<'a>(&'a self, signal: &'a Signal, payload: &'a ResolvedPayload) -> IngestFuture<'a> {
            let result = {
                let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
                inner.calls.push((signal.clone(), payload.clone()));
                inner.failure.clone().map_or(Ok(()), Err)
            };
            Box::pin(async move { result })
        }
    }
}

pub use mocks::{FixedClock, RecordingIngestor, SteppingClock, test_clock};
pub use reducer_test::{ReducerTest, assertions};
pub use workbench::Workbench;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tool_exchange::handler::{IngestError, SignalIngestor};
    use tool_exchange::{Directive, ResolvedPayload, Signal};

    #[test]
    fn test_fixed_clock() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn test_stepping_clock_advances() {
        let start = test_clock().now();
        let clock = SteppingClock::with_step(start, chrono::Duration::milliseconds(10));
        assert_eq!(clock.now(), start);
        assert_eq!(clock.now(), start + chrono::Duration::milliseconds(10));
    }

    #[tokio::test]
    async fn test_recording_ingestor_fails_on_request() {
        let ingestor = RecordingIngestor::new();
        let signal = Signal {
            source: Directive::new("a").unwrap(),
            target: Directive::new("b").unwrap(),
            source_title: "A".into(),
            timestamp: test_clock().now(),
            sequence: 0,
        };

        ingestor.ingest(&signal, &ResolvedPayload::None).await.unwrap();
        ingestor.fail_with(IngestError::Rejected("read only".into()));
        let err = ingestor.ingest(&signal, &ResolvedPayload::None).await.unwrap_err();

        assert_eq!(err, IngestError::Rejected("read only".into()));
        assert_eq!(ingestor.call_count(), 2);
    }
}
