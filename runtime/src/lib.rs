//! # Tool Exchange Runtime
//!
//! The [`Store`] that runs a target tool's reducer.
//!
//! A store owns the state, reduces one action at a time, and spawns the
//! `Future` effects a reducer returns. An action produced by an effect is
//! broadcast to observers and then reduced like any other action, which is
//! how an accept reports back to the handler that started it.
//!
//! ## Example
//!
//! ```ignore
//! use tool_exchange_runtime::Store;
//!
//! let store = Store::new(TargetState::default(), TargetReducer, env);
//!
//! // Start an accept and wait until its result has been reduced
//! let mut handle = store.send(TargetAction::AcceptSignal { source }).await?;
//! handle.wait().await;
//!
//! let pending = store.state(|s| s.pending.len()).await;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tool_exchange_core::{effect::Effect, reducer::Reducer};

/// Metric names and descriptions
pub mod metrics;

/// Error types for the Store runtime
pub mod error {
    use thiserror::Error;

    /// Errors returned by [`Store`](crate::Store) operations
    #[derive(Error, Debug)]
    pub enum StoreError {
        /// An effect could not be carried out
        #[error("Effect execution failed: {0}")]
        EffectFailed(String),

        /// The store no longer accepts actions
        #[error("Store is shutting down")]
        ShutdownInProgress,

        /// Effects were still running when the shutdown deadline passed
        #[error("Shutdown timed out with {0} effects still running")]
        ShutdownTimeout(usize),

        /// No matching action arrived in time
        #[error("Timeout waiting for action")]
        Timeout,

        /// The feedback channel has no sender left
        #[error("Action broadcast channel closed")]
        ChannelClosed,
    }
}

pub use error::StoreError;
pub use store::Store;

/// Store tuning
///
/// ```
/// use std::time::Duration;
/// use tool_exchange_runtime::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_broadcast_capacity(64)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.broadcast_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// How many feedback actions an observer may fall behind before it lags
    pub broadcast_capacity: usize,
    /// Shutdown deadline used when the caller has none of its own
    pub default_shutdown_timeout: Duration,
}

impl StoreConfig {
    /// Create a configuration
    #[must_use]
    pub const fn new(broadcast_capacity: usize, default_shutdown_timeout: Duration) -> Self {
        Self {
            broadcast_capacity,
            default_shutdown_timeout,
        }
    }

    /// Set the feedback broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Set the default shutdown deadline
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.default_shutdown_timeout = timeout;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(16, Duration::from_secs(30))
    }
}

/// Completion tracker for the effects started by one [`Store::send`]
///
/// Feedback actions are reduced before their effect counts as finished, so
/// once [`wait`](Self::wait) returns the store state already reflects them.
#[derive(Clone)]
pub struct EffectHandle {
    outstanding: Arc<AtomicUsize>,
    settled: watch::Receiver<()>,
}

impl EffectHandle {
    fn track() -> (Self, Arc<SendTracker>) {
        let (settled_tx, settled) = watch::channel(());
        let outstanding = Arc::new(AtomicUsize::new(0));
        let tracker = Arc::new(SendTracker {
            outstanding: Arc::clone(&outstanding),
            settled: settled_tx,
        });
        (Self { outstanding, settled }, tracker)
    }

    /// A handle with nothing to wait for
    #[must_use]
    pub fn completed() -> Self {
        let (handle, _tracker) = Self::track();
        handle
    }

    /// Effects of this send still running
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every effect of this send has finished
    pub async fn wait(&mut self) {
        while self.pending() > 0 {
            if self.settled.changed().await.is_err() {
                // No tracker left, the count is final
                break;
            }
        }
    }

    /// [`wait`](Self::wait), bounded by `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if effects are still running when
    /// `timeout` expires.
    pub async fn wait_with_timeout(&mut self, timeout: Duration) -> Result<(), StoreError> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| StoreError::Timeout)
    }
}

impl std::fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EffectHandle")
            .field("pending_effects", &self.pending())
            .finish_non_exhaustive()
    }
}

/// Shared by all effects of one send; wakes the handle when the last ends
struct SendTracker {
    outstanding: Arc<AtomicUsize>,
    settled: watch::Sender<()>,
}

/// One running effect, counted both per send and store-wide
///
/// Dropping the ticket (including on panic) releases both counts.
struct EffectTicket {
    send: Arc<SendTracker>,
    store_wide: Arc<AtomicUsize>,
}

impl EffectTicket {
    fn issue(send: &Arc<SendTracker>, store_wide: &Arc<AtomicUsize>) -> Self {
        send.outstanding.fetch_add(1, Ordering::SeqCst);
        store_wide.fetch_add(1, Ordering::SeqCst);
        Self {
            send: Arc::clone(send),
            store_wide: Arc::clone(store_wide),
        }
    }
}

impl Drop for EffectTicket {
    fn drop(&mut self) {
        self.store_wide.fetch_sub(1, Ordering::SeqCst);
        if self.send.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            let _ = self.send.settled.send(());
        }
    }
}

/// The store itself
pub mod store {
    use super::metrics::{
        ACTIONS_PROCESSED, EFFECTS_EXECUTED, REDUCER_DURATION, SHUTDOWN_REJECTED, SHUTDOWN_TIMEOUT,
    };
    use super::{
        Arc, AtomicBool, AtomicUsize, Duration, Effect, EffectHandle, EffectTicket, Ordering,
        Reducer, RwLock, SendTracker, StoreConfig, StoreError,
    };
    use tokio::sync::broadcast;

    /// Runs a reducer against its state and environment
    ///
    /// Reducers run one at a time under the state write lock. Clones share
    /// state, counters and the feedback channel.
    pub struct Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E>,
    {
        state: Arc<RwLock<S>>,
        reducer: R,
        environment: E,
        config: StoreConfig,
        closing: Arc<AtomicBool>,
        running: Arc<AtomicUsize>,
        feedback: broadcast::Sender<A>,
    }

    impl<S, A, E, R> Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Send + Sync + 'static,
        A: Send + Clone + 'static,
        S: Send + Sync + 'static,
        E: Send + Sync + 'static,
    {
        /// Create a store with the default configuration
        #[must_use]
        pub fn new(initial_state: S, reducer: R, environment: E) -> Self {
            Self::with_config(initial_state, reducer, environment, StoreConfig::default())
        }

        /// Create a store with `config`
        #[must_use]
        pub fn with_config(
            initial_state: S,
            reducer: R,
            environment: E,
            config: StoreConfig,
        ) -> Self {
            let (feedback, _) = broadcast::channel(config.broadcast_capacity.max(1));
            Self {
                state: Arc::new(RwLock::new(initial_state)),
                reducer,
                environment,
                config,
                closing: Arc::new(AtomicBool::new(false)),
                running: Arc::new(AtomicUsize::new(0)),
                feedback,
            }
        }

        /// The configuration this store was built with
        #[must_use]
        pub const fn config(&self) -> &StoreConfig {
            &self.config
        }

        /// The injected environment
        #[must_use]
        pub const fn environment(&self) -> &E {
            &self.environment
        }

        /// Effects running across every send
        #[must_use]
        pub fn pending_effects(&self) -> usize {
            self.running.load(Ordering::Acquire)
        }

        /// Stop accepting actions and wait for running effects
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownTimeout`] with the number of effects
        /// still running when `timeout` expires.
        pub async fn shutdown(&self, timeout: Duration) -> Result<(), StoreError> {
            self.closing.store(true, Ordering::Release);
            tracing::info!(running = self.pending_effects(), "Store shutting down");

            let drained = tokio::time::timeout(timeout, async {
                while self.pending_effects() > 0 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;

            if drained.is_ok() {
                tracing::info!("Store drained");
                Ok(())
            } else {
                let running = self.pending_effects();
                tracing::error!(running, "Store shutdown timed out");
                metrics::counter!(SHUTDOWN_TIMEOUT).increment(1);
                Err(StoreError::ShutdownTimeout(running))
            }
        }

        /// Reduce `action` and start its effects
        ///
        /// Returns once the effects are spawned; wait on the returned
        /// [`EffectHandle`] for them to finish.
        ///
        /// # Errors
        ///
        /// Returns [`StoreError::ShutdownInProgress`] after [`shutdown`](Self::shutdown).
        #[tracing::instrument(skip(self, action), name = "store_send")]
        pub async fn send(&self, action: A) -> Result<EffectHandle, StoreError>
        where
            R: Clone,
            E: Clone,
        {
            if self.closing.load(Ordering::Acquire) {
                tracing::warn!("Rejected action: store is shutting down");
                metrics::counter!(SHUTDOWN_REJECTED).increment(1);
                return Err(StoreError::ShutdownInProgress);
            }
            metrics::counter!(ACTIONS_PROCESSED).increment(1);

            let effects = {
                let mut state = self.state.write().await;
                let started = std::time::Instant::now();
                let effects = self.reducer.reduce(&mut *state, action, &self.environment);
                metrics::histogram!(REDUCER_DURATION).record(started.elapsed().as_secs_f64());
                effects
            };
            tracing::trace!(effects = effects.len(), "Reduced");

            let (handle, tracker) = EffectHandle::track();
            for effect in effects {
                self.spawn_effect(effect, &tracker);
            }
            Ok(handle)
        }

        /// Send `action` and return the first feedback action matching
        /// `predicate`
        ///
        /// The subscription is taken before sending, so an immediate result
        /// is not missed.
        ///
        /// # Errors
        ///
        /// - [`StoreError::Timeout`]: nothing matched within `timeout`
        /// - [`StoreError::ChannelClosed`]: the feedback channel closed
        /// - [`StoreError::ShutdownInProgress`]: the store is shutting down
        pub async fn send_and_wait_for<F>(
            &self,
            action: A,
            predicate: F,
            timeout: Duration,
        ) -> Result<A, StoreError>
        where
            R: Clone,
            E: Clone,
            F: Fn(&A) -> bool,
        {
            let mut observed = self.feedback.subscribe();
            self.send(action).await?;

            let matched = async {
                loop {
                    match observed.recv().await {
                        Ok(action) if predicate(&action) => break Ok(action),
                        Ok(_) => {},
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Action observer lagged");
                        },
                        Err(broadcast::error::RecvError::Closed) => {
                            break Err(StoreError::ChannelClosed);
                        },
                    }
                }
            };
            tokio::time::timeout(timeout, matched)
                .await
                .map_err(|_| StoreError::Timeout)?
        }

        /// Observe every action produced by an effect, in production order
        ///
        /// Actions passed to [`send`](Self::send) directly are not broadcast.
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<A> {
            self.feedback.subscribe()
        }

        /// Read state through a closure
        ///
        /// ```ignore
        /// let open = store.state(|s| s.review_open).await;
        /// ```
        pub async fn state<F, T>(&self, f: F) -> T
        where
            F: FnOnce(&S) -> T,
        {
            f(&*self.state.read().await)
        }

        fn spawn_effect(&self, effect: Effect<A>, tracker: &Arc<SendTracker>)
        where
            R: Clone,
            E: Clone,
        {
            let Effect::Future(fut) = effect else {
                metrics::counter!(EFFECTS_EXECUTED, "type" => "none").increment(1);
                return;
            };
            metrics::counter!(EFFECTS_EXECUTED, "type" => "future").increment(1);

            let ticket = EffectTicket::issue(tracker, &self.running);
            let store = self.clone();
            tokio::spawn(async move {
                let _ticket = ticket;
                let Some(action) = fut.await else {
                    return;
                };
                let _ = store.feedback.send(action.clone());
                if let Err(error) = store.send(action).await {
                    tracing::warn!(%error, "Dropped feedback action");
                }
            });
        }
    }

    impl<S, A, E, R> Clone for Store<S, A, E, R>
    where
        R: Reducer<State = S, Action = A, Environment = E> + Clone,
        E: Clone,
    {
        fn clone(&self) -> Self {
            Self {
                state: Arc::clone(&self.state),
                reducer: self.reducer.clone(),
                environment: self.environment.clone(),
                config: self.config.clone(),
                closing: Arc::clone(&self.closing),
                running: Arc::clone(&self.running),
                feedback: self.feedback.clone(),
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tool_exchange_core::{SmallVec, reducer::Reducer, smallvec};

    #[derive(Debug, Clone, Default)]
    struct ReviewState {
        open: bool,
        imported: u32,
    }

    #[derive(Debug, Clone, PartialEq)]
    enum ReviewAction {
        Open,
        Accept,
        Imported,
        Hang,
    }

    #[derive(Debug, Clone)]
    struct ReviewReducer;

    impl Reducer for ReviewReducer {
        type State = ReviewState;
        type Action = ReviewAction;
        type Environment = ();

        fn reduce(
            &self,
            state: &mut ReviewState,
            action: ReviewAction,
            _env: &(),
        ) -> SmallVec<[Effect<ReviewAction>; 4]> {
            match action {
                ReviewAction::Open => {
                    state.open = true;
                    smallvec![Effect::None]
                },
                ReviewAction::Accept => {
                    smallvec![Effect::Future(Box::pin(async { Some(ReviewAction::Imported) }))]
                },
                ReviewAction::Imported => {
                    state.imported += 1;
                    smallvec![Effect::None]
                },
                ReviewAction::Hang => smallvec![Effect::Future(Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    None
                }))],
            }
        }
    }

    fn store() -> Store<ReviewState, ReviewAction, (), ReviewReducer> {
        Store::new(ReviewState::default(), ReviewReducer, ())
    }

    #[tokio::test]
    async fn test_send_reduces_immediately() {
        let store = store();
        let handle = store.send(ReviewAction::Open).await.unwrap();
        assert_eq!(handle.pending(), 0);
        assert!(store.state(|s| s.open).await);
    }

    #[tokio::test]
    async fn test_wait_covers_feedback() {
        let store = store();
        let mut handle = store.send(ReviewAction::Accept).await.unwrap();
        handle.wait_with_timeout(Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.state(|s| s.imported).await, 1);
        assert_eq!(handle.pending(), 0);
        assert_eq!(store.pending_effects(), 0);
    }

    #[tokio::test]
    async fn test_send_and_wait_for_feedback() {
        let store = store();
        let action = store
            .send_and_wait_for(
                ReviewAction::Accept,
                |a| matches!(a, ReviewAction::Imported),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(action, ReviewAction::Imported);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_actions() {
        let store = store();
        store.shutdown(Duration::from_millis(50)).await.unwrap();
        assert!(matches!(
            store.send(ReviewAction::Open).await,
            Err(StoreError::ShutdownInProgress)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_reports_hung_effects() {
        let store = store();
        let _ = store.send(ReviewAction::Hang).await.unwrap();
        assert!(matches!(
            store.shutdown(Duration::from_millis(30)).await,
            Err(StoreError::ShutdownTimeout(1))
        ));
    }

    #[tokio::test]
    async fn test_completed_handle() {
        let mut handle = EffectHandle::completed();
        handle.wait_with_timeout(Duration::from_millis(10)).await.unwrap();
    }

    #[test]
    fn test_store_config_builder() {
        let config = StoreConfig::default().with_broadcast_capacity(8);
        assert_eq!(config.broadcast_capacity, 8);
        assert_eq!(config.default_shutdown_timeout, Duration::from_secs(30));
    }
}
