//! [`TargetHandler`]: the object a target tool holds.

use super::reducer::{TargetEnvironment, TargetReducer};
use super::types::{ExchangeNotice, HandlerPhase, TargetAction, TargetState};
use crate::config::ExchangeConfig;
use crate::directive::Directive;
use crate::signal::Signal;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::task::JoinHandle;
use tool_exchange_runtime::{Store, StoreError};

type TargetStore = Store<TargetState, TargetAction, TargetEnvironment, TargetReducer>;

/// Per-target controller exposing the accept / ignore / defer lifecycle.
///
/// Every operation goes through the handler's store, so calls are reduced
/// one at a time. Only [`accept_signal`](Self::accept_signal) waits on I/O.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tool_exchange::config::ExchangeConfig;
/// use tool_exchange::handler::{HandlerPhase, IngestError, TargetEnvironment, TargetHandler, ingest_fn};
/// use tool_exchange::memory::{InMemoryFileStore, InMemoryToolStateStore};
/// use tool_exchange::{Directive, PayloadResolver, SignalRegistry, ToolCatalog};
/// use tool_exchange_core::environment::SystemClock;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = SignalRegistry::new(Arc::new(SystemClock));
/// let resolver = PayloadResolver::new(
///     Arc::new(InMemoryToolStateStore::new()),
///     Arc::new(InMemoryFileStore::new()),
/// );
/// let target = Directive::new("case-converter-tool")?;
/// let env = TargetEnvironment::new(
///     target.clone(),
///     registry.clone(),
///     Arc::new(ToolCatalog::new()),
///     resolver,
///     Arc::new(ingest_fn(|_, _| async { Ok::<(), IngestError>(()) })),
/// );
///
/// let handler = TargetHandler::new(&ExchangeConfig::default(), env).await?;
/// registry.announce(&Directive::new("base64-tool")?, &target, "Base64");
/// handler.refresh().await?;
/// assert_eq!(handler.phase().await, HandlerPhase::PendingUnreviewed);
/// # Ok(())
/// # }
/// ```
pub struct TargetHandler {
    store: TargetStore,
    target: Directive,
    shutdown_timeout: Duration,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl TargetHandler {
    /// Create a handler and load the current pending set
    ///
    /// `config.auto_open_review` overrides the environment's setting.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the initial refresh is rejected.
    pub async fn new(config: &ExchangeConfig, mut env: TargetEnvironment) -> Result<Self, StoreError> {
        env.auto_open_review = config.auto_open_review;
        let target = env.target.clone();
        let store = Store::with_config(
            TargetState::default(),
            TargetReducer,
            env,
            config.store_config(),
        );

        let handler = Self {
            store,
            target,
            shutdown_timeout: config.shutdown_timeout,
            watcher: Mutex::new(None),
        };
        handler.refresh().await?;
        tracing::debug!(to = %handler.target, "Target handler ready");
        Ok(handler)
    }

    /// The tool this handler serves
    #[must_use]
    pub const fn target(&self) -> &Directive {
        &self.target
    }

    /// Pending signals, oldest first
    pub async fn pending_signals(&self) -> Vec<Signal> {
        self.store.state(|s| s.pending.clone()).await
    }

    /// Whether the review is open
    pub async fn is_modal_open(&self) -> bool {
        self.store.state(|s| s.review_open && !s.pending.is_empty()).await
    }

    /// Current lifecycle phase
    pub async fn phase(&self) -> HandlerPhase {
        self.store.state(TargetState::phase).await
    }

    /// Outcome of the most recent accept, until dismissed
    pub async fn last_notice(&self) -> Option<ExchangeNotice> {
        self.store.state(|s| s.last_notice.clone()).await
    }

    /// Copy of the full handler state
    pub async fn snapshot(&self) -> TargetState {
        self.store.state(TargetState::clone).await
    }

    /// Re-read the pending set from the registry
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn refresh(&self) -> Result<(), StoreError> {
        self.dispatch(TargetAction::SignalsChanged).await
    }

    /// Open the review if any signal is pending
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn open_modal_if_signals_exist(&self) -> Result<(), StoreError> {
        self.dispatch(TargetAction::OpenReview).await
    }

    /// Close the review, deferring the pending set
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn close_modal(&self) -> Result<(), StoreError> {
        self.dispatch(TargetAction::DeferAll).await
    }

    /// Resolve and import the signal from `source`, waiting for the outcome
    ///
    /// Returns `None` when there was nothing to accept: the signal is not
    /// pending, or an accept for it is already running. If the feedback
    /// channel overflowed before the outcome was read, the handler's last
    /// notice is returned when it concerns `source`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    #[tracing::instrument(skip_all, fields(from = %source, to = %self.target))]
    pub async fn accept_signal(&self, source: &Directive) -> Result<Option<ExchangeNotice>, StoreError> {
        let mut finished = self.store.subscribe_actions();
        let mut handle = self
            .store
            .send(TargetAction::AcceptSignal {
                source: source.clone(),
            })
            .await?;
        handle.wait().await;

        let (notice, lagged) = take_finished(&mut finished, source);
        if notice.is_some() || !lagged {
            return Ok(notice);
        }
        tracing::debug!("Accept feedback lagged, reading the recorded notice");
        Ok(self
            .store
            .state(|state| state.last_notice.clone())
            .await
            .filter(|notice| notice.source() == Some(source)))
    }

    /// Drop the signal from `source` without importing it
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn ignore_signal(&self, source: &Directive) -> Result<(), StoreError> {
        self.dispatch(TargetAction::IgnoreSignal {
            source: source.clone(),
        })
        .await
    }

    /// Drop every signal addressed to this target
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn ignore_all_signals(&self) -> Result<(), StoreError> {
        self.dispatch(TargetAction::IgnoreAll).await
    }

    /// Forget the last notice
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownInProgress`] after shutdown.
    pub async fn dismiss_notice(&self) -> Result<(), StoreError> {
        self.dispatch(TargetAction::DismissNotice).await
    }

    /// Follow registry changes for this target in a background task
    ///
    /// Calling it again replaces the previous watcher. The task ends on
    /// [`shutdown`](Self::shutdown) or when the handler is dropped.
    pub fn watch_registry(&self) {
        let mut events = self.store.environment().registry.subscribe();
        let store = self.store.clone();
        let target = self.target.clone();

        let task = tokio::spawn(async move {
            loop {
                let refresh = match events.recv().await {
                    Ok(event) => event.concerns(&target),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(to = %target, skipped, "Registry watcher lagged");
                        true
                    },
                    Err(RecvError::Closed) => break,
                };
                if refresh && store.send(TargetAction::SignalsChanged).await.is_err() {
                    break;
                }
            }
            tracing::debug!(to = %target, "Registry watcher stopped");
        });

        let previous = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stop watching and wait for running accepts to finish
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ShutdownTimeout`] if accepts are still running
    /// after the configured timeout.
    pub async fn shutdown(&self) -> Result<(), StoreError> {
        self.stop_watching();
        self.store.shutdown(self.shutdown_timeout).await
    }

    fn stop_watching(&self) {
        if let Some(task) = self
            .watcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }

    async fn dispatch(&self, action: TargetAction) -> Result<(), StoreError> {
        self.store.send(action).await.map(drop)
    }
}

/// Drain buffered feedback looking for the `AcceptFinished` of `source`
///
/// The flag reports whether the receiver lagged, in which case the result
/// may have been overwritten before it was read.
fn take_finished(
    finished: &mut broadcast::Receiver<TargetAction>,
    source: &Directive,
) -> (Option<ExchangeNotice>, bool) {
    let mut lagged = false;
    loop {
        match finished.try_recv() {
            Ok(TargetAction::AcceptFinished { source: done, notice }) if &done == source => {
                return (Some(notice), lagged);
            },
            Ok(_) => {},
            Err(TryRecvError::Lagged(_)) => lagged = true,
            Err(TryRecvError::Empty | TryRecvError::Closed) => return (None, lagged),
        }
    }
}

impl Drop for TargetHandler {
    fn drop(&mut self) {
        self.stop_watching();
    }
}

impl std::fmt::Debug for TargetHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetHandler")
            .field("target", &self.target)
            .field("pending_effects", &self.store.pending_effects())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ExchangeError;

    fn dir(value: &str) -> Directive {
        Directive::new(value).unwrap()
    }

    fn finished(source: &str) -> TargetAction {
        TargetAction::AcceptFinished {
            source: dir(source),
            notice: ExchangeNotice::NoTransferableData {
                source: dir(source),
                source_title: source.to_uppercase(),
            },
        }
    }

    #[test]
    fn test_take_finished_skips_other_sources() {
        let (tx, mut rx) = broadcast::channel(8);
        tx.send(finished("image-flip")).unwrap();
        tx.send(finished("base64-tool")).unwrap();

        let (notice, lagged) = take_finished(&mut rx, &dir("base64-tool"));
        assert_eq!(notice.unwrap().source(), Some(&dir("base64-tool")));
        assert!(!lagged);
    }

    #[test]
    fn test_take_finished_reports_overwritten_result() {
        let (tx, mut rx) = broadcast::channel(1);
        tx.send(finished("base64-tool")).unwrap();
        tx.send(finished("image-flip")).unwrap();

        let (notice, lagged) = take_finished(&mut rx, &dir("base64-tool"));
        assert!(notice.is_none());
        assert!(lagged);
    }

    #[test]
    fn test_failed_notice_names_its_source() {
        let notice = ExchangeNotice::Failed {
            source_title: "Image Flip".into(),
            error: ExchangeError::Resolution {
                tool: dir("image-flip"),
                message: "referenced file no longer available".into(),
            },
        };
        assert_eq!(notice.source(), Some(&dir("image-flip")));
    }
}
