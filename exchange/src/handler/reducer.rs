//! The target handler as a reducer.
//!
//! Registry reads and removals are synchronous and happen inside `reduce`.
//! Accepting is the only suspending operation: it runs as an
//! [`Effect::Future`] that resolves, ingests, removes the signal and feeds
//! back [`TargetAction::AcceptFinished`].

use super::ingest::SignalIngestor;
use super::types::{ExchangeNotice, TargetAction, TargetState};
use crate::descriptor::ToolCatalog;
use crate::directive::Directive;
use crate::error::ExchangeError;
use crate::payload::ResolvedPayload;
use crate::registry::SignalRegistry;
use crate::resolver::PayloadResolver;
use crate::signal::Signal;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tool_exchange_core::{SmallVec, async_effect, effect::Effect, reducer::Reducer, smallvec};
use tool_exchange_runtime::metrics::ACCEPT_COMPLETED;

/// Dependencies of one target handler.
#[derive(Clone)]
pub struct TargetEnvironment {
    /// The tool this handler serves
    pub target: Directive,
    /// Shared signal registry
    pub registry: SignalRegistry,
    /// Output declarations of every tool
    pub catalog: Arc<ToolCatalog>,
    /// Resolves accepted signals
    pub resolver: PayloadResolver,
    /// The target's ingestion callback
    pub ingestor: Arc<dyn SignalIngestor>,
    /// Open the review as soon as signals are pending, unless deferred
    pub auto_open_review: bool,
}

impl TargetEnvironment {
    /// Create an environment with auto-open disabled
    #[must_use]
    pub fn new(
        target: Directive,
        registry: SignalRegistry,
        catalog: Arc<ToolCatalog>,
        resolver: PayloadResolver,
        ingestor: Arc<dyn SignalIngestor>,
    ) -> Self {
        Self {
            target,
            registry,
            catalog,
            resolver,
            ingestor,
            auto_open_review: false,
        }
    }
}

impl std::fmt::Debug for TargetEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetEnvironment")
            .field("target", &self.target)
            .field("registry", &self.registry)
            .field("auto_open_review", &self.auto_open_review)
            .finish_non_exhaustive()
    }
}

/// Reducer for the per-target review lifecycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct TargetReducer;

impl TargetReducer {
    /// Re-read the pending set and apply the deferral rules
    fn refresh(state: &mut TargetState, env: &TargetEnvironment) {
        let pending = env.registry.list_pending(&env.target);

        if pending.is_empty() {
            state.deferred = false;
            state.review_open = false;
        } else if pending
            .iter()
            .any(|signal| !state.pending.iter().any(|seen| seen.same_announcement(signal)))
        {
            state.deferred = false;
        }
        state.pending = pending;

        if env.auto_open_review && !state.deferred && !state.pending.is_empty() {
            state.review_open = true;
        }
    }

    fn accept(
        state: &mut TargetState,
        source: Directive,
        env: &TargetEnvironment,
    ) -> SmallVec<[Effect<TargetAction>; 4]> {
        if state.in_flight.contains(&source) {
            tracing::debug!(from = %source, "Accept already in flight");
            return smallvec![Effect::None];
        }
        let Some(signal) = env.registry.get(&source, &env.target) else {
            tracing::debug!(from = %source, "No pending signal to accept");
            Self::refresh(state, env);
            return smallvec![Effect::None];
        };

        state.in_flight.insert(source.clone());
        let env = env.clone();
        smallvec![async_effect! {
            let notice = run_accept(&env, &signal).await;
            Some(TargetAction::AcceptFinished { source, notice })
        }]
    }
}

impl Reducer for TargetReducer {
    type State = TargetState;
    type Action = TargetAction;
    type Environment = TargetEnvironment;

    fn reduce(
        &self,
        state: &mut TargetState,
        action: TargetAction,
        env: &TargetEnvironment,
    ) -> SmallVec<[Effect<TargetAction>; 4]> {
        match action {
            TargetAction::SignalsChanged => Self::refresh(state, env),

            TargetAction::OpenReview => {
                Self::refresh(state, env);
                if !state.pending.is_empty() {
                    state.review_open = true;
                    state.deferred = false;
                }
            },

            TargetAction::DeferAll => {
                state.review_open = false;
                state.deferred = !state.pending.is_empty();
            },

            TargetAction::AcceptSignal { source } => return Self::accept(state, source, env),

            TargetAction::AcceptFinished { source, notice } => {
                state.in_flight.remove(&source);
                if notice.is_error() {
                    tracing::warn!(from = %source, message = %notice.message(), "Accept failed");
                } else {
                    tracing::info!(from = %source, message = %notice.message(), "Accept finished");
                }
                state.last_notice = Some(notice);
                Self::refresh(state, env);
            },

            TargetAction::IgnoreSignal { source } => {
                if state.in_flight.contains(&source) {
                    tracing::debug!(from = %source, "Cannot ignore a signal being accepted");
                } else {
                    env.registry.remove(&source, &env.target);
                }
                Self::refresh(state, env);
            },

            TargetAction::IgnoreAll => {
                env.registry.clear_all_for(&env.target);
                Self::refresh(state, env);
            },

            TargetAction::DismissNotice => state.last_notice = None,
        }
        smallvec![Effect::None]
    }
}

/// Resolve, ingest, then remove the accepted announcement whatever happens
async fn run_accept(env: &TargetEnvironment, signal: &Signal) -> ExchangeNotice {
    let outcome = AssertUnwindSafe(import(env, signal))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| {
            Err(ExchangeError::Ingestion {
                tool: signal.source.clone(),
                message: "ingestion panicked".to_string(),
            })
        });

    env.registry.remove_announcement(signal);

    let notice = match outcome {
        Ok(Some(items)) => ExchangeNotice::Imported {
            source: signal.source.clone(),
            source_title: signal.source_title.clone(),
            items,
        },
        Ok(None) => ExchangeNotice::NoTransferableData {
            source: signal.source.clone(),
            source_title: signal.source_title.clone(),
        },
        Err(error) => ExchangeNotice::Failed {
            source_title: signal.source_title.clone(),
            error,
        },
    };
    metrics::counter!(ACCEPT_COMPLETED, "outcome" => notice.outcome_label()).increment(1);
    notice
}

/// `Ok(None)` when there was nothing to transfer, otherwise the imported item count
#[tracing::instrument(skip_all, fields(from = %signal.source, to = %signal.target))]
async fn import(env: &TargetEnvironment, signal: &Signal) -> Result<Option<usize>, ExchangeError> {
    let payload = env.resolver.resolve_signal(signal, &env.catalog).await?;
    match &payload {
        ResolvedPayload::None => Ok(None),
        ResolvedPayload::Error { message } => Err(ExchangeError::Resolution {
            tool: signal.source.clone(),
            message: message.clone(),
        }),
        ResolvedPayload::Text { items } | ResolvedPayload::FileReference { items } => {
            env.ingestor
                .ingest(signal, &payload)
                .await
                .map_err(|error| ExchangeError::Ingestion {
                    tool: signal.source.clone(),
                    message: error.to_string(),
                })?;
            Ok(Some(items.len()))
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::descriptor::{OutputDescriptor, ToolMetadata};
    use crate::handler::ingest::{IngestError, ingest_fn};
    use crate::handler::types::HandlerPhase;
    use crate::memory::{InMemoryFileStore, InMemoryToolStateStore};
    use crate::state_store::{ToolState, ToolStateStore};
    use tool_exchange_testing::{ReducerTest, assertions, test_clock};

    const TARGET: &str = "case-converter-tool";

    fn dir(value: &str) -> Directive {
        Directive::new(value).unwrap()
    }

    fn env() -> TargetEnvironment {
        let catalog = ToolCatalog::new().with_tool(ToolMetadata::new(
            dir("base64-tool"),
            "Base64",
            OutputDescriptor::text(),
        ));
        let resolver = PayloadResolver::new(
            Arc::new(InMemoryToolStateStore::new()),
            Arc::new(InMemoryFileStore::new()),
        );
        let ingestor = ingest_fn(|_signal, _payload| async { Ok::<(), IngestError>(()) });
        TargetEnvironment::new(
            dir(TARGET),
            SignalRegistry::new(Arc::new(test_clock())),
            Arc::new(catalog),
            resolver,
            Arc::new(ingestor),
        )
    }

    fn announce(env: &TargetEnvironment, source: &str) -> Signal {
        env.registry.announce(&dir(source), &env.target, source)
    }

    fn loaded(env: &TargetEnvironment) -> TargetState {
        let mut state = TargetState::default();
        TargetReducer::refresh(&mut state, env);
        state
    }

    #[test]
    fn test_signals_changed_picks_up_pending() {
        let env = env();
        announce(&env, "base64-tool");
        announce(&env, "url-tool");

        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(TargetState::default())
            .when_action(TargetAction::SignalsChanged)
            .then_state(|state| {
                assert_eq!(state.pending.len(), 2);
                assert_eq!(state.pending[0].source.as_str(), "base64-tool");
                assert_eq!(state.phase(), HandlerPhase::PendingUnreviewed);
            })
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_auto_open_when_configured() {
        let mut env = env();
        env.auto_open_review = true;
        announce(&env, "base64-tool");

        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(TargetState::default())
            .when_action(TargetAction::SignalsChanged)
            .then_state(|state| assert_eq!(state.phase(), HandlerPhase::ReviewOpen))
            .run();
    }

    #[test]
    fn test_open_review_needs_signals() {
        ReducerTest::new(TargetReducer)
            .with_env(env())
            .given_state(TargetState::default())
            .when_action(TargetAction::OpenReview)
            .then_state(|state| {
                assert!(!state.review_open);
                assert_eq!(state.phase(), HandlerPhase::Idle);
            })
            .run();
    }

    #[test]
    fn test_defer_all_suppresses_auto_open() {
        let mut env = env();
        env.auto_open_review = true;
        announce(&env, "base64-tool");
        let state = loaded(&env);
        assert!(state.review_open);

        let mut deferred = state.clone();
        TargetReducer.reduce(&mut deferred, TargetAction::DeferAll, &env);
        assert_eq!(deferred.phase(), HandlerPhase::Deferred);

        // Same pending set: stays deferred
        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(deferred)
            .when_action(TargetAction::SignalsChanged)
            .then_state(|state| assert_eq!(state.phase(), HandlerPhase::Deferred))
            .run();
    }

    #[test]
    fn test_new_signal_clears_deferral() {
        let env = env();
        announce(&env, "a");
        announce(&env, "b");
        announce(&env, "c");
        let mut state = loaded(&env);
        TargetReducer.reduce(&mut state, TargetAction::DeferAll, &env);
        assert_eq!(state.phase(), HandlerPhase::Deferred);

        announce(&env, "d");
        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(state)
            .when_action(TargetAction::SignalsChanged)
            .then_state(|state| {
                assert_eq!(state.pending.len(), 4);
                assert!(!state.deferred);
                assert_eq!(state.phase(), HandlerPhase::PendingUnreviewed);
            })
            .run();
    }

    #[test]
    fn test_accept_emits_future_and_marks_in_flight() {
        let env = env();
        announce(&env, "base64-tool");
        let state = loaded(&env);

        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(state)
            .when_action(TargetAction::AcceptSignal {
                source: dir("base64-tool"),
            })
            .then_state(|state| assert!(state.in_flight.contains(&dir("base64-tool"))))
            .then_effects(|effects| {
                assertions::assert_effects_count(effects, 1);
                assertions::assert_has_future_effect(effects);
            })
            .run();
    }

    #[test]
    fn test_accept_is_noop_when_in_flight_or_missing() {
        let env = env();
        announce(&env, "base64-tool");
        let mut state = loaded(&env);
        state.in_flight.insert(dir("base64-tool"));

        ReducerTest::new(TargetReducer)
            .with_env(env.clone())
            .given_state(state)
            .when_action(TargetAction::AcceptSignal {
                source: dir("base64-tool"),
            })
            .then_effects(assertions::assert_no_effects)
            .run();

        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(TargetState::default())
            .when_action(TargetAction::AcceptSignal {
                source: dir("never-announced"),
            })
            .then_state(|state| assert!(state.in_flight.is_empty()))
            .then_effects(assertions::assert_no_effects)
            .run();
    }

    #[test]
    fn test_accept_finished_records_notice() {
        let env = env();
        let signal = announce(&env, "base64-tool");
        let mut state = loaded(&env);
        state.in_flight.insert(dir("base64-tool"));
        env.registry.remove(&signal.source, &env.target);

        let notice = ExchangeNotice::NoTransferableData {
            source: dir("base64-tool"),
            source_title: "Base64".into(),
        };
        let expected = notice.clone();
        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(state)
            .when_action(TargetAction::AcceptFinished {
                source: dir("base64-tool"),
                notice,
            })
            .then_state(move |state| {
                assert!(state.in_flight.is_empty());
                assert_eq!(state.last_notice, Some(expected));
                assert_eq!(state.phase(), HandlerPhase::Idle);
            })
            .run();
    }

    #[test]
    fn test_ignore_signal_skips_in_flight() {
        let env = env();
        announce(&env, "a");
        announce(&env, "b");
        let mut state = loaded(&env);
        state.in_flight.insert(dir("a"));

        TargetReducer.reduce(&mut state, TargetAction::IgnoreSignal { source: dir("a") }, &env);
        TargetReducer.reduce(&mut state, TargetAction::IgnoreSignal { source: dir("b") }, &env);

        assert_eq!(state.pending.len(), 1);
        assert_eq!(state.pending[0].source.as_str(), "a");
    }

    #[test]
    fn test_ignore_all_goes_idle() {
        let env = env();
        announce(&env, "a");
        announce(&env, "b");
        let mut state = loaded(&env);
        TargetReducer.reduce(&mut state, TargetAction::OpenReview, &env);
        assert_eq!(state.phase(), HandlerPhase::ReviewOpen);

        let registry = env.registry.clone();
        ReducerTest::new(TargetReducer)
            .with_env(env)
            .given_state(state)
            .when_action(TargetAction::IgnoreAll)
            .then_state(move |state| {
                assert_eq!(state.phase(), HandlerPhase::Idle);
                assert!(!state.review_open);
                assert_eq!(registry.pending_count(&dir(TARGET)), 0);
            })
            .run();
    }

    #[tokio::test]
    async fn test_accept_future_removes_signal_on_missing_metadata() {
        let env = env();
        let signal = announce(&env, "unknown-tool");

        let notice = run_accept(&env, &signal).await;
        assert_eq!(
            notice,
            ExchangeNotice::Failed {
                source_title: "unknown-tool".into(),
                error: ExchangeError::NoSourceMetadata {
                    tool: dir("unknown-tool")
                },
            }
        );
        assert!(env.registry.list_pending(&env.target).is_empty());
    }

    #[tokio::test]
    async fn test_panicking_ingestor_is_contained() {
        let mut env = env();
        env.ingestor = Arc::new(ingest_fn(|_signal, payload: ResolvedPayload| async move {
            if !payload.items().is_empty() {
                std::panic::panic_any("merge exploded");
            }
            Ok::<(), IngestError>(())
        }));
        let states = InMemoryToolStateStore::new();
        env.resolver = PayloadResolver::new(Arc::new(states.clone()), Arc::new(InMemoryFileStore::new()));
        let mut output = ToolState::new();
        output.insert("outputValue".into(), serde_json::json!("SGk="));
        states.save_now("base64-tool", output).await.unwrap();
        let signal = announce(&env, "base64-tool");

        let notice = run_accept(&env, &signal).await;
        assert_eq!(notice.outcome_label(), "ingestion_error");
        assert!(env.registry.list_pending(&env.target).is_empty());
    }
}
