//! Signal registry: the outstanding "source has output for target" announcements.
//!
//! The registry is an explicit service object. Construct one at application
//! start and hand clones of it to every tool; clones share the same map.
//!
//! ```text
//!  source tool ──announce──▶ ┌────────────────┐ ──RegistryEvent──▶ target handlers
//!                            │ SignalRegistry │
//!  target handler ─remove──▶ └────────────────┘ ◀──list_pending── target handlers
//! ```
//!
//! Every operation is a single short critical section, so a reader never
//! sees a half-applied announce or remove.

use crate::directive::Directive;
use crate::error::CodecError;
use crate::signal::Signal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tool_exchange_core::environment::Clock;
use tool_exchange_runtime::metrics::{SIGNALS_ANNOUNCED, SIGNALS_LIVE, SIGNALS_REMOVED};

/// Current snapshot format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Change notification published by the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A signal was inserted or replaced
    Announced {
        /// The new live signal
        signal: Signal,
    },
    /// A single signal was removed
    Removed {
        /// Source of the removed signal
        source: Directive,
        /// Target of the removed signal
        target: Directive,
    },
    /// Every signal addressed to a target was removed
    Cleared {
        /// The target that was cleared
        target: Directive,
        /// How many signals were dropped
        removed: usize,
    },
    /// The whole registry was replaced from a snapshot
    Reset,
}

impl RegistryEvent {
    /// Whether a handler for `target` needs to refresh after this event
    #[must_use]
    pub fn concerns(&self, target: &Directive) -> bool {
        match self {
            Self::Announced { signal } => &signal.target == target,
            Self::Removed { target: t, .. } | Self::Cleared { target: t, .. } => t == target,
            Self::Reset => true,
        }
    }
}

/// Serializable registry contents.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    /// Format version, currently [`SNAPSHOT_VERSION`]
    pub version: u32,
    /// Every live signal, oldest first
    pub signals: Vec<Signal>,
}

#[derive(Default)]
struct Inner {
    /// target → source → live signal
    signals: HashMap<Directive, HashMap<Directive, Signal>>,
    next_sequence: u64,
}

impl Inner {
    fn live_count(&self) -> usize {
        self.signals.values().map(HashMap::len).sum()
    }
}

/// Process-wide store of live signals, addressable by target.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use tool_exchange::{Directive, SignalRegistry};
/// use tool_exchange_core::environment::SystemClock;
///
/// let registry = SignalRegistry::new(Arc::new(SystemClock));
/// let base64 = Directive::new("base64-tool").unwrap();
/// let case = Directive::new("case-converter-tool").unwrap();
///
/// registry.announce(&base64, &case, "Base64 Encoder");
/// registry.announce(&base64, &case, "Base64 Encoder / Decoder");
///
/// let pending = registry.list_pending(&case);
/// assert_eq!(pending.len(), 1);
/// assert_eq!(pending[0].source_title, "Base64 Encoder / Decoder");
/// ```
#[derive(Clone)]
pub struct SignalRegistry {
    inner: Arc<RwLock<Inner>>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<RegistryEvent>,
}

impl SignalRegistry {
    /// Create an empty registry with the default event capacity (64)
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_capacity(clock, 64)
    }

    /// Create an empty registry whose change channel buffers `capacity` events
    #[must_use]
    pub fn with_capacity(clock: Arc<dyn Clock>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(RwLock::new(Inner::default())),
            clock,
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine: handlers re-read on their next refresh.
        let _ = self.events.send(event);
    }

    /// Insert or replace the live signal for `(source, target)`
    ///
    /// The previous signal for the same pair, if any, is superseded: the new
    /// title, timestamp and sequence win.
    #[tracing::instrument(skip_all, fields(from = %source, to = %target))]
    pub fn announce(&self, source: &Directive, target: &Directive, source_title: &str) -> Signal {
        let (signal, replaced, live) = {
            let mut inner = self.write();
            let sequence = inner.next_sequence;
            inner.next_sequence = sequence.saturating_add(1);

            let signal = Signal {
                source: source.clone(),
                target: target.clone(),
                source_title: source_title.to_string(),
                timestamp: self.clock.now(),
                sequence,
            };

            let replaced = inner
                .signals
                .entry(target.clone())
                .or_default()
                .insert(source.clone(), signal.clone())
                .is_some();
            (signal, replaced, inner.live_count())
        };

        tracing::debug!(sequence = signal.sequence, replaced, "Signal announced");
        metrics::counter!(SIGNALS_ANNOUNCED).increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(SIGNALS_LIVE).set(live as f64);

        self.publish(RegistryEvent::Announced {
            signal: signal.clone(),
        });
        signal
    }

    /// All live signals addressed to `target`, oldest first
    #[must_use]
    pub fn list_pending(&self, target: &Directive) -> Vec<Signal> {
        let mut pending: Vec<Signal> = self
            .read()
            .signals
            .get(target)
            .map(|by_source| by_source.values().cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(Signal::order_key);
        pending
    }

    /// Number of live signals addressed to `target`
    #[must_use]
    pub fn pending_count(&self, target: &Directive) -> usize {
        self.read().signals.get(target).map_or(0, HashMap::len)
    }

    /// The live signal for `(source, target)`, if any
    #[must_use]
    pub fn get(&self, source: &Directive, target: &Directive) -> Option<Signal> {
        self.read()
            .signals
            .get(target)
            .and_then(|by_source| by_source.get(source))
            .cloned()
    }

    /// Whether no signal is live for any target
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().live_count() == 0
    }

    /// Remove the live signal for `(source, target)`; no-op when absent
    pub fn remove(&self, source: &Directive, target: &Directive) -> Option<Signal> {
        self.remove_where(source, target, |_| true)
    }

    /// Remove `signal` only if it is still the live announcement for its pair
    ///
    /// A re-announcement made in the meantime survives.
    pub fn remove_announcement(&self, signal: &Signal) -> Option<Signal> {
        let removed = self.remove_where(&signal.source, &signal.target, |live| {
            live.same_announcement(signal)
        });
        if removed.is_none() {
            tracing::debug!(
                from = %signal.source,
                to = %signal.target,
                sequence = signal.sequence,
                "Announcement already superseded or gone"
            );
        }
        removed
    }

    fn remove_where(
        &self,
        source: &Directive,
        target: &Directive,
        matches: impl FnOnce(&Signal) -> bool,
    ) -> Option<Signal> {
        let (removed, live) = {
            let mut inner = self.write();
            let removed = inner.signals.get_mut(target).and_then(|by_source| {
                if by_source.get(source).is_some_and(matches) {
                    by_source.remove(source)
                } else {
                    None
                }
            });
            if inner.signals.get(target).is_some_and(HashMap::is_empty) {
                inner.signals.remove(target);
            }
            (removed, inner.live_count())
        };

        if removed.is_some() {
            tracing::debug!(from = %source, to = %target, "Signal removed");
            metrics::counter!(SIGNALS_REMOVED).increment(1);
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(SIGNALS_LIVE).set(live as f64);
            self.publish(RegistryEvent::Removed {
                source: source.clone(),
                target: target.clone(),
            });
        }
        removed
    }

    /// Remove every signal addressed to `target`, returning how many were dropped
    pub fn clear_all_for(&self, target: &Directive) -> usize {
        let (removed, live) = {
            let mut inner = self.write();
            let removed = inner.signals.remove(target).map_or(0, |by_source| by_source.len());
            (removed, inner.live_count())
        };

        tracing::debug!(to = %target, removed, "Signals cleared for target");
        if removed > 0 {
            metrics::counter!(SIGNALS_REMOVED).increment(removed as u64);
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(SIGNALS_LIVE).set(live as f64);
        }
        self.publish(RegistryEvent::Cleared {
            target: target.clone(),
            removed,
        });
        removed
    }

    /// Remove every signal `source` announced, across all targets
    ///
    /// Hosts call this when a source tool clears its output or the user
    /// navigates away from it.
    pub fn retract_from(&self, source: &Directive) -> usize {
        let (targets, live) = {
            let mut inner = self.write();
            let mut targets = Vec::new();
            for (target, by_source) in &mut inner.signals {
                if by_source.remove(source).is_some() {
                    targets.push(target.clone());
                }
            }
            inner.signals.retain(|_, by_source| !by_source.is_empty());
            (targets, inner.live_count())
        };

        if !targets.is_empty() {
            #[allow(clippy::cast_precision_loss)]
            metrics::gauge!(SIGNALS_LIVE).set(live as f64);
        }
        for target in &targets {
            metrics::counter!(SIGNALS_REMOVED).increment(1);
            self.publish(RegistryEvent::Removed {
                source: source.clone(),
                target: target.clone(),
            });
        }
        tracing::debug!(from = %source, removed = targets.len(), "Signals retracted");
        targets.len()
    }

    /// Subscribe to change notifications
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Copy of every live signal, oldest first
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let mut signals: Vec<Signal> = self
            .read()
            .signals
            .values()
            .flat_map(|by_source| by_source.values().cloned())
            .collect();
        signals.sort_by_key(Signal::order_key);
        RegistrySnapshot {
            version: SNAPSHOT_VERSION,
            signals,
        }
    }

    /// Replace the registry contents with `snapshot`
    ///
    /// If the snapshot holds more than one signal for the same pair, the
    /// newest one is kept. Later announcements get sequence numbers above
    /// every restored one.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Unsupported`] for an unknown snapshot version.
    pub fn restore(&self, snapshot: RegistrySnapshot) -> Result<(), CodecError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CodecError::Unsupported(format!(
                "registry snapshot version {}",
                snapshot.version
            )));
        }

        let mut signals = snapshot.signals;
        signals.sort_by_key(Signal::order_key);

        let live = {
            let mut inner = self.write();
            inner.signals.clear();
            let mut next_sequence = inner.next_sequence;
            for signal in signals {
                next_sequence = next_sequence.max(signal.sequence.saturating_add(1));
                inner
                    .signals
                    .entry(signal.target.clone())
                    .or_default()
                    .insert(signal.source.clone(), signal);
            }
            inner.next_sequence = next_sequence;
            inner.live_count()
        };

        tracing::info!(live, "Registry restored from snapshot");
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!(SIGNALS_LIVE).set(live as f64);
        self.publish(RegistryEvent::Reset);
        Ok(())
    }

    /// Encode the current contents as JSON
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(&self.snapshot())?)
    }

    /// Replace the registry contents from a JSON snapshot
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] if the document is malformed or of an unknown version.
    pub fn restore_json(&self, json: &str) -> Result<(), CodecError> {
        let snapshot: RegistrySnapshot = serde_json::from_str(json)?;
        self.restore(snapshot)
    }
}

impl std::fmt::Debug for SignalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalRegistry")
            .field("live", &self.read().live_count())
            .finish_non_exhaustive()
    }
}
