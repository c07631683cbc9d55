//! # Tool Exchange Core
//!
//! Core traits and types shared by every reducer in the tool exchange workspace.
//!
//! The inter-tool data exchange is modelled as a small state machine per target
//! tool. That state machine is written as a [`Reducer`](reducer::Reducer): a
//! function `(State, Action, Environment) → (State, Effects)` whose side effects
//! are returned as [`Effect`](effect::Effect) descriptions and executed by the
//! runtime crate.
//!
//! ## Core Concepts
//!
//! - **State**: what a target tool knows about pending signals
//! - **Action**: every input to the reducer (user intents and effect feedback)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: side effect descriptions (not execution)
//! - **Environment**: injected dependencies via traits
//!
//! ## Example
//!
//! ```
//! use tool_exchange_core::{effect::Effect, reducer::Reducer, smallvec, SmallVec};
//!
//! #[derive(Clone, Debug, Default)]
//! struct ReviewState {
//!     open: bool,
//! }
//!
//! #[derive(Clone, Debug)]
//! enum ReviewAction {
//!     Open,
//!     Close,
//! }
//!
//! struct ReviewReducer;
//!
//! impl Reducer for ReviewReducer {
//!     type State = ReviewState;
//!     type Action = ReviewAction;
//!     type Environment = ();
//!
//!     fn reduce(
//!         &self,
//!         state: &mut ReviewState,
//!         action: ReviewAction,
//!         _env: &(),
//!     ) -> SmallVec<[Effect<ReviewAction>; 4]> {
//!         state.open = matches!(action, ReviewAction::Open);
//!         smallvec![Effect::None]
//!     }
//! }
//!
//! let mut state = ReviewState::default();
//! let _ = ReviewReducer.reduce(&mut state, ReviewAction::Open, &());
//! assert!(state.open);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use smallvec::{smallvec, SmallVec};

/// Declarative helpers for building effects
pub mod effect_macros;

/// The [`Reducer`](reducer::Reducer) trait
///
/// A target handler's transitions (refresh, review, accept, ignore) live in
/// one reducer so they can be tested without a runtime.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// State transitions for one kind of state
    pub trait Reducer {
        /// What the reducer owns
        type State;

        /// Inputs: user intents and effect feedback
        type Action;

        /// Collaborators the reducer may reach (registries, stores, clocks)
        type Environment;

        /// Apply `action` to `state` and describe the follow-up work
        ///
        /// Mutation happens in place. Nothing slow or fallible may run here;
        /// it goes into a returned [`Effect`] instead. Up to four effects stay
        /// on the stack.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Work a reducer asks the runtime to perform
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// A description of follow-up work, run by the runtime after reduction
    pub enum Effect<Action> {
        /// Nothing to do
        None,

        /// Async work whose `Some(action)` result is reduced next
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Returns `true` for [`Effect::None`]
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Injectable collaborators shared by several reducers
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of signal timestamps
    ///
    /// Tests pin or step time to check ordering without sleeping.
    pub trait Clock: Send + Sync {
        /// Current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock implementation backed by [`Utc::now`]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
