use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

use crate::error::StoreError;
use crate::snapshot::{Listeners, Subscription};

/// Progress of loading persisted state into a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HydrationState {
    /// No hydration has started.
    Idle,
    /// A hydration run is in flight.
    Hydrating,
    /// The last run finished and its state is in the store.
    Hydrated,
    /// The last run failed.
    Errored,
}

impl HydrationState {
    /// Whether a run is in flight.
    pub fn is_pending(self) -> bool {
        self == HydrationState::Hydrating
    }
}

/// Called when a hydration run starts, with the state at that moment.
pub type HydrateListener<T> = dyn Fn(&Arc<T>) + Send + Sync;

/// Called when a hydration run ends, with its outcome.
pub type FinishListener<T> = dyn Fn(Result<&Arc<T>, &StoreError>) + Send + Sync;

/// Tracks the hydration state machine of one persisted store and the
/// listeners interested in its transitions.
///
/// `Idle -> Hydrating -> Hydrated | Errored`; a rehydration re-enters
/// `Hydrating` from either end state.
pub struct HydrationController<T> {
    state: watch::Sender<HydrationState>,
    on_start: Arc<Listeners<HydrateListener<T>>>,
    on_finish: Arc<Listeners<FinishListener<T>>>,
}

impl<T: Send + Sync + 'static> HydrationController<T> {
    /// Create a controller in `Idle` with no listeners.
    pub fn new() -> Self {
        let (state, _) = watch::channel(HydrationState::Idle);
        Self {
            state,
            on_start: Listeners::new(),
            on_finish: Listeners::new(),
        }
    }

    /// Current position in the state machine.
    pub fn state(&self) -> HydrationState {
        *self.state.borrow()
    }

    /// `true` only once a run has finished successfully and no other run
    /// is in flight.
    pub fn has_hydrated(&self) -> bool {
        self.state() == HydrationState::Hydrated
    }

    /// Register a listener for the start of every hydration run.
    pub fn on_hydrate<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        self.on_start.add(Arc::new(listener))
    }

    /// Register a listener for the end of every hydration run.
    pub fn on_finish_hydration<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Result<&Arc<T>, &StoreError>) + Send + Sync + 'static,
    {
        self.on_finish.add(Arc::new(listener))
    }

    /// Enter `Hydrating` and notify start listeners.
    pub(crate) fn begin(&self, current: &Arc<T>) {
        self.state.send_replace(HydrationState::Hydrating);
        debug!("hydration started");
        self.on_start.dispatch(|listener| listener(current));
    }

    /// Enter `Hydrated` or `Errored` and notify finish listeners.
    pub(crate) fn finish(&self, outcome: Result<&Arc<T>, &StoreError>) {
        let next = match outcome {
            Ok(_) => HydrationState::Hydrated,
            Err(_) => HydrationState::Errored,
        };
        self.state.send_replace(next);
        debug!(state = ?next, "hydration finished");
        self.on_finish.dispatch(|listener| listener(outcome));
    }

    /// Wait until no run is in flight and return the resulting state.
    ///
    /// Returns immediately when hydration never started.
    pub async fn wait(&self) -> HydrationState {
        let mut rx = self.state.subscribe();
        let state = match rx.wait_for(|state| !state.is_pending()).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        };
        state
    }
}

impl<T: Send + Sync + 'static> Default for HydrationController<T> {
    fn default() -> Self {
        Self::new()
    }
}
