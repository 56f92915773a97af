/*!
The state store: owns the live `BuildState`, applies actions through the
root reducer and fans every applied action out to subscribers and the bus.
*/

use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::action::{Action, Dispatch, Dispatched};
use crate::bus::NotificationBus;
use crate::reducers::reduce;
use crate::snapshot::SnapshotCodecInterface;
use crate::state::BuildState;
use crate::{Result, SnapshotMetadata};

/// Callback run after every applied action
pub type Subscriber = Box<dyn FnMut(&BuildState) + Send>;

/// Handle returned by [`StateStore::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Process-wide build state with cached persistence
///
/// Construct one with [`StateStore::open`] at startup and pass it by handle.
/// Dispatch takes `&mut self`, so actions are applied strictly in call order.
///
/// # Example
/// ```rust
/// use std::sync::Arc;
/// use sitestate_core::{create_codec_from_config, Action, CacheConfig, Node, NotificationBus, StateStore};
///
/// let codec = create_codec_from_config(&CacheConfig::in_memory())?;
/// let mut store = StateStore::open(codec, Arc::new(NotificationBus::new()));
///
/// store.dispatch(Action::create_node(Node::new("1", "Post")));
/// assert_eq!(store.get_state().nodes.len(), 1);
///
/// store.save()?;
/// # Ok::<(), sitestate_core::StoreError>(())
/// ```
pub struct StateStore {
    state: BuildState,
    codec: Box<dyn SnapshotCodecInterface>,
    bus: Arc<NotificationBus>,
    subscribers: Vec<(SubscriptionId, Subscriber)>,
    next_subscription: u64,
}

impl StateStore {
    /// Load the cached state through `codec` and start a store from it
    ///
    /// Never fails: an unusable cache starts the store empty.
    pub fn open(codec: Box<dyn SnapshotCodecInterface>, bus: Arc<NotificationBus>) -> Self {
        let state = codec.load();
        debug!(
            key = codec.key(),
            nodes = state.nodes.len(),
            "Opened build-state store"
        );
        Self::with_state(state, codec, bus)
    }

    /// Start a store from an explicit state instead of the cache
    pub fn with_state(
        mut state: BuildState,
        codec: Box<dyn SnapshotCodecInterface>,
        bus: Arc<NotificationBus>,
    ) -> Self {
        state.reindex_nodes();

        let mut store = Self {
            state,
            codec,
            bus: Arc::clone(&bus),
            subscribers: Vec::new(),
            next_subscription: 0,
        };

        // Republish every applied action on the bus under its type tag
        store.subscribe(move |state: &BuildState| {
            if let Some(action) = &state.last_action {
                bus.emit(action.type_name(), action);
            }
        });
        store
    }

    /// Apply one action, or a batch of optional actions
    ///
    /// `None` slots in a batch are skipped. The rest are applied one at a
    /// time in order, each notifying subscribers before the next begins.
    ///
    /// # Returns
    /// The applied action, or the applied actions of a batch in order
    pub fn dispatch<D: Into<Dispatch>>(&mut self, input: D) -> Dispatched {
        match input.into() {
            Dispatch::One(action) => {
                self.apply(&action);
                Dispatched::One(action)
            }
            Dispatch::Batch(actions) => {
                let mut applied = Vec::with_capacity(actions.len());
                for action in actions.into_iter().flatten() {
                    self.apply(&action);
                    applied.push(action);
                }
                Dispatched::Many(applied)
            }
        }
    }

    /// Run `thunk` with full access to the store
    ///
    /// Lets a caller read state and dispatch follow-up actions as one unit.
    pub fn dispatch_thunk<T, F>(&mut self, thunk: F) -> T
    where
        F: FnOnce(&mut StateStore) -> T,
    {
        thunk(self)
    }

    pub fn get_state(&self) -> &BuildState {
        &self.state
    }

    /// Register a callback run after every applied action
    pub fn subscribe<F>(&mut self, subscriber: F) -> SubscriptionId
    where
        F: FnMut(&BuildState) + Send + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push((id, Box::new(subscriber)));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(subscription, _)| *subscription != id);
        self.subscribers.len() != before
    }

    /// Persist the current state through the codec
    ///
    /// # Errors
    /// Any storage, serialization or compression failure of the codec
    pub fn save(&self) -> Result<SnapshotMetadata> {
        self.codec.save(&self.state)
    }

    pub fn bus(&self) -> &Arc<NotificationBus> {
        &self.bus
    }

    pub fn codec(&self) -> &dyn SnapshotCodecInterface {
        self.codec.as_ref()
    }

    /// Consume the store, returning its state
    pub fn into_state(self) -> BuildState {
        self.state
    }

    fn apply(&mut self, action: &Action) {
        trace!(action = action.type_name(), "Applying action");
        reduce(&mut self.state, action);

        #[cfg(feature = "metrics")]
        crate::observability::StoreMetrics::global().record_dispatch();

        for (_, subscriber) in self.subscribers.iter_mut() {
            subscriber(&self.state);
        }
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("snapshot_key", &self.codec.key())
            .field("nodes", &self.state.nodes.len())
            .field("subscribers", &self.subscribers.len())
            .field("bus", &self.bus)
            .finish()
    }
}
