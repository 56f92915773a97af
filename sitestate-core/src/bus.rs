/*!
Notification bus: named events with `Action` payloads.

Every action the store applies is published here under its `type` tag, so
plugins can react without being wired into the store itself.
*/

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::warn;

use crate::action::Action;
use crate::error::ListenerError;

/// Callback registered for one event name
pub type Listener = Arc<dyn Fn(&Action) -> Result<(), ListenerError> + Send + Sync>;

/// Handle returned by [`NotificationBus::on`], used to remove the listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// Outcome of one [`NotificationBus::emit`]
#[derive(Debug, Default)]
pub struct EmitReport {
    /// Listeners that returned `Ok`
    pub delivered: usize,
    pub failed: Vec<ListenerError>,
}

impl EmitReport {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Synchronous publish/subscribe keyed by event name
///
/// Listeners run on the emitting thread in registration order. A listener
/// that returns an error is logged and reported; the rest still run.
///
/// # Example
/// ```rust
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use sitestate_core::{Action, NotificationBus};
///
/// let bus = NotificationBus::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&seen);
/// bus.on("DELETE_CACHE", move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
///     Ok(())
/// });
///
/// bus.emit("DELETE_CACHE", &Action::DeleteCache);
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct NotificationBus {
    listeners: RwLock<HashMap<String, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `event`
    pub fn on<E, F>(&self, event: E, listener: F) -> ListenerId
    where
        E: Into<String>,
        F: Fn(&Action) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(event.into())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns whether it was registered for `event`
    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(registered) = listeners.get_mut(event) else {
            return false;
        };
        let before = registered.len();
        registered.retain(|(listener_id, _)| *listener_id != id);
        let removed = registered.len() != before;

        if registered.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    /// Invoke every listener registered for `event` with `action`
    ///
    /// The listener list is copied before invoking, so listeners may call
    /// `on`/`off` without deadlocking. Changes take effect from the next emit.
    pub fn emit(&self, event: &str, action: &Action) -> EmitReport {
        let registered: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        let mut report = EmitReport::default();
        for listener in registered {
            match listener(action) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(event, error = %e, "Notification listener failed");
                    report.failed.push(e);
                }
            }
        }
        report
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl fmt::Debug for NotificationBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let counts: HashMap<&str, usize> = listeners
            .iter()
            .map(|(event, registered)| (event.as_str(), registered.len()))
            .collect();
        f.debug_struct("NotificationBus")
            .field("listeners", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> impl Fn(&Action) -> Result<(), ListenerError> {
        let log = Arc::clone(log);
        let name = name.to_string();
        move |action| {
            log.lock().unwrap().push(format!("{name}:{}", action.type_name()));
            Ok(())
        }
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let bus = NotificationBus::new();
        let report = bus.emit("CREATE_NODE", &Action::DeleteCache);
        assert_eq!(report.delivered, 0);
        assert!(report.is_ok());
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = NotificationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("DELETE_CACHE", recorder(&log, "a"));
        bus.on("DELETE_CACHE", recorder(&log, "b"));
        bus.on("CREATE_NODE", recorder(&log, "c"));

        let report = bus.emit("DELETE_CACHE", &Action::DeleteCache);
        assert_eq!(report.delivered, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:DELETE_CACHE".to_string(), "b:DELETE_CACHE".to_string()]
        );
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let bus = NotificationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = bus.on("DELETE_CACHE", recorder(&log, "a"));
        bus.on("DELETE_CACHE", recorder(&log, "b"));

        assert!(!bus.off("CREATE_NODE", first));
        assert!(bus.off("DELETE_CACHE", first));
        assert!(!bus.off("DELETE_CACHE", first));
        assert_eq!(bus.listener_count("DELETE_CACHE"), 1);

        bus.emit("DELETE_CACHE", &Action::DeleteCache);
        assert_eq!(*log.lock().unwrap(), vec!["b:DELETE_CACHE".to_string()]);
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let bus = NotificationBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        bus.on("DELETE_CACHE", |action: &Action| {
            Err(ListenerError::new(action.type_name(), "plugin crashed"))
        });
        bus.on("DELETE_CACHE", recorder(&log, "after"));

        let report = bus.emit("DELETE_CACHE", &Action::DeleteCache);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].event, "DELETE_CACHE");
        assert_eq!(*log.lock().unwrap(), vec!["after:DELETE_CACHE".to_string()]);
    }

    #[test]
    fn test_listener_can_register_during_emit() {
        let bus = Arc::new(NotificationBus::new());
        let inner = Arc::clone(&bus);
        bus.on("DELETE_CACHE", move |_| {
            inner.on("DELETE_CACHE", |_| Ok(()));
            Ok(())
        });

        let report = bus.emit("DELETE_CACHE", &Action::DeleteCache);
        assert_eq!(report.delivered, 1);
        assert_eq!(bus.listener_count("DELETE_CACHE"), 2);
    }
}
