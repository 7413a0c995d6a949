//! Per-type listener registry for inbound relay frames

use crate::protocol::Frame;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::error;

/// Callback invoked for every inbound frame of a registered type
pub type MessageHandler = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Identifies one registered listener so it can be removed again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Mapping from message type to its ordered listeners
#[derive(Default)]
pub struct HandlerRegistry {
    next_id: AtomicU64,
    handlers: RwLock<HashMap<String, Vec<(HandlerId, MessageHandler)>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener for `kind`
    pub fn register(&self, kind: &str, handler: MessageHandler) -> HandlerId {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .write()
            .entry(kind.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    /// Remove one listener, or every listener of `kind` when `id` is `None`.
    /// Returns how many were removed.
    pub fn unregister(&self, kind: &str, id: Option<HandlerId>) -> usize {
        let mut handlers = self.handlers.write();
        let Some(list) = handlers.get_mut(kind) else {
            return 0;
        };

        let before = list.len();
        match id {
            Some(id) => list.retain(|(existing, _)| *existing != id),
            None => list.clear(),
        }
        let removed = before - list.len();

        if list.is_empty() {
            handlers.remove(kind);
        }
        removed
    }

    /// Number of listeners registered for `kind`
    pub fn listener_count(&self, kind: &str) -> usize {
        self.handlers.read().get(kind).map_or(0, Vec::len)
    }

    /// Invoke every listener of the frame's type.
    ///
    /// Listeners run outside the registry lock so they may register or
    /// unregister. A panicking listener is logged and the rest still run.
    /// Returns the number of listeners that completed.
    pub fn dispatch(&self, frame: &Frame) -> usize {
        let snapshot: Vec<(HandlerId, MessageHandler)> = match self.handlers.read().get(&frame.kind) {
            Some(list) => list.clone(),
            None => return 0,
        };

        let mut completed = 0;
        for (id, handler) in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(frame))) {
                Ok(()) => completed += 1,
                Err(panic) => {
                    let reason = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(kind = %frame.kind, handler = ?id, %reason, "Message handler panicked");
                }
            }
        }
        completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> MessageHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |tag: &'static str| -> MessageHandler {
            let log = Arc::clone(&log_clone);
            Arc::new(move |frame: &Frame| log.lock().push(format!("{}:{}", tag, frame.kind)))
        };
        (log, make)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.register("webrtc_offer", make("a"));
        registry.register("webrtc_offer", make("b"));
        registry.register("webrtc_answer", make("c"));

        let delivered = registry.dispatch(&Frame::new("webrtc_offer", json!({})));
        assert_eq!(delivered, 2);
        assert_eq!(*log.lock(), vec!["a:webrtc_offer", "b:webrtc_offer"]);
    }

    #[test]
    fn test_unregister_single_listener() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        let a = registry.register("ice_candidate", make("a"));
        registry.register("ice_candidate", make("b"));

        assert_eq!(registry.unregister("ice_candidate", Some(a)), 1);
        registry.dispatch(&Frame::new("ice_candidate", json!({})));
        assert_eq!(*log.lock(), vec!["b:ice_candidate"]);
    }

    #[test]
    fn test_unregister_all_listeners() {
        let registry = HandlerRegistry::new();
        let (_log, make) = recorder();
        registry.register("call_ended", make("a"));
        registry.register("call_ended", make("b"));

        assert_eq!(registry.unregister("call_ended", None), 2);
        assert_eq!(registry.listener_count("call_ended"), 0);
        assert_eq!(registry.dispatch(&Frame::new("call_ended", json!({}))), 0);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let registry = HandlerRegistry::new();
        let (log, make) = recorder();
        registry.register("webrtc_offer", Arc::new(|_: &Frame| panic!("boom")));
        registry.register("webrtc_offer", make("b"));

        let delivered = registry.dispatch(&Frame::new("webrtc_offer", json!({})));
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock(), vec!["b:webrtc_offer"]);
    }

    #[test]
    fn test_listener_may_unregister_during_dispatch() {
        let registry = Arc::new(HandlerRegistry::new());
        let registry_clone = Arc::clone(&registry);
        registry.register(
            "media_state_changed",
            Arc::new(move |frame: &Frame| {
                registry_clone.unregister(&frame.kind, None);
            }),
        );

        registry.dispatch(&Frame::new("media_state_changed", json!({})));
        assert_eq!(registry.listener_count("media_state_changed"), 0);
    }
}
