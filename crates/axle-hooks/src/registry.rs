//! Hook handler registration with priority ordering
//!
//! Handler names are unique across the whole registry: registering a
//! duplicate name replaces the old record wherever it was, and
//! `unregister(name)` removes across all events.

use axle_core::causality::SeqClock;
use axle_core::event::Payload;
use axle_core::hook::HookResult;
use axle_core::Result;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Priority used when the caller does not care about ordering.
/// Lower runs earlier; ties break on registration order.
pub const DEFAULT_PRIORITY: i32 = 100;

/// An observer registered for a named lifecycle event.
///
/// Control flow is steered by the returned [`HookResult`], never by errors:
/// an `Err` is logged by the dispatcher and treated as `continue`.
#[async_trait::async_trait]
pub trait HookHandler: Send + Sync {
    async fn handle(&self, event: &str, payload: &Payload) -> Result<HookResult>;
}

/// Adapter turning a plain closure into a [`HookHandler`].
pub struct FnHook<F>(pub F);

#[async_trait::async_trait]
impl<F> HookHandler for FnHook<F>
where
    F: Fn(&str, &Payload) -> HookResult + Send + Sync,
{
    async fn handle(&self, event: &str, payload: &Payload) -> Result<HookResult> {
        Ok((self.0)(event, payload))
    }
}

/// Convenience wrapper for registering closures.
pub fn hook_fn<F>(f: F) -> Arc<dyn HookHandler>
where
    F: Fn(&str, &Payload) -> HookResult + Send + Sync + 'static,
{
    Arc::new(FnHook(f))
}

#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub event: String,
    pub name: String,
    pub priority: i32,
    pub order: u64,
    pub handler: Arc<dyn HookHandler>,
}

/// Read-only snapshot of one registered handler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HandlerInfo {
    pub event: String,
    pub name: String,
    pub priority: i32,
}

struct RegistryState {
    handlers: Vec<HandlerEntry>,
    next_order: u64,
    defaults: Map<String, Value>,
}

/// The per-session hook registry.
///
/// Also owns the session's [`SeqClock`]: every emission through this registry
/// stamps a fresh monotonic `seq`, which is what makes the per-session
/// sequence strictly increasing across all events.
pub struct HookRegistry {
    state: Mutex<RegistryState>,
    seq: SeqClock,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                handlers: Vec::new(),
                next_order: 0,
                defaults: Map::new(),
            }),
            seq: SeqClock::new(),
        }
    }

    /// Register `handler` for `event` under a registry-unique `name`.
    /// An existing handler with the same name is replaced (unregister then
    /// insert, so the replacement gets a fresh registration order).
    pub fn register(
        &self,
        event: impl Into<String>,
        name: impl Into<String>,
        priority: i32,
        handler: Arc<dyn HookHandler>,
    ) {
        let event = event.into();
        let name = name.into();
        let mut state = self.state.lock().unwrap();
        state.handlers.retain(|h| h.name != name);
        let order = state.next_order;
        state.next_order += 1;
        tracing::debug!(event = %event, handler = %name, priority, "hook registered");
        state.handlers.push(HandlerEntry {
            event,
            name,
            priority,
            order,
            handler,
        });
    }

    /// Remove the named handler from every event. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut state = self.state.lock().unwrap();
        let before = state.handlers.len();
        state.handlers.retain(|h| h.name != name);
        before != state.handlers.len()
    }

    /// Snapshot of registered handlers, optionally filtered by event,
    /// in invocation order.
    pub fn list_handlers(&self, event: Option<&str>) -> Vec<HandlerInfo> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<&HandlerEntry> = state
            .handlers
            .iter()
            .filter(|h| event.map_or(true, |e| h.event == e))
            .collect();
        entries.sort_by_key(|h| (h.priority, h.order));
        entries
            .iter()
            .map(|h| HandlerInfo {
                event: h.event.clone(),
                name: h.name.clone(),
                priority: h.priority,
            })
            .collect()
    }

    /// Merge `fields` into the defaults applied to every emitted payload.
    /// Explicit payload fields always win over defaults.
    pub fn set_default_fields(
        &self,
        fields: impl IntoIterator<Item = (String, Value)>,
    ) {
        let mut state = self.state.lock().unwrap();
        for (key, value) in fields {
            state.defaults.insert(key, value);
        }
    }

    pub fn set_default_field(&self, key: impl Into<String>, value: impl Into<Value>) {
        let mut state = self.state.lock().unwrap();
        state.defaults.insert(key.into(), value.into());
    }

    pub fn clear_default_field(&self, key: &str) {
        let mut state = self.state.lock().unwrap();
        state.defaults.remove(key);
    }

    /// The most recently issued sequence number.
    pub fn last_seq(&self) -> u64 {
        self.seq.last_seq()
    }

    pub(crate) fn next_seq(&self) -> u64 {
        self.seq.next_seq()
    }

    /// Handlers for `event` sorted by `(priority, registration order)`.
    /// Taken once per emission; registrations made while an emission is in
    /// flight are visible only to subsequent emissions.
    pub(crate) fn snapshot(&self, event: &str) -> Vec<HandlerEntry> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<HandlerEntry> = state
            .handlers
            .iter()
            .filter(|h| h.event == event)
            .cloned()
            .collect();
        entries.sort_by_key(|h| (h.priority, h.order));
        entries
    }

    pub(crate) fn defaults(&self) -> Map<String, Value> {
        self.state.lock().unwrap().defaults.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Arc<dyn HookHandler> {
        hook_fn(|_, _| HookResult::cont())
    }

    #[test]
    fn test_register_and_list() {
        let reg = HookRegistry::new();
        reg.register("tool:pre", "audit", 10, noop());
        reg.register("tool:post", "audit-post", 20, noop());

        let all = reg.list_handlers(None);
        assert_eq!(all.len(), 2);
        let pre = reg.list_handlers(Some("tool:pre"));
        assert_eq!(pre.len(), 1);
        assert_eq!(pre[0].name, "audit");
        assert_eq!(pre[0].priority, 10);
    }

    #[test]
    fn test_duplicate_name_replaces_across_events() {
        let reg = HookRegistry::new();
        reg.register("tool:pre", "audit", 10, noop());
        reg.register("turn:start", "audit", 5, noop());

        let all = reg.list_handlers(None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].event, "turn:start");
        assert_eq!(all[0].priority, 5);
    }

    #[test]
    fn test_unregister_removes_across_events() {
        let reg = HookRegistry::new();
        reg.register("tool:pre", "audit", 10, noop());
        assert!(reg.unregister("audit"));
        assert!(!reg.unregister("audit"));
        assert!(reg.list_handlers(None).is_empty());
    }

    #[test]
    fn test_snapshot_orders_by_priority_then_insertion() {
        let reg = HookRegistry::new();
        reg.register("e", "late", 20, noop());
        reg.register("e", "first", 0, noop());
        reg.register("e", "mid-a", 10, noop());
        reg.register("e", "mid-b", 10, noop());

        let names: Vec<String> = reg
            .list_handlers(Some("e"))
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["first", "mid-a", "mid-b", "late"]);
    }

    #[test]
    fn test_negative_priority_runs_before_zero() {
        let reg = HookRegistry::new();
        reg.register("e", "zero", 0, noop());
        reg.register("e", "early", -5, noop());

        let names: Vec<String> = reg
            .list_handlers(Some("e"))
            .into_iter()
            .map(|h| h.name)
            .collect();
        assert_eq!(names, vec!["early", "zero"]);
    }
}
