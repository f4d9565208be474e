//! Host-side node state rcdom has no room for: properties and event listeners.

use markup5ever_rcdom::{Handle, WeakHandle};
use serde_json::Value;
use std::cell::Cell;
use std::collections::BTreeMap;
use std::rc::Rc;

use super::dom::{self, NodeKey};
use super::lifecycle::ListenerId;
use super::Runtime;

/// An event dispatched to host listeners.
#[derive(Debug)]
pub struct HostEvent {
    pub name: String,
    pub detail: Value,
    pub target: Handle,
    default_prevented: Cell<bool>,
    propagation_stopped: Cell<bool>,
}

impl HostEvent {
    pub fn prevent_default(&self) {
        self.default_prevented.set(true);
    }

    pub fn default_prevented(&self) -> bool {
        self.default_prevented.get()
    }

    pub fn stop_propagation(&self) {
        self.propagation_stopped.set(true);
    }
}

pub type EventHandler = Rc<dyn Fn(&HostEvent)>;

/// Per-node extras. Holds its node weakly so a freed node's entry is never
/// mistaken for a new node allocated at the same address.
pub(crate) struct HostExtras {
    node: WeakHandle,
    properties: BTreeMap<String, Value>,
    listeners: Vec<(ListenerId, String, EventHandler)>,
}

impl HostExtras {
    fn new(node: &Handle) -> Self {
        HostExtras {
            node: Rc::downgrade(node),
            properties: BTreeMap::new(),
            listeners: Vec::new(),
        }
    }

    fn belongs_to(&self, node: &Handle) -> bool {
        self.node.upgrade().is_some_and(|n| Rc::ptr_eq(&n, node))
    }
}

impl Runtime {
    fn read_extras<R>(&self, node: &Handle, f: impl FnOnce(&HostExtras) -> R) -> Option<R> {
        self.inner
            .extras
            .borrow()
            .get(&NodeKey::of(node))
            .filter(|extras| extras.belongs_to(node))
            .map(f)
    }

    /// Runs `f` on the extras of `node`, creating them on first use.
    ///
    /// Creating an entry also prunes entries whose node has been freed.
    fn write_extras<R>(&self, node: &Handle, f: impl FnOnce(&mut HostExtras) -> R) -> R {
        let key = NodeKey::of(node);
        let mut extras = self.inner.extras.borrow_mut();
        if !extras.get(&key).is_some_and(|entry| entry.belongs_to(node)) {
            extras.retain(|_, entry| entry.node.upgrade().is_some());
            extras.remove(&key);
        }
        f(extras.entry(key).or_insert_with(|| HostExtras::new(node)))
    }

    pub fn set_property(&self, node: &Handle, name: &str, value: Value) {
        self.write_extras(node, |extras| {
            extras.properties.insert(name.to_string(), value);
        });
    }

    pub fn property(&self, node: &Handle, name: &str) -> Option<Value> {
        self.read_extras(node, |extras| extras.properties.get(name).cloned())
            .flatten()
    }

    pub fn add_event_listener(
        &self,
        node: &Handle,
        event: &str,
        handler: impl Fn(&HostEvent) + 'static,
    ) -> ListenerId {
        let id = ListenerId(self.next_id());
        self.write_extras(node, |extras| {
            extras
                .listeners
                .push((id, event.to_string(), Rc::new(handler)));
        });
        id
    }

    pub fn remove_event_listener(&self, node: &Handle, id: ListenerId) -> bool {
        let mut extras = self.inner.extras.borrow_mut();
        let Some(entry) = extras
            .get_mut(&NodeKey::of(node))
            .filter(|entry| entry.belongs_to(node))
        else {
            return false;
        };
        let before = entry.listeners.len();
        entry.listeners.retain(|(other, _, _)| *other != id);
        entry.listeners.len() != before
    }

    pub fn listener_count(&self, node: &Handle) -> usize {
        self.read_extras(node, |extras| extras.listeners.len())
            .unwrap_or(0)
    }

    /// Number of nodes currently carrying properties or listeners.
    pub fn extras_count(&self) -> usize {
        self.inner.extras.borrow().len()
    }

    /// Dispatches `name` at `target`, bubbling through its ancestors.
    ///
    /// Returns the event so callers can inspect `default_prevented`.
    pub fn dispatch_event(&self, target: &Handle, name: &str, detail: Value) -> HostEvent {
        let event = HostEvent {
            name: name.to_string(),
            detail,
            target: target.clone(),
            default_prevented: Cell::new(false),
            propagation_stopped: Cell::new(false),
        };
        let path = std::iter::once(target.clone()).chain(dom::ancestors(target));
        for node in path {
            let handlers: Vec<EventHandler> = self
                .read_extras(&node, |extras| {
                    extras
                        .listeners
                        .iter()
                        .filter(|(_, event, _)| event == name)
                        .map(|(_, _, handler)| handler.clone())
                        .collect()
                })
                .unwrap_or_default();
            for handler in handlers {
                handler(&event);
            }
            if event.propagation_stopped.get() {
                break;
            }
        }
        event
    }

    pub(crate) fn drop_extras(&self, key: NodeKey) {
        self.inner.extras.borrow_mut().remove(&key);
    }
}
