//! Projectors: push bound values into one aspect of a host node.
//!
//! Every projector is a [`Subscription`] bound to its node's lifecycle, so
//! it only writes while the node is connected and catches up on reconnect.

use markup5ever_rcdom::{Handle, WeakHandle};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use super::dom;
use super::host::EventHandler;
use super::lifecycle::ListenerId;
use super::reactive::{display_value, is_truthy, Signal, SignalSubscription, Subscription};
use super::subscription::SubscriptionBinding;
use super::{NodeRef, Runtime, RuntimeError, WeakRuntime};

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTIES
// ═══════════════════════════════════════════════════════════════════════════════

const KNOWN_PROPERTIES: &[&str] = &[
    "className",
    "id",
    "textContent",
    "value",
    "checked",
    "disabled",
    "hidden",
    "title",
    "tabIndex",
    "selected",
    "placeholder",
    "readOnly",
    "htmlFor",
];

/// Canonical spelling of a property name, matched case-insensitively.
///
/// Markup attribute names arrive lowercased, so `[classname]` and
/// `[className]` both bind `className`. Unknown names pass through.
pub fn canonical_property(name: &str) -> String {
    KNOWN_PROPERTIES
        .iter()
        .find(|known| known.eq_ignore_ascii_case(name))
        .map(|known| known.to_string())
        .unwrap_or_else(|| name.to_string())
}

/// Writes one property. `className`, `id` and `textContent` are reflected
/// into the tree; everything else is stored as a host property.
pub fn apply_property(rt: &Runtime, node: &Handle, name: &str, value: &Value) {
    match name {
        "className" => dom::set_attribute(node, "class", &display_value(value)),
        "id" => dom::set_attribute(node, "id", &display_value(value)),
        "textContent" => dom::set_text_content(node, &display_value(value)),
        other => rt.set_property(node, other, value.clone()),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BINDING HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Binds `signal` to `node`, calling `write` with the live node on each value.
fn project(
    rt: &Runtime,
    node: &Handle,
    signal: Signal<Value>,
    write: impl Fn(&Runtime, &Handle, &Value) + 'static,
) -> Result<SubscriptionBinding, RuntimeError> {
    let weak_rt = rt.downgrade();
    let weak_node: WeakHandle = Rc::downgrade(node);
    SubscriptionBinding::bind(
        rt,
        &NodeRef::Node(node.clone()),
        SignalSubscription::new(signal, move |value: &Value| {
            if let (Some(rt), Some(node)) = (weak_rt.upgrade(), weak_node.upgrade()) {
                write(&rt, &node, value);
            }
        }),
    )
}

/// Diffs `next` against what was applied last: names that disappeared, and
/// entries that are new or changed. `next` becomes the applied state.
fn diff_applied<T: Clone + PartialEq>(
    applied: &RefCell<BTreeMap<String, T>>,
    next: BTreeMap<String, T>,
) -> (Vec<String>, Vec<(String, T)>) {
    let mut applied = applied.borrow_mut();
    let removed = applied
        .keys()
        .filter(|name| !next.contains_key(*name))
        .cloned()
        .collect();
    let changed = next
        .iter()
        .filter(|(name, value)| applied.get(*name) != Some(*value))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    *applied = next;
    (removed, changed)
}

pub fn bind_property(
    rt: &Runtime,
    node: &Handle,
    name: &str,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let name = canonical_property(name);
    project(rt, node, signal, move |rt, node, value| {
        apply_property(rt, node, &name, value)
    })
}

fn write_attribute(node: &Handle, name: &str, value: &Value) {
    match value {
        Value::Null | Value::Bool(false) => dom::remove_attribute(node, name),
        Value::Bool(true) => dom::set_attribute(node, name, ""),
        other => dom::set_attribute(node, name, &display_value(other)),
    }
}

/// `null` and `false` remove the attribute; `true` sets it empty.
pub fn bind_attribute(
    rt: &Runtime,
    node: &Handle,
    name: &str,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let name = name.to_string();
    project(rt, node, signal, move |_, node, value| {
        write_attribute(node, &name, value)
    })
}

pub fn bind_attribute_map(
    rt: &Runtime,
    node: &Handle,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let applied: RefCell<BTreeMap<String, Value>> = RefCell::new(BTreeMap::new());
    project(rt, node, signal, move |_, node, value| {
        let map = value.as_object().cloned().unwrap_or_default();
        let (removed, changed) = diff_applied(&applied, map.into_iter().collect());
        for name in removed {
            dom::remove_attribute(node, &name);
        }
        for (name, value) in changed {
            write_attribute(node, &name, &value);
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn bind_class(
    rt: &Runtime,
    node: &Handle,
    class: &str,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let class = class.to_string();
    project(rt, node, signal, move |_, node, value| {
        dom::toggle_class(node, &class, is_truthy(value))
    })
}

/// Class names a class-list value turns on.
///
/// Accepts a whitespace-separated string, an array of names, or an object
/// mapping names to truthy values.
pub fn class_names(value: &Value) -> BTreeSet<String> {
    match value {
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .flat_map(str::split_whitespace)
            .map(str::to_string)
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter(|(_, on)| is_truthy(on))
            .map(|(name, _)| name.clone())
            .collect(),
        _ => BTreeSet::new(),
    }
}

/// Adds and removes only the classes this binding contributed.
pub fn bind_class_list(
    rt: &Runtime,
    node: &Handle,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let applied: RefCell<BTreeMap<String, ()>> = RefCell::new(BTreeMap::new());
    project(rt, node, signal, move |_, node, value| {
        let next: BTreeMap<String, ()> =
            class_names(value).into_iter().map(|name| (name, ())).collect();
        let (removed, added) = diff_applied(&applied, next);
        for class in removed {
            dom::toggle_class(node, &class, false);
        }
        for (class, ()) in added {
            dom::toggle_class(node, &class, true);
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// STYLES
// ═══════════════════════════════════════════════════════════════════════════════

fn style_text(value: &Value, unit: Option<&str>) -> Option<String> {
    match value {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::Number(_) => Some(format!("{}{}", value, unit.unwrap_or(""))),
        other => Some(display_value(other)),
    }
}

/// Numbers get `unit` appended; `null`, `false` and `""` clear the property.
pub fn bind_style(
    rt: &Runtime,
    node: &Handle,
    property: &str,
    unit: Option<String>,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let property = property.to_string();
    project(rt, node, signal, move |_, node, value| {
        dom::set_style(node, &property, style_text(value, unit.as_deref()).as_deref())
    })
}

pub fn bind_style_map(
    rt: &Runtime,
    node: &Handle,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    let applied: RefCell<BTreeMap<String, Option<String>>> = RefCell::new(BTreeMap::new());
    project(rt, node, signal, move |_, node, value| {
        let next: BTreeMap<String, Option<String>> = value
            .as_object()
            .map(|map| {
                map.iter()
                    .map(|(property, value)| (property.clone(), style_text(value, None)))
                    .collect()
            })
            .unwrap_or_default();
        let (removed, changed) = diff_applied(&applied, next);
        for property in removed {
            dom::set_style(node, &property, None);
        }
        for (property, text) in changed {
            dom::set_style(node, &property, text.as_deref());
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TEXT & EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

pub fn bind_text(
    rt: &Runtime,
    node: &Handle,
    signal: Signal<Value>,
) -> Result<SubscriptionBinding, RuntimeError> {
    project(rt, node, signal, |_, node, value| {
        dom::set_text_content(node, &display_value(value))
    })
}

/// Keeps a host listener registered while the node is connected.
struct EventSubscription {
    rt: WeakRuntime,
    node: WeakHandle,
    event: String,
    handler: EventHandler,
    listener: Cell<Option<ListenerId>>,
}

impl Subscription for EventSubscription {
    fn activate(&self) {
        if self.is_active() {
            return;
        }
        let (Some(rt), Some(node)) = (self.rt.upgrade(), self.node.upgrade()) else {
            return;
        };
        let handler = self.handler.clone();
        let id = rt.add_event_listener(&node, &self.event, move |event| handler(event));
        self.listener.set(Some(id));
    }

    fn deactivate(&self) {
        let Some(id) = self.listener.take() else {
            return;
        };
        if let (Some(rt), Some(node)) = (self.rt.upgrade(), self.node.upgrade()) {
            rt.remove_event_listener(&node, id);
        }
    }

    fn is_active(&self) -> bool {
        self.listener.get().is_some()
    }
}

pub fn bind_event(
    rt: &Runtime,
    node: &Handle,
    event: &str,
    handler: EventHandler,
) -> Result<SubscriptionBinding, RuntimeError> {
    SubscriptionBinding::bind(
        rt,
        &NodeRef::Node(node.clone()),
        EventSubscription {
            rt: rt.downgrade(),
            node: Rc::downgrade(node),
            event: event.to_string(),
            handler,
            listener: Cell::new(None),
        },
    )
}
