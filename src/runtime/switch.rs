//! Multi-way structural switch.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::conditional::NodeFactory;
use super::container::Container;
use super::lifecycle::{DomState, LifecycleKind};
use super::reactive::{Signal, SignalSubscription};
use super::subscription::SubscriptionBinding;
use super::{NodeRef, Runtime, RuntimeError, WeakRuntime};

struct SwitchInner {
    rt: WeakRuntime,
    container: Container,
    cases: Vec<(Value, NodeFactory)>,
    default: Option<NodeFactory>,
    /// Built arms by index; the default arm uses `cases.len()`.
    built: RefCell<HashMap<usize, NodeRef>>,
    active: Cell<Option<usize>>,
}

/// Shows the first arm whose case value equals the switch value, or the
/// default arm. Arms are built on first use and kept while hidden.
#[derive(Clone)]
pub struct SwitchNode {
    inner: Rc<SwitchInner>,
}

fn case_matches(case: &Value, value: &Value) -> bool {
    match (case, value) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => case == value,
    }
}

impl SwitchNode {
    pub fn new(
        rt: &Runtime,
        value: Signal<Value>,
        cases: Vec<(Value, NodeFactory)>,
        default: Option<NodeFactory>,
    ) -> Result<Self, RuntimeError> {
        let container = Container::new();
        let node = SwitchNode {
            inner: Rc::new(SwitchInner {
                rt: rt.downgrade(),
                container: container.clone(),
                cases,
                default,
                built: RefCell::new(HashMap::new()),
                active: Cell::new(None),
            }),
        };

        let host = NodeRef::Container(container);
        let on_destroy = node.inner.clone();
        rt.observe(&host)?
            .on(LifecycleKind::Destroy, move |_| on_destroy.release());

        let target = node.inner.clone();
        SubscriptionBinding::bind(
            rt,
            &host,
            SignalSubscription::new(value, move |value: &Value| {
                if let Err(err) = target.select(value) {
                    tracing::error!(error = %err, "switch update failed");
                }
            }),
        )?;
        Ok(node)
    }

    pub fn node(&self) -> NodeRef {
        NodeRef::Container(self.inner.container.clone())
    }

    pub fn container(&self) -> Container {
        self.inner.container.clone()
    }

    /// Index of the shown arm; the default arm reports `None` from `active_case`.
    pub fn active_case(&self) -> Option<usize> {
        self.inner
            .active
            .get()
            .filter(|&arm| arm < self.inner.cases.len())
    }

    pub fn shows_default(&self) -> bool {
        self.inner.active.get() == Some(self.inner.cases.len())
    }
}

impl SwitchInner {
    fn arm_for(&self, value: &Value) -> Option<usize> {
        self.cases
            .iter()
            .position(|(case, _)| case_matches(case, value))
            .or_else(|| self.default.as_ref().map(|_| self.cases.len()))
    }

    fn factory(&self, arm: usize) -> Option<&NodeFactory> {
        self.cases
            .get(arm)
            .map(|(_, factory)| factory)
            .or(self.default.as_ref())
    }

    fn select(&self, value: &Value) -> Result<(), RuntimeError> {
        let Some(rt) = self.rt.upgrade() else {
            return Ok(());
        };
        let arm = self.arm_for(value);
        if arm == self.active.get() {
            return Ok(());
        }
        if let Some(previous) = self.active.take() {
            let shown = self.built.borrow().get(&previous).cloned();
            if let Some(node) = shown {
                rt.detach_safe(&node)?;
            }
        }
        let Some(arm) = arm else {
            return Ok(());
        };

        let cached = self
            .built
            .borrow()
            .get(&arm)
            .cloned()
            .filter(|node| rt.state_of(node) != DomState::Destroyed);
        let node = match cached {
            Some(node) => node,
            None => {
                let Some(factory) = self.factory(arm) else {
                    return Ok(());
                };
                let node = factory()?;
                self.built.borrow_mut().insert(arm, node.clone());
                node
            }
        };
        rt.attach_safe(&node, &NodeRef::Container(self.container.clone()), None)?;
        self.active.set(Some(arm));
        Ok(())
    }

    fn release(&self) {
        let Some(rt) = self.rt.upgrade() else {
            return;
        };
        let built: Vec<NodeRef> = self.built.borrow_mut().drain().map(|(_, node)| node).collect();
        for node in built {
            if rt.state_of(&node) == DomState::Detached {
                if let Err(err) = rt.destroy(&node) {
                    tracing::warn!(error = %err, "failed to destroy hidden switch arm");
                }
            }
        }
    }
}

impl fmt::Debug for SwitchNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchNode")
            .field("cases", &self.inner.cases.len())
            .field("has_default", &self.inner.default.is_some())
            .field("active", &self.inner.active.get())
            .finish()
    }
}
