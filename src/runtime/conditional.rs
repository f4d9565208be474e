//! Conditional rendering.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::container::Container;
use super::lifecycle::{DomState, LifecycleKind};
use super::reactive::{is_truthy, Signal, SignalSubscription};
use super::scheduler::TimerId;
use super::subscription::SubscriptionBinding;
use super::{NodeRef, Runtime, RuntimeError, WeakRuntime};

/// Builds the node a structural directive renders.
pub type NodeFactory = Rc<dyn Fn() -> Result<NodeRef, RuntimeError>>;

struct ConditionalInner {
    rt: WeakRuntime,
    container: Container,
    factory: NodeFactory,
    child: RefCell<Option<NodeRef>>,
    grace: Option<Duration>,
    timer: Cell<Option<TimerId>>,
    visible: Cell<bool>,
}

/// Shows its child while the condition is truthy.
///
/// The child is built on first show and reused afterwards. A hidden child is
/// destroyed after the configured grace delay, or kept until the conditional
/// itself is destroyed when there is none.
#[derive(Clone)]
pub struct ConditionalNode {
    inner: Rc<ConditionalInner>,
}

impl ConditionalNode {
    pub fn new(
        rt: &Runtime,
        condition: Signal<Value>,
        factory: impl Fn() -> Result<NodeRef, RuntimeError> + 'static,
    ) -> Result<Self, RuntimeError> {
        let container = Container::new();
        let node = ConditionalNode {
            inner: Rc::new(ConditionalInner {
                rt: rt.downgrade(),
                container: container.clone(),
                factory: Rc::new(factory),
                child: RefCell::new(None),
                grace: rt.config().conditional_grace_ms.map(Duration::from_millis),
                timer: Cell::new(None),
                visible: Cell::new(false),
            }),
        };

        let host = NodeRef::Container(container);
        let observer = rt.observe(&host)?;
        let on_destroy = node.inner.clone();
        observer.on(LifecycleKind::Destroy, move |_| on_destroy.release());

        let target = node.inner.clone();
        SubscriptionBinding::bind(
            rt,
            &host,
            SignalSubscription::new(condition, move |value: &Value| {
                if let Err(err) = target.apply(is_truthy(value)) {
                    tracing::error!(error = %err, "conditional update failed");
                }
            }),
        )?;
        Ok(node)
    }

    pub fn container(&self) -> Container {
        self.inner.container.clone()
    }

    pub fn node(&self) -> NodeRef {
        NodeRef::Container(self.inner.container.clone())
    }

    pub fn is_visible(&self) -> bool {
        self.inner.visible.get()
    }

    /// The cached child, shown or not.
    pub fn child(&self) -> Option<NodeRef> {
        self.inner.child.borrow().clone()
    }
}

impl ConditionalInner {
    fn apply(self: &Rc<Self>, visible: bool) -> Result<(), RuntimeError> {
        let Some(rt) = self.rt.upgrade() else {
            return Ok(());
        };
        self.visible.set(visible);
        if visible {
            self.show(&rt)
        } else {
            self.hide(&rt)
        }
    }

    fn show(&self, rt: &Runtime) -> Result<(), RuntimeError> {
        if let Some(timer) = self.timer.take() {
            rt.clear_timeout(timer);
        }
        let cached = self
            .child
            .borrow()
            .clone()
            .filter(|child| rt.state_of(child) != DomState::Destroyed);
        let child = match cached {
            Some(child) => child,
            None => {
                let child = (self.factory)()?;
                *self.child.borrow_mut() = Some(child.clone());
                child
            }
        };
        let parent = NodeRef::Container(self.container.clone());
        rt.attach_safe(&child, &parent, None)?;
        Ok(())
    }

    fn hide(self: &Rc<Self>, rt: &Runtime) -> Result<(), RuntimeError> {
        let Some(child) = self.child.borrow().clone() else {
            return Ok(());
        };
        rt.detach_safe(&child)?;
        match self.grace {
            None => {}
            Some(delay) if delay.is_zero() => self.discard(rt)?,
            Some(delay) => {
                if let Some(timer) = self.timer.take() {
                    rt.clear_timeout(timer);
                }
                let weak = Rc::downgrade(self);
                let timer = rt.set_timeout(delay, move || {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    inner.timer.set(None);
                    let Some(rt) = inner.rt.upgrade() else {
                        return;
                    };
                    if inner.visible.get() {
                        return;
                    }
                    if let Err(err) = inner.discard(&rt) {
                        tracing::warn!(error = %err, "grace destroy failed");
                    }
                });
                self.timer.set(Some(timer));
            }
        }
        Ok(())
    }

    /// Destroys the cached child if it is hidden.
    fn discard(&self, rt: &Runtime) -> Result<(), RuntimeError> {
        let Some(child) = self.child.borrow_mut().take() else {
            return Ok(());
        };
        if rt.state_of(&child) == DomState::Detached {
            rt.destroy(&child)?;
        }
        Ok(())
    }

    fn release(&self) {
        let Some(rt) = self.rt.upgrade() else {
            return;
        };
        if let Some(timer) = self.timer.take() {
            rt.clear_timeout(timer);
        }
        if let Err(err) = self.discard(&rt) {
            tracing::warn!(error = %err, "failed to destroy hidden conditional child");
        }
    }
}

impl fmt::Debug for ConditionalNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionalNode")
            .field("visible", &self.is_visible())
            .field("has_child", &self.inner.child.borrow().is_some())
            .finish()
    }
}
