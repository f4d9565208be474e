//! Observable values and activatable subscriptions.

use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

type Observer<T> = Rc<dyn Fn(&T)>;

struct SignalInner<T> {
    value: RefCell<T>,
    observers: RefCell<Vec<(u64, Observer<T>)>>,
    next_id: Cell<u64>,
    /// Keeps a derived signal's source subscription alive.
    upstream: RefCell<Vec<Watch>>,
}

/// A shared observable value.
///
/// Observers run synchronously on every `set`, over a snapshot of the
/// observer list, so they may subscribe or unsubscribe while being notified.
pub struct Signal<T> {
    inner: Rc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Signal {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signal").field(&*self.inner.value.borrow()).finish()
    }
}

impl<T: Clone + 'static> Signal<T> {
    pub fn new(value: T) -> Self {
        Signal {
            inner: Rc::new(SignalInner {
                value: RefCell::new(value),
                observers: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                upstream: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.borrow().clone()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.borrow())
    }

    pub fn set(&self, value: T) {
        *self.inner.value.borrow_mut() = value;
        self.notify();
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.borrow_mut());
        self.notify();
    }

    fn notify(&self) {
        let value = self.get();
        let observers: Vec<Observer<T>> = self
            .inner
            .observers
            .borrow()
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();
        for observer in observers {
            observer(&value);
        }
    }

    /// Registers `observer` for future changes. Dropping the [`Watch`] unsubscribes.
    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Watch {
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);
        self.inner.observers.borrow_mut().push((id, Rc::new(observer)));

        let weak: Weak<SignalInner<T>> = Rc::downgrade(&self.inner);
        Watch::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.observers.borrow_mut().retain(|(other, _)| *other != id);
            }
        })
    }

    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// A signal that follows `self` through `f`.
    pub fn map<U: Clone + 'static>(&self, f: impl Fn(&T) -> U + 'static) -> Signal<U> {
        let derived = Signal::new(f(&self.get()));
        let target = Rc::downgrade(&derived.inner);
        let watch = self.subscribe(move |value| {
            if let Some(inner) = target.upgrade() {
                Signal { inner }.set(f(value));
            }
        });
        derived.inner.upstream.borrow_mut().push(watch);
        derived
    }

    pub fn ptr_eq(&self, other: &Signal<T>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T: Clone + PartialEq + 'static> Signal<T> {
    /// Sets and notifies only when the value differs. Returns whether it did.
    pub fn set_if_changed(&self, value: T) -> bool {
        if *self.inner.value.borrow() == value {
            return false;
        }
        self.set(value);
        true
    }
}

/// Subscription handle; unsubscribes when dropped.
#[must_use = "dropping a Watch unsubscribes immediately"]
pub struct Watch {
    cancel: Option<Box<dyn FnOnce()>>,
}

impl Watch {
    pub(crate) fn new(cancel: impl FnOnce() + 'static) -> Self {
        Watch {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }

    /// Keeps the subscription for the lifetime of the signal.
    pub fn forget(mut self) {
        self.cancel = None;
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SUBSCRIPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Something that can be switched on and off, such as a projector feeding a node.
pub trait Subscription {
    fn activate(&self);
    fn deactivate(&self);
    fn is_active(&self) -> bool;
}

/// Feeds a signal's value into a callback while active.
///
/// Activation pushes the current value immediately.
pub struct SignalSubscription<T> {
    signal: Signal<T>,
    callback: Rc<dyn Fn(&T)>,
    watch: RefCell<Option<Watch>>,
}

impl<T: Clone + 'static> SignalSubscription<T> {
    pub fn new(signal: Signal<T>, callback: impl Fn(&T) + 'static) -> Self {
        SignalSubscription {
            signal,
            callback: Rc::new(callback),
            watch: RefCell::new(None),
        }
    }
}

impl<T: Clone + 'static> Subscription for SignalSubscription<T> {
    fn activate(&self) {
        if self.is_active() {
            return;
        }
        let callback = self.callback.clone();
        let watch = self.signal.subscribe(move |value| callback(value));
        *self.watch.borrow_mut() = Some(watch);
        // No borrow is held while the callback runs, so it may write back.
        let value = self.signal.get();
        (self.callback)(&value);
    }

    fn deactivate(&self) {
        let watch = self.watch.borrow_mut().take();
        drop(watch);
    }

    fn is_active(&self) -> bool {
        self.watch.borrow().is_some()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Truthiness of a bound value: `null`, `false`, `0`, `NaN` and `""` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form of a bound value, as written into text nodes and attributes.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
