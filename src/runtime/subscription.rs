//! Subscriptions bound to a node's lifecycle.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use super::lifecycle::LifecycleKind;
use super::reactive::Subscription;
use super::{NodeRef, Runtime, RuntimeError};

struct BindingInner {
    subscription: Box<dyn Subscription>,
    destroyed: Cell<bool>,
}

/// Keeps a subscription active exactly while its host node is connected.
///
/// The binding lives as long as the host's observer. Once the host is
/// destroyed the subscription is deactivated for good.
#[derive(Clone)]
pub struct SubscriptionBinding {
    inner: Rc<BindingInner>,
}

impl SubscriptionBinding {
    pub fn bind(
        rt: &Runtime,
        host: &NodeRef,
        subscription: impl Subscription + 'static,
    ) -> Result<Self, RuntimeError> {
        let observer = rt.observe(host)?;
        if observer.is_destroyed() {
            return Err(RuntimeError::SubscriptionDestroyed);
        }
        let binding = SubscriptionBinding {
            inner: Rc::new(BindingInner {
                subscription: Box::new(subscription),
                destroyed: Cell::new(false),
            }),
        };

        let on_connect = binding.inner.clone();
        observer.on(LifecycleKind::Connect, move |_| {
            if !on_connect.destroyed.get() {
                on_connect.subscription.activate();
            }
        });
        let on_disconnect = binding.inner.clone();
        observer.on(LifecycleKind::Disconnect, move |_| {
            on_disconnect.subscription.deactivate();
        });
        let on_destroy = binding.inner.clone();
        observer.on(LifecycleKind::Destroy, move |_| {
            on_destroy.destroyed.set(true);
            on_destroy.subscription.deactivate();
        });

        if observer.is_connected() {
            binding.inner.subscription.activate();
        }
        Ok(binding)
    }

    pub fn activate(&self) -> Result<(), RuntimeError> {
        if self.is_destroyed() {
            return Err(RuntimeError::SubscriptionDestroyed);
        }
        self.inner.subscription.activate();
        Ok(())
    }

    pub fn deactivate(&self) {
        self.inner.subscription.deactivate();
    }

    pub fn is_active(&self) -> bool {
        self.inner.subscription.is_active()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }
}

impl fmt::Debug for SubscriptionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionBinding")
            .field("active", &self.is_active())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
