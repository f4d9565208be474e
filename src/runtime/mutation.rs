//! External-mutation inference.
//!
//! Code outside the runtime may rearrange the host tree directly. When told
//! so through [`Runtime::notify_external_mutation`], the runtime compares each
//! tracked node's live position with the one it recorded and synthesizes the
//! lifecycle notifications the move implies. Inference is best-effort: a
//! node moved away and back between two checks goes unnoticed.

use markup5ever_rcdom::Handle;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::Rc;

use super::dom::{self, NodeKey};
use super::lifecycle::{Connectivity, LifecycleEvent, LifecycleKind, NodeObserver};
use super::{NodeRef, Runtime};

#[derive(Default)]
pub(crate) struct MutationBus {
    tracked: RefCell<Vec<NodeObserver>>,
    scheduled: Cell<bool>,
}

impl MutationBus {
    pub(crate) fn forget(&self, observer: &NodeObserver) {
        self.tracked.borrow_mut().retain(|o| !o.ptr_eq(observer));
    }

    pub(crate) fn clear(&self) {
        self.tracked.borrow_mut().clear();
        self.scheduled.set(false);
    }

    fn snapshot(&self) -> Vec<NodeObserver> {
        self.tracked.borrow().clone()
    }
}

/// Live parent and next sibling of `node`.
fn current_position(node: &NodeRef) -> (Option<Handle>, Option<Handle>) {
    match node {
        NodeRef::Node(handle) => (dom::parent_of(handle), dom::next_sibling(handle)),
        NodeRef::Container(container) => {
            if !container.is_live() {
                return (None, None);
            }
            (
                dom::parent_of(&container.start_marker()),
                dom::next_sibling(&container.end_marker()),
            )
        }
    }
}

fn same(a: &Option<Handle>, b: &Option<Handle>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

impl Runtime {
    pub(crate) fn track_position(&self, observer: &NodeObserver, node: &NodeRef) {
        if !self.inner.config.track_external_mutations {
            return;
        }
        let (parent, next) = current_position(node);
        observer.record_position(parent.as_ref(), next.as_ref());
        self.inner.mutations.tracked.borrow_mut().push(observer.clone());
    }

    /// Re-records the positions of tracked nodes inside `node`.
    pub(crate) fn resync_subtree(&self, node: &NodeRef) {
        if !self.inner.config.track_external_mutations {
            return;
        }
        let mut keys: HashSet<NodeKey> = HashSet::from([node.key()]);
        match node {
            NodeRef::Node(handle) => keys.extend(dom::descendants(handle).iter().map(NodeKey::of)),
            NodeRef::Container(container) => {
                for child in container.children() {
                    keys.insert(NodeKey::of(&child));
                    keys.extend(dom::descendants(&child).iter().map(NodeKey::of));
                }
            }
        }
        for observer in self.inner.mutations.snapshot() {
            if !keys.contains(&observer.key()) {
                continue;
            }
            if let Some(target) = observer.target() {
                let (parent, next) = current_position(&target);
                observer.record_position(parent.as_ref(), next.as_ref());
            }
        }
    }

    /// Signals that the host tree was changed outside the runtime.
    ///
    /// Any number of calls before the next microtask drain are handled once.
    pub fn notify_external_mutation(&self) {
        if !self.inner.config.track_external_mutations || self.inner.mutations.scheduled.get() {
            return;
        }
        self.inner.mutations.scheduled.set(true);
        let weak = Rc::downgrade(&self.inner);
        self.queue_microtask(move || {
            if let Some(inner) = weak.upgrade() {
                Runtime { inner }.reconcile_external_mutations();
            }
        });
    }

    fn reconcile_external_mutations(&self) {
        self.inner.mutations.scheduled.set(false);
        for observer in self.inner.mutations.snapshot() {
            if observer.is_destroyed() {
                self.inner.mutations.forget(&observer);
                continue;
            }
            let Some(target) = observer.target() else {
                self.inner.mutations.forget(&observer);
                continue;
            };
            let (expected_parent, expected_next) = observer.expected_position();
            let (parent, next) = current_position(&target);
            if same(&expected_parent, &parent) && same(&expected_next, &next) {
                continue;
            }
            observer.record_position(parent.as_ref(), next.as_ref());
            // Re-derive the recorded state from the tree.
            self.state_of(&target);

            if !same(&expected_parent, &parent) {
                let kind = if parent.is_some() {
                    LifecycleKind::AfterAttach
                } else {
                    LifecycleKind::AfterDetach
                };
                tracing::debug!(node = %target.describe(), ?kind, "external mutation inferred");
                observer.fire(&mut LifecycleEvent::synthetic(kind, target.clone()));
            }

            match (observer.status(), self.is_connected(&target)) {
                (Connectivity::Disconnected, true) => self.notify_connect(&target),
                (Connectivity::Connected, false) => self.notify_disconnect(&target),
                _ => {}
            }
        }
    }
}
