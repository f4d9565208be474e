//! Lifecycle state machine and observers.
//!
//! Every node and container moves through
//! `Detached -> Attaching -> Attached -> Detaching -> Detached` and ends in
//! `Destroying -> Destroyed`. Untracked nodes derive their state from their
//! parent link. A tracked state that disagrees with the tree is logged and
//! re-derived.
//!
//! Connect notifications walk the subtree in pre-order. Disconnect and
//! destroy notifications walk it in post-order.

use markup5ever_rcdom::{Handle, WeakHandle};
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::dom::{self, NodeKey};
use super::{NodeRef, Runtime, RuntimeError, WeakNodeRef};

// ═══════════════════════════════════════════════════════════════════════════════
// STATES & EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DomState {
    Detached,
    Attaching,
    Attached,
    Detaching,
    Destroying,
    Destroyed,
}

impl DomState {
    fn is_transient(self) -> bool {
        matches!(
            self,
            DomState::Attaching | DomState::Detaching | DomState::Destroying
        )
    }
}

impl fmt::Display for DomState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DomState::Detached => "detached",
            DomState::Attaching => "attaching",
            DomState::Attached => "attached",
            DomState::Detaching => "detaching",
            DomState::Destroying => "destroying",
            DomState::Destroyed => "destroyed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleKind {
    BeforeAttach,
    AfterAttach,
    BeforeDetach,
    AfterDetach,
    Connect,
    Disconnect,
    Destroy,
}

impl LifecycleKind {
    pub fn is_cancelable(self) -> bool {
        matches!(
            self,
            LifecycleKind::BeforeAttach
                | LifecycleKind::AfterAttach
                | LifecycleKind::BeforeDetach
                | LifecycleKind::AfterDetach
        )
    }
}

/// Whether an observed node currently reaches the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Connected,
    Disconnected,
    Destroyed,
}

pub struct LifecycleEvent {
    pub kind: LifecycleKind,
    pub target: NodeRef,
    /// Raised by external-mutation inference rather than a lifecycle call.
    pub synthetic: bool,
    canceled: bool,
}

impl LifecycleEvent {
    pub(crate) fn new(kind: LifecycleKind, target: NodeRef) -> Self {
        LifecycleEvent {
            kind,
            target,
            synthetic: false,
            canceled: false,
        }
    }

    pub(crate) fn synthetic(kind: LifecycleKind, target: NodeRef) -> Self {
        LifecycleEvent {
            synthetic: true,
            ..Self::new(kind, target)
        }
    }

    /// Cancels an attach or detach event.
    ///
    /// A canceled before-event aborts the operation. A canceled after-event
    /// only keeps the remaining listeners from running. Ignored for
    /// connect, disconnect and destroy.
    pub fn cancel(&mut self) {
        if self.kind.is_cancelable() {
            self.canceled = true;
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled
    }
}

impl fmt::Debug for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleEvent")
            .field("kind", &self.kind)
            .field("target", &self.target)
            .field("synthetic", &self.synthetic)
            .field("canceled", &self.canceled)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

// ═══════════════════════════════════════════════════════════════════════════════
// OBSERVERS
// ═══════════════════════════════════════════════════════════════════════════════

type Hook = Rc<dyn Fn(&mut LifecycleEvent)>;

struct ObserverInner {
    key: NodeKey,
    target: WeakNodeRef,
    status: Cell<Connectivity>,
    hooks: RefCell<Vec<(ListenerId, LifecycleKind, Hook)>>,
    next_id: Cell<u64>,
    /// Last known parent and next sibling, for external-mutation inference.
    expected_parent: RefCell<Option<WeakHandle>>,
    expected_next: RefCell<Option<WeakHandle>>,
}

/// Lifecycle listener registry of one node.
///
/// Holds its node weakly. Once the node is destroyed the observer is inert.
#[derive(Clone)]
pub struct NodeObserver {
    inner: Rc<ObserverInner>,
}

impl NodeObserver {
    fn new(key: NodeKey, target: WeakNodeRef, status: Connectivity) -> Self {
        NodeObserver {
            inner: Rc::new(ObserverInner {
                key,
                target,
                status: Cell::new(status),
                hooks: RefCell::new(Vec::new()),
                next_id: Cell::new(0),
                expected_parent: RefCell::new(None),
                expected_next: RefCell::new(None),
            }),
        }
    }

    pub fn on(&self, kind: LifecycleKind, hook: impl Fn(&mut LifecycleEvent) + 'static) -> ListenerId {
        let id = ListenerId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);
        if self.is_destroyed() {
            return id;
        }
        self.inner.hooks.borrow_mut().push((id, kind, Rc::new(hook)));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        let mut hooks = self.inner.hooks.borrow_mut();
        let before = hooks.len();
        hooks.retain(|(other, _, _)| *other != id);
        hooks.len() != before
    }

    pub fn status(&self) -> Connectivity {
        self.inner.status.get()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == Connectivity::Connected
    }

    pub fn is_destroyed(&self) -> bool {
        self.status() == Connectivity::Destroyed
    }

    pub fn target(&self) -> Option<NodeRef> {
        self.inner.target.upgrade()
    }

    pub fn key(&self) -> NodeKey {
        self.inner.key
    }

    pub fn ptr_eq(&self, other: &NodeObserver) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn set_status(&self, status: Connectivity) {
        if !self.is_destroyed() {
            self.inner.status.set(status);
        }
    }

    pub(crate) fn mark_destroyed(&self) {
        self.inner.status.set(Connectivity::Destroyed);
        self.inner.hooks.borrow_mut().clear();
    }

    /// Runs matching hooks over a snapshot, stopping once the event is canceled.
    pub(crate) fn fire(&self, event: &mut LifecycleEvent) {
        let hooks: Vec<Hook> = self
            .inner
            .hooks
            .borrow()
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind)
            .map(|(_, _, hook)| hook.clone())
            .collect();
        for hook in hooks {
            hook(event);
            if event.is_canceled() {
                break;
            }
        }
    }

    pub(crate) fn expected_position(&self) -> (Option<Handle>, Option<Handle>) {
        let parent = self
            .inner
            .expected_parent
            .borrow()
            .as_ref()
            .and_then(|w| w.upgrade());
        let next = self
            .inner
            .expected_next
            .borrow()
            .as_ref()
            .and_then(|w| w.upgrade());
        (parent, next)
    }

    pub(crate) fn record_position(&self, parent: Option<&Handle>, next: Option<&Handle>) {
        *self.inner.expected_parent.borrow_mut() = parent.map(Rc::downgrade);
        *self.inner.expected_next.borrow_mut() = next.map(Rc::downgrade);
    }
}

impl fmt::Debug for NodeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeObserver")
            .field("key", &self.inner.key)
            .field("status", &self.status())
            .field("hooks", &self.inner.hooks.borrow().len())
            .finish()
    }
}

pub(crate) struct NodeEntry {
    node: WeakHandle,
    pub(crate) state: DomState,
    pub(crate) observers: Vec<NodeObserver>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIFECYCLE OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

impl Runtime {
    fn derived_state(node: &NodeRef) -> DomState {
        if node.has_parent() {
            DomState::Attached
        } else {
            DomState::Detached
        }
    }

    /// Current lifecycle state of `node`.
    pub fn state_of(&self, node: &NodeRef) -> DomState {
        let key_handle = node.key_handle();
        if Rc::ptr_eq(&key_handle, &self.inner.document) {
            return DomState::Attached;
        }
        let key = NodeKey::of(&key_handle);
        let tracked = {
            let nodes = self.inner.nodes.borrow();
            nodes
                .get(&key)
                .filter(|entry| entry.node.upgrade().is_some_and(|n| Rc::ptr_eq(&n, &key_handle)))
                .map(|entry| entry.state)
        };
        let Some(state) = tracked else {
            return Self::derived_state(node);
        };
        if state.is_transient() || state == DomState::Destroyed {
            return state;
        }
        let derived = Self::derived_state(node);
        if derived != state {
            tracing::warn!(
                node = %node.describe(),
                recorded = %state,
                actual = %derived,
                "lifecycle state disagrees with the tree, re-deriving"
            );
            self.set_state(node, derived);
        }
        derived
    }

    pub(crate) fn set_state(&self, node: &NodeRef, state: DomState) {
        let key_handle = node.key_handle();
        let key = NodeKey::of(&key_handle);
        let mut nodes = self.inner.nodes.borrow_mut();
        let entry = nodes.entry(key).or_insert_with(|| NodeEntry {
            node: Rc::downgrade(&key_handle),
            state,
            observers: Vec::new(),
        });
        if !entry.node.upgrade().is_some_and(|n| Rc::ptr_eq(&n, &key_handle)) {
            // Stale entry left by a freed node at the same address.
            *entry = NodeEntry {
                node: Rc::downgrade(&key_handle),
                state,
                observers: Vec::new(),
            };
        }
        entry.state = state;
    }

    /// Whether `node` currently reaches the document.
    pub fn is_connected(&self, node: &NodeRef) -> bool {
        let Some(first) = node.first_host() else {
            return false;
        };
        Rc::ptr_eq(&dom::root_of(&first), &self.inner.document)
    }

    /// Returns the observer of `node`, creating it on first use.
    pub fn observe(&self, node: &NodeRef) -> Result<NodeObserver, RuntimeError> {
        self.ensure_live()?;
        let state = self.state_of(node);
        let status = if state == DomState::Destroyed {
            Connectivity::Destroyed
        } else if self.is_connected(node) {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        };
        let observer = NodeObserver::new(node.key(), node.downgrade(), status);
        if status == Connectivity::Destroyed {
            observer.mark_destroyed();
            return Ok(observer);
        }
        self.set_state(node, state);
        {
            let mut nodes = self.inner.nodes.borrow_mut();
            let Some(entry) = nodes.get_mut(&node.key()) else {
                return Ok(observer);
            };
            if let Some(existing) = entry.observers.first() {
                return Ok(existing.clone());
            }
            entry.observers.push(observer.clone());
        }
        self.track_position(&observer, node);
        Ok(observer)
    }

    fn observers_of(&self, key: NodeKey) -> Vec<NodeObserver> {
        self.inner
            .nodes
            .borrow()
            .get(&key)
            .map(|entry| entry.observers.clone())
            .unwrap_or_default()
    }

    fn fire(&self, node: &NodeRef, event: &mut LifecycleEvent) {
        for observer in self.observers_of(node.key()) {
            observer.fire(event);
            if event.is_canceled() {
                break;
            }
        }
    }

    /// Key handles of `node` and everything inside it, in pre-order.
    ///
    /// Nested containers show up through their start markers.
    fn subtree(&self, node: &NodeRef) -> Vec<Handle> {
        let mut out = vec![node.key_handle()];
        match node {
            NodeRef::Node(handle) => out.extend(dom::descendants(handle)),
            NodeRef::Container(container) => {
                for child in container.children() {
                    let nested = dom::descendants(&child);
                    out.push(child);
                    out.extend(nested);
                }
            }
        }
        out
    }

    fn subtree_observers(&self, node: &NodeRef) -> Vec<NodeObserver> {
        let nodes = self.inner.nodes.borrow();
        self.subtree(node)
            .iter()
            .filter_map(|handle| nodes.get(&NodeKey::of(handle)))
            .flat_map(|entry| entry.observers.iter().cloned())
            .collect()
    }

    pub(crate) fn notify_connect(&self, node: &NodeRef) {
        for observer in self.subtree_observers(node) {
            if observer.status() != Connectivity::Disconnected {
                continue;
            }
            observer.set_status(Connectivity::Connected);
            if let Some(target) = observer.target() {
                observer.fire(&mut LifecycleEvent::new(LifecycleKind::Connect, target));
            }
        }
    }

    pub(crate) fn notify_disconnect(&self, node: &NodeRef) {
        for observer in self.subtree_observers(node).into_iter().rev() {
            if observer.status() != Connectivity::Connected {
                continue;
            }
            observer.set_status(Connectivity::Disconnected);
            if let Some(target) = observer.target() {
                observer.fire(&mut LifecycleEvent::new(LifecycleKind::Disconnect, target));
            }
        }
    }

    fn insertion_point(
        &self,
        parent: &NodeRef,
        before: Option<&NodeRef>,
    ) -> Result<(Handle, Option<Handle>), RuntimeError> {
        let reference = match before {
            Some(before) => Some(before.first_host().ok_or_else(|| RuntimeError::NotAChild {
                node: before.describe(),
                parent: parent.describe(),
            })?),
            None => None,
        };
        match parent {
            NodeRef::Node(handle) => Ok((handle.clone(), reference)),
            NodeRef::Container(container) => container.insertion_point(reference),
        }
    }

    fn insert_structural(
        &self,
        node: &NodeRef,
        parent: &NodeRef,
        before: Option<&NodeRef>,
    ) -> Result<(), RuntimeError> {
        let (host, reference) = self.insertion_point(parent, before)?;
        match node {
            NodeRef::Node(handle) => dom::insert_before(&host, handle, reference.as_ref()),
            NodeRef::Container(container) => container.mount(&host, reference.as_ref()),
        }
    }

    fn remove_structural(&self, node: &NodeRef) {
        match node {
            NodeRef::Node(handle) => {
                dom::remove(handle);
            }
            NodeRef::Container(container) => container.unmount(),
        }
    }

    /// Inserts a detached `node` into `parent`, before `before` or last.
    ///
    /// Observers may cancel through `BeforeAttach`, leaving the node detached.
    pub fn attach(
        &self,
        node: &NodeRef,
        parent: &NodeRef,
        before: Option<&NodeRef>,
    ) -> Result<NodeRef, RuntimeError> {
        self.ensure_live()?;
        let state = self.state_of(node);
        if state != DomState::Detached {
            return Err(RuntimeError::InvalidState {
                operation: "attach",
                node: node.describe(),
                expected: DomState::Detached,
                actual: state,
            });
        }
        let parent_state = self.state_of(parent);
        if matches!(parent_state, DomState::Destroying | DomState::Destroyed) {
            return Err(RuntimeError::ParentUnavailable {
                operation: "attach",
                parent: parent.describe(),
                state: parent_state,
            });
        }

        self.set_state(node, DomState::Attaching);
        let mut before_event = LifecycleEvent::new(LifecycleKind::BeforeAttach, node.clone());
        self.fire(node, &mut before_event);
        if before_event.is_canceled() {
            tracing::debug!(node = %node.describe(), "attach canceled");
            self.set_state(node, DomState::Detached);
            return Ok(node.clone());
        }

        if let Err(err) = self.insert_structural(node, parent, before) {
            self.set_state(node, DomState::Detached);
            return Err(err);
        }
        self.set_state(node, DomState::Attached);
        self.fire(node, &mut LifecycleEvent::new(LifecycleKind::AfterAttach, node.clone()));
        if self.is_connected(node) {
            self.notify_connect(node);
        }
        self.resync_subtree(node);
        tracing::trace!(node = %node.describe(), parent = %parent.describe(), "attached");
        Ok(node.clone())
    }

    /// Removes an attached `node` from its parent.
    ///
    /// Observers may cancel through `BeforeDetach`, leaving the node attached.
    pub fn detach(&self, node: &NodeRef) -> Result<NodeRef, RuntimeError> {
        self.ensure_live()?;
        let state = self.state_of(node);
        if state != DomState::Attached {
            return Err(RuntimeError::InvalidState {
                operation: "detach",
                node: node.describe(),
                expected: DomState::Attached,
                actual: state,
            });
        }

        self.set_state(node, DomState::Detaching);
        let mut before_event = LifecycleEvent::new(LifecycleKind::BeforeDetach, node.clone());
        self.fire(node, &mut before_event);
        if before_event.is_canceled() {
            tracing::debug!(node = %node.describe(), "detach canceled");
            self.set_state(node, DomState::Attached);
            return Ok(node.clone());
        }

        let was_connected = self.is_connected(node);
        self.remove_structural(node);
        self.set_state(node, DomState::Detached);
        self.fire(node, &mut LifecycleEvent::new(LifecycleKind::AfterDetach, node.clone()));
        if was_connected {
            self.notify_disconnect(node);
        }
        self.resync_subtree(node);
        tracing::trace!(node = %node.describe(), "detached");
        Ok(node.clone())
    }

    /// Destroys a detached `node` and its whole subtree.
    ///
    /// Observers receive `Destroy` in post-order and then become inert.
    pub fn destroy(&self, node: &NodeRef) -> Result<(), RuntimeError> {
        self.ensure_live()?;
        let state = self.state_of(node);
        if state != DomState::Detached {
            return Err(RuntimeError::InvalidState {
                operation: "destroy",
                node: node.describe(),
                expected: DomState::Detached,
                actual: state,
            });
        }

        self.set_state(node, DomState::Destroying);
        for observer in self.subtree_observers(node).into_iter().rev() {
            if observer.is_destroyed() {
                continue;
            }
            if let Some(target) = observer.target() {
                observer.fire(&mut LifecycleEvent::new(LifecycleKind::Destroy, target));
            }
            observer.mark_destroyed();
            self.inner.mutations.forget(&observer);
        }

        for handle in self.subtree(node) {
            let key = NodeKey::of(&handle);
            {
                let mut nodes = self.inner.nodes.borrow_mut();
                let entry = nodes.entry(key).or_insert_with(|| NodeEntry {
                    node: Rc::downgrade(&handle),
                    state: DomState::Destroyed,
                    observers: Vec::new(),
                });
                entry.node = Rc::downgrade(&handle);
                entry.state = DomState::Destroyed;
                entry.observers.clear();
            }
            self.drop_extras(key);
        }
        self.prune_entries();
        tracing::trace!(node = %node.describe(), "destroyed");
        Ok(())
    }

    /// Drops entries whose node has been freed.
    fn prune_entries(&self) {
        self.inner
            .nodes
            .borrow_mut()
            .retain(|_, entry| entry.node.upgrade().is_some());
    }

    pub fn tracked_nodes(&self) -> usize {
        self.inner.nodes.borrow().len()
    }

    /// Whether `node` already sits in `parent`, right before `before` or last.
    fn is_placed(&self, node: &NodeRef, parent: &NodeRef, before: Option<&NodeRef>) -> bool {
        let Some(first) = node.first_host() else {
            return false;
        };
        let Ok((host, reference)) = self.insertion_point(parent, before) else {
            return false;
        };
        if !dom::parent_of(&first).is_some_and(|p| Rc::ptr_eq(&p, &host)) {
            return false;
        }
        let last = match node {
            NodeRef::Node(handle) => handle.clone(),
            NodeRef::Container(container) => container.end_marker(),
        };
        match (dom::next_sibling(&last), reference) {
            (None, None) => true,
            (Some(next), Some(reference)) => Rc::ptr_eq(&next, &reference),
            _ => false,
        }
    }

    /// Attaches `node` at the requested position, detaching it first when it
    /// is attached elsewhere. Destroyed nodes are left alone.
    pub fn attach_safe(
        &self,
        node: &NodeRef,
        parent: &NodeRef,
        before: Option<&NodeRef>,
    ) -> Result<NodeRef, RuntimeError> {
        match self.state_of(node) {
            DomState::Detached => self.attach(node, parent, before),
            DomState::Attached if self.is_placed(node, parent, before) => Ok(node.clone()),
            DomState::Attached => {
                self.detach(node)?;
                // A canceled detach leaves the node where it was.
                if self.state_of(node) != DomState::Detached {
                    return Ok(node.clone());
                }
                self.attach(node, parent, before)
            }
            _ => Ok(node.clone()),
        }
    }

    /// Detaches unless already detached or destroyed.
    pub fn detach_safe(&self, node: &NodeRef) -> Result<NodeRef, RuntimeError> {
        match self.state_of(node) {
            DomState::Attached => self.detach(node),
            _ => Ok(node.clone()),
        }
    }

    /// Detaches if needed, then destroys. Already destroyed nodes are left alone.
    pub fn destroy_safe(&self, node: &NodeRef) -> Result<(), RuntimeError> {
        match self.state_of(node) {
            DomState::Destroyed | DomState::Destroying => Ok(()),
            DomState::Attached => {
                self.detach(node)?;
                // A canceled detach leaves the node in place.
                if self.state_of(node) == DomState::Detached {
                    self.destroy(node)
                } else {
                    Ok(())
                }
            }
            _ => self.destroy(node),
        }
    }

    /// Moves an attached node without lifecycle notifications, so its
    /// subscriptions survive the move.
    pub fn move_before(
        &self,
        node: &NodeRef,
        parent: &NodeRef,
        before: Option<&NodeRef>,
    ) -> Result<(), RuntimeError> {
        self.ensure_live()?;
        let state = self.state_of(node);
        if state != DomState::Attached {
            return Err(RuntimeError::InvalidState {
                operation: "move",
                node: node.describe(),
                expected: DomState::Attached,
                actual: state,
            });
        }
        let was_connected = self.is_connected(node);
        let (host, reference) = self.insertion_point(parent, before)?;
        match node {
            NodeRef::Node(handle) => dom::insert_before(&host, handle, reference.as_ref())?,
            NodeRef::Container(container) => container.relocate(&host, reference.as_ref())?,
        }
        match (was_connected, self.is_connected(node)) {
            (false, true) => self.notify_connect(node),
            (true, false) => self.notify_disconnect(node),
            _ => {}
        }
        self.resync_subtree(node);
        Ok(())
    }
}
