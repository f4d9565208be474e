//! Keyed list reconciliation.
//!
//! Items are matched to existing entries by value identity (the canonical
//! JSON text of the item). Duplicates are handed out first-in,
//! first-assigned. After matching, entries on the longest run that kept its
//! relative order stay put and only the rest are moved.

use serde::Serialize;
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use super::container::Container;
use super::lifecycle::{DomState, LifecycleKind};
use super::reactive::{Signal, SignalSubscription};
use super::subscription::SubscriptionBinding;
use super::{NodeRef, Runtime, RuntimeError, WeakRuntime};

/// Builds the node for one item, given the item and its index cursor.
pub type ItemFactory = Rc<dyn Fn(Value, Signal<usize>) -> Result<NodeRef, RuntimeError>>;

/// What the last reconciliation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileStats {
    pub created: usize,
    pub reused: usize,
    pub destroyed: usize,
    pub moved: usize,
}

struct Entry {
    key: String,
    node: NodeRef,
    index: Signal<usize>,
    /// Left over from an earlier pass because its teardown was canceled.
    /// Its place in the list says nothing about its place in the tree.
    lingering: bool,
}

struct ForLoopInner {
    rt: WeakRuntime,
    container: Container,
    factory: ItemFactory,
    entries: RefCell<Vec<Entry>>,
    stats: Cell<ReconcileStats>,
}

#[derive(Clone)]
pub struct ForLoopNode {
    inner: Rc<ForLoopInner>,
}

/// Identity of an item for matching purposes.
pub fn value_key(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Items an iterable value stands for.
///
/// A number `n` stands for `0..n`. Anything else that is not an array is empty.
pub fn iterable_items(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items.clone(),
        Value::Number(n) => {
            let count = n.as_u64().unwrap_or_else(|| n.as_f64().map_or(0, |f| f.max(0.0) as u64));
            (0..count).map(Value::from).collect()
        }
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(value = %other, "for-loop iterable is not a list, rendering nothing");
            Vec::new()
        }
    }
}

/// Positions (into `sequence`) of one longest strictly increasing subsequence.
fn longest_increasing_run(sequence: &[usize]) -> Vec<usize> {
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; sequence.len()];
    for (i, &value) in sequence.iter().enumerate() {
        let slot = tails.partition_point(|&t| sequence[t] < value);
        if slot > 0 {
            previous[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }
    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(i);
        cursor = previous[i];
    }
    run.reverse();
    run
}

impl ForLoopNode {
    pub fn new(
        rt: &Runtime,
        iterable: Signal<Value>,
        factory: impl Fn(Value, Signal<usize>) -> Result<NodeRef, RuntimeError> + 'static,
    ) -> Result<Self, RuntimeError> {
        let container = Container::new();
        let node = ForLoopNode {
            inner: Rc::new(ForLoopInner {
                rt: rt.downgrade(),
                container: container.clone(),
                factory: Rc::new(factory),
                entries: RefCell::new(Vec::new()),
                stats: Cell::new(ReconcileStats::default()),
            }),
        };

        let host = NodeRef::Container(container);
        let on_destroy = node.inner.clone();
        rt.observe(&host)?
            .on(LifecycleKind::Destroy, move |_| on_destroy.entries.borrow_mut().clear());

        let target = node.clone();
        SubscriptionBinding::bind(
            rt,
            &host,
            SignalSubscription::new(iterable, move |value: &Value| {
                if let Err(err) = target.reconcile(&iterable_items(value)) {
                    tracing::error!(error = %err, "for-loop reconciliation failed");
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

    pub fn last_stats(&self) -> ReconcileStats {
        self.inner.stats.get()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rendered item nodes in list order, followed by any item whose
    /// teardown was canceled.
    pub fn nodes(&self) -> Vec<NodeRef> {
        self.inner
            .entries
            .borrow()
            .iter()
            .map(|entry| entry.node.clone())
            .collect()
    }

    /// Brings the rendered entries in line with `items`.
    ///
    /// A failing factory skips its item. Every other failure is logged and
    /// the pass carries on, so the entry list always matches what was
    /// rendered. The first error is returned at the end.
    pub fn reconcile(&self, items: &[Value]) -> Result<ReconcileStats, RuntimeError> {
        let Some(rt) = self.inner.rt.upgrade() else {
            return Err(RuntimeError::TornDown);
        };
        let parent = NodeRef::Container(self.inner.container.clone());
        let mut stats = ReconcileStats::default();
        let mut first_error = None;

        let old: Vec<Entry> = self.inner.entries.borrow_mut().drain(..).collect();
        let was_empty = old.is_empty();
        let mut pool: HashMap<String, VecDeque<(Option<usize>, Entry)>> = HashMap::new();
        for (position, entry) in old.into_iter().enumerate() {
            let position = (!entry.lingering).then_some(position);
            pool.entry(entry.key.clone()).or_default().push_back((position, entry));
        }

        let mut next: Vec<(Option<usize>, Entry)> = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let key = value_key(item);
            if let Some((position, mut entry)) = pool.get_mut(&key).and_then(VecDeque::pop_front) {
                entry.index.set_if_changed(index);
                entry.lingering = false;
                stats.reused += 1;
                next.push((position, entry));
                continue;
            }
            let cursor = Signal::new(index);
            match (self.inner.factory)(item.clone(), cursor.clone()) {
                Ok(node) => {
                    stats.created += 1;
                    next.push((
                        None,
                        Entry {
                            key,
                            node,
                            index: cursor,
                            lingering: false,
                        },
                    ));
                }
                Err(err) => {
                    tracing::error!(error = %err, index, "for-loop item factory failed");
                    first_error.get_or_insert(err);
                }
            }
        }

        let mut lingering = Vec::new();
        for (_, mut entry) in pool.into_values().flatten() {
            if let Err(err) = rt.destroy_safe(&entry.node) {
                tracing::error!(error = %err, "for-loop could not destroy a removed item");
                first_error.get_or_insert(err);
            }
            if rt.state_of(&entry.node) == DomState::Destroyed {
                stats.destroyed += 1;
            } else {
                tracing::warn!(
                    node = %entry.node.describe(),
                    "removed for-loop item survived teardown, keeping it tracked"
                );
                entry.lingering = true;
                lingering.push(entry);
            }
        }

        if was_empty {
            for (_, entry) in &next {
                if let Err(err) = rt.attach(&entry.node, &parent, None) {
                    tracing::error!(error = %err, "for-loop could not attach an item");
                    first_error.get_or_insert(err);
                }
            }
        } else {
            let reused: Vec<usize> = next.iter().filter_map(|(position, _)| *position).collect();
            let stable: Vec<usize> = longest_increasing_run(&reused)
                .into_iter()
                .map(|i| reused[i])
                .collect();

            let mut anchor: Option<NodeRef> = None;
            for (position, entry) in next.iter().rev() {
                let in_place = position.is_some_and(|p| stable.binary_search(&p).is_ok());
                let placed = match rt.state_of(&entry.node) {
                    DomState::Detached => rt.attach(&entry.node, &parent, anchor.as_ref()).map(|_| ()),
                    DomState::Attached if !in_place => {
                        let moved = rt.move_before(&entry.node, &parent, anchor.as_ref());
                        if moved.is_ok() {
                            stats.moved += 1;
                        }
                        moved
                    }
                    _ => Ok(()),
                };
                if let Err(err) = placed {
                    tracing::error!(error = %err, "for-loop could not place an item");
                    first_error.get_or_insert(err);
                }
                if rt.state_of(&entry.node) == DomState::Attached {
                    anchor = Some(entry.node.clone());
                }
            }
        }

        *self.inner.entries.borrow_mut() = next
            .into_iter()
            .map(|(_, entry)| entry)
            .chain(lingering)
            .collect();
        self.inner.stats.set(stats);
        tracing::debug!(?stats, "for-loop reconciled");
        match first_error {
            Some(err) => Err(err),
            None => Ok(stats),
        }
    }
}

impl fmt::Debug for ForLoopNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForLoopNode")
            .field("entries", &self.len())
            .field("last_stats", &self.last_stats())
            .finish()
    }
}
