//! Reactive lifecycle & reconciliation runtime.
//!
//! The live tree is the `markup5ever_rcdom` tree. Everything the runtime
//! tracks about a node (lifecycle state, observers, properties, listeners)
//! lives in identity-keyed side tables owned by a [`Runtime`].

pub mod conditional;
pub mod container;
pub mod dom;
pub mod for_loop;
pub mod host;
pub mod lifecycle;
pub mod mutation;
pub mod projectors;
pub mod reactive;
pub mod scheduler;
pub mod subscription;
pub mod switch;

use markup5ever_rcdom::Handle;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::validate::CompilerError;
use container::{Container, WeakContainer};
use dom::NodeKey;
use host::HostExtras;
use lifecycle::{DomState, NodeEntry};
use mutation::MutationBus;
use scheduler::Scheduler;

pub use conditional::ConditionalNode;
pub use for_loop::{ForLoopNode, ReconcileStats};
pub use lifecycle::{Connectivity, LifecycleEvent, LifecycleKind, ListenerId, NodeObserver};
pub use reactive::{Signal, SignalSubscription, Subscription, Watch};
pub use subscription::SubscriptionBinding;
pub use switch::SwitchNode;

// ═══════════════════════════════════════════════════════════════════════════════
// CONFIGURATION
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeConfig {
    /// Grace delay before a hidden conditional child is destroyed.
    /// `None` keeps hidden children until the conditional itself is destroyed.
    pub conditional_grace_ms: Option<u64>,
    /// Observe the shared external-mutation signal.
    pub track_external_mutations: bool,
    /// Upper bound on microtask drain rounds in one `run_microtasks` call.
    pub max_microtask_rounds: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            conditional_grace_ms: None,
            track_external_mutations: false,
            max_microtask_rounds: 1000,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERRORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("cannot {operation} {node}: expected {expected}, found {actual}")]
    InvalidState {
        operation: &'static str,
        node: String,
        expected: DomState,
        actual: DomState,
    },
    #[error("cannot {operation} into {parent}: parent is {state}")]
    ParentUnavailable {
        operation: &'static str,
        parent: String,
        state: DomState,
    },
    #[error("{node} is not a child of {parent}")]
    NotAChild { node: String, parent: String },
    #[error("subscription is bound to a destroyed node")]
    SubscriptionDestroyed,
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),
    #[error("template evaluates expressions but no expression host was provided")]
    MissingHost,
    #[error("host error: {0}")]
    Host(String),
    #[error("invalid selector `{0}`")]
    InvalidSelector(String),
    #[error("runtime has been torn down")]
    TornDown,
    #[error(transparent)]
    Compile(#[from] CompilerError),
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE REFERENCES
// ═══════════════════════════════════════════════════════════════════════════════

/// Anything the lifecycle operations accept: a real node or a container.
#[derive(Clone)]
pub enum NodeRef {
    Node(Handle),
    Container(Container),
}

impl NodeRef {
    pub fn key(&self) -> NodeKey {
        NodeKey::of(&self.key_handle())
    }

    /// The handle the side tables are keyed by (a container's start marker).
    pub(crate) fn key_handle(&self) -> Handle {
        match self {
            NodeRef::Node(handle) => handle.clone(),
            NodeRef::Container(container) => container.start_marker(),
        }
    }

    pub fn as_node(&self) -> Option<&Handle> {
        match self {
            NodeRef::Node(handle) => Some(handle),
            NodeRef::Container(_) => None,
        }
    }

    pub fn as_container(&self) -> Option<&Container> {
        match self {
            NodeRef::Container(container) => Some(container),
            NodeRef::Node(_) => None,
        }
    }

    /// Whether the node currently sits inside some parent.
    pub(crate) fn has_parent(&self) -> bool {
        match self {
            NodeRef::Node(handle) => dom::parent_of(handle).is_some(),
            NodeRef::Container(container) => container.is_live(),
        }
    }

    /// First host node, usable as an insertion reference.
    pub(crate) fn first_host(&self) -> Option<Handle> {
        match self {
            NodeRef::Node(handle) => Some(handle.clone()),
            NodeRef::Container(container) => container.is_live().then(|| container.start_marker()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            NodeRef::Node(handle) => dom::describe(handle),
            NodeRef::Container(_) => "<container>".to_string(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakNodeRef {
        match self {
            NodeRef::Node(handle) => WeakNodeRef::Node(Rc::downgrade(handle)),
            NodeRef::Container(container) => WeakNodeRef::Container(container.downgrade()),
        }
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeRef({})", self.describe())
    }
}

impl From<Handle> for NodeRef {
    fn from(handle: Handle) -> Self {
        NodeRef::Node(handle)
    }
}

impl From<&Handle> for NodeRef {
    fn from(handle: &Handle) -> Self {
        NodeRef::Node(handle.clone())
    }
}

impl From<Container> for NodeRef {
    fn from(container: Container) -> Self {
        NodeRef::Container(container)
    }
}

impl From<&Container> for NodeRef {
    fn from(container: &Container) -> Self {
        NodeRef::Container(container.clone())
    }
}

#[derive(Clone)]
pub(crate) enum WeakNodeRef {
    Node(Weak<markup5ever_rcdom::Node>),
    Container(WeakContainer),
}

impl WeakNodeRef {
    pub(crate) fn upgrade(&self) -> Option<NodeRef> {
        match self {
            WeakNodeRef::Node(weak) => weak.upgrade().map(NodeRef::Node),
            WeakNodeRef::Container(weak) => weak.upgrade().map(NodeRef::Container),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RUNTIME CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Owns the document and every side table of one live tree.
///
/// Cloning is cheap; all clones share the same state. Call [`Runtime::teardown`]
/// to release everything the runtime keeps alive.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Rc<RuntimeInner>,
}

pub(crate) struct RuntimeInner {
    pub(crate) document: Handle,
    pub(crate) body: Handle,
    pub(crate) config: RuntimeConfig,
    pub(crate) nodes: RefCell<HashMap<NodeKey, NodeEntry>>,
    pub(crate) extras: RefCell<HashMap<NodeKey, HostExtras>>,
    pub(crate) mutations: MutationBus,
    pub(crate) scheduler: Scheduler,
    pub(crate) next_listener: Cell<u64>,
    pub(crate) torn_down: Cell<bool>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        let document = dom::create_document();
        let html = dom::create_element("html");
        let body = dom::create_element("body");
        dom::append_child(&document, &html);
        dom::append_child(&html, &body);

        Runtime {
            inner: Rc::new(RuntimeInner {
                document,
                body,
                config,
                nodes: RefCell::new(HashMap::new()),
                extras: RefCell::new(HashMap::new()),
                mutations: MutationBus::default(),
                scheduler: Scheduler::default(),
                next_listener: Cell::new(1),
                torn_down: Cell::new(false),
            }),
        }
    }

    pub fn document(&self) -> Handle {
        self.inner.document.clone()
    }

    pub fn body(&self) -> Handle {
        self.inner.body.clone()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Releases every side table, pending task and observer.
    ///
    /// Further lifecycle operations fail with [`RuntimeError::TornDown`].
    pub fn teardown(&self) {
        if self.inner.torn_down.replace(true) {
            return;
        }
        let entries: Vec<NodeEntry> = self.inner.nodes.borrow_mut().drain().map(|(_, e)| e).collect();
        for entry in &entries {
            for observer in &entry.observers {
                observer.mark_destroyed();
            }
        }
        drop(entries);
        self.inner.extras.borrow_mut().clear();
        self.inner.mutations.clear();
        self.inner.scheduler.clear();
        tracing::debug!("runtime torn down");
    }

    pub fn is_torn_down(&self) -> bool {
        self.inner.torn_down.get()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RuntimeError> {
        if self.is_torn_down() {
            Err(RuntimeError::TornDown)
        } else {
            Ok(())
        }
    }

    pub(crate) fn next_id(&self) -> u64 {
        let id = self.inner.next_listener.get();
        self.inner.next_listener.set(id + 1);
        id
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime(Rc::downgrade(&self.inner))
    }
}

/// Non-owning handle for closures stored inside the runtime's own tables.
#[derive(Clone)]
pub(crate) struct WeakRuntime(Weak<RuntimeInner>);

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.0.upgrade().map(|inner| Runtime { inner })
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("tracked_nodes", &self.inner.nodes.borrow().len())
            .field("torn_down", &self.inner.torn_down.get())
            .finish()
    }
}
