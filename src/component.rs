//! Components: a program instance plus lifecycle hooks.

use std::fmt;
use std::rc::Rc;

use crate::codegen::Program;
use crate::render::{Instance, SymbolResolver};
use crate::runtime::{LifecycleKind, NodeRef, Runtime, RuntimeError};
use crate::scope::Scope;

/// Lifecycle callbacks of a mounted component.
///
/// `on_init` runs once after the symbols are resolved and before the first
/// mount; returning an error aborts the mount.
pub trait ComponentHooks {
    fn on_init(&self, _scope: &Scope) -> Result<(), RuntimeError> {
        Ok(())
    }

    fn on_connected(&self) {}

    fn on_disconnected(&self) {}

    fn on_destroy(&self) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

impl ComponentHooks for NoHooks {}

pub struct Component {
    instance: Instance,
}

impl Component {
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn node(&self) -> NodeRef {
        self.instance.node()
    }

    pub fn unmount(&self) -> Result<(), RuntimeError> {
        self.instance.unmount()
    }

    pub fn destroy(&self) -> Result<(), RuntimeError> {
        self.instance.destroy()
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("instance", &self.instance)
            .finish()
    }
}

/// Instantiates `program`, wires `hooks` to its root and attaches it to `parent`.
pub async fn mount_component(
    rt: &Runtime,
    program: &Program,
    resolver: &dyn SymbolResolver,
    hooks: Rc<dyn ComponentHooks>,
    parent: &NodeRef,
    before: Option<&NodeRef>,
) -> Result<Component, RuntimeError> {
    let instance = program.instantiate(rt, resolver).await?;
    hooks.on_init(instance.scope())?;

    let observer = rt.observe(&instance.node())?;
    let on_connect = hooks.clone();
    observer.on(LifecycleKind::Connect, move |_| on_connect.on_connected());
    let on_disconnect = hooks.clone();
    observer.on(LifecycleKind::Disconnect, move |_| on_disconnect.on_disconnected());
    observer.on(LifecycleKind::Destroy, move |_| hooks.on_destroy());

    instance.mount(parent, before)?;
    tracing::debug!(file = %program.file, "component mounted");
    Ok(Component { instance })
}
