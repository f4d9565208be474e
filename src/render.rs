//! Program instantiation.
//!
//! Interprets a compiled [`Program`] against a [`Runtime`]: every
//! instruction becomes a node, every operation a projector, and structural
//! instructions become conditional, for-loop and switch containers whose
//! bodies are built on demand.

use futures::future::{self, FutureExt, LocalBoxFuture};
use markup5ever_rcdom::Handle;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::codegen::{Instruction, Operation, Program};
use crate::commands::ForBinding;
use crate::generators::ValueSource;
use crate::runtime::conditional::NodeFactory;
use crate::runtime::container::Container;
use crate::runtime::host::HostEvent;
use crate::runtime::{
    dom, projectors, ConditionalNode, ForLoopNode, NodeRef, Runtime, RuntimeError, Signal,
    SwitchNode, WeakRuntime,
};
use crate::scope::Scope;

// ═══════════════════════════════════════════════════════════════════════════════
// HOST TRAITS
// ═══════════════════════════════════════════════════════════════════════════════

/// Evaluates `$`/`exp-` expressions and event handlers.
///
/// The crate ships no expression language; embedders plug one in here.
pub trait ExpressionHost {
    fn evaluate(&self, code: &str, scope: &Scope) -> Result<Signal<Value>, RuntimeError>;

    fn invoke(&self, code: &str, scope: &Scope, event: &HostEvent) -> Result<(), RuntimeError>;
}

/// Supplies the signals behind a program's free symbols.
pub trait SymbolResolver {
    fn resolve<'a>(&'a self, name: &'a str)
        -> LocalBoxFuture<'a, Result<Signal<Value>, RuntimeError>>;

    fn host(&self) -> Option<Rc<dyn ExpressionHost>> {
        None
    }
}

/// Resolves symbols from an in-memory table.
#[derive(Default, Clone)]
pub struct MapResolver {
    symbols: BTreeMap<String, Signal<Value>>,
    host: Option<Rc<dyn ExpressionHost>>,
}

impl MapResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, signal: Signal<Value>) -> Self {
        self.symbols.insert(name.into(), signal);
        self
    }

    pub fn with_value(self, name: impl Into<String>, value: Value) -> Self {
        self.with(name, Signal::new(value))
    }

    pub fn with_host(mut self, host: Rc<dyn ExpressionHost>) -> Self {
        self.host = Some(host);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, signal: Signal<Value>) {
        self.symbols.insert(name.into(), signal);
    }
}

impl SymbolResolver for MapResolver {
    fn resolve<'a>(
        &'a self,
        name: &'a str,
    ) -> LocalBoxFuture<'a, Result<Signal<Value>, RuntimeError>> {
        let result = self
            .symbols
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::UnresolvedSymbol(name.to_string()));
        future::ready(result).boxed_local()
    }

    fn host(&self) -> Option<Rc<dyn ExpressionHost>> {
        self.host.clone()
    }
}

impl fmt::Debug for MapResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapResolver")
            .field("symbols", &self.symbols.keys().collect::<Vec<_>>())
            .field("has_host", &self.host.is_some())
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INSTANCE
// ═══════════════════════════════════════════════════════════════════════════════

/// A rendered program: its top-level nodes live in one root container.
pub struct Instance {
    rt: Runtime,
    root: Container,
    scope: Scope,
}

impl Instance {
    pub fn node(&self) -> NodeRef {
        NodeRef::Container(self.root.clone())
    }

    pub fn container(&self) -> &Container {
        &self.root
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn mount(&self, parent: &NodeRef, before: Option<&NodeRef>) -> Result<(), RuntimeError> {
        self.rt.attach(&self.node(), parent, before).map(|_| ())
    }

    pub fn mount_to_body(&self) -> Result<(), RuntimeError> {
        self.mount(&NodeRef::Node(self.rt.body()), None)
    }

    pub fn unmount(&self) -> Result<(), RuntimeError> {
        self.rt.detach_safe(&self.node()).map(|_| ())
    }

    pub fn destroy(&self) -> Result<(), RuntimeError> {
        self.rt.destroy_safe(&self.node())
    }

    pub fn text_content(&self) -> String {
        self.root.text_content()
    }

    pub fn inner_html(&self) -> String {
        self.root.inner_html()
    }

    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<Handle>, RuntimeError> {
        self.root.query_selector_all(selector)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("root", &self.root)
            .field("scope", &self.scope)
            .finish()
    }
}

impl Program {
    /// Resolves every free symbol, then renders the program.
    pub async fn instantiate(
        &self,
        rt: &Runtime,
        resolver: &dyn SymbolResolver,
    ) -> Result<Instance, RuntimeError> {
        rt.ensure_live()?;
        let host = resolver.host();
        if self.requires_host && host.is_none() {
            return Err(RuntimeError::MissingHost);
        }
        let mut bindings = BTreeMap::new();
        for symbol in &self.symbols {
            bindings.insert(symbol.clone(), resolver.resolve(symbol).await?);
        }
        tracing::debug!(file = %self.file, symbols = bindings.len(), "symbols resolved");
        self.render(rt, &Scope::new(bindings), host)
    }

    /// Renders against an already populated scope.
    pub fn render(
        &self,
        rt: &Runtime,
        scope: &Scope,
        host: Option<Rc<dyn ExpressionHost>>,
    ) -> Result<Instance, RuntimeError> {
        rt.ensure_live()?;
        if self.requires_host && host.is_none() {
            return Err(RuntimeError::MissingHost);
        }
        let renderer = Renderer {
            rt: rt.downgrade(),
            host,
        };
        let root = Container::new();
        let parent = NodeRef::Container(root.clone());
        for instruction in &self.instructions {
            let node = renderer.render(instruction, scope)?;
            rt.attach(&node, &parent, None)?;
        }
        Ok(Instance {
            rt: rt.clone(),
            root,
            scope: scope.clone(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RENDERER
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
struct Renderer {
    rt: WeakRuntime,
    host: Option<Rc<dyn ExpressionHost>>,
}

impl Renderer {
    fn runtime(&self) -> Result<Runtime, RuntimeError> {
        self.rt.upgrade().ok_or(RuntimeError::TornDown)
    }

    fn host(&self) -> Result<&Rc<dyn ExpressionHost>, RuntimeError> {
        self.host.as_ref().ok_or(RuntimeError::MissingHost)
    }

    fn source(&self, source: &ValueSource, scope: &Scope) -> Result<Signal<Value>, RuntimeError> {
        match source {
            ValueSource::Reference(path) => scope.resolve(path).ok_or_else(|| {
                RuntimeError::UnresolvedSymbol(source.root().unwrap_or(path).to_string())
            }),
            ValueSource::Expression(code) => self.host()?.evaluate(code, scope),
        }
    }

    /// A factory that renders `body` in `scope` each time it is called.
    fn factory(&self, body: &Instruction, scope: &Scope) -> NodeFactory {
        let renderer = self.clone();
        let body = Rc::new(body.clone());
        let scope = scope.clone();
        Rc::new(move || renderer.render(&body, &scope))
    }

    fn render(&self, instruction: &Instruction, scope: &Scope) -> Result<NodeRef, RuntimeError> {
        let rt = self.runtime()?;
        match instruction {
            Instruction::Element(element) => {
                let node = dom::create_element(&element.tag);
                for operation in &element.operations {
                    self.apply(&rt, &node, operation, scope)?;
                }
                let parent = NodeRef::Node(node.clone());
                for child in &element.children {
                    let child = self.render(child, scope)?;
                    rt.attach(&child, &parent, None)?;
                }
                Ok(parent)
            }
            Instruction::Text { value } => Ok(NodeRef::Node(dom::create_text(value))),
            Instruction::DynamicText { source } => {
                let node = dom::create_text("");
                projectors::bind_text(&rt, &node, self.source(source, scope)?)?;
                Ok(NodeRef::Node(node))
            }
            Instruction::Conditional { condition, body } => {
                let condition = self.source(condition, scope)?;
                let conditional = ConditionalNode::new(&rt, condition, {
                    let factory = self.factory(body, scope);
                    move || factory()
                })?;
                Ok(conditional.node())
            }
            Instruction::ForLoop { binding, body } => self.render_for(&rt, binding, body, scope),
            Instruction::Switch {
                value,
                cases,
                default,
            } => {
                let value = self.source(value, scope)?;
                let cases = cases
                    .iter()
                    .map(|case| (case.value.clone(), self.factory(&case.body, scope)))
                    .collect();
                let default = default.as_ref().map(|body| self.factory(body, scope));
                Ok(SwitchNode::new(&rt, value, cases, default)?.node())
            }
        }
    }

    fn render_for(
        &self,
        rt: &Runtime,
        binding: &ForBinding,
        body: &Instruction,
        scope: &Scope,
    ) -> Result<NodeRef, RuntimeError> {
        let iterable = self.source(&binding.iterable, scope)?;
        let renderer = self.clone();
        let binding = binding.clone();
        let body = Rc::new(body.clone());
        let outer = scope.clone();
        let node = ForLoopNode::new(rt, iterable, move |item, index| {
            let index = index.map(|i| Value::from(*i));
            let locals = std::iter::once((binding.item.clone(), Signal::new(item))).chain(
                binding
                    .aliases
                    .iter()
                    .map(|alias| (alias.alias.clone(), index.clone())),
            );
            renderer.render(&body, &outer.extend(locals))
        })?;
        Ok(node.node())
    }

    fn apply(
        &self,
        rt: &Runtime,
        node: &Handle,
        operation: &Operation,
        scope: &Scope,
    ) -> Result<(), RuntimeError> {
        match operation {
            Operation::SetAttribute { name, value } => dom::set_attribute(node, name, value),
            Operation::BindProperty { name, source } => {
                projectors::bind_property(rt, node, name, self.source(source, scope)?)?;
            }
            Operation::BindClass { name, source } => {
                projectors::bind_class(rt, node, name, self.source(source, scope)?)?;
            }
            Operation::BindClassList { source } => {
                projectors::bind_class_list(rt, node, self.source(source, scope)?)?;
            }
            Operation::BindStyle { name, unit, source } => {
                projectors::bind_style(rt, node, name, unit.clone(), self.source(source, scope)?)?;
            }
            Operation::BindStyleMap { source } => {
                projectors::bind_style_map(rt, node, self.source(source, scope)?)?;
            }
            Operation::BindAttribute { name, source } => {
                projectors::bind_attribute(rt, node, name, self.source(source, scope)?)?;
            }
            Operation::BindAttributeMap { source } => {
                projectors::bind_attribute_map(rt, node, self.source(source, scope)?)?;
            }
            Operation::Listen { event, handler } => {
                let host = self.host()?.clone();
                let code = handler.clone();
                let scope = scope.clone();
                projectors::bind_event(
                    rt,
                    node,
                    event,
                    Rc::new(move |event: &HostEvent| {
                        if let Err(err) = host.invoke(&code, &scope, event) {
                            tracing::error!(error = %err, handler = %code, "event handler failed");
                        }
                    }),
                )?;
            }
        }
        Ok(())
    }
}
