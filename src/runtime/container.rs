//! Marker-delimited containers.
//!
//! A container groups a run of sibling nodes without a wrapper element.
//! While detached its children live in a private fragment. Once attached
//! they sit in the parent between two empty comment markers, and every
//! structural operation is confined to that span.

use markup5ever_rcdom::Handle;
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};

use super::dom;
use super::RuntimeError;

struct ContainerInner {
    start: Handle,
    end: Handle,
    fragment: Handle,
    live: Cell<bool>,
}

#[derive(Clone)]
pub struct Container {
    inner: Rc<ContainerInner>,
}

#[derive(Clone)]
pub(crate) struct WeakContainer(Weak<ContainerInner>);

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(|inner| Container { inner })
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    pub fn new() -> Self {
        Container {
            inner: Rc::new(ContainerInner {
                start: dom::create_comment(""),
                end: dom::create_comment(""),
                fragment: dom::create_fragment(),
                live: Cell::new(false),
            }),
        }
    }

    pub fn start_marker(&self) -> Handle {
        self.inner.start.clone()
    }

    pub fn end_marker(&self) -> Handle {
        self.inner.end.clone()
    }

    /// Whether the children sit in a parent between the markers.
    pub fn is_live(&self) -> bool {
        self.inner.live.get()
    }

    pub(crate) fn downgrade(&self) -> WeakContainer {
        WeakContainer(Rc::downgrade(&self.inner))
    }

    pub fn ptr_eq(&self, other: &Container) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn host(&self) -> Option<Handle> {
        if self.is_live() {
            dom::parent_of(&self.inner.start)
        } else {
            Some(self.inner.fragment.clone())
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // CHILDREN
    // ═══════════════════════════════════════════════════════════════════════════

    pub fn children(&self) -> Vec<Handle> {
        if !self.is_live() {
            return dom::children(&self.inner.fragment);
        }
        let Some(parent) = dom::parent_of(&self.inner.start) else {
            return Vec::new();
        };
        let children: Vec<Handle> = parent
            .children
            .borrow()
            .iter()
            .skip_while(|c| !Rc::ptr_eq(c, &self.inner.start))
            .skip(1)
            .take_while(|c| !Rc::ptr_eq(c, &self.inner.end))
            .cloned()
            .collect();
        children
    }

    pub fn first_child(&self) -> Option<Handle> {
        self.children().into_iter().next()
    }

    pub fn last_child(&self) -> Option<Handle> {
        self.children().pop()
    }

    pub fn child_count(&self) -> usize {
        self.children().len()
    }

    pub fn is_empty(&self) -> bool {
        self.children().is_empty()
    }

    fn is_child(&self, node: &Handle) -> bool {
        self.children().iter().any(|c| Rc::ptr_eq(c, node))
    }

    /// Whether `node` is one of the children or inside one.
    pub fn contains(&self, node: &Handle) -> bool {
        let mut chain = vec![node.clone()];
        chain.extend(dom::ancestors(node));
        let children = self.children();
        chain
            .iter()
            .any(|n| children.iter().any(|c| Rc::ptr_eq(c, n)))
    }

    fn not_a_child(&self, node: &Handle) -> RuntimeError {
        RuntimeError::NotAChild {
            node: dom::describe(node),
            parent: "<container>".to_string(),
        }
    }

    /// Resolves where an insertion before `reference` lands in the host tree.
    pub(crate) fn insertion_point(
        &self,
        reference: Option<Handle>,
    ) -> Result<(Handle, Option<Handle>), RuntimeError> {
        if let Some(reference) = &reference {
            if !self.is_child(reference) {
                return Err(self.not_a_child(reference));
            }
        }
        let host = self.host().ok_or_else(|| self.not_a_child(&self.inner.start))?;
        if self.is_live() {
            Ok((host, reference.or_else(|| Some(self.inner.end.clone()))))
        } else {
            Ok((host, reference))
        }
    }

    /// Structural insert. Lifecycle-aware code goes through `Runtime::attach`.
    pub fn insert_before(&self, child: &Handle, reference: Option<&Handle>) -> Result<(), RuntimeError> {
        let (host, reference) = self.insertion_point(reference.cloned())?;
        dom::insert_before(&host, child, reference.as_ref())
    }

    pub fn append_child(&self, child: &Handle) -> Result<(), RuntimeError> {
        self.insert_before(child, None)
    }

    pub fn remove_child(&self, child: &Handle) -> Result<Handle, RuntimeError> {
        if !self.is_child(child) {
            return Err(self.not_a_child(child));
        }
        dom::remove(child);
        Ok(child.clone())
    }

    /// Puts `new` where `old` was and returns `old`.
    pub fn replace_child(&self, new: &Handle, old: &Handle) -> Result<Handle, RuntimeError> {
        self.insert_before(new, Some(old))?;
        self.remove_child(old)
    }

    pub fn text_content(&self) -> String {
        self.children().iter().map(dom::text_content).collect()
    }

    pub fn inner_html(&self) -> String {
        self.children().iter().map(dom::outer_html).collect()
    }

    /// Matching elements inside the container, in document order.
    pub fn query_selector_all(&self, selector: &str) -> Result<Vec<Handle>, RuntimeError> {
        if !self.is_live() {
            return dom::query_selector_all(&self.inner.fragment, selector);
        }
        let root = dom::root_of(&self.inner.start);
        Ok(dom::query_selector_all(&root, selector)?
            .into_iter()
            .filter(|node| self.contains(node))
            .collect())
    }

    pub fn query_selector(&self, selector: &str) -> Result<Option<Handle>, RuntimeError> {
        Ok(self.query_selector_all(selector)?.into_iter().next())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MODE SWITCHING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Moves the fragment's children into `parent` between fresh markers.
    pub(crate) fn mount(&self, parent: &Handle, reference: Option<&Handle>) -> Result<(), RuntimeError> {
        dom::insert_before(parent, &self.inner.start, reference)?;
        for child in dom::children(&self.inner.fragment) {
            dom::insert_before(parent, &child, reference)?;
        }
        dom::insert_before(parent, &self.inner.end, reference)?;
        self.inner.live.set(true);
        Ok(())
    }

    /// Gathers the span back into the fragment and drops the markers.
    pub(crate) fn unmount(&self) {
        for child in self.children() {
            dom::append_child(&self.inner.fragment, &child);
        }
        dom::remove(&self.inner.start);
        dom::remove(&self.inner.end);
        self.inner.live.set(false);
    }

    /// Moves markers and span together.
    pub(crate) fn relocate(&self, parent: &Handle, reference: Option<&Handle>) -> Result<(), RuntimeError> {
        let mut run = vec![self.inner.start.clone()];
        run.extend(self.children());
        run.push(self.inner.end.clone());
        if reference.is_some_and(|r| run.iter().any(|n| Rc::ptr_eq(n, r))) {
            return Ok(());
        }
        for node in &run {
            dom::insert_before(parent, node, reference)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("live", &self.is_live())
            .field("children", &self.child_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_operations_when_live() {
        let parent = dom::create_element("div");
        let before = dom::create_text("[");
        let after = dom::create_text("]");
        dom::append_child(&parent, &before);
        dom::append_child(&parent, &after);

        let container = Container::new();
        let a = dom::create_text("a");
        container.append_child(&a).unwrap();
        container.mount(&parent, Some(&after)).unwrap();
        assert_eq!(dom::text_content(&parent), "[a]");

        let b = dom::create_text("b");
        container.append_child(&b).unwrap();
        assert_eq!(dom::text_content(&parent), "[ab]");
        assert!(Rc::ptr_eq(&container.first_child().unwrap(), &a));
        assert!(Rc::ptr_eq(&container.last_child().unwrap(), &b));

        // Nodes outside the span are not children.
        assert!(matches!(
            container.remove_child(&before),
            Err(RuntimeError::NotAChild { .. })
        ));

        let c = dom::create_text("c");
        container.replace_child(&c, &a).unwrap();
        assert_eq!(container.text_content(), "cb");

        container.unmount();
        assert_eq!(dom::text_content(&parent), "[]");
        assert_eq!(parent.children.borrow().len(), 2);
        assert_eq!(container.text_content(), "cb");
    }

    #[test]
    fn test_query_is_confined_to_span() {
        let parent = dom::create_element("div");
        let outside = dom::create_element("p");
        dom::append_child(&parent, &outside);

        let container = Container::new();
        let inside = dom::create_element("p");
        container.append_child(&inside).unwrap();
        assert_eq!(container.query_selector_all("p").unwrap().len(), 1);

        container.mount(&parent, None).unwrap();
        let found = container.query_selector_all("p").unwrap();
        assert_eq!(found.len(), 1);
        assert!(Rc::ptr_eq(&found[0], &inside));
    }
}
