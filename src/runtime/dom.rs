//! Host tree helpers over `markup5ever_rcdom`.
//!
//! rcdom only stores structure, so these helpers keep parent links, class
//! lists and inline styles consistent. Lifecycle-aware mutation lives in
//! `lifecycle.rs`; everything here is purely structural.

use html5ever::{Attribute, LocalName, Namespace, QualName};
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, Node, NodeData};
use regex::Regex;
use std::cell::RefCell;
use std::rc::Rc;
use tendril::StrTendril;

use super::RuntimeError;
use crate::parse::HTML_NAMESPACE;

/// Identity of a host node, usable as a side-table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(usize);

impl NodeKey {
    pub fn of(handle: &Handle) -> Self {
        NodeKey(Rc::as_ptr(handle) as *const () as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CREATION
// ═══════════════════════════════════════════════════════════════════════════════

pub fn create_document() -> Handle {
    Node::new(NodeData::Document)
}

/// A parentless node that holds the children of a detached container.
pub fn create_fragment() -> Handle {
    create_document()
}

pub fn create_element(tag: &str) -> Handle {
    Node::new(NodeData::Element {
        name: QualName::new(
            None,
            Namespace::from(HTML_NAMESPACE),
            LocalName::from(tag.to_ascii_lowercase()),
        ),
        attrs: RefCell::new(Vec::new()),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

pub fn create_comment(text: &str) -> Handle {
    Node::new(NodeData::Comment {
        contents: StrTendril::from_slice(text),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURE
// ═══════════════════════════════════════════════════════════════════════════════

pub fn parent_of(handle: &Handle) -> Option<Handle> {
    let weak = handle.parent.take();
    let parent = weak.as_ref().and_then(|w| w.upgrade());
    handle.parent.set(weak);
    parent
}

pub fn children(handle: &Handle) -> Vec<Handle> {
    handle.children.borrow().clone()
}

pub fn index_of(parent: &Handle, child: &Handle) -> Option<usize> {
    parent
        .children
        .borrow()
        .iter()
        .position(|c| Rc::ptr_eq(c, child))
}

pub fn next_sibling(handle: &Handle) -> Option<Handle> {
    let parent = parent_of(handle)?;
    let index = index_of(&parent, handle)?;
    let next = parent.children.borrow().get(index + 1).cloned();
    next
}

pub fn previous_sibling(handle: &Handle) -> Option<Handle> {
    let parent = parent_of(handle)?;
    let index = index_of(&parent, handle)?;
    if index == 0 {
        return None;
    }
    let previous = parent.children.borrow().get(index - 1).cloned();
    previous
}

/// Detaches `child` from its parent. Returns false if it had none.
pub fn remove(child: &Handle) -> bool {
    let Some(parent) = parent_of(child) else {
        return false;
    };
    if let Some(index) = index_of(&parent, child) {
        parent.children.borrow_mut().remove(index);
    }
    child.parent.set(None);
    true
}

/// Inserts `child` into `parent` before `reference` (or last).
///
/// The child is first removed from wherever it currently is.
pub fn insert_before(
    parent: &Handle,
    child: &Handle,
    reference: Option<&Handle>,
) -> Result<(), RuntimeError> {
    if let Some(reference) = reference {
        if index_of(parent, reference).is_none() {
            return Err(RuntimeError::NotAChild {
                node: describe(reference),
                parent: describe(parent),
            });
        }
    }
    remove(child);
    let index = match reference {
        Some(reference) => index_of(parent, reference).unwrap_or(parent.children.borrow().len()),
        None => parent.children.borrow().len(),
    };
    parent.children.borrow_mut().insert(index, child.clone());
    child.parent.set(Some(Rc::downgrade(parent)));
    Ok(())
}

pub fn append_child(parent: &Handle, child: &Handle) {
    remove(child);
    parent.children.borrow_mut().push(child.clone());
    child.parent.set(Some(Rc::downgrade(parent)));
}

pub fn ancestors(handle: &Handle) -> Vec<Handle> {
    let mut chain = Vec::new();
    let mut current = parent_of(handle);
    while let Some(node) = current {
        current = parent_of(&node);
        chain.push(node);
    }
    chain
}

pub fn root_of(handle: &Handle) -> Handle {
    ancestors(handle).pop().unwrap_or_else(|| handle.clone())
}

pub fn contains(ancestor: &Handle, node: &Handle) -> bool {
    Rc::ptr_eq(ancestor, node) || ancestors(node).iter().any(|a| Rc::ptr_eq(a, ancestor))
}

/// All descendants in document order, excluding `handle` itself.
pub fn descendants(handle: &Handle) -> Vec<Handle> {
    let mut out = Vec::new();
    let mut stack: Vec<Handle> = children(handle).into_iter().rev().collect();
    while let Some(node) = stack.pop() {
        stack.extend(children(&node).into_iter().rev());
        out.push(node);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE DATA
// ═══════════════════════════════════════════════════════════════════════════════

pub fn tag_name(handle: &Handle) -> Option<String> {
    match &handle.data {
        NodeData::Element { name, .. } => Some(name.local.to_string()),
        _ => None,
    }
}

pub fn is_element(handle: &Handle) -> bool {
    matches!(handle.data, NodeData::Element { .. })
}

pub fn is_comment(handle: &Handle) -> bool {
    matches!(handle.data, NodeData::Comment { .. })
}

pub fn describe(handle: &Handle) -> String {
    match &handle.data {
        NodeData::Element { name, .. } => format!("<{}>", name.local),
        NodeData::Text { .. } => "#text".to_string(),
        NodeData::Comment { .. } => "#comment".to_string(),
        NodeData::Document => "#document".to_string(),
        NodeData::Doctype { .. } => "#doctype".to_string(),
        NodeData::ProcessingInstruction { .. } => "#processing-instruction".to_string(),
    }
}

pub fn get_attribute(handle: &Handle, name: &str) -> Option<String> {
    let NodeData::Element { attrs, .. } = &handle.data else {
        return None;
    };
    let value = attrs
        .borrow()
        .iter()
        .find(|a| &*a.name.local == name)
        .map(|a| a.value.to_string());
    value
}

pub fn has_attribute(handle: &Handle, name: &str) -> bool {
    get_attribute(handle, name).is_some()
}

pub fn set_attribute(handle: &Handle, name: &str, value: &str) {
    let NodeData::Element { attrs, .. } = &handle.data else {
        return;
    };
    let mut attrs = attrs.borrow_mut();
    match attrs.iter_mut().find(|a| &*a.name.local == name) {
        Some(existing) => existing.value = StrTendril::from_slice(value),
        None => attrs.push(Attribute {
            name: QualName::new(None, Namespace::from(""), LocalName::from(name)),
            value: StrTendril::from_slice(value),
        }),
    }
}

pub fn remove_attribute(handle: &Handle, name: &str) {
    if let NodeData::Element { attrs, .. } = &handle.data {
        attrs.borrow_mut().retain(|a| &*a.name.local != name);
    }
}

pub fn attributes(handle: &Handle) -> Vec<(String, String)> {
    match &handle.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .map(|a| (a.name.local.to_string(), a.value.to_string()))
            .collect(),
        _ => Vec::new(),
    }
}

pub fn text_content(handle: &Handle) -> String {
    match &handle.data {
        NodeData::Text { contents } => contents.borrow().to_string(),
        NodeData::Comment { .. } | NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {
            String::new()
        }
        NodeData::Element { .. } | NodeData::Document => descendants(handle)
            .iter()
            .filter_map(|node| match &node.data {
                NodeData::Text { contents } => Some(contents.borrow().to_string()),
                _ => None,
            })
            .collect(),
    }
}

/// Replaces a text node's contents, or an element's children with one text node.
pub fn set_text_content(handle: &Handle, text: &str) {
    match &handle.data {
        NodeData::Text { contents } => *contents.borrow_mut() = StrTendril::from_slice(text),
        NodeData::Element { .. } => {
            for child in children(handle) {
                remove(&child);
            }
            if !text.is_empty() {
                append_child(handle, &create_text(text));
            }
        }
        _ => {}
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASSES & STYLES
// ═══════════════════════════════════════════════════════════════════════════════

pub fn classes(handle: &Handle) -> Vec<String> {
    get_attribute(handle, "class")
        .map(|value| value.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

pub fn has_class(handle: &Handle, class: &str) -> bool {
    classes(handle).iter().any(|c| c == class)
}

pub fn toggle_class(handle: &Handle, class: &str, on: bool) {
    let mut list = classes(handle);
    let present = list.iter().any(|c| c == class);
    if on == present {
        return;
    }
    if on {
        list.push(class.to_string());
    } else {
        list.retain(|c| c != class);
    }
    set_attribute(handle, "class", &list.join(" "));
}

pub fn styles(handle: &Handle) -> Vec<(String, String)> {
    get_attribute(handle, "style")
        .map(|value| {
            value
                .split(';')
                .filter_map(|decl| {
                    let (name, value) = decl.split_once(':')?;
                    let name = name.trim();
                    (!name.is_empty()).then(|| (name.to_string(), value.trim().to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn style(handle: &Handle, property: &str) -> Option<String> {
    styles(handle)
        .into_iter()
        .find(|(name, _)| name == property)
        .map(|(_, value)| value)
}

/// Sets or clears one inline style declaration.
pub fn set_style(handle: &Handle, property: &str, value: Option<&str>) {
    let mut declarations = styles(handle);
    let position = declarations.iter().position(|(name, _)| name == property);
    match (position, value) {
        (Some(i), Some(v)) => declarations[i].1 = v.to_string(),
        (None, Some(v)) => declarations.push((property.to_string(), v.to_string())),
        (Some(i), None) => {
            declarations.remove(i);
        }
        (None, None) => return,
    }
    if declarations.is_empty() {
        remove_attribute(handle, "style");
    } else {
        let serialized = declarations
            .iter()
            .map(|(name, value)| format!("{}: {}", name, value))
            .collect::<Vec<_>>()
            .join("; ");
        set_attribute(handle, "style", &serialized);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

fn write_html(handle: &Handle, out: &mut String) {
    match &handle.data {
        NodeData::Element { name, attrs, .. } => {
            out.push('<');
            out.push_str(&name.local);
            for attr in attrs.borrow().iter() {
                out.push(' ');
                out.push_str(&attr.name.local);
                out.push_str("=\"");
                out.push_str(&escape(&attr.value, true));
                out.push('"');
            }
            out.push('>');
            if VOID_ELEMENTS.contains(&&*name.local) {
                return;
            }
            for child in children(handle) {
                write_html(&child, out);
            }
            out.push_str("</");
            out.push_str(&name.local);
            out.push('>');
        }
        NodeData::Text { contents } => out.push_str(&escape(&contents.borrow(), false)),
        NodeData::Comment { contents } => {
            out.push_str("<!--");
            out.push_str(contents);
            out.push_str("-->");
        }
        NodeData::Document => {
            for child in children(handle) {
                write_html(&child, out);
            }
        }
        NodeData::Doctype { .. } | NodeData::ProcessingInstruction { .. } => {}
    }
}

pub fn outer_html(handle: &Handle) -> String {
    let mut out = String::new();
    write_html(handle, &mut out);
    out
}

pub fn inner_html(handle: &Handle) -> String {
    let mut out = String::new();
    for child in children(handle) {
        write_html(&child, &mut out);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTORS
// ═══════════════════════════════════════════════════════════════════════════════

lazy_static! {
    static ref COMPOUND_RE: Regex =
        Regex::new(r"^(\*|[A-Za-z][\w-]*)?((?:#[\w-]+|\.[\w-]+|\[[^\]]+\])*)$").unwrap();
    static ref PART_RE: Regex =
        Regex::new(r#"#([\w-]+)|\.([\w-]+)|\[\s*([\w-]+)\s*(?:=\s*"?([^"\]]*)"?\s*)?\]"#).unwrap();
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<(String, Option<String>)>,
}

impl Compound {
    fn parse(text: &str) -> Option<Self> {
        let caps = COMPOUND_RE.captures(text)?;
        let mut compound = Compound {
            tag: caps
                .get(1)
                .map(|m| m.as_str())
                .filter(|t| *t != "*")
                .map(str::to_ascii_lowercase),
            ..Compound::default()
        };
        for part in PART_RE.captures_iter(&caps[2]) {
            if let Some(id) = part.get(1) {
                compound.id = Some(id.as_str().to_string());
            } else if let Some(class) = part.get(2) {
                compound.classes.push(class.as_str().to_string());
            } else if let Some(name) = part.get(3) {
                compound
                    .attributes
                    .push((name.as_str().to_string(), part.get(4).map(|v| v.as_str().to_string())));
            }
        }
        Some(compound)
    }

    fn matches(&self, handle: &Handle) -> bool {
        let Some(tag) = tag_name(handle) else {
            return false;
        };
        if self.tag.as_ref().is_some_and(|t| *t != tag) {
            return false;
        }
        if self.id.as_ref().is_some_and(|id| get_attribute(handle, "id").as_ref() != Some(id)) {
            return false;
        }
        if !self.classes.iter().all(|class| has_class(handle, class)) {
            return false;
        }
        self.attributes.iter().all(|(name, value)| match value {
            Some(value) => get_attribute(handle, name).as_ref() == Some(value),
            None => has_attribute(handle, name),
        })
    }
}

/// A comma-separated list of descendant-combinator chains.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    alternatives: Vec<Vec<Compound>>,
}

impl Selector {
    pub fn parse(selector: &str) -> Result<Self, RuntimeError> {
        let invalid = || RuntimeError::InvalidSelector(selector.to_string());
        let mut alternatives = Vec::new();
        for alternative in selector.split(',') {
            let chain = alternative
                .split_whitespace()
                .map(|part| Compound::parse(part).filter(|c| *c != Compound::default() || part == "*"))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(invalid)?;
            if chain.is_empty() {
                return Err(invalid());
            }
            alternatives.push(chain);
        }
        Ok(Selector { alternatives })
    }

    pub fn matches(&self, handle: &Handle) -> bool {
        self.alternatives.iter().any(|chain| chain_matches(chain, handle))
    }
}

fn chain_matches(chain: &[Compound], handle: &Handle) -> bool {
    let Some((last, rest)) = chain.split_last() else {
        return false;
    };
    if !last.matches(handle) {
        return false;
    }
    let mut remaining = rest.iter().rev().peekable();
    for ancestor in ancestors(handle) {
        let Some(compound) = remaining.peek() else {
            break;
        };
        if compound.matches(&ancestor) {
            remaining.next();
        }
    }
    remaining.peek().is_none()
}

/// Matching descendants of `root` in document order.
pub fn query_selector_all(root: &Handle, selector: &str) -> Result<Vec<Handle>, RuntimeError> {
    let selector = Selector::parse(selector)?;
    Ok(descendants(root)
        .into_iter()
        .filter(|node| selector.matches(node))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> (Handle, Handle, Handle) {
        let root = create_element("div");
        let list = create_element("ul");
        set_attribute(&list, "class", "items main");
        let item = create_element("li");
        set_attribute(&item, "id", "first");
        set_attribute(&item, "data-kind", "a");
        append_child(&root, &list);
        append_child(&list, &item);
        append_child(&item, &create_text("one"));
        (root, list, item)
    }

    #[test]
    fn test_insert_before_reorders_and_reparents() {
        let parent = create_element("div");
        let a = create_text("a");
        let b = create_text("b");
        append_child(&parent, &a);
        insert_before(&parent, &b, Some(&a)).unwrap();
        assert_eq!(text_content(&parent), "ba");
        assert!(Rc::ptr_eq(&parent_of(&b).unwrap(), &parent));

        // Re-inserting an existing child moves it.
        insert_before(&parent, &b, None).unwrap();
        assert_eq!(text_content(&parent), "ab");
        assert_eq!(parent.children.borrow().len(), 2);
    }

    #[test]
    fn test_insert_before_foreign_reference() {
        let parent = create_element("div");
        let stranger = create_text("x");
        let err = insert_before(&parent, &create_text("y"), Some(&stranger)).unwrap_err();
        assert!(matches!(err, RuntimeError::NotAChild { .. }));
    }

    #[test]
    fn test_class_and_style_helpers() {
        let el = create_element("span");
        toggle_class(&el, "a", true);
        toggle_class(&el, "b", true);
        toggle_class(&el, "a", false);
        assert_eq!(get_attribute(&el, "class").as_deref(), Some("b"));

        set_style(&el, "width", Some("10px"));
        set_style(&el, "color", Some("red"));
        set_style(&el, "width", None);
        assert_eq!(get_attribute(&el, "style").as_deref(), Some("color: red"));
        assert_eq!(style(&el, "color").as_deref(), Some("red"));
    }

    #[test]
    fn test_selectors() {
        let (root, list, item) = tree();
        let found = query_selector_all(&root, "ul.items li#first").unwrap();
        assert_eq!(found.len(), 1);
        assert!(Rc::ptr_eq(&found[0], &item));

        let found = query_selector_all(&root, "[data-kind=a], .main").unwrap();
        assert_eq!(found.len(), 2);
        assert!(Rc::ptr_eq(&found[0], &list));

        assert!(query_selector_all(&root, "p li").unwrap().is_empty());
        assert!(matches!(
            query_selector_all(&root, "li > a"),
            Err(RuntimeError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_outer_html() {
        let (root, _, _) = tree();
        assert_eq!(
            outer_html(&root),
            r#"<div><ul class="items main"><li id="first" data-kind="a">one</li></ul></div>"#
        );
    }
}
