//! Data scopes for instantiated templates.
//!
//! A scope maps names to signals and chains to its parent. Loop bodies get a
//! child scope holding the item, its index cursor and any index aliases.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use crate::runtime::Signal;

lazy_static! {
    static ref PATH_ROOT_RE: Regex = Regex::new(r"^\s*([A-Za-z_$][\w$]*)").unwrap();
    static ref PATH_SEGMENT_RE: Regex = Regex::new(
        r#"^\s*(?:\.\s*([A-Za-z_$][\w$]*)|\[\s*(\d+)\s*\]|\[\s*['"]([^'"]*)['"]\s*\])"#
    )
    .unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[0]["c"]` into its root name and segments.
pub fn parse_path(path: &str) -> Option<(String, Vec<PathSegment>)> {
    let caps = PATH_ROOT_RE.captures(path)?;
    let root = caps[1].to_string();
    let mut rest = &path[caps.get(0)?.end()..];
    let mut segments = Vec::new();
    while !rest.trim().is_empty() {
        let caps = PATH_SEGMENT_RE.captures(rest)?;
        if let Some(key) = caps.get(1).or(caps.get(3)) {
            segments.push(PathSegment::Key(key.as_str().to_string()));
        } else if let Some(index) = caps.get(2) {
            segments.push(PathSegment::Index(index.as_str().parse().ok()?));
        }
        rest = &rest[caps.get(0)?.end()..];
    }
    Some((root, segments))
}

/// Follows `segments` into `value`. Missing steps yield `null`.
pub fn walk(value: &Value, segments: &[PathSegment]) -> Value {
    let mut current = value;
    for segment in segments {
        let next = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Key(key), Value::Array(items)) if key == "length" => {
                return Value::from(items.len());
            }
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index),
            (PathSegment::Index(index), Value::Object(map)) => map.get(&index.to_string()),
            _ => None,
        };
        match next {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

struct ScopeInner {
    bindings: BTreeMap<String, Signal<Value>>,
    parent: Option<Scope>,
}

#[derive(Clone)]
pub struct Scope {
    inner: Rc<ScopeInner>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new(BTreeMap::new())
    }
}

impl Scope {
    pub fn new(bindings: BTreeMap<String, Signal<Value>>) -> Self {
        Scope {
            inner: Rc::new(ScopeInner {
                bindings,
                parent: None,
            }),
        }
    }

    /// A child scope whose bindings shadow this one's.
    pub fn extend(&self, bindings: impl IntoIterator<Item = (String, Signal<Value>)>) -> Scope {
        Scope {
            inner: Rc::new(ScopeInner {
                bindings: bindings.into_iter().collect(),
                parent: Some(self.clone()),
            }),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<Signal<Value>> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(signal) = current.inner.bindings.get(name) {
                return Some(signal.clone());
            }
            scope = current.inner.parent.as_ref();
        }
        None
    }

    /// Resolves a reference path to a signal.
    ///
    /// A bare name returns the bound signal itself; a deeper path returns a
    /// derived signal following it.
    pub fn resolve(&self, path: &str) -> Option<Signal<Value>> {
        let (root, segments) = parse_path(path)?;
        let signal = self.lookup(&root)?;
        if segments.is_empty() {
            return Some(signal);
        }
        Some(signal.map(move |value| walk(value, &segments)))
    }

    /// Every visible name, innermost first, without duplicates.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let mut scope = Some(self);
        while let Some(current) = scope {
            for name in current.inner.bindings.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            scope = current.inner.parent.as_ref();
        }
        names
    }

    /// Current values of every visible name, for expression hosts.
    pub fn snapshot(&self) -> serde_json::Map<String, Value> {
        self.names()
            .into_iter()
            .filter_map(|name| self.lookup(&name).map(|signal| (name, signal.get())))
            .collect()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("names", &self.names()).finish()
    }
}
