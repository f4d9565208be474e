//! Attribute generators.
//!
//! One generator per parsed attribute. Each knows the operation it lowers to;
//! structural commands live in `commands.rs`.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::codegen::Operation;
use crate::validate::{
    CompilerError, SourceOrigin, SourceRange, ERR_INVALID_DIRECTIVE, ERR_INVALID_EVENT,
};

lazy_static! {
    static ref CLASS_NAME_RE: Regex = Regex::new(r"^-?[_a-zA-Z][_a-zA-Z0-9-]*$").unwrap();
    static ref STYLE_PROPERTY_RE: Regex = Regex::new(r"^(--)?-?[a-zA-Z][a-zA-Z0-9-]*$").unwrap();
    static ref STYLE_UNIT_RE: Regex = Regex::new(r"^([a-zA-Z]+|%)$").unwrap();
    static ref ATTRIBUTE_NAME_RE: Regex = Regex::new(r#"^[^\s"'>/=]+$"#).unwrap();
}

/// Units recognised at the end of a dash-separated style binding (`bind-style-width-px`).
const STYLE_UNITS: &[&str] = &[
    "px", "em", "rem", "%", "vh", "vw", "vmin", "vmax", "pt", "pc", "cm", "mm", "in", "ex", "ch",
    "s", "ms", "deg", "rad", "turn", "fr",
];

// ═══════════════════════════════════════════════════════════════════════════════
// MODIFIERS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Modifier {
    /// Written in the dash-prefixed form (`bind-`, `cmd-`, `on-`).
    Prefix,
    /// The value is a host expression rather than a value reference.
    Expression,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modifiers(BTreeSet<Modifier>);

impl Modifiers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, modifier: Modifier) -> Self {
        self.0.insert(modifier);
        self
    }

    pub fn insert(&mut self, modifier: Modifier) {
        self.0.insert(modifier);
    }

    pub fn contains(&self, modifier: Modifier) -> bool {
        self.0.contains(&modifier)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Modifier> for Modifiers {
    fn from_iter<I: IntoIterator<Item = Modifier>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// VALUE SOURCES
// ═══════════════════════════════════════════════════════════════════════════════

/// Where a binding reads its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "code", rename_all = "kebab-case")]
pub enum ValueSource {
    /// A dotted path resolved against the data scope (`user.name`, `rows[0]`).
    Reference(String),
    /// An opaque snippet handed to the expression host.
    Expression(String),
}

impl ValueSource {
    /// Root identifier of a reference (`user` for `user.name`).
    pub fn root(&self) -> Option<&str> {
        match self {
            ValueSource::Reference(path) => {
                let end = path.find(['.', '[']).unwrap_or(path.len());
                let root = path[..end].trim();
                (!root.is_empty()).then_some(root)
            }
            ValueSource::Expression(_) => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTE GENERATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeGenerator {
    /// Name with the binding/command/event syntax stripped.
    pub name: String,
    /// Name as written in the markup.
    pub raw_name: String,
    pub value: String,
    pub modifiers: Modifiers,
    pub range: SourceRange,
}

impl AttributeGenerator {
    pub fn value_source(&self) -> ValueSource {
        if self.modifiers.contains(Modifier::Expression) {
            ValueSource::Expression(self.value.clone())
        } else {
            ValueSource::Reference(self.value.trim().to_string())
        }
    }

    pub fn is_prefixed(&self) -> bool {
        self.modifiers.contains(Modifier::Prefix)
    }

    fn error(&self, code: &str, message: &str, origin: &SourceOrigin) -> CompilerError {
        CompilerError::at(code, message, origin, &self.range)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATIC & EVENT GENERATORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticGenerator {
    pub attr: AttributeGenerator,
}

impl StaticGenerator {
    pub fn emit(&self) -> Operation {
        Operation::SetAttribute {
            name: self.attr.raw_name.clone(),
            value: self.attr.value.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventGenerator {
    pub attr: AttributeGenerator,
}

impl EventGenerator {
    pub fn new(attr: AttributeGenerator, origin: &SourceOrigin) -> Result<Self, CompilerError> {
        if attr.name.trim().is_empty() {
            return Err(attr.error(ERR_INVALID_EVENT, "Event hookup names no event.", origin));
        }
        Ok(Self { attr })
    }

    pub fn emit(&self) -> Operation {
        Operation::Listen {
            event: self.attr.name.trim().to_string(),
            handler: self.attr.value.clone(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DIRECTIVE GENERATORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DirectiveGenerator {
    Property { attr: AttributeGenerator, property: String },
    Class { attr: AttributeGenerator, class: String },
    ClassList { attr: AttributeGenerator },
    Style {
        attr: AttributeGenerator,
        property: String,
        unit: Option<String>,
    },
    StyleMap { attr: AttributeGenerator },
    Attribute { attr: AttributeGenerator, name: String },
    AttributeMap { attr: AttributeGenerator },
}

impl DirectiveGenerator {
    /// Picks the directive for a binding name (`class.x`, `style...`, `title`).
    pub fn parse(attr: AttributeGenerator, origin: &SourceOrigin) -> Result<Self, CompilerError> {
        let (separator, spread) = if attr.is_prefixed() {
            ('-', "---")
        } else {
            ('.', "...")
        };
        let name = attr.name.clone();

        for kind in ["class", "style", "attr"] {
            if name.len() == kind.len() + spread.len()
                && name.starts_with(kind)
                && name.ends_with(spread)
            {
                return Ok(match kind {
                    "class" => DirectiveGenerator::ClassList { attr },
                    "style" => DirectiveGenerator::StyleMap { attr },
                    _ => DirectiveGenerator::AttributeMap { attr },
                });
            }

            let Some(rest) = name
                .strip_prefix(kind)
                .and_then(|r| r.strip_prefix(separator))
            else {
                continue;
            };

            return match kind {
                "class" => {
                    if !CLASS_NAME_RE.is_match(rest) {
                        return Err(attr.error(
                            ERR_INVALID_DIRECTIVE,
                            &format!("`{}` is not a valid class name.", rest),
                            origin,
                        ));
                    }
                    Ok(DirectiveGenerator::Class {
                        class: rest.to_string(),
                        attr,
                    })
                }
                "style" => {
                    let (property, unit) = split_style_unit(rest, separator);
                    if !STYLE_PROPERTY_RE.is_match(property) {
                        return Err(attr.error(
                            ERR_INVALID_DIRECTIVE,
                            &format!("`{}` is not a valid style property.", property),
                            origin,
                        ));
                    }
                    if let Some(unit) = unit {
                        if !STYLE_UNIT_RE.is_match(unit) {
                            return Err(attr.error(
                                ERR_INVALID_DIRECTIVE,
                                &format!("`{}` is not a valid style unit.", unit),
                                origin,
                            ));
                        }
                    }
                    Ok(DirectiveGenerator::Style {
                        property: property.to_string(),
                        unit: unit.map(str::to_string),
                        attr,
                    })
                }
                _ => {
                    if !ATTRIBUTE_NAME_RE.is_match(rest) {
                        return Err(attr.error(
                            ERR_INVALID_DIRECTIVE,
                            &format!("`{}` is not a valid attribute name.", rest),
                            origin,
                        ));
                    }
                    Ok(DirectiveGenerator::Attribute {
                        name: rest.to_string(),
                        attr,
                    })
                }
            };
        }

        if name.trim().is_empty() {
            return Err(attr.error(ERR_INVALID_DIRECTIVE, "Binding names no property.", origin));
        }
        Ok(DirectiveGenerator::Property {
            property: name,
            attr,
        })
    }

    pub fn attribute(&self) -> &AttributeGenerator {
        match self {
            DirectiveGenerator::Property { attr, .. }
            | DirectiveGenerator::Class { attr, .. }
            | DirectiveGenerator::ClassList { attr }
            | DirectiveGenerator::Style { attr, .. }
            | DirectiveGenerator::StyleMap { attr }
            | DirectiveGenerator::Attribute { attr, .. }
            | DirectiveGenerator::AttributeMap { attr } => attr,
        }
    }

    pub fn is_property(&self) -> bool {
        matches!(self, DirectiveGenerator::Property { .. })
    }

    pub fn emit(&self) -> Operation {
        let source = self.attribute().value_source();
        match self {
            DirectiveGenerator::Property { property, .. } => Operation::BindProperty {
                name: property.clone(),
                source,
            },
            DirectiveGenerator::Class { class, .. } => Operation::BindClass {
                name: class.clone(),
                source,
            },
            DirectiveGenerator::ClassList { .. } => Operation::BindClassList { source },
            DirectiveGenerator::Style { property, unit, .. } => Operation::BindStyle {
                name: property.clone(),
                unit: unit.clone(),
                source,
            },
            DirectiveGenerator::StyleMap { .. } => Operation::BindStyleMap { source },
            DirectiveGenerator::Attribute { name, .. } => Operation::BindAttribute {
                name: name.clone(),
                source,
            },
            DirectiveGenerator::AttributeMap { .. } => Operation::BindAttributeMap { source },
        }
    }
}

/// `width.px` / `width-px` → (`width`, Some(`px`)).
fn split_style_unit(rest: &str, separator: char) -> (&str, Option<&str>) {
    if separator == '.' {
        return match rest.split_once('.') {
            Some((property, unit)) => (property, Some(unit)),
            None => (rest, None),
        };
    }
    match rest.rsplit_once('-') {
        Some((property, unit)) if !property.is_empty() && STYLE_UNITS.contains(&unit) => {
            (property, Some(unit))
        }
        _ => (rest, None),
    }
}
