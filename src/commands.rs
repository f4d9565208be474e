//! Structural commands (`*if`, `*for`, `*switch`, `*switch-case`, `*switch-default`).
//!
//! Commands are claimed by the first registered [`CommandParser`] whose
//! `matches` accepts the command name. Wrapping commands are applied from the
//! lowest priority outward, so the highest priority ends up outermost.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::codegen::Instruction;
use crate::generators::{AttributeGenerator, ValueSource};
use crate::validate::{
    CompilerError, SourceOrigin, ERR_INVALID_FOR, ERR_UNKNOWN_LOOP_VARIABLE, LOOP_LOCALS,
};

pub const IF_PRIORITY: i32 = 200;
pub const FOR_PRIORITY: i32 = 100;
pub const SWITCH_PRIORITY: i32 = 0;
pub const SWITCH_ARM_PRIORITY: i32 = 300;

lazy_static! {
    static ref FOR_HEAD_RE: Regex =
        Regex::new(r"^\s*let\s+([A-Za-z_$][\w$]*)\s+of\s+(\S.*?)\s*$").unwrap();
    static ref FOR_AS_RE: Regex =
        Regex::new(r"^\s*([A-Za-z_$][\w$]*)\s+as\s+([A-Za-z_$][\w$]*)\s*$").unwrap();
    static ref FOR_LET_RE: Regex =
        Regex::new(r"^\s*let\s+([A-Za-z_$][\w$]*)\s*=\s*([A-Za-z_$][\w$]*)\s*$").unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// FOR EXPRESSION GRAMMAR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopAlias {
    /// Loop-local variable being aliased (`index`).
    pub local: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForBinding {
    pub item: String,
    pub iterable: ValueSource,
    pub aliases: Vec<LoopAlias>,
}

impl ForBinding {
    /// Names the loop body can see in addition to the outer scope.
    pub fn bound_names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.item.as_str()).chain(self.aliases.iter().map(|a| a.alias.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForSyntaxError {
    Malformed { fragment: String, reason: String },
    UnknownLocal { fragment: String, name: String },
}

impl ForSyntaxError {
    fn code(&self) -> &'static str {
        match self {
            ForSyntaxError::Malformed { .. } => ERR_INVALID_FOR,
            ForSyntaxError::UnknownLocal { .. } => ERR_UNKNOWN_LOOP_VARIABLE,
        }
    }

    fn message(&self) -> String {
        match self {
            ForSyntaxError::Malformed { fragment, reason } => {
                format!("Invalid loop expression at `{}`: {}", fragment, reason)
            }
            ForSyntaxError::UnknownLocal { fragment, name } => format!(
                "Unknown loop variable `{}` in `{}`; expected one of: {}",
                name,
                fragment,
                LOOP_LOCALS.join(", ")
            ),
        }
    }
}

/// Parses `let <item> of <iterable>[; <name> as <alias> | ; let <alias> = <name>]*`.
pub fn parse_for_expression(code: &str, expression: bool) -> Result<ForBinding, ForSyntaxError> {
    let mut clauses = code.split(';');
    let head = clauses.next().unwrap_or_default();
    let caps = FOR_HEAD_RE
        .captures(head)
        .ok_or_else(|| ForSyntaxError::Malformed {
            fragment: head.trim().to_string(),
            reason: "expected `let <item> of <iterable>`".to_string(),
        })?;

    let iterable = caps[2].to_string();
    let mut binding = ForBinding {
        item: caps[1].to_string(),
        iterable: if expression {
            ValueSource::Expression(iterable)
        } else {
            ValueSource::Reference(iterable)
        },
        aliases: Vec::new(),
    };

    for clause in clauses {
        if clause.trim().is_empty() {
            continue;
        }
        let (local, alias) = if let Some(caps) = FOR_AS_RE.captures(clause) {
            (caps[1].to_string(), caps[2].to_string())
        } else if let Some(caps) = FOR_LET_RE.captures(clause) {
            (caps[2].to_string(), caps[1].to_string())
        } else {
            return Err(ForSyntaxError::Malformed {
                fragment: clause.trim().to_string(),
                reason: "expected `<name> as <alias>` or `let <alias> = <name>`".to_string(),
            });
        };

        if !LOOP_LOCALS.contains(&local.as_str()) {
            return Err(ForSyntaxError::UnknownLocal {
                fragment: clause.trim().to_string(),
                name: local,
            });
        }
        binding.aliases.push(LoopAlias { local, alias });
    }

    Ok(binding)
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND GENERATORS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum CommandGenerator {
    If {
        attr: AttributeGenerator,
        condition: ValueSource,
    },
    For {
        attr: AttributeGenerator,
        binding: ForBinding,
    },
    Switch {
        attr: AttributeGenerator,
        value: ValueSource,
    },
    SwitchCase {
        attr: AttributeGenerator,
        value: serde_json::Value,
    },
    SwitchDefault {
        attr: AttributeGenerator,
    },
}

/// How an element takes part in its parent's switch.
#[derive(Debug, Clone, PartialEq)]
pub enum SwitchArm {
    Case(serde_json::Value),
    Default,
}

impl CommandGenerator {
    pub fn name(&self) -> &'static str {
        match self {
            CommandGenerator::If { .. } => "if",
            CommandGenerator::For { .. } => "for",
            CommandGenerator::Switch { .. } => "switch",
            CommandGenerator::SwitchCase { .. } => "switch-case",
            CommandGenerator::SwitchDefault { .. } => "switch-default",
        }
    }

    pub fn priority(&self) -> i32 {
        match self {
            CommandGenerator::If { .. } => IF_PRIORITY,
            CommandGenerator::For { .. } => FOR_PRIORITY,
            CommandGenerator::Switch { .. } => SWITCH_PRIORITY,
            CommandGenerator::SwitchCase { .. } | CommandGenerator::SwitchDefault { .. } => {
                SWITCH_ARM_PRIORITY
            }
        }
    }

    pub fn attribute(&self) -> &AttributeGenerator {
        match self {
            CommandGenerator::If { attr, .. }
            | CommandGenerator::For { attr, .. }
            | CommandGenerator::Switch { attr, .. }
            | CommandGenerator::SwitchCase { attr, .. }
            | CommandGenerator::SwitchDefault { attr } => attr,
        }
    }

    /// Whether the command wraps its element's instructions.
    pub fn is_wrapper(&self) -> bool {
        matches!(self, CommandGenerator::If { .. } | CommandGenerator::For { .. })
    }

    pub fn switch_arm(&self) -> Option<SwitchArm> {
        match self {
            CommandGenerator::SwitchCase { value, .. } => Some(SwitchArm::Case(value.clone())),
            CommandGenerator::SwitchDefault { .. } => Some(SwitchArm::Default),
            _ => None,
        }
    }

    pub fn wrap(&self, inner: Instruction) -> Instruction {
        match self {
            CommandGenerator::If { condition, .. } => Instruction::Conditional {
                condition: condition.clone(),
                body: Box::new(inner),
            },
            CommandGenerator::For { binding, .. } => Instruction::ForLoop {
                binding: binding.clone(),
                body: Box::new(inner),
            },
            _ => inner,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMMAND PARSERS
// ═══════════════════════════════════════════════════════════════════════════════

pub trait CommandParser: Send + Sync {
    fn name(&self) -> &str;

    fn matches(&self, command: &str) -> bool {
        command == self.name()
    }

    fn parse(
        &self,
        attr: AttributeGenerator,
        origin: &SourceOrigin,
    ) -> Result<CommandGenerator, CompilerError>;
}

pub struct IfCommand;

impl CommandParser for IfCommand {
    fn name(&self) -> &str {
        "if"
    }

    fn parse(
        &self,
        attr: AttributeGenerator,
        _origin: &SourceOrigin,
    ) -> Result<CommandGenerator, CompilerError> {
        Ok(CommandGenerator::If {
            condition: attr.value_source(),
            attr,
        })
    }
}

pub struct ForCommand;

impl CommandParser for ForCommand {
    fn name(&self) -> &str {
        "for"
    }

    fn parse(
        &self,
        attr: AttributeGenerator,
        origin: &SourceOrigin,
    ) -> Result<CommandGenerator, CompilerError> {
        let expression = attr
            .modifiers
            .contains(crate::generators::Modifier::Expression);
        match parse_for_expression(&attr.value, expression) {
            Ok(binding) => Ok(CommandGenerator::For { attr, binding }),
            Err(e) => Err(CompilerError::at(e.code(), &e.message(), origin, &attr.range)
                .with_hint("let item of items; index as i")),
        }
    }
}

pub struct SwitchCommand;

impl CommandParser for SwitchCommand {
    fn name(&self) -> &str {
        "switch"
    }

    fn parse(
        &self,
        attr: AttributeGenerator,
        _origin: &SourceOrigin,
    ) -> Result<CommandGenerator, CompilerError> {
        Ok(CommandGenerator::Switch {
            value: attr.value_source(),
            attr,
        })
    }
}

pub struct SwitchCaseCommand;

impl CommandParser for SwitchCaseCommand {
    fn name(&self) -> &str {
        "switch-case"
    }

    fn parse(
        &self,
        attr: AttributeGenerator,
        _origin: &SourceOrigin,
    ) -> Result<CommandGenerator, CompilerError> {
        let trimmed = attr.value.trim();
        let value = serde_json::from_str(trimmed)
            .unwrap_or_else(|_| serde_json::Value::String(trimmed.to_string()));
        Ok(CommandGenerator::SwitchCase { attr, value })
    }
}

pub struct SwitchDefaultCommand;

impl CommandParser for SwitchDefaultCommand {
    fn name(&self) -> &str {
        "switch-default"
    }

    fn parse(
        &self,
        attr: AttributeGenerator,
        _origin: &SourceOrigin,
    ) -> Result<CommandGenerator, CompilerError> {
        Ok(CommandGenerator::SwitchDefault { attr })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// REGISTRY
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered set of command parsers active for a compilation.
#[derive(Clone)]
pub struct ParserRegistry {
    commands: Vec<Arc<dyn CommandParser>>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self {
            commands: vec![
                Arc::new(IfCommand),
                Arc::new(ForCommand),
                Arc::new(SwitchCaseCommand),
                Arc::new(SwitchDefaultCommand),
                Arc::new(SwitchCommand),
            ],
        }
    }
}

impl ParserRegistry {
    pub fn empty() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub fn register(&mut self, parser: impl CommandParser + 'static) -> &mut Self {
        self.commands.push(Arc::new(parser));
        self
    }

    pub fn find(&self, command: &str) -> Option<&dyn CommandParser> {
        self.commands
            .iter()
            .find(|p| p.matches(command))
            .map(|p| p.as_ref())
    }

    pub fn names(&self) -> Vec<&str> {
        self.commands.iter().map(|p| p.name()).collect()
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("commands", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_expression_basic() {
        let binding = parse_for_expression("let item of items", false).unwrap();
        assert_eq!(binding.item, "item");
        assert_eq!(binding.iterable, ValueSource::Reference("items".into()));
        assert!(binding.aliases.is_empty());
    }

    #[test]
    fn test_for_expression_aliases() {
        let binding =
            parse_for_expression("let row of table.rows; index as i; let n = index;", false)
                .unwrap();
        assert_eq!(binding.iterable, ValueSource::Reference("table.rows".into()));
        assert_eq!(
            binding.aliases,
            vec![
                LoopAlias {
                    local: "index".into(),
                    alias: "i".into()
                },
                LoopAlias {
                    local: "index".into(),
                    alias: "n".into()
                },
            ]
        );
        assert_eq!(binding.bound_names().collect::<Vec<_>>(), vec!["row", "i", "n"]);
    }

    #[test]
    fn test_for_expression_unknown_local() {
        let err = parse_for_expression("let x of xs; count as c", false).unwrap_err();
        assert_eq!(
            err,
            ForSyntaxError::UnknownLocal {
                fragment: "count as c".into(),
                name: "count".into()
            }
        );
    }

    #[test]
    fn test_for_expression_malformed() {
        let err = parse_for_expression("x in xs", false).unwrap_err();
        assert!(matches!(err, ForSyntaxError::Malformed { ref fragment, .. } if fragment == "x in xs"));

        let err = parse_for_expression("let x of xs; index => i", false).unwrap_err();
        assert!(err.message().contains("index => i"));
    }

    #[test]
    fn test_registry_order() {
        let registry = ParserRegistry::default();
        assert_eq!(registry.find("switch-case").unwrap().name(), "switch-case");
        assert_eq!(registry.find("switch").unwrap().name(), "switch");
        assert!(registry.find("repeat").is_none());
    }
}
