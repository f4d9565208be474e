//! Codegen module
//!
//! Lowers the parsed template into an immutable instruction tree. There is no
//! textual code generation: `render.rs` interprets the tree directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::commands::{CommandGenerator, ForBinding, ParserRegistry, SwitchArm};
use crate::generators::{DirectiveGenerator, EventGenerator, StaticGenerator, ValueSource};
use crate::grammar::{classify_attribute, ClassifiedAttribute};
use crate::parse::{parse_template, CompileOptions};
use crate::validate::{
    check_unique_commands, CompilerError, ElementNode, SourceOrigin, SourceRange, TemplateNode,
    ERR_DUPLICATE_SWITCH_DEFAULT, ERR_ORPHAN_SWITCH_ARM,
};
use crate::visitor::collect_symbols;

// ═══════════════════════════════════════════════════════════════════════════════
// INSTRUCTION TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// Produces exactly one node (an element, a text node or a container).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Instruction {
    Element(ElementInstruction),
    Text {
        value: String,
    },
    DynamicText {
        source: ValueSource,
    },
    Conditional {
        condition: ValueSource,
        body: Box<Instruction>,
    },
    ForLoop {
        binding: ForBinding,
        body: Box<Instruction>,
    },
    Switch {
        value: ValueSource,
        cases: Vec<SwitchCase>,
        default: Option<Box<Instruction>>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementInstruction {
    pub tag: String,
    /// Static attributes, then property bindings, then directives, then events.
    pub operations: Vec<Operation>,
    pub children: Vec<Instruction>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwitchCase {
    pub value: serde_json::Value,
    pub body: Instruction,
}

/// Applies one aspect of an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
    SetAttribute {
        name: String,
        value: String,
    },
    BindProperty {
        name: String,
        source: ValueSource,
    },
    BindClass {
        name: String,
        source: ValueSource,
    },
    BindClassList {
        source: ValueSource,
    },
    BindStyle {
        name: String,
        unit: Option<String>,
        source: ValueSource,
    },
    BindStyleMap {
        source: ValueSource,
    },
    BindAttribute {
        name: String,
        source: ValueSource,
    },
    BindAttributeMap {
        source: ValueSource,
    },
    Listen {
        event: String,
        handler: String,
    },
}

impl Operation {
    pub fn source(&self) -> Option<&ValueSource> {
        match self {
            Operation::BindProperty { source, .. }
            | Operation::BindClass { source, .. }
            | Operation::BindClassList { source }
            | Operation::BindStyle { source, .. }
            | Operation::BindStyleMap { source }
            | Operation::BindAttribute { source, .. }
            | Operation::BindAttributeMap { source } => Some(source),
            Operation::SetAttribute { .. } | Operation::Listen { .. } => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROGRAM
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub file: String,
    pub instructions: Vec<Instruction>,
    /// Free reference roots the symbol resolver must answer.
    pub symbols: BTreeSet<String>,
    /// The program evaluates expressions or listens to events.
    pub requires_host: bool,
}

impl Program {
    pub fn compile(markup: &str, options: &CompileOptions) -> Result<Self, CompilerError> {
        Self::compile_with(markup, options, &ParserRegistry::default())
    }

    pub fn compile_with(
        markup: &str,
        options: &CompileOptions,
        registry: &ParserRegistry,
    ) -> Result<Self, CompilerError> {
        let template = parse_template(markup, options)?;
        let emitter = Emitter {
            registry,
            origin: SourceOrigin::new(&options.file_path, markup),
        };

        let mut instructions = Vec::new();
        for emitted in emitter.emit_nodes(&template.nodes)? {
            if let Some((_, range)) = emitted.arm {
                return Err(emitter.orphan_arm(&range));
            }
            instructions.push(emitted.instruction);
        }

        let (symbols, requires_host) = collect_symbols(&instructions);
        Ok(Program {
            file: options.file_path.clone(),
            instructions,
            symbols,
            requires_host,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EMITTER
// ═══════════════════════════════════════════════════════════════════════════════

struct Emitted {
    instruction: Instruction,
    arm: Option<(SwitchArm, SourceRange)>,
}

struct Emitter<'a> {
    registry: &'a ParserRegistry,
    origin: SourceOrigin,
}

impl Emitter<'_> {
    fn emit_nodes(&self, nodes: &[TemplateNode]) -> Result<Vec<Emitted>, CompilerError> {
        nodes.iter().map(|node| self.emit_node(node)).collect()
    }

    fn emit_node(&self, node: &TemplateNode) -> Result<Emitted, CompilerError> {
        let instruction = match node {
            TemplateNode::Text(text) => Instruction::Text {
                value: text.value.clone(),
            },
            TemplateNode::Interpolation(interp) => Instruction::DynamicText {
                source: if interp.raw {
                    ValueSource::Expression(interp.code.clone())
                } else {
                    ValueSource::Reference(interp.code.clone())
                },
            },
            TemplateNode::Element(element) => return self.emit_element(element),
        };
        Ok(Emitted {
            instruction,
            arm: None,
        })
    }

    fn emit_element(&self, element: &ElementNode) -> Result<Emitted, CompilerError> {
        let mut statics: Vec<StaticGenerator> = Vec::new();
        let mut directives: Vec<DirectiveGenerator> = Vec::new();
        let mut events: Vec<EventGenerator> = Vec::new();
        let mut commands: Vec<CommandGenerator> = Vec::new();

        for attr in &element.attributes {
            match classify_attribute(attr, self.registry, &self.origin)? {
                ClassifiedAttribute::Static(s) => statics.push(s),
                ClassifiedAttribute::Directive(d) => directives.push(d),
                ClassifiedAttribute::Event(e) => events.push(e),
                ClassifiedAttribute::Command(c) => commands.push(c),
            }
        }

        check_unique_commands(
            commands.iter().map(|c| (c.name(), &c.attribute().range)),
            &self.origin,
        )?;

        // Property bindings run before class/style/attribute directives.
        directives.sort_by_key(|d| !d.is_property());

        let operations = statics
            .iter()
            .map(StaticGenerator::emit)
            .chain(directives.iter().map(DirectiveGenerator::emit))
            .chain(events.iter().map(EventGenerator::emit))
            .collect();

        let children = self.emit_nodes(&element.children)?;
        let switch = commands.iter().find_map(|c| match c {
            CommandGenerator::Switch { value, .. } => Some(value.clone()),
            _ => None,
        });
        let children = match switch {
            Some(value) => self.lower_switch(value, children)?,
            None => children
                .into_iter()
                .map(|child| match child.arm {
                    Some((_, range)) => Err(self.orphan_arm(&range)),
                    None => Ok(child.instruction),
                })
                .collect::<Result<Vec<_>, _>>()?,
        };

        let mut instruction = Instruction::Element(ElementInstruction {
            tag: element.tag.clone(),
            operations,
            children,
        });

        let mut wrappers: Vec<&CommandGenerator> =
            commands.iter().filter(|c| c.is_wrapper()).collect();
        wrappers.sort_by_key(|c| c.priority());
        for command in wrappers {
            instruction = command.wrap(instruction);
        }

        let arm = commands
            .iter()
            .find_map(|c| c.switch_arm().map(|arm| (arm, c.attribute().range.clone())));

        Ok(Emitted { instruction, arm })
    }

    /// Collects switch arms among `children` into one `Switch` instruction,
    /// placed where the first arm appeared.
    fn lower_switch(
        &self,
        value: ValueSource,
        children: Vec<Emitted>,
    ) -> Result<Vec<Instruction>, CompilerError> {
        let mut lowered = Vec::new();
        let mut slot = None;
        let mut cases = Vec::new();
        let mut default = None;

        for child in children {
            match child.arm {
                None => lowered.push(child.instruction),
                Some((arm, range)) => {
                    slot.get_or_insert(lowered.len());
                    match arm {
                        SwitchArm::Case(value) => cases.push(SwitchCase {
                            value,
                            body: child.instruction,
                        }),
                        SwitchArm::Default => {
                            if default.is_some() {
                                return Err(CompilerError::at(
                                    ERR_DUPLICATE_SWITCH_DEFAULT,
                                    "A switch has more than one `switch-default` arm.",
                                    &self.origin,
                                    &range,
                                ));
                            }
                            default = Some(Box::new(child.instruction));
                        }
                    }
                }
            }
        }

        let at = slot.unwrap_or(lowered.len());
        lowered.insert(
            at,
            Instruction::Switch {
                value,
                cases,
                default,
            },
        );
        Ok(lowered)
    }

    fn orphan_arm(&self, range: &SourceRange) -> CompilerError {
        CompilerError::at(
            ERR_ORPHAN_SWITCH_ARM,
            "Switch arm outside of a `*switch` element.",
            &self.origin,
            range,
        )
    }
}
