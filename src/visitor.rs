use std::collections::BTreeSet;

use crate::codegen::{ElementInstruction, Instruction, Operation, SwitchCase};
use crate::commands::ForBinding;
use crate::generators::ValueSource;

/// The InstructionVisitor trait is the single traversal mechanism for instruction trees.
///
/// Rules:
/// 1. Traversal order is document order.
/// 2. Implementers override `visit_*` methods to add behavior.
/// 3. Implementers MUST call the matching `walk_*` function to continue traversal unless pruning is intended.
pub trait InstructionVisitor {
    fn visit_instructions(&mut self, instructions: &[Instruction]) {
        for instruction in instructions {
            self.visit_instruction(instruction);
        }
    }

    fn visit_instruction(&mut self, instruction: &Instruction) {
        walk_instruction(self, instruction);
    }

    fn visit_element(&mut self, element: &ElementInstruction) {
        walk_element(self, element);
    }

    fn visit_operation(&mut self, operation: &Operation) {
        if let Some(source) = operation.source() {
            self.visit_source(source);
        }
    }

    fn visit_source(&mut self, _source: &ValueSource) {
        // Leaf, nothing to walk by default
    }

    fn visit_for_loop(&mut self, binding: &ForBinding, body: &Instruction) {
        walk_for_loop(self, binding, body);
    }

    fn visit_switch_case(&mut self, case: &SwitchCase) {
        self.visit_instruction(&case.body);
    }
}

pub fn walk_instruction<V: InstructionVisitor + ?Sized>(visitor: &mut V, instruction: &Instruction) {
    match instruction {
        Instruction::Element(element) => visitor.visit_element(element),
        Instruction::Text { .. } => {}
        Instruction::DynamicText { source } => visitor.visit_source(source),
        Instruction::Conditional { condition, body } => {
            visitor.visit_source(condition);
            visitor.visit_instruction(body);
        }
        Instruction::ForLoop { binding, body } => visitor.visit_for_loop(binding, body),
        Instruction::Switch {
            value,
            cases,
            default,
        } => {
            visitor.visit_source(value);
            for case in cases {
                visitor.visit_switch_case(case);
            }
            if let Some(default) = default {
                visitor.visit_instruction(default);
            }
        }
    }
}

pub fn walk_element<V: InstructionVisitor + ?Sized>(visitor: &mut V, element: &ElementInstruction) {
    for operation in &element.operations {
        visitor.visit_operation(operation);
    }
    visitor.visit_instructions(&element.children);
}

pub fn walk_for_loop<V: InstructionVisitor + ?Sized>(
    visitor: &mut V,
    binding: &ForBinding,
    body: &Instruction,
) {
    visitor.visit_source(&binding.iterable);
    visitor.visit_instruction(body);
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYMBOL COLLECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Finds reference roots not bound by an enclosing loop.
#[derive(Default)]
struct SymbolCollector {
    bound: Vec<String>,
    symbols: BTreeSet<String>,
    requires_host: bool,
}

impl InstructionVisitor for SymbolCollector {
    fn visit_operation(&mut self, operation: &Operation) {
        match operation {
            Operation::Listen { .. } => self.requires_host = true,
            other => {
                if let Some(source) = other.source() {
                    self.visit_source(source);
                }
            }
        }
    }

    fn visit_source(&mut self, source: &ValueSource) {
        match source {
            ValueSource::Expression(_) => self.requires_host = true,
            ValueSource::Reference(_) => {
                if let Some(root) = source.root() {
                    if !self.bound.iter().any(|name| name == root) {
                        self.symbols.insert(root.to_string());
                    }
                }
            }
        }
    }

    fn visit_for_loop(&mut self, binding: &ForBinding, body: &Instruction) {
        self.visit_source(&binding.iterable);
        let depth = self.bound.len();
        self.bound
            .extend(binding.bound_names().map(str::to_string));
        self.visit_instruction(body);
        self.bound.truncate(depth);
    }
}

pub fn collect_symbols(instructions: &[Instruction]) -> (BTreeSet<String>, bool) {
    let mut collector = SymbolCollector::default();
    collector.visit_instructions(instructions);
    (collector.symbols, collector.requires_host)
}
