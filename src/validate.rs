use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_PARSE: &str = "PARSE_ERROR";
pub const ERR_UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
pub const ERR_INVALID_FOR: &str = "INVALID_FOR_EXPRESSION";
pub const ERR_UNKNOWN_LOOP_VARIABLE: &str = "UNKNOWN_LOOP_VARIABLE";
pub const ERR_INVALID_DIRECTIVE: &str = "INVALID_DIRECTIVE";
pub const ERR_INVALID_EVENT: &str = "INVALID_EVENT";
pub const ERR_DUPLICATE_COMMAND: &str = "DUPLICATE_COMMAND";
pub const ERR_ORPHAN_SWITCH_ARM: &str = "ORPHAN_SWITCH_ARM";
pub const ERR_DUPLICATE_SWITCH_DEFAULT: &str = "DUPLICATE_SWITCH_DEFAULT";

// ═══════════════════════════════════════════════════════════════════════════════
// GUARANTEES
// ═══════════════════════════════════════════════════════════════════════════════

fn get_guarantee(code: &str) -> &'static str {
    match code {
        ERR_PARSE => "Templates are parsed with HTML5 fragment rules before lowering.",
        ERR_UNKNOWN_COMMAND => "Every `*name` attribute is claimed by a registered command parser.",
        ERR_INVALID_FOR => "Loop commands follow `let <item> of <iterable>[; <name> as <alias>]*`.",
        ERR_UNKNOWN_LOOP_VARIABLE => "Loop aliases may only refer to loop-local variables (`index`).",
        ERR_INVALID_DIRECTIVE => {
            "Class, style and attribute directives name a valid identifier or the spread form."
        }
        ERR_INVALID_EVENT => "Event hookups name the event they listen to.",
        ERR_DUPLICATE_COMMAND => "An element carries each command at most once.",
        ERR_ORPHAN_SWITCH_ARM => {
            "`switch-case` and `switch-default` are direct children of a `*switch` element."
        }
        ERR_DUPLICATE_SWITCH_DEFAULT => "A switch selects at most one default arm.",
        _ => "Unknown invariant.",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// COMPILER ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "camelCase")]
#[error("[{code}] {message} ({file}:{line}:{column})")]
pub struct CompilerError {
    pub code: String,
    pub message: String,
    pub guarantee: String,
    pub file: String,
    pub line: u32,
    pub column: u32,
    /// Byte offset of the offending markup inside `markup`.
    pub offset: usize,
    /// The full markup being compiled, when known.
    pub markup: Option<String>,
    /// The offending markup substring.
    pub context: Option<String>,
    pub hints: Vec<String>,
}

impl CompilerError {
    pub fn new(code: &str, message: &str, file: &str, line: u32, column: u32) -> Self {
        Self::with_details(code, message, file, line, column, None, vec![])
    }

    pub fn with_details(
        code: &str,
        message: &str,
        file: &str,
        line: u32,
        column: u32,
        context: Option<String>,
        hints: Vec<String>,
    ) -> Self {
        CompilerError {
            code: code.to_string(),
            message: message.to_string(),
            guarantee: get_guarantee(code).to_string(),
            file: file.to_string(),
            line,
            column,
            offset: 0,
            markup: None,
            context,
            hints,
        }
    }

    /// Builds an error pointing at a source range of the markup being compiled.
    pub fn at(code: &str, message: &str, origin: &SourceOrigin, range: &SourceRange) -> Self {
        let mut error = Self::with_details(
            code,
            message,
            &origin.file,
            range.location.line,
            range.location.column,
            origin.markup.get(range.start..range.end).map(str::to_string),
            vec![],
        );
        error.offset = range.start;
        error.markup = Some(origin.markup.to_string());
        error
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }
}

/// Markup and file name errors are reported against.
#[derive(Debug, Clone, Default)]
pub struct SourceOrigin {
    pub file: String,
    pub markup: std::sync::Arc<str>,
}

impl SourceOrigin {
    pub fn new(file: &str, markup: &str) -> Self {
        Self {
            file: file.to_string(),
            markup: markup.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// IR TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl SourceLocation {
    /// 1-based line/column of a byte offset.
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let mut line = 1;
        let mut line_start = 0;
        for (i, b) in source.as_bytes()[..offset].iter().enumerate() {
            if *b == b'\n' {
                line += 1;
                line_start = i + 1;
            }
        }
        let column = source
            .get(line_start..offset)
            .map(|s| s.chars().count())
            .unwrap_or(0) as u32
            + 1;
        SourceLocation { line, column }
    }
}

/// Byte range of a construct in the original markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SourceRange {
    pub start: usize,
    pub end: usize,
    pub location: SourceLocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TemplateNode {
    Element(ElementNode),
    Text(TextNode),
    Interpolation(InterpolationNode),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementNode {
    pub tag: String,
    pub attributes: Vec<AttributeIR>,
    pub children: Vec<TemplateNode>,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttributeIR {
    pub name: String,
    pub value: String,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextNode {
    pub value: String,
}

/// `{{ reference }}` or `{{{ expression }}}` inside text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterpolationNode {
    pub code: String,
    pub raw: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateIR {
    pub raw: String,
    pub nodes: Vec<TemplateNode>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STRUCTURAL VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifiers a loop may alias.
pub const LOOP_LOCALS: &[&str] = &["index"];

/// Checks that a set of command names on one element carries no duplicates.
pub fn check_unique_commands<'a>(
    names: impl IntoIterator<Item = (&'a str, &'a SourceRange)>,
    origin: &SourceOrigin,
) -> Result<(), CompilerError> {
    let mut seen = HashSet::new();
    for (name, range) in names {
        if !seen.insert(name) {
            return Err(CompilerError::at(
                ERR_DUPLICATE_COMMAND,
                &format!("Command `{}` appears more than once on the same element.", name),
                origin,
                range,
            ));
        }
    }
    Ok(())
}
