//! Parse Module
//!
//! Turns template markup into the `TemplateNode` IR. html5ever does the HTML5
//! fragment parsing; a light source scan runs alongside it so attributes keep
//! their original casing and every attribute knows where it came from.

use html5ever::tendril::TendrilSink;
use html5ever::{parse_fragment, LocalName, Namespace, ParseOpts, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use serde::{Deserialize, Serialize};

use crate::validate::{
    AttributeIR, CompilerError, ElementNode, InterpolationNode, SourceLocation, SourceRange,
    TemplateIR, TemplateNode, TextNode, ERR_PARSE,
};

pub(crate) const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompileOptions {
    /// Name used in diagnostics.
    pub file_path: String,
    /// Keep whitespace-only text nodes between elements.
    pub keep_whitespace: bool,
    /// Restore attribute casing from the source (HTML parsing lowercases names).
    pub restore_attribute_case: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            file_path: "<template>".to_string(),
            keep_whitespace: false,
            restore_attribute_case: true,
        }
    }
}

impl CompileOptions {
    pub fn for_file(file_path: impl Into<String>) -> Self {
        Self {
            file_path: file_path.into(),
            ..Self::default()
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE SCAN
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
struct TagSpan {
    tag: String,
    start: usize,
    end: usize,
    attributes: Vec<AttrSpan>,
}

#[derive(Debug, Clone)]
struct AttrSpan {
    name: String,
    start: usize,
    end: usize,
}

/// Elements whose content is text, so tags inside them are not tags.
const RAW_TEXT_ELEMENTS: &[&str] = &[
    "script", "style", "textarea", "title", "xmp", "iframe", "noembed", "noframes",
];

/// Records every start tag and its attributes with byte offsets, in source order.
fn scan_start_tags(markup: &str) -> Vec<TagSpan> {
    let lowered = markup.to_ascii_lowercase();
    let bytes = markup.as_bytes();
    let len = bytes.len();
    let mut tags = Vec::new();
    let mut i = 0;

    while i < len {
        if bytes[i] != b'<' {
            i += 1;
            continue;
        }
        if markup[i..].starts_with("<!--") {
            i = markup[i + 4..]
                .find("-->")
                .map(|p| i + 4 + p + 3)
                .unwrap_or(len);
            continue;
        }
        if i + 1 >= len || !bytes[i + 1].is_ascii_alphabetic() {
            i += 1;
            continue;
        }

        let tag_start = i;
        let mut j = i + 1;
        while j < len && !bytes[j].is_ascii_whitespace() && bytes[j] != b'>' && bytes[j] != b'/' {
            j += 1;
        }
        let tag = markup[tag_start + 1..j].to_ascii_lowercase();
        let mut attributes = Vec::new();

        loop {
            while j < len && (bytes[j].is_ascii_whitespace() || bytes[j] == b'/') {
                j += 1;
            }
            if j >= len || bytes[j] == b'>' {
                break;
            }

            let name_start = j;
            while j < len
                && !bytes[j].is_ascii_whitespace()
                && bytes[j] != b'>'
                && (bytes[j] != b'=' || j == name_start)
                && !(bytes[j] == b'/' && bytes.get(j + 1) == Some(&b'>'))
            {
                j += 1;
            }
            if j == name_start {
                j += 1;
                continue;
            }
            let name = markup[name_start..j].to_string();

            let mut k = j;
            while k < len && bytes[k].is_ascii_whitespace() {
                k += 1;
            }
            if k < len && bytes[k] == b'=' {
                k += 1;
                while k < len && bytes[k].is_ascii_whitespace() {
                    k += 1;
                }
                if k < len && (bytes[k] == b'"' || bytes[k] == b'\'') {
                    let quote = bytes[k];
                    k = markup[k + 1..]
                        .bytes()
                        .position(|b| b == quote)
                        .map(|p| k + 1 + p + 1)
                        .unwrap_or(len);
                } else {
                    while k < len && !bytes[k].is_ascii_whitespace() && bytes[k] != b'>' {
                        k += 1;
                    }
                }
                j = k;
            }

            attributes.push(AttrSpan {
                name,
                start: name_start,
                end: j,
            });
        }

        i = j + 1;
        if RAW_TEXT_ELEMENTS.contains(&tag.as_str()) && i < len {
            let close = format!("</{}", tag);
            i = lowered[i..].find(&close).map_or(len, |p| i + p);
        }
        tags.push(TagSpan {
            tag,
            start: tag_start,
            end: j.min(len),
            attributes,
        });
    }

    tags
}

/// Hands out scanned tags to DOM elements as the DOM is walked in document order.
struct SourceCursor<'a> {
    markup: &'a str,
    tags: Vec<TagSpan>,
    next: usize,
}

impl<'a> SourceCursor<'a> {
    fn new(markup: &'a str) -> Self {
        Self {
            markup,
            tags: scan_start_tags(markup),
            next: 0,
        }
    }

    /// Elements synthesized by the parser (implied `tbody` and friends) find no
    /// tag and leave the cursor where it was.
    fn claim(&mut self, tag: &str) -> Option<TagSpan> {
        let found = self.tags[self.next..]
            .iter()
            .position(|span| span.tag == tag)?;
        let index = self.next + found;
        self.next = index + 1;
        Some(self.tags[index].clone())
    }

    fn range(&self, start: usize, end: usize) -> SourceRange {
        SourceRange {
            start,
            end,
            location: SourceLocation::from_offset(self.markup, start),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// INTERPOLATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Splits text into alternating static and dynamic segments.
///
/// `{{{ code }}}` is checked before `{{ code }}`. An unterminated marker is kept
/// as literal text.
pub fn split_interpolations(text: &str) -> Vec<TemplateNode> {
    let mut nodes = Vec::new();
    let mut rest = text;

    fn push_text(nodes: &mut Vec<TemplateNode>, value: &str) {
        if value.is_empty() {
            return;
        }
        if let Some(TemplateNode::Text(last)) = nodes.last_mut() {
            last.value.push_str(value);
        } else {
            nodes.push(TemplateNode::Text(TextNode {
                value: value.to_string(),
            }));
        }
    }

    while let Some(at) = rest.find("{{") {
        let raw = rest[at..].starts_with("{{{");
        let (open, close) = if raw { ("{{{", "}}}") } else { ("{{", "}}") };
        let body_start = at + open.len();
        let Some(close_at) = rest[body_start..].find(close) else {
            break;
        };

        push_text(&mut nodes, &rest[..at]);
        let code = rest[body_start..body_start + close_at].trim();
        if code.is_empty() {
            push_text(&mut nodes, &rest[at..body_start + close_at + close.len()]);
        } else {
            nodes.push(TemplateNode::Interpolation(InterpolationNode {
                code: code.to_string(),
                raw,
            }));
        }
        rest = &rest[body_start + close_at + close.len()..];
    }

    push_text(&mut nodes, rest);
    nodes
}

// ═══════════════════════════════════════════════════════════════════════════════
// NODE LOWERING
// ═══════════════════════════════════════════════════════════════════════════════

fn lower_children(
    handle: &Handle,
    cursor: &mut SourceCursor<'_>,
    options: &CompileOptions,
) -> Vec<TemplateNode> {
    let children = handle.children.borrow();
    let mut nodes = Vec::new();
    for child in children.iter() {
        nodes.extend(lower_node(child, cursor, options));
    }
    nodes
}

fn lower_node(
    handle: &Handle,
    cursor: &mut SourceCursor<'_>,
    options: &CompileOptions,
) -> Vec<TemplateNode> {
    match &handle.data {
        NodeData::Document => lower_children(handle, cursor, options),

        NodeData::Text { contents } => {
            let text = contents.borrow().to_string();
            if !options.keep_whitespace && text.trim().is_empty() {
                return vec![];
            }
            split_interpolations(&text)
        }

        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let tag = name.local.to_string();
            let span = cursor.claim(&tag);
            let range = match &span {
                Some(span) => cursor.range(span.start, span.end),
                None => SourceRange::default(),
            };

            let mut attributes = Vec::new();
            for attr in attrs.borrow().iter() {
                let dom_name = attr.name.local.to_string();
                let source = span.as_ref().and_then(|span| {
                    span.attributes
                        .iter()
                        .find(|a| a.name.eq_ignore_ascii_case(&dom_name))
                });
                let (name, attr_range) = match source {
                    Some(a) => {
                        let name = if options.restore_attribute_case {
                            a.name.clone()
                        } else {
                            dom_name
                        };
                        (name, cursor.range(a.start, a.end))
                    }
                    None => (dom_name, range.clone()),
                };
                attributes.push(AttributeIR {
                    name,
                    value: attr.value.to_string(),
                    range: attr_range,
                });
            }

            // `<template>` content lives outside the regular child list.
            let children = match template_contents.borrow().as_ref() {
                Some(contents) => lower_children(contents, cursor, options),
                None => lower_children(handle, cursor, options),
            };

            vec![TemplateNode::Element(ElementNode {
                tag,
                attributes,
                children,
                range,
            })]
        }

        NodeData::Doctype { .. }
        | NodeData::Comment { .. }
        | NodeData::ProcessingInstruction { .. } => vec![],
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN PARSING FUNCTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Parse template markup into the template IR.
pub fn parse_template(markup: &str, options: &CompileOptions) -> Result<TemplateIR, CompilerError> {
    let context = QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from("body"));
    let dom = parse_fragment(RcDom::default(), ParseOpts::default(), context, vec![])
        .from_utf8()
        .read_from(&mut markup.as_bytes())
        .map_err(|e| {
            CompilerError::new(
                ERR_PARSE,
                &format!("Failed to parse template: {}", e),
                &options.file_path,
                0,
                0,
            )
        })?;

    let mut cursor = SourceCursor::new(markup);
    let mut nodes = Vec::new();

    // Fragment parsing roots everything under a synthetic <html> element.
    for child in dom.document.children.borrow().iter() {
        match &child.data {
            NodeData::Element { name, .. } if &*name.local == "html" => {
                nodes.extend(lower_children(child, &mut cursor, options));
            }
            _ => nodes.extend(lower_node(child, &mut cursor, options)),
        }
    }

    Ok(TemplateIR {
        raw: markup.to_string(),
        nodes,
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn element(node: &TemplateNode) -> &ElementNode {
        match node {
            TemplateNode::Element(el) => el,
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_scan_start_tags() {
        let tags = scan_start_tags(r#"<!-- <p x> --><div [Title]="t" *if='a > b'><br/></div>"#);
        assert_eq!(tags.len(), 2);
        assert_eq!(tags[0].tag, "div");
        assert_eq!(tags[0].attributes.len(), 2);
        assert_eq!(tags[0].attributes[0].name, "[Title]");
        assert_eq!(tags[0].attributes[1].name, "*if");
        assert_eq!(tags[1].tag, "br");
        assert!(tags[1].attributes.is_empty());
    }

    #[test]
    fn test_scan_skips_raw_text_content() {
        let tags = scan_start_tags(r#"<STYLE>a<b{}</style><textarea><div id="x"></TextArea><div [Title]="t">"#);
        let names: Vec<&str> = tags.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names, vec!["style", "textarea", "div"]);
        assert_eq!(tags[2].attributes[0].name, "[Title]");
    }

    #[test]
    fn test_split_interpolations() {
        let nodes = split_interpolations("Hello {{ user.name }}, {{{ 1 + 2 }}}!");
        assert_eq!(nodes.len(), 5);
        assert_eq!(
            nodes[1],
            TemplateNode::Interpolation(InterpolationNode {
                code: "user.name".into(),
                raw: false
            })
        );
        assert_eq!(
            nodes[3],
            TemplateNode::Interpolation(InterpolationNode {
                code: "1 + 2".into(),
                raw: true
            })
        );
        assert_eq!(
            nodes[4],
            TemplateNode::Text(TextNode { value: "!".into() })
        );
    }

    #[test]
    fn test_unterminated_interpolation_is_text() {
        let nodes = split_interpolations("a {{ b");
        assert_eq!(
            nodes,
            vec![TemplateNode::Text(TextNode {
                value: "a {{ b".into()
            })]
        );
    }

    #[test]
    fn test_parse_restores_attribute_case() {
        let ir = parse_template(
            r#"<div [innerHTML]="html" (click)="go()"></div>"#,
            &CompileOptions::default(),
        )
        .unwrap();
        let div = element(&ir.nodes[0]);
        assert_eq!(div.tag, "div");
        assert_eq!(div.attributes[0].name, "[innerHTML]");
        assert_eq!(div.attributes[0].value, "html");
        assert_eq!(div.attributes[1].name, "(click)");
        assert_eq!(div.attributes[0].range.start, 5);
    }

    #[test]
    fn test_parse_drops_whitespace_text() {
        let ir = parse_template("<ul>\n  <li>a</li>\n  <li>b</li>\n</ul>", &CompileOptions::default())
            .unwrap();
        let ul = element(&ir.nodes[0]);
        assert_eq!(ul.children.len(), 2);

        let options = CompileOptions {
            keep_whitespace: true,
            ..CompileOptions::default()
        };
        let ir = parse_template("<ul>\n  <li>a</li>\n</ul>", &options).unwrap();
        assert_eq!(element(&ir.nodes[0]).children.len(), 3);
    }

    #[test]
    fn test_parse_attribute_locations() {
        let markup = "<section>\n  <p *for=\"let x of xs\">{{ x }}</p>\n</section>";
        let ir = parse_template(markup, &CompileOptions::default()).unwrap();
        let section = element(&ir.nodes[0]);
        let p = element(&section.children[0]);
        let attr = &p.attributes[0];
        assert_eq!(&markup[attr.range.start..attr.range.end], "*for=\"let x of xs\"");
        assert_eq!(attr.range.location, SourceLocation { line: 2, column: 6 });
        assert!(matches!(p.children[0], TemplateNode::Interpolation(_)));
    }
}
