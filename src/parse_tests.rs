#[cfg(test)]
mod tests {
    use crate::parse::{parse_template, CompileOptions};
    use crate::validate::{ElementNode, TemplateNode, TextNode};

    fn element(node: &TemplateNode) -> &ElementNode {
        match node {
            TemplateNode::Element(el) => el,
            other => panic!("expected element, got {:?}", other),
        }
    }

    #[test]
    fn test_implied_elements_keep_source_offsets() {
        let markup = r#"<table><tr *for="let r of rows"><td>{{ r }}</td></tr></table>"#;
        let ir = parse_template(markup, &CompileOptions::default()).unwrap();

        let table = element(&ir.nodes[0]);
        let tbody = element(&table.children[0]);
        assert_eq!(tbody.tag, "tbody");
        assert_eq!(tbody.range.start, 0);
        assert_eq!(tbody.range.end, 0);

        let tr = element(&tbody.children[0]);
        let attr = &tr.attributes[0];
        assert_eq!(attr.name, "*for");
        assert_eq!(&markup[attr.range.start..attr.range.end], r#"*for="let r of rows""#);
    }

    #[test]
    fn test_tags_inside_raw_text_do_not_shift_offsets() {
        let markup = r#"<textarea><div id="x"></textarea><div [innerHTML]="h"></div>"#;
        let ir = parse_template(markup, &CompileOptions::default()).unwrap();

        let div = element(&ir.nodes[1]);
        let attr = &div.attributes[0];
        assert_eq!(attr.name, "[innerHTML]");
        assert_eq!(&markup[attr.range.start..attr.range.end], r#"[innerHTML]="h""#);
    }

    #[test]
    fn test_template_contents_are_children() {
        let ir = parse_template(
            r#"<template *if="ready"><b>one</b><i>two</i></template>"#,
            &CompileOptions::default(),
        )
        .unwrap();
        let template = element(&ir.nodes[0]);
        assert_eq!(template.tag, "template");
        assert_eq!(template.children.len(), 2);
        assert_eq!(element(&template.children[1]).tag, "i");
    }

    #[test]
    fn test_lowercased_names_without_case_restore() {
        let options = CompileOptions {
            restore_attribute_case: false,
            ..CompileOptions::default()
        };
        let ir = parse_template(r#"<div [innerHTML]="h"></div>"#, &options).unwrap();
        assert_eq!(element(&ir.nodes[0]).attributes[0].name, "[innerhtml]");
    }

    #[test]
    fn test_comments_are_dropped() {
        let ir = parse_template("<p>a<!-- {{ hidden }} -->b</p>", &CompileOptions::default())
            .unwrap();
        let p = element(&ir.nodes[0]);
        assert_eq!(
            p.children,
            vec![
                TemplateNode::Text(TextNode { value: "a".into() }),
                TemplateNode::Text(TextNode { value: "b".into() }),
            ]
        );
    }

    #[test]
    fn test_top_level_text_and_elements() {
        let ir = parse_template("hi {{ name }}<br>", &CompileOptions::default()).unwrap();
        assert_eq!(ir.nodes.len(), 3);
        assert!(matches!(ir.nodes[1], TemplateNode::Interpolation(ref i) if i.code == "name"));
        assert_eq!(element(&ir.nodes[2]).tag, "br");
        assert_eq!(ir.raw, "hi {{ name }}<br>");
    }
}
