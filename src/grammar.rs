//! Attribute grammar classifier.
//!
//! Each attribute is tried, in order, as a binding (`[name]` / `bind-name`),
//! a command (`*name` / `cmd-name`), an event hookup (`(name)` / `on-name`),
//! and finally as a static attribute. `$` in the bracket forms and `exp-` in
//! the prefixed forms mark the value as a host expression.

use lazy_static::lazy_static;
use regex::Regex;

use crate::commands::{CommandGenerator, ParserRegistry};
use crate::generators::{
    AttributeGenerator, DirectiveGenerator, EventGenerator, Modifier, Modifiers, StaticGenerator,
};
use crate::validate::{AttributeIR, CompilerError, SourceOrigin, ERR_UNKNOWN_COMMAND};

lazy_static! {
    static ref BIND_BRACKET_RE: Regex = Regex::new(r"^\[(\$)?(.*)\]$").unwrap();
    static ref BIND_PREFIX_RE: Regex = Regex::new(r"^bind-(exp-)?(.*)$").unwrap();
    static ref COMMAND_STAR_RE: Regex = Regex::new(r"^\*(\$)?(.+)$").unwrap();
    static ref COMMAND_PREFIX_RE: Regex = Regex::new(r"^cmd-(exp-)?(.+)$").unwrap();
    static ref EVENT_PAREN_RE: Regex = Regex::new(r"^\((.*)\)$").unwrap();
    static ref EVENT_PREFIX_RE: Regex = Regex::new(r"^on-(.*)$").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClassifiedAttribute {
    Static(StaticGenerator),
    Directive(DirectiveGenerator),
    Command(CommandGenerator),
    Event(EventGenerator),
}

/// Matches `name` against a bracket form and its prefixed twin.
///
/// Returns the stripped name and its modifiers.
fn match_syntax(name: &str, bracket: &Regex, prefixed: &Regex) -> Option<(String, Modifiers)> {
    if let Some(caps) = bracket.captures(name) {
        let mut modifiers = Modifiers::new();
        let body = if caps.len() > 2 {
            if caps.get(1).is_some() {
                modifiers.insert(Modifier::Expression);
            }
            &caps[2]
        } else {
            &caps[1]
        };
        return Some((body.to_string(), modifiers));
    }
    if let Some(caps) = prefixed.captures(name) {
        let mut modifiers = Modifiers::new().with(Modifier::Prefix);
        let body = if caps.len() > 2 {
            if caps.get(1).is_some() {
                modifiers.insert(Modifier::Expression);
            }
            &caps[2]
        } else {
            &caps[1]
        };
        return Some((body.to_string(), modifiers));
    }
    None
}

fn generator(attr: &AttributeIR, name: String, modifiers: Modifiers) -> AttributeGenerator {
    AttributeGenerator {
        name,
        raw_name: attr.name.clone(),
        value: attr.value.clone(),
        modifiers,
        range: attr.range.clone(),
    }
}

/// Classifies one markup attribute.
pub fn classify_attribute(
    attr: &AttributeIR,
    registry: &ParserRegistry,
    origin: &SourceOrigin,
) -> Result<ClassifiedAttribute, CompilerError> {
    if let Some((name, modifiers)) = match_syntax(&attr.name, &BIND_BRACKET_RE, &BIND_PREFIX_RE) {
        let directive = DirectiveGenerator::parse(generator(attr, name, modifiers), origin)?;
        return Ok(ClassifiedAttribute::Directive(directive));
    }

    if let Some((name, modifiers)) =
        match_syntax(&attr.name, &COMMAND_STAR_RE, &COMMAND_PREFIX_RE)
    {
        let Some(parser) = registry.find(&name) else {
            return Err(CompilerError::at(
                ERR_UNKNOWN_COMMAND,
                &format!("Unknown command `{}`.", name),
                origin,
                &attr.range,
            )
            .with_hint(format!("registered commands: {}", registry.names().join(", "))));
        };
        let command = parser.parse(generator(attr, name, modifiers), origin)?;
        return Ok(ClassifiedAttribute::Command(command));
    }

    if let Some((name, modifiers)) = match_syntax(&attr.name, &EVENT_PAREN_RE, &EVENT_PREFIX_RE) {
        let event = EventGenerator::new(generator(attr, name, modifiers), origin)?;
        return Ok(ClassifiedAttribute::Event(event));
    }

    Ok(ClassifiedAttribute::Static(StaticGenerator {
        attr: generator(attr, attr.name.clone(), Modifiers::new()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::ValueSource;
    use crate::validate::{SourceRange, ERR_INVALID_EVENT};
    use rstest::rstest;

    fn ir(name: &str, value: &str) -> AttributeIR {
        AttributeIR {
            name: name.to_string(),
            value: value.to_string(),
            range: SourceRange::default(),
        }
    }

    fn classify(name: &str, value: &str) -> Result<ClassifiedAttribute, CompilerError> {
        classify_attribute(
            &ir(name, value),
            &ParserRegistry::default(),
            &SourceOrigin::new("t.html", ""),
        )
    }

    #[rstest]
    #[case("[class...]", false)]
    #[case("bind-class---", true)]
    fn test_class_spread(#[case] name: &str, #[case] prefixed: bool) {
        let ClassifiedAttribute::Directive(DirectiveGenerator::ClassList { attr }) =
            classify(name, "classes").unwrap()
        else {
            panic!("expected class spread generator for {}", name);
        };
        let expected = if prefixed {
            Modifiers::new().with(Modifier::Prefix)
        } else {
            Modifiers::new()
        };
        assert_eq!(attr.modifiers, expected);
    }

    #[rstest]
    #[case("[title]", "title", false)]
    #[case("bind-title", "title", false)]
    #[case("[$title]", "title", true)]
    #[case("bind-exp-title", "title", true)]
    fn test_property_binding(#[case] name: &str, #[case] property: &str, #[case] expression: bool) {
        let ClassifiedAttribute::Directive(directive) = classify(name, "x").unwrap() else {
            panic!("expected directive");
        };
        let DirectiveGenerator::Property { property: p, attr } = &directive else {
            panic!("expected property directive");
        };
        assert_eq!(p, property);
        assert_eq!(attr.modifiers.contains(Modifier::Expression), expression);
        let expected_source = if expression {
            ValueSource::Expression("x".into())
        } else {
            ValueSource::Reference("x".into())
        };
        assert_eq!(attr.value_source(), expected_source);
    }

    #[rstest]
    #[case("[class.active]")]
    #[case("bind-class-active")]
    fn test_single_class(#[case] name: &str) {
        let result = classify(name, "on").unwrap();
        assert!(matches!(
            result,
            ClassifiedAttribute::Directive(DirectiveGenerator::Class { ref class, .. }) if class == "active"
        ));
    }

    #[rstest]
    #[case("[style.width.px]", "width", Some("px"))]
    #[case("bind-style-width-px", "width", Some("px"))]
    #[case("bind-style-background-color", "background-color", None)]
    fn test_single_style(#[case] name: &str, #[case] property: &str, #[case] unit: Option<&str>) {
        let ClassifiedAttribute::Directive(DirectiveGenerator::Style {
            property: p,
            unit: u,
            ..
        }) = classify(name, "w").unwrap()
        else {
            panic!("expected style directive");
        };
        assert_eq!(p, property);
        assert_eq!(u.as_deref(), unit);
    }

    #[rstest]
    #[case("*if")]
    #[case("cmd-if")]
    fn test_if_command(#[case] name: &str) {
        let result = classify(name, "visible").unwrap();
        assert!(matches!(
            result,
            ClassifiedAttribute::Command(CommandGenerator::If { .. })
        ));
    }

    #[rstest]
    #[case("(click)", "click")]
    #[case("on-click", "click")]
    fn test_event(#[case] name: &str, #[case] event: &str) {
        let ClassifiedAttribute::Event(generator) = classify(name, "save()").unwrap() else {
            panic!("expected event");
        };
        assert_eq!(generator.attr.name, event);
    }

    #[test]
    fn test_static_attribute() {
        let result = classify("id", "main").unwrap();
        assert!(matches!(result, ClassifiedAttribute::Static(ref s) if s.attr.raw_name == "id"));
    }

    #[test]
    fn test_unknown_command_reports_offset() {
        let markup = r#"<div class="a" *repeat="3"></div>"#;
        let start = markup.find("*repeat").unwrap();
        let attr = AttributeIR {
            name: "*repeat".into(),
            value: "3".into(),
            range: SourceRange {
                start,
                end: start + "*repeat=\"3\"".len(),
                ..SourceRange::default()
            },
        };
        let err = classify_attribute(
            &attr,
            &ParserRegistry::default(),
            &SourceOrigin::new("t.html", markup),
        )
        .unwrap_err();
        assert_eq!(err.code, ERR_UNKNOWN_COMMAND);
        assert_eq!(err.offset, 15);
        assert_eq!(err.context.as_deref(), Some("*repeat=\"3\""));
        assert_eq!(err.markup.as_deref(), Some(markup));
    }

    #[test]
    fn test_empty_event_name() {
        let err = classify("()", "x").unwrap_err();
        assert_eq!(err.code, ERR_INVALID_EVENT);
    }
}
