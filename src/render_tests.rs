#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;

    use crate::codegen::Program;
    use crate::parse::CompileOptions;
    use crate::render::{ExpressionHost, Instance, MapResolver, SymbolResolver};
    use crate::runtime::host::HostEvent;
    use crate::runtime::lifecycle::DomState;
    use crate::runtime::{dom, NodeRef, Runtime, RuntimeConfig, RuntimeError, Signal};
    use crate::scope::Scope;

    fn program(markup: &str) -> Program {
        Program::compile(markup, &CompileOptions::for_file("test.html")).unwrap()
    }

    fn mount(rt: &Runtime, markup: &str, resolver: &dyn SymbolResolver) -> Instance {
        let instance = block_on(program(markup).instantiate(rt, resolver)).unwrap();
        instance.mount_to_body().unwrap();
        instance
    }

    /// Evaluates every expression to its own source text and logs invocations.
    #[derive(Default)]
    struct EchoHost {
        invoked: RefCell<Vec<(String, String, Value)>>,
    }

    impl ExpressionHost for EchoHost {
        fn evaluate(&self, code: &str, _scope: &Scope) -> Result<Signal<Value>, RuntimeError> {
            if code.contains("throw") {
                return Err(RuntimeError::Host(format!("cannot evaluate `{}`", code)));
            }
            Ok(Signal::new(json!(code)))
        }

        fn invoke(&self, code: &str, scope: &Scope, event: &HostEvent) -> Result<(), RuntimeError> {
            let item = scope.lookup("item").map(|s| s.get()).unwrap_or(Value::Null);
            self.invoked
                .borrow_mut()
                .push((code.to_string(), event.name.clone(), item));
            Ok(())
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // END TO END
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_list_with_bindings() {
        let rt = Runtime::default();
        let nums = Signal::new(json!([1, 2, 3]));
        let resolver = MapResolver::new()
            .with_value("heading", json!("Numbers"))
            .with("nums", nums.clone());
        let instance = mount(
            &rt,
            r#"<ul id="main" [title]="heading"><li *for="let n of nums; index as i">{{ i }}:{{ n }}</li></ul>"#,
            &resolver,
        );

        let ul = instance.query_selector_all("ul#main").unwrap().remove(0);
        assert_eq!(rt.property(&ul, "title"), Some(json!("Numbers")));
        assert_eq!(instance.query_selector_all("li").unwrap().len(), 3);
        assert_eq!(instance.text_content(), "0:11:22:3");

        nums.set(json!([3, 1, 2]));
        assert_eq!(instance.text_content(), "0:31:12:2");

        nums.set(json!([2]));
        assert_eq!(instance.query_selector_all("li").unwrap().len(), 1);
        assert_eq!(instance.text_content(), "0:2");
    }

    #[test]
    fn test_bindings_wait_for_connection() {
        let rt = Runtime::default();
        let name = Signal::new(json!("Ada"));
        let resolver = MapResolver::new().with("name", name.clone());
        let instance = block_on(program(r#"<p [className]="name">{{ name }}</p>"#).instantiate(&rt, &resolver))
            .unwrap();
        assert_eq!(instance.text_content(), "");

        instance.mount_to_body().unwrap();
        assert_eq!(dom::inner_html(&rt.body()), "<!----><p class=\"Ada\">Ada</p><!---->");

        instance.unmount().unwrap();
        name.set(json!("Grace"));
        assert_eq!(instance.text_content(), "Ada");

        instance.mount_to_body().unwrap();
        assert_eq!(instance.text_content(), "Grace");
    }

    #[test]
    fn test_directives_project_into_the_tree() {
        let rt = Runtime::default();
        let resolver = MapResolver::new()
            .with_value("active", json!(true))
            .with_value("width", json!(12))
            .with_value("extra", json!({"data-x": "1", "hidden": false}))
            .with_value("classes", json!(["a", "b"]));
        let instance = mount(
            &rt,
            r#"<div class="base" [class.on]="active" [class...]="classes" [style.width.px]="width" [attr...]="extra"></div>"#,
            &resolver,
        );
        let div = instance.query_selector_all("div").unwrap().remove(0);
        assert_eq!(dom::classes(&div), vec!["base", "on", "a", "b"]);
        assert_eq!(dom::style(&div, "width").as_deref(), Some("12px"));
        assert_eq!(dom::get_attribute(&div, "data-x").as_deref(), Some("1"));
        assert!(!dom::has_attribute(&div, "hidden"));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // STRUCTURAL COMMANDS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_conditional_grace_period() {
        let rt = Runtime::new(RuntimeConfig {
            conditional_grace_ms: Some(50),
            ..RuntimeConfig::default()
        });
        let show = Signal::new(json!(true));
        let resolver = MapResolver::new().with("show", show.clone());
        let instance = mount(&rt, r#"<p *if="show">yes</p>"#, &resolver);
        let p = NodeRef::Node(instance.query_selector_all("p").unwrap().remove(0));
        assert_eq!(instance.text_content(), "yes");

        show.set(json!(false));
        assert_eq!(instance.text_content(), "");
        assert_eq!(rt.state_of(&p), DomState::Detached);
        assert_eq!(rt.pending_timers(), 1);

        rt.advance(Duration::from_millis(49));
        assert_eq!(rt.state_of(&p), DomState::Detached);
        rt.advance(Duration::from_millis(1));
        assert_eq!(rt.state_of(&p), DomState::Destroyed);

        show.set(json!(true));
        let rebuilt = NodeRef::Node(instance.query_selector_all("p").unwrap().remove(0));
        assert_ne!(rebuilt, p);
        assert_eq!(instance.text_content(), "yes");
    }

    #[test]
    fn test_conditional_reshown_within_grace_reuses_child() {
        let rt = Runtime::new(RuntimeConfig {
            conditional_grace_ms: Some(50),
            ..RuntimeConfig::default()
        });
        let show = Signal::new(json!(1));
        let resolver = MapResolver::new().with("show", show.clone());
        let instance = mount(&rt, r#"<p *if="show">yes</p>"#, &resolver);
        let p = NodeRef::Node(instance.query_selector_all("p").unwrap().remove(0));

        show.set(json!(0));
        rt.advance(Duration::from_millis(20));
        show.set(json!("again"));
        assert_eq!(rt.pending_timers(), 0);
        assert_eq!(rt.state_of(&p), DomState::Attached);
        let shown = NodeRef::Node(instance.query_selector_all("p").unwrap().remove(0));
        assert_eq!(shown, p);
    }

    #[test]
    fn test_conditional_without_grace_keeps_child_until_destroyed() {
        let rt = Runtime::default();
        let show = Signal::new(json!(true));
        let resolver = MapResolver::new().with("show", show.clone());
        let instance = mount(&rt, r#"<p *if="show">yes</p>"#, &resolver);
        let p = NodeRef::Node(instance.query_selector_all("p").unwrap().remove(0));

        show.set(json!(false));
        assert_eq!(rt.pending_timers(), 0);
        assert_eq!(rt.state_of(&p), DomState::Detached);

        instance.destroy().unwrap();
        assert_eq!(rt.state_of(&p), DomState::Destroyed);
        assert_eq!(show.observer_count(), 0);
    }

    #[test]
    fn test_switch_selects_arms() {
        let rt = Runtime::default();
        let mode = Signal::new(json!(1));
        let resolver = MapResolver::new().with("mode", mode.clone());
        let instance = mount(
            &rt,
            r#"<div *switch="mode"><b *switch-case="1">one</b><i *switch-case="two">two</i><u *switch-default>other</u></div>"#,
            &resolver,
        );
        assert_eq!(instance.text_content(), "one");

        mode.set(json!("two"));
        assert_eq!(instance.text_content(), "two");
        mode.set(json!(1.0));
        assert_eq!(instance.text_content(), "one");
        mode.set(json!("nope"));
        assert_eq!(instance.text_content(), "other");
        assert_eq!(instance.query_selector_all("b, i").unwrap().len(), 0);
    }

    #[test]
    fn test_nested_loops_see_outer_item() {
        let rt = Runtime::default();
        let resolver = MapResolver::new().with_value(
            "rows",
            json!([{"name": "a", "cells": [1, 2]}, {"name": "b", "cells": [3]}]),
        );
        let instance = mount(
            &rt,
            r#"<p *for="let row of rows"><b *for="let c of row.cells">{{ row.name }}{{ c }}</b></p>"#,
            &resolver,
        );
        assert_eq!(instance.text_content(), "a1a2b3");
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // HOST & RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_missing_host() {
        let rt = Runtime::default();
        let markup = r#"<button (click)="go()">go</button>"#;
        let result = block_on(program(markup).instantiate(&rt, &MapResolver::new()));
        assert!(matches!(result, Err(RuntimeError::MissingHost)));
    }

    #[test]
    fn test_unresolved_symbol() {
        let rt = Runtime::default();
        let result = block_on(program("<p>{{ user.name }}</p>").instantiate(&rt, &MapResolver::new()));
        assert!(matches!(result, Err(RuntimeError::UnresolvedSymbol(ref name)) if name == "user"));
    }

    #[test]
    fn test_expressions_and_events_go_through_host() {
        let rt = Runtime::default();
        let host = Rc::new(EchoHost::default());
        let resolver = MapResolver::new()
            .with_value("items", json!(["x", "y"]))
            .with_host(host.clone());
        let instance = mount(
            &rt,
            r#"<button *for="let item of items" (click)="pick(item)" [$title]="label()">{{{ name() }}}</button>"#,
            &resolver,
        );
        assert_eq!(instance.text_content(), "name()name()");

        let buttons = instance.query_selector_all("button").unwrap();
        assert_eq!(rt.property(&buttons[0], "title"), Some(json!("label()")));

        rt.dispatch_event(&buttons[1], "click", Value::Null);
        assert_eq!(
            *host.invoked.borrow(),
            vec![("pick(item)".to_string(), "click".to_string(), json!("y"))]
        );

        instance.unmount().unwrap();
        rt.dispatch_event(&buttons[1], "click", Value::Null);
        assert_eq!(host.invoked.borrow().len(), 1);
    }

    #[test]
    fn test_host_errors_abort_render() {
        let rt = Runtime::default();
        let resolver = MapResolver::new().with_host(Rc::new(EchoHost::default()));
        let result = block_on(program(r#"<p [$title]="throw()"></p>"#).instantiate(&rt, &resolver));
        assert!(matches!(result, Err(RuntimeError::Host(_))));
    }

    #[test]
    fn test_instantiate_after_teardown() {
        let rt = Runtime::default();
        rt.teardown();
        let result = block_on(program("<p></p>").instantiate(&rt, &MapResolver::new()));
        assert!(matches!(result, Err(RuntimeError::TornDown)));
    }
}
