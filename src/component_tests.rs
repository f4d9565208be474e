#[cfg(test)]
mod tests {
    use futures::executor::block_on;
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::codegen::Program;
    use crate::component::{mount_component, ComponentHooks, NoHooks};
    use crate::parse::CompileOptions;
    use crate::render::MapResolver;
    use crate::runtime::lifecycle::DomState;
    use crate::runtime::{dom, NodeRef, Runtime, RuntimeError};
    use crate::scope::Scope;

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
        reject: bool,
    }

    impl ComponentHooks for Recorder {
        fn on_init(&self, scope: &Scope) -> Result<(), RuntimeError> {
            self.calls
                .borrow_mut()
                .push(format!("init {}", scope.names().join(",")));
            if self.reject {
                return Err(RuntimeError::Host("init rejected".into()));
            }
            Ok(())
        }

        fn on_connected(&self) {
            self.calls.borrow_mut().push("connected".into());
        }

        fn on_disconnected(&self) {
            self.calls.borrow_mut().push("disconnected".into());
        }

        fn on_destroy(&self) {
            self.calls.borrow_mut().push("destroy".into());
        }
    }

    fn card() -> Program {
        Program::compile(
            r#"<article><h2>{{ title }}</h2></article>"#,
            &CompileOptions::for_file("card.html"),
        )
        .unwrap()
    }

    #[test]
    fn test_hooks_follow_the_lifecycle() {
        let rt = Runtime::default();
        let resolver = MapResolver::new().with_value("title", json!("Hello"));
        let hooks = Rc::new(Recorder::default());
        let body = NodeRef::Node(rt.body());

        let component =
            block_on(mount_component(&rt, &card(), &resolver, hooks.clone(), &body, None)).unwrap();
        assert_eq!(dom::text_content(&rt.body()), "Hello");

        component.unmount().unwrap();
        component.destroy().unwrap();
        assert_eq!(
            *hooks.calls.borrow(),
            vec!["init title", "connected", "disconnected", "destroy"]
        );
        assert_eq!(rt.state_of(&component.node()), DomState::Destroyed);
    }

    #[test]
    fn test_init_error_aborts_mount() {
        let rt = Runtime::default();
        let resolver = MapResolver::new().with_value("title", json!("x"));
        let hooks = Rc::new(Recorder {
            reject: true,
            ..Recorder::default()
        });
        let body = NodeRef::Node(rt.body());

        let result = block_on(mount_component(&rt, &card(), &resolver, hooks.clone(), &body, None));
        assert!(matches!(result, Err(RuntimeError::Host(_))));
        assert!(dom::children(&rt.body()).is_empty());
        assert_eq!(hooks.calls.borrow().len(), 1);
    }

    #[test]
    fn test_mount_before_sibling() {
        let rt = Runtime::default();
        let body = NodeRef::Node(rt.body());
        let footer = NodeRef::Node(dom::create_element("footer"));
        rt.attach(&footer, &body, None).unwrap();

        let resolver = MapResolver::new().with_value("title", json!("T"));
        block_on(mount_component(
            &rt,
            &card(),
            &resolver,
            Rc::new(NoHooks),
            &body,
            Some(&footer),
        ))
        .unwrap();
        let tags: Vec<String> = dom::children(&rt.body())
            .iter()
            .filter_map(dom::tag_name)
            .collect();
        assert_eq!(tags, vec!["article", "footer"]);
    }
}
