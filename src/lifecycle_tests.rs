#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use crate::runtime::container::Container;
    use crate::runtime::dom;
    use crate::runtime::lifecycle::DomState;
    use crate::runtime::{
        LifecycleKind, NodeRef, Runtime, RuntimeConfig, RuntimeError, Signal, SignalSubscription,
        SubscriptionBinding,
    };

    fn element(tag: &str) -> NodeRef {
        NodeRef::Node(dom::create_element(tag))
    }

    fn body(rt: &Runtime) -> NodeRef {
        NodeRef::Node(rt.body())
    }

    /// Records every `kind` delivered to `node`'s observer under `label`.
    fn record(rt: &Runtime, node: &NodeRef, kind: LifecycleKind, label: &str, log: &Rc<RefCell<Vec<String>>>) {
        let log = log.clone();
        let label = label.to_string();
        rt.observe(node)
            .unwrap()
            .on(kind, move |_| log.borrow_mut().push(label.clone()));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // STATE MACHINE
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_illegal_transitions_are_errors() {
        let rt = Runtime::default();
        let p = element("p");
        rt.attach(&p, &body(&rt), None).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Attached);

        let err = rt.attach(&p, &body(&rt), None).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::InvalidState {
                operation: "attach",
                actual: DomState::Attached,
                ..
            }
        ));
        assert!(matches!(
            rt.destroy(&p),
            Err(RuntimeError::InvalidState { operation: "destroy", .. })
        ));

        rt.detach(&p).unwrap();
        assert!(matches!(
            rt.detach(&p),
            Err(RuntimeError::InvalidState {
                expected: DomState::Attached,
                actual: DomState::Detached,
                ..
            })
        ));

        rt.destroy(&p).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Destroyed);
        assert!(matches!(
            rt.attach(&p, &body(&rt), None),
            Err(RuntimeError::InvalidState {
                actual: DomState::Destroyed,
                ..
            })
        ));
    }

    #[test]
    fn test_destroyed_parent_rejects_children() {
        let rt = Runtime::default();
        let parent = element("div");
        rt.destroy(&parent).unwrap();
        let err = rt.attach(&element("p"), &parent, None).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ParentUnavailable {
                state: DomState::Destroyed,
                ..
            }
        ));
    }

    #[test]
    fn test_safe_variants_tolerate_current_state() {
        let rt = Runtime::default();
        let p = element("p");
        rt.detach_safe(&p).unwrap();
        rt.attach_safe(&p, &body(&rt), None).unwrap();
        rt.attach_safe(&p, &body(&rt), None).unwrap();
        assert_eq!(dom::children(&rt.body()).len(), 1);

        rt.destroy_safe(&p).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Destroyed);
        assert!(dom::children(&rt.body()).is_empty());
        rt.destroy_safe(&p).unwrap();
    }

    #[test]
    fn test_attach_safe_moves_an_attached_node() {
        let rt = Runtime::default();
        let div = element("div");
        let section = element("section");
        rt.attach(&div, &body(&rt), None).unwrap();
        rt.attach(&section, &body(&rt), None).unwrap();
        let p = element("p");
        rt.attach(&p, &div, None).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        record(&rt, &p, LifecycleKind::AfterDetach, "detached", &log);
        record(&rt, &p, LifecycleKind::AfterAttach, "attached", &log);

        rt.attach_safe(&p, &section, None).unwrap();
        assert_eq!(dom::inner_html(&rt.body()), "<div></div><section><p></p></section>");
        assert_eq!(*log.borrow(), vec!["detached", "attached"]);

        rt.attach_safe(&p, &section, None).unwrap();
        assert_eq!(log.borrow().len(), 2);

        let b = element("b");
        rt.attach(&b, &section, None).unwrap();
        rt.attach_safe(&b, &section, Some(&p)).unwrap();
        assert_eq!(
            dom::inner_html(&rt.body()),
            "<div></div><section><b></b><p></p></section>"
        );
    }

    #[test]
    fn test_canceled_after_attach_stops_later_listeners() {
        let rt = Runtime::default();
        let p = element("p");
        let log = Rc::new(RefCell::new(Vec::new()));
        rt.observe(&p)
            .unwrap()
            .on(LifecycleKind::AfterAttach, |event| event.cancel());
        record(&rt, &p, LifecycleKind::AfterAttach, "after-attach", &log);
        record(&rt, &p, LifecycleKind::Connect, "connect", &log);

        rt.attach(&p, &body(&rt), None).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Attached);
        assert_eq!(*log.borrow(), vec!["connect"]);
    }

    #[test]
    fn test_before_attach_cancels() {
        let rt = Runtime::default();
        let p = element("p");
        rt.observe(&p)
            .unwrap()
            .on(LifecycleKind::BeforeAttach, |event| event.cancel());

        rt.attach(&p, &body(&rt), None).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Detached);
        assert!(dom::children(&rt.body()).is_empty());
    }

    #[test]
    fn test_before_detach_cancels() {
        let rt = Runtime::default();
        let p = element("p");
        rt.attach(&p, &body(&rt), None).unwrap();
        let observer = rt.observe(&p).unwrap();
        let guard = observer.on(LifecycleKind::BeforeDetach, |event| event.cancel());

        rt.detach(&p).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Attached);

        observer.off(guard);
        rt.detach(&p).unwrap();
        assert_eq!(rt.state_of(&p), DomState::Detached);
    }

    #[test]
    fn test_insert_before_reference() {
        let rt = Runtime::default();
        let first = element("i");
        let second = element("b");
        rt.attach(&first, &body(&rt), None).unwrap();
        rt.attach(&second, &body(&rt), Some(&first)).unwrap();
        assert_eq!(dom::inner_html(&rt.body()), "<b></b><i></i>");

        let stranger = element("u");
        let err = rt.attach(&element("s"), &first, Some(&stranger)).unwrap_err();
        assert!(matches!(err, RuntimeError::NotAChild { .. }));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // NOTIFICATION ORDER
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_connect_pre_order_disconnect_post_order() {
        let rt = Runtime::default();
        let div = element("div");
        let span = element("span");
        let b = element("b");
        rt.attach(&span, &div, None).unwrap();
        rt.attach(&b, &span, None).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        for (node, label) in [(&div, "div"), (&span, "span"), (&b, "b")] {
            record(&rt, node, LifecycleKind::Connect, &format!("+{}", label), &log);
            record(&rt, node, LifecycleKind::Disconnect, &format!("-{}", label), &log);
        }

        rt.attach(&div, &body(&rt), None).unwrap();
        assert_eq!(*log.borrow(), vec!["+div", "+span", "+b"]);

        log.borrow_mut().clear();
        rt.detach(&div).unwrap();
        assert_eq!(*log.borrow(), vec!["-b", "-span", "-div"]);
    }

    #[test]
    fn test_attaching_to_detached_parent_does_not_connect() {
        let rt = Runtime::default();
        let parent = element("div");
        let child = element("p");
        let log = Rc::new(RefCell::new(Vec::new()));
        record(&rt, &child, LifecycleKind::AfterAttach, "after-attach", &log);
        record(&rt, &child, LifecycleKind::Connect, "connect", &log);

        rt.attach(&child, &parent, None).unwrap();
        assert_eq!(*log.borrow(), vec!["after-attach"]);
        assert!(!rt.is_connected(&child));

        rt.attach(&parent, &body(&rt), None).unwrap();
        assert_eq!(*log.borrow(), vec!["after-attach", "connect"]);
    }

    #[test]
    fn test_destroy_runs_children_first() {
        let rt = Runtime::default();
        let ul = element("ul");
        let li = element("li");
        rt.attach(&li, &ul, None).unwrap();

        let log = Rc::new(RefCell::new(Vec::new()));
        record(&rt, &ul, LifecycleKind::Destroy, "ul", &log);
        record(&rt, &li, LifecycleKind::Destroy, "li", &log);

        rt.destroy(&ul).unwrap();
        assert_eq!(*log.borrow(), vec!["li", "ul"]);
        assert_eq!(rt.state_of(&li), DomState::Destroyed);
        assert!(rt.observe(&li).unwrap().is_destroyed());
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SUBSCRIPTIONS
    // ═══════════════════════════════════════════════════════════════════════════════

    fn counting_binding(rt: &Runtime, node: &NodeRef, signal: &Signal<i32>) -> (SubscriptionBinding, Rc<RefCell<Vec<i32>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscription = SignalSubscription::new(signal.clone(), move |v| sink.borrow_mut().push(*v));
        (SubscriptionBinding::bind(rt, node, subscription).unwrap(), seen)
    }

    #[test]
    fn test_subscription_follows_connectivity() {
        let rt = Runtime::default();
        let p = element("p");
        let signal = Signal::new(1);
        let (binding, seen) = counting_binding(&rt, &p, &signal);
        assert!(!binding.is_active());

        rt.attach(&p, &body(&rt), None).unwrap();
        assert!(binding.is_active());
        signal.set(2);
        assert_eq!(*seen.borrow(), vec![1, 2]);

        rt.detach(&p).unwrap();
        assert!(!binding.is_active());
        signal.set(3);
        assert_eq!(*seen.borrow(), vec![1, 2]);

        rt.destroy(&p).unwrap();
        assert!(binding.is_destroyed());
        assert!(matches!(binding.activate(), Err(RuntimeError::SubscriptionDestroyed)));
        assert_eq!(signal.observer_count(), 0);
    }

    #[test]
    fn test_subscription_may_write_back_on_connect() {
        let rt = Runtime::default();
        let input = element("input");
        let value = Signal::new(20);
        let clamp = value.clone();
        let subscription = SignalSubscription::new(value.clone(), move |v: &i32| {
            if *v > 10 {
                clamp.set(10);
            }
        });
        let _binding = SubscriptionBinding::bind(&rt, &input, subscription).unwrap();

        rt.attach(&input, &body(&rt), None).unwrap();
        assert_eq!(value.get(), 10);
        value.set(42);
        assert_eq!(value.get(), 10);
    }

    #[test]
    fn test_binding_to_destroyed_node_fails() {
        let rt = Runtime::default();
        let p = element("p");
        rt.destroy(&p).unwrap();
        let subscription = SignalSubscription::new(Signal::new(0), |_| {});
        assert!(matches!(
            SubscriptionBinding::bind(&rt, &p, subscription),
            Err(RuntimeError::SubscriptionDestroyed)
        ));
    }

    #[test]
    fn test_move_keeps_subscriptions() {
        let rt = Runtime::default();
        let a = element("a");
        let b = element("b");
        rt.attach(&a, &body(&rt), None).unwrap();
        rt.attach(&b, &body(&rt), None).unwrap();

        let signal = Signal::new(0);
        let (binding, _) = counting_binding(&rt, &a, &signal);
        let disconnects = Rc::new(Cell::new(0));
        let counter = disconnects.clone();
        rt.observe(&a)
            .unwrap()
            .on(LifecycleKind::Disconnect, move |_| counter.set(counter.get() + 1));

        rt.move_before(&a, &body(&rt), None).unwrap();
        assert_eq!(dom::inner_html(&rt.body()), "<b></b><a></a>");
        assert!(binding.is_active());
        assert_eq!(disconnects.get(), 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // CONTAINERS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_container_round_trip() {
        let rt = Runtime::default();
        let container = Container::new();
        let item = dom::create_element("li");
        container.append_child(&dom::create_text("a")).unwrap();
        container.append_child(&item).unwrap();
        let node = NodeRef::Container(container.clone());

        let log = Rc::new(RefCell::new(Vec::new()));
        record(&rt, &node, LifecycleKind::Connect, "container", &log);
        record(&rt, &NodeRef::Node(item.clone()), LifecycleKind::Connect, "li", &log);

        rt.attach(&node, &body(&rt), None).unwrap();
        assert!(container.is_live());
        assert_eq!(rt.state_of(&node), DomState::Attached);
        assert_eq!(dom::text_content(&rt.body()), "a");
        assert_eq!(*log.borrow(), vec!["container", "li"]);

        rt.detach(&node).unwrap();
        assert!(!container.is_live());
        assert!(dom::children(&rt.body()).is_empty());
        assert_eq!(container.inner_html(), "a<li></li>");

        rt.destroy(&node).unwrap();
        assert_eq!(rt.state_of(&NodeRef::Node(item)), DomState::Destroyed);
    }

    #[test]
    fn test_container_as_parent() {
        let rt = Runtime::default();
        let container = NodeRef::Container(Container::new());
        rt.attach(&container, &body(&rt), None).unwrap();

        let first = element("i");
        let second = element("b");
        rt.attach(&first, &container, None).unwrap();
        rt.attach(&second, &container, Some(&first)).unwrap();
        assert!(rt.is_connected(&first));
        let names: Vec<_> = container
            .as_container()
            .unwrap()
            .children()
            .iter()
            .filter_map(dom::tag_name)
            .collect();
        assert_eq!(names, vec!["b", "i"]);
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXTERNAL MUTATIONS & TEARDOWN
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_external_mutations_are_inferred() {
        let rt = Runtime::new(RuntimeConfig {
            track_external_mutations: true,
            ..RuntimeConfig::default()
        });
        let p = element("p");
        let log = Rc::new(RefCell::new(Vec::new()));
        let observer = rt.observe(&p).unwrap();
        for (kind, label) in [
            (LifecycleKind::AfterAttach, "after-attach"),
            (LifecycleKind::AfterDetach, "after-detach"),
            (LifecycleKind::Connect, "connect"),
            (LifecycleKind::Disconnect, "disconnect"),
        ] {
            let log = log.clone();
            observer.on(kind, move |event| {
                let origin = if event.synthetic { "synthetic" } else { "direct" };
                log.borrow_mut().push(format!("{} {}", origin, label));
            });
        }

        rt.attach(&p, &body(&rt), None).unwrap();
        log.borrow_mut().clear();

        let handle = p.as_node().unwrap().clone();
        dom::remove(&handle);
        rt.notify_external_mutation();
        rt.notify_external_mutation();
        assert_eq!(rt.run_microtasks(), 1);
        assert_eq!(*log.borrow(), vec!["synthetic after-detach", "direct disconnect"]);
        assert_eq!(rt.state_of(&p), DomState::Detached);

        log.borrow_mut().clear();
        dom::append_child(&rt.body(), &handle);
        rt.notify_external_mutation();
        rt.run_microtasks();
        assert_eq!(*log.borrow(), vec!["synthetic after-attach", "direct connect"]);
        assert_eq!(rt.state_of(&p), DomState::Attached);
    }

    #[test]
    fn test_external_mutations_ignored_when_untracked() {
        let rt = Runtime::default();
        rt.notify_external_mutation();
        assert_eq!(rt.run_microtasks(), 0);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let rt = Runtime::default();
        let p = element("p");
        let observer = rt.observe(&p).unwrap();
        rt.attach(&p, &body(&rt), None).unwrap();
        rt.set_timeout(std::time::Duration::from_millis(5), || {});

        rt.teardown();
        assert!(rt.is_torn_down());
        assert!(observer.is_destroyed());
        assert_eq!(rt.tracked_nodes(), 0);
        assert_eq!(rt.pending_timers(), 0);
        assert!(matches!(rt.detach(&p), Err(RuntimeError::TornDown)));
        assert!(matches!(rt.observe(&p), Err(RuntimeError::TornDown)));
    }
}
