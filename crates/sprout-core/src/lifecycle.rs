//! Lifecycle controller.
//!
//! Creation, mount, render, keep-alive activation and destroy. Patching
//! itself goes through [`update`](crate::update::update).

use std::cell::Cell;
use std::rc::Rc;

use crate::config;
use crate::error::{self, Result, Warning};
use crate::events::EventEmitter;
use crate::hooks::{Hook, call_hook};
use crate::instance::{ComponentOptions, Instance, InstanceInit, LifecycleState};
use crate::listeners::{ListenerMap, update_component_listeners};
use crate::reactive::{Evaluator, WatcherOptions, without_observation};
use crate::update::{self, resolve_slots};
use crate::vdom::{Element, PatchHints, PatchSource, Patcher, VNode};

// ============================================================================
// Creation
// ============================================================================

/// Link `vm` into the tree below `parent`.
///
/// Abstract ancestors are skipped: the instance is registered with the
/// nearest concrete one. Abstract instances are never registered.
pub fn init_lifecycle(vm: &Instance, parent: Option<&Instance>) {
    let mut parent = parent.cloned();
    if let Some(mut concrete) = parent.clone() {
        if !vm.options().is_abstract {
            while concrete.options().is_abstract {
                match concrete.parent() {
                    Some(next) => concrete = next,
                    None => break,
                }
            }
            concrete.push_child(vm);
            parent = Some(concrete);
        }
    }

    vm.set_parent(parent.as_ref());
    match &parent {
        Some(parent) => vm.set_root(&parent.root()),
        None => vm.set_root(vm),
    }

    vm.0.children.borrow_mut().clear();
    vm.0.refs.borrow_mut().clear();
    *vm.0.render_watcher.borrow_mut() = None;
    vm.0.inactive.set(None);
    vm.0.direct_inactive.set(false);
    vm.0.is_mounted.set(false);
    vm.0.is_being_destroyed.set(false);
    vm.0.is_destroyed.set(false);
    vm.0.state.set(LifecycleState::New);
}

/// Register the listener declarations the parent passed at creation.
pub fn init_events(vm: &Instance) {
    let mut listeners = vm.0.parent_listeners.take();
    if !listeners.is_empty() {
        update_component_listeners(vm, &mut listeners, &ListenerMap::new());
    }
    *vm.0.parent_listeners.borrow_mut() = listeners;
}

fn init_render(vm: &Instance) {
    let children = vm.render_children();
    *vm.0.slots.borrow_mut() = resolve_slots(children.as_deref());
    if let Some(parent_vnode) = vm.parent_vnode() {
        vm.0.has_scoped_slots.set(parent_vnode.data().scoped_slots);
        *vm.0.attrs.borrow_mut() = parent_vnode.data().attrs.clone();
    }
}

fn init_props(vm: &Instance) {
    let Some(schema) = vm.options().props.clone() else {
        return;
    };
    let data = vm.props_data().unwrap_or_default();
    let validator = config::with_config(|c| Rc::clone(&c.prop_validator));
    let assign = || {
        for key in schema.keys() {
            let value = validator.validate(key, &schema, &data, vm);
            vm.set_prop(key, value);
        }
    };
    if vm.is_root() {
        assign();
    } else {
        without_observation(assign);
    }
}

/// Create an instance and run it up to the `created` hook.
pub fn create_instance(options: impl Into<Rc<ComponentOptions>>, init: InstanceInit) -> Instance {
    let parent = init.parent.clone();
    let vm = Instance::with_init(options, init);

    init_lifecycle(&vm, parent.as_ref());
    init_events(&vm);
    init_render(&vm);
    call_hook(&vm, Hook::BeforeCreate);
    init_props(&vm);
    if let Some(data) = vm.data() {
        data.retain();
    }
    call_hook(&vm, Hook::Created);

    tracing::debug!(id = %vm.id(), component = %vm.display_name(), "instance created");
    vm
}

// ============================================================================
// Mount and render
// ============================================================================

/// Mount `vm` onto `el` through `patcher`.
///
/// Installs the render subscription, records it on the instance, then runs
/// its first evaluation. Roots are marked mounted right away; nested
/// children are marked by the renderer once inserted.
pub fn mount(
    vm: &Instance,
    el: Option<Element>,
    patcher: Rc<dyn Patcher>,
    hydrating: bool,
) -> Instance {
    vm.set_el(el);
    vm.set_patcher(Some(patcher));
    if vm.options().render.is_none() {
        error::warn(Warning::MissingRender, Some(vm));
    }
    call_hook(vm, Hook::BeforeMount);

    let weak = vm.downgrade();
    let hydrate = Cell::new(hydrating);
    let evaluator: Evaluator = Rc::new(move || -> Result<()> {
        if let Some(vm) = Instance::from_weak(&weak) {
            let vnode = render(&vm);
            update::update(&vm, vnode, hydrate.replace(false));
        }
        Ok(())
    });
    let factory = config::with_config(|c| Rc::clone(&c.subscriptions));
    let watcher = factory.create(
        vm,
        evaluator,
        WatcherOptions {
            render: true,
            label: None,
        },
    );
    *vm.0.render_watcher.borrow_mut() = Some(Rc::clone(&watcher));
    vm.add_watcher(Rc::clone(&watcher));
    watcher.run();

    if vm.placeholder().is_none() {
        mark_mounted(vm);
    }
    vm.clone()
}

/// Run the render function and link the result to the placeholder.
///
/// A failing render is reported and the previous tree is reused.
pub fn render(vm: &Instance) -> VNode {
    let parent_vnode = vm.parent_vnode();
    if let Some(parent_vnode) = &parent_vnode {
        vm.0.has_scoped_slots.set(parent_vnode.data().scoped_slots);
    }
    vm.set_placeholder(parent_vnode.clone());

    let vnode = match vm.options().render.clone() {
        Some(render_fn) => {
            let _span = config::with_config(|c| c.performance).then(|| {
                tracing::debug_span!("render", component = %vm.display_name()).entered()
            });
            match render_fn(vm) {
                Ok(vnode) => vnode,
                Err(err) => {
                    error::report_error(err, Some(vm), "render");
                    vm.vnode().unwrap_or_else(VNode::empty)
                }
            }
        }
        None => VNode::empty(),
    };
    vnode.set_parent(parent_vnode);
    vnode
}

/// Mark `vm` mounted and fire `mounted`. Does nothing the second time.
pub fn mark_mounted(vm: &Instance) {
    if vm.is_mounted() {
        return;
    }
    vm.0.is_mounted.set(true);
    vm.0.state.set(LifecycleState::Mounted);
    tracing::debug!(id = %vm.id(), component = %vm.display_name(), "mounted");
    call_hook(vm, Hook::Mounted);
}

/// Request a re-render through the render subscription.
pub fn force_update(vm: &Instance) {
    if let Some(watcher) = vm.render_watcher() {
        watcher.update();
    }
}

// ============================================================================
// Destroy
// ============================================================================

/// Tear `vm` down. Re-entrant and repeated calls do nothing.
pub fn destroy(vm: &Instance) {
    if vm.0.teardown_started.replace(true) {
        return;
    }
    call_hook(vm, Hook::BeforeDestroy);
    vm.0.is_being_destroyed.set(true);
    vm.0.state.set(LifecycleState::BeingDestroyed);

    if let Some(parent) = vm.parent() {
        if !parent.is_being_destroyed() && !vm.options().is_abstract {
            parent.remove_child(vm);
        }
    }

    if let Some(watcher) = vm.render_watcher() {
        watcher.teardown();
    }
    for watcher in vm.watchers().iter().rev() {
        watcher.teardown();
    }
    if let Some(data) = vm.data() {
        data.release();
    }

    vm.0.is_destroyed.set(true);
    vm.0.state.set(LifecycleState::Destroyed);

    // Teardown hooks across the rendered subtree.
    if let Some(patcher) = vm.patcher() {
        patcher.patch(PatchSource::Tree(vm.vnode()), None, PatchHints::default());
    }
    call_hook(vm, Hook::Destroyed);
    vm.off_all();

    if let Some(el) = vm.el() {
        el.set_owner(None);
    }
    if let Some(placeholder) = vm.placeholder() {
        placeholder.set_parent(None);
    }
    // The placeholder holds the instance, and the rendered tree links back
    // to the placeholder. Cut every edge of that cycle.
    if let Some(vnode) = vm.vnode() {
        vnode.set_parent(None);
    }
    vm.set_placeholder(None);
    vm.set_parent_vnode(None);

    tracing::debug!(id = %vm.id(), component = %vm.display_name(), "destroyed");
}

// ============================================================================
// Keep-alive
// ============================================================================

fn is_in_inactive_tree(vm: &Instance) -> bool {
    let mut current = vm.parent();
    while let Some(parent) = current {
        if parent.is_inactive() {
            return true;
        }
        current = parent.parent();
    }
    false
}

/// Re-activate a kept-alive subtree, firing `activated` for every instance
/// that actually transitions.
pub fn activate_child(vm: &Instance, direct: bool) {
    if direct {
        vm.0.direct_inactive.set(false);
        if is_in_inactive_tree(vm) {
            return;
        }
    } else if vm.is_direct_inactive() {
        return;
    }
    if vm.0.inactive.get() != Some(false) {
        vm.0.inactive.set(Some(false));
        for child in vm.children() {
            activate_child(&child, false);
        }
        vm.0.state.set(LifecycleState::Activated);
        call_hook(vm, Hook::Activated);
    }
}

/// Deactivate a kept-alive subtree, firing `deactivated` once per
/// instance.
pub fn deactivate_child(vm: &Instance, direct: bool) {
    if direct {
        vm.0.direct_inactive.set(true);
        if is_in_inactive_tree(vm) {
            return;
        }
    }
    if !vm.is_inactive() {
        vm.0.inactive.set(Some(true));
        for child in vm.children() {
            deactivate_child(&child, false);
        }
        vm.0.state.set(LifecycleState::Deactivated);
        call_hook(vm, Hook::Deactivated);
    }
}

impl Instance {
    /// See [`force_update`].
    pub fn force_update(&self) {
        force_update(self);
    }

    /// See [`destroy`].
    pub fn destroy(&self) {
        destroy(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::events::Handler;
    use crate::props::{PropSpec, PropsSchema};
    use crate::reactive::Observer;
    use crate::vdom::{ComponentVNode, VNodeData};
    use crate::{Value, config::Config};
    use std::cell::RefCell;

    type Log = Rc<RefCell<Vec<String>>>;

    fn logging_options(name: &str, log: &Log) -> ComponentOptions {
        let mut options = ComponentOptions::new().name(name);
        for hook in Hook::ALL {
            let log = Rc::clone(log);
            let name = name.to_string();
            options.hooks.add(hook, move |_| {
                log.borrow_mut().push(format!("{name}:{hook}"));
                Ok(())
            });
        }
        options
    }

    /// Patcher that returns a fresh element per patch and records calls.
    fn recording_patcher(calls: &Rc<RefCell<Vec<&'static str>>>) -> Rc<dyn Patcher> {
        let calls = Rc::clone(calls);
        Rc::new(
            move |old: PatchSource, vnode: Option<&VNode>, _: PatchHints| -> Option<Element> {
                let kind = match (&old, vnode) {
                    (_, None) => "teardown",
                    (PatchSource::Element(_), Some(_)) => "create",
                    (PatchSource::Tree(_), Some(_)) => "patch",
                };
                calls.borrow_mut().push(kind);
                vnode.map(|v| Element::new(v.tag().unwrap_or("#text")))
            },
        )
    }

    fn child_of(parent: &Instance, options: ComponentOptions) -> Instance {
        create_instance(
            options,
            InstanceInit {
                parent: Some(parent.clone()),
                ..InstanceInit::default()
            },
        )
    }

    #[test]
    fn creation_links_into_nearest_concrete_parent() {
        let root = create_instance(ComponentOptions::new().name("root"), InstanceInit::default());
        let wrapper = child_of(&root, ComponentOptions::new().abstract_component());
        let child = child_of(&wrapper, ComponentOptions::new().name("child"));

        assert_eq!(root.children(), vec![child.clone()]);
        assert!(wrapper.children().is_empty());
        assert_eq!(child.parent(), Some(root.clone()));
        assert_eq!(wrapper.parent(), Some(root.clone()));
        assert_eq!(child.root(), root);
        assert!(root.is_root());
        assert_eq!(child.state(), LifecycleState::New);
    }

    #[test]
    fn creation_runs_hooks_around_prop_initialisation() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut schema = PropsSchema::new();
        schema.insert("label".into(), PropSpec::required());
        schema.insert("size".into(), PropSpec::with_default(Rc::new(3_u8)));

        let seen_before = Rc::clone(&seen);
        let seen_after = Rc::clone(&seen);
        let options = ComponentOptions::new()
            .props(schema)
            .hook(Hook::BeforeCreate, move |vm| {
                seen_before.borrow_mut().push(vm.props().len());
                Ok(())
            })
            .hook(Hook::Created, move |vm| {
                seen_after.borrow_mut().push(vm.props().len());
                Ok(())
            });

        let mut data = crate::props::PropsData::new();
        let label: Value = Rc::new("hello".to_string());
        data.insert("label".into(), label);
        let vm = create_instance(
            options,
            InstanceInit {
                props_data: Some(data),
                ..InstanceInit::default()
            },
        );

        assert_eq!(*seen.borrow(), vec![0, 2]);
        assert_eq!(vm.prop_as::<String>("label").as_deref(), Some("hello"));
        assert_eq!(vm.prop_as::<u8>("size"), Some(3));
    }

    struct ObservationRecorder(Rc<RefCell<Vec<(bool, bool)>>>);

    impl crate::props::PropValidator for ObservationRecorder {
        fn validate(
            &self,
            _: &str,
            _: &PropsSchema,
            _: &crate::props::PropsData,
            instance: &Instance,
        ) -> Option<Value> {
            self.0
                .borrow_mut()
                .push((instance.is_root(), crate::reactive::is_observing()));
            None
        }
    }

    #[test]
    fn child_props_are_assigned_without_observation() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        config::set_config(Config {
            prop_validator: Rc::new(ObservationRecorder(Rc::clone(&seen))),
            ..Config::default()
        });
        let sized = || {
            let mut schema = PropsSchema::new();
            schema.insert("size".into(), PropSpec::with_default(Rc::new(1_u8)));
            ComponentOptions::new().props(schema)
        };

        let root = create_instance(sized(), InstanceInit::default());
        child_of(&root, sized());
        config::set_config(Config::default());

        assert_eq!(*seen.borrow(), vec![(true, true), (false, false)]);
    }

    #[test]
    fn creation_registers_parent_listeners() {
        let fired = Rc::new(Cell::new(0));
        let fired_clone = Rc::clone(&fired);
        let mut listeners = ListenerMap::new();
        listeners.insert(
            "~close".into(),
            Handler::new(move |_, _| {
                fired_clone.set(fired_clone.get() + 1);
                Ok(())
            })
            .into(),
        );

        let vm = create_instance(
            ComponentOptions::default(),
            InstanceInit {
                parent_listeners: Some(listeners),
                ..InstanceInit::default()
            },
        );
        vm.emit("close", &[]).emit("close", &[]);

        assert_eq!(fired.get(), 1);
        assert!(matches!(
            vm.listeners().get("~close"),
            Some(crate::listeners::Listener::Invoker(_))
        ));
    }

    #[test]
    fn mount_runs_hooks_and_patches_once() {
        let log = Log::default();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let options = logging_options("app", &log)
            .render(|_| Ok(VNode::element("div", VNodeData::default(), Vec::new())));
        let vm = create_instance(options, InstanceInit::default());

        mount(&vm, None, recording_patcher(&calls), false);

        assert_eq!(
            *log.borrow(),
            vec!["app:beforeCreate", "app:created", "app:beforeMount", "app:mounted"]
        );
        assert_eq!(*calls.borrow(), vec!["create"]);
        assert!(vm.is_mounted());
        assert_eq!(vm.el().map(|el| el.tag().to_string()).as_deref(), Some("div"));
        assert_eq!(vm.el().and_then(|el| el.owner()), Some(vm.clone()));
        assert!(vm.render_watcher().is_some());
    }

    #[test]
    fn render_subscription_is_visible_during_first_evaluation() {
        let found = Rc::new(Cell::new(false));
        let found_clone = Rc::clone(&found);
        let options = ComponentOptions::new().render(move |vm| {
            found_clone.set(vm.render_watcher().is_some());
            Ok(VNode::empty())
        });
        let vm = create_instance(options, InstanceInit::default());

        mount(&vm, None, recording_patcher(&Rc::default()), false);

        assert!(found.get());
    }

    #[test]
    fn force_update_from_mounted_hook_re_renders() {
        let renders = Rc::new(Cell::new(0));
        let renders_clone = Rc::clone(&renders);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let options = ComponentOptions::new()
            .render(move |_| {
                renders_clone.set(renders_clone.get() + 1);
                Ok(VNode::empty())
            })
            .hook(Hook::Mounted, |vm| {
                vm.force_update();
                Ok(())
            });
        let vm = create_instance(options, InstanceInit::default());

        mount(&vm, None, recording_patcher(&calls), false);

        assert_eq!(renders.get(), 2);
        assert_eq!(*calls.borrow(), vec!["create", "patch"]);
        assert_eq!(vm.state(), LifecycleState::Updated);
    }

    #[test]
    fn missing_render_warns_and_mounts_empty_tree() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let warnings_clone = Rc::clone(&warnings);
        config::set_config(Config {
            warn_handler: Some(Rc::new(move |w: &Warning, _: Option<&Instance>| {
                warnings_clone.borrow_mut().push(w.clone());
            })),
            ..Config::default()
        });

        let vm = create_instance(ComponentOptions::default(), InstanceInit::default());
        mount(&vm, None, recording_patcher(&Rc::default()), false);

        assert_eq!(*warnings.borrow(), vec![Warning::MissingRender]);
        assert_eq!(vm.vnode().and_then(|v| v.text_content().map(str::to_string)), Some(String::new()));
        config::set_config(Config::default());
    }

    #[test]
    fn failing_render_reuses_previous_tree() {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let reports_clone = Rc::clone(&reports);
        config::set_config(Config {
            error_handler: Some(Rc::new(
                move |_: &Error, _: Option<&Instance>, info: &str| {
                    reports_clone.borrow_mut().push(info.to_string());
                },
            )),
            ..Config::default()
        });

        let fail = Rc::new(Cell::new(false));
        let fail_clone = Rc::clone(&fail);
        let options = ComponentOptions::new().render(move |_| {
            if fail_clone.get() {
                Err(Error::msg("broken"))
            } else {
                Ok(VNode::element("p", VNodeData::default(), Vec::new()))
            }
        });
        let vm = create_instance(options, InstanceInit::default());
        mount(&vm, None, recording_patcher(&Rc::default()), false);
        let first = vm.vnode();

        fail.set(true);
        vm.force_update();

        assert_eq!(*reports.borrow(), vec!["render".to_string()]);
        assert_eq!(vm.vnode(), first);
        config::set_config(Config::default());
    }

    #[test]
    fn destroy_runs_teardown_exactly_once() {
        let log = Log::default();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let root = create_instance(ComponentOptions::new().name("root"), InstanceInit::default());
        let options = logging_options("child", &log).render(|_| Ok(VNode::empty()));
        let data = Rc::new(Observer::new());
        let child = create_instance(
            options,
            InstanceInit {
                parent: Some(root.clone()),
                data: Some(Rc::clone(&data)),
                ..InstanceInit::default()
            },
        );
        mount(&child, None, recording_patcher(&calls), false);
        let watcher = child.render_watcher();
        assert_eq!(data.vm_count(), 1);
        log.borrow_mut().clear();

        child.destroy();
        child.destroy();

        assert_eq!(*log.borrow(), vec!["child:beforeDestroy", "child:destroyed"]);
        assert_eq!(*calls.borrow(), vec!["create", "teardown"]);
        assert!(root.children().is_empty());
        assert!(watcher.is_some_and(|w| !w.is_active()));
        assert_eq!(data.vm_count(), 0);
        assert!(child.is_destroyed());
        assert_eq!(child.state(), LifecycleState::Destroyed);
    }

    #[test]
    fn destroy_from_its_own_hook_is_a_no_op() {
        let count = Rc::new(Cell::new(0));
        let count_clone = Rc::clone(&count);
        let options = ComponentOptions::new().hook(Hook::BeforeDestroy, move |vm| {
            count_clone.set(count_clone.get() + 1);
            vm.destroy();
            Ok(())
        });
        let vm = create_instance(options, InstanceInit::default());

        vm.destroy();

        assert_eq!(count.get(), 1);
        assert!(vm.is_destroyed());
    }

    #[test]
    fn destroy_clears_events_and_back_references() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let vm = create_instance(
            ComponentOptions::new().render(|_| Ok(VNode::empty())),
            InstanceInit::default(),
        );
        mount(&vm, None, recording_patcher(&calls), false);
        let placeholder = VNode::element("comp", VNodeData::default(), Vec::new());
        placeholder.set_parent(Some(VNode::empty()));
        vm.set_placeholder(Some(placeholder.clone()));

        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        vm.on(
            "ping",
            Handler::new(move |_, _| {
                fired_clone.set(true);
                Ok(())
            }),
        );
        let el = vm.el();

        vm.destroy();
        vm.emit("ping", &[]);

        assert!(!fired.get());
        assert!(vm.bus().is_empty());
        assert!(el.is_some_and(|el| el.owner().is_none()));
        assert!(placeholder.parent().is_none());
    }

    #[test]
    fn destroyed_child_is_released_with_its_placeholder() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let root = create_instance(ComponentOptions::new().name("root"), InstanceInit::default());
        let placeholder = VNode::component(
            "child",
            VNodeData::default(),
            ComponentVNode::new(Rc::new(ComponentOptions::new())),
        );
        let child = create_instance(
            ComponentOptions::new()
                .name("child")
                .render(|_| Ok(VNode::element("span", VNodeData::default(), Vec::new()))),
            InstanceInit {
                parent: Some(root.clone()),
                parent_vnode: Some(placeholder.clone()),
                ..InstanceInit::default()
            },
        );
        placeholder.set_component_instance(Some(child.clone()));
        mount(&child, None, recording_patcher(&calls), false);
        assert!(child.vnode().is_some_and(|v| v.parent().is_some()));

        let weak = child.downgrade();
        child.destroy();
        drop(child);
        drop(root);

        assert!(Instance::from_weak(&weak).is_some());
        drop(placeholder);
        assert!(Instance::from_weak(&weak).is_none());
    }

    #[test]
    fn children_destroyed_during_parent_teardown_stay_listed() {
        let options = ComponentOptions::new().hook(Hook::Destroyed, |vm| {
            for child in vm.children() {
                child.destroy();
            }
            Ok(())
        });
        let root = create_instance(options, InstanceInit::default());
        let first = child_of(&root, ComponentOptions::new().name("first"));
        let second = child_of(&root, ComponentOptions::new().name("second"));

        root.destroy();

        assert_eq!(root.children(), vec![first.clone(), second.clone()]);
        assert!(first.is_destroyed() && second.is_destroyed());
    }

    #[test]
    fn keep_alive_transitions_skip_inactive_subtrees() {
        let log = Log::default();
        let root = create_instance(ComponentOptions::default(), InstanceInit::default());
        let outer = child_of(&root, logging_options("outer", &log));
        let inner = child_of(&outer, logging_options("inner", &log));
        log.borrow_mut().clear();

        deactivate_child(&outer, true);
        assert_eq!(*log.borrow(), vec!["inner:deactivated", "outer:deactivated"]);
        assert!(inner.is_inactive());

        log.borrow_mut().clear();
        deactivate_child(&inner, true);
        assert!(log.borrow().is_empty());

        activate_child(&outer, true);
        // `inner` was deactivated directly and stays inactive.
        assert_eq!(*log.borrow(), vec!["outer:activated"]);
        assert!(inner.is_inactive());

        log.borrow_mut().clear();
        activate_child(&inner, true);
        assert_eq!(*log.borrow(), vec!["inner:activated"]);
        assert_eq!(inner.state(), LifecycleState::Activated);
    }
}
