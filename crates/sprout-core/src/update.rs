//! Update orchestrator.
//!
//! [`update`] is what the render subscription calls after every render: it
//! hands the new tree to the patch function and keeps element and
//! placeholder links in sync. [`update_child_component`] is what the patch
//! function calls when a parent re-renders a child placeholder.
//!
//! While a patch is in progress the instance being patched is the *active
//! instance*; components created by the patch take it as their parent.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::config;
use crate::error::{self, Warning};
use crate::hooks::{Hook, call_hook};
use crate::instance::Instance;
use crate::lifecycle;
use crate::listeners::{ListenerMap, update_component_listeners};
use crate::props::PropsData;
use crate::reactive::without_observation;
use crate::vdom::{PatchHints, PatchSource, VNode};

/// Resolved slot content, keyed by slot name.
pub type Slots = IndexMap<String, Vec<VNode>>;

/// Name of the slot receiving children without a `slot` attribute.
pub const DEFAULT_SLOT: &str = "default";

// ============================================================================
// Active instance
// ============================================================================

thread_local! {
    static ACTIVE_INSTANCE: RefCell<Option<Instance>> = const { RefCell::new(None) };
}

/// The instance whose patch is currently running, if any.
pub fn active_instance() -> Option<Instance> {
    ACTIVE_INSTANCE.with(|active| active.borrow().clone())
}

/// Makes an instance the active instance until dropped, then restores the
/// previous one.
#[must_use = "the previous active instance is restored when the guard drops"]
pub struct ActiveInstanceGuard {
    previous: Option<Instance>,
}

impl ActiveInstanceGuard {
    pub fn enter(vm: &Instance) -> Self {
        let previous = ACTIVE_INSTANCE.with(|active| active.replace(Some(vm.clone())));
        Self { previous }
    }
}

impl Drop for ActiveInstanceGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE_INSTANCE.with(|active| *active.borrow_mut() = previous);
    }
}

// ============================================================================
// Patching
// ============================================================================

/// Patch `vm`'s element to match `vnode`.
pub fn update(vm: &Instance, vnode: VNode, hydrating: bool) {
    let Some(patcher) = vm.patcher() else {
        error::warn(
            Warning::MissingPatcher {
                component: vm.display_name(),
            },
            Some(vm),
        );
        return;
    };
    if vm.is_mounted() && !vm.is_destroyed() {
        call_hook(vm, Hook::BeforeUpdate);
    }

    let prev_el = vm.el();
    let prev_vnode = vm.vnode();
    vm.set_vnode(Some(vnode.clone()));

    let el = {
        let _active = ActiveInstanceGuard::enter(vm);
        let _span = config::with_config(|c| c.performance).then(|| {
            tracing::debug_span!("patch", component = %vm.display_name()).entered()
        });
        match prev_vnode {
            None => {
                let (parent_elm, ref_elm) = vm.take_placement_hints();
                tracing::debug!(id = %vm.id(), hydrating, "initial patch");
                patcher.patch(
                    PatchSource::Element(prev_el.clone()),
                    Some(&vnode),
                    PatchHints {
                        hydrating,
                        remove_only: false,
                        parent_elm,
                        ref_elm,
                    },
                )
            }
            Some(prev) => patcher.patch(
                PatchSource::Tree(Some(prev)),
                Some(&vnode),
                PatchHints::default(),
            ),
        }
    };
    vm.set_el(el.clone());

    if let Some(prev_el) = &prev_el {
        prev_el.set_owner(None);
    }
    if let Some(el) = &el {
        el.set_owner(Some(vm));
    }

    // A component whose whole tree is another component shares its element.
    if let (Some(placeholder), Some(parent)) = (vm.placeholder(), vm.parent()) {
        if parent.vnode().as_ref() == Some(&placeholder) {
            parent.set_el(el);
        }
    }
}

/// Hand a re-rendered placeholder's new inputs to the existing child.
pub fn update_child_component(
    vm: &Instance,
    props_data: Option<PropsData>,
    listeners: Option<ListenerMap>,
    parent_vnode: &VNode,
    render_children: Option<Vec<VNode>>,
) {
    // Decided before the stored children are replaced.
    let has_children = render_children.is_some()
        || vm.render_children().is_some()
        || parent_vnode.data().scoped_slots
        || vm.has_scoped_slots();

    vm.set_parent_vnode(Some(parent_vnode.clone()));
    vm.set_placeholder(Some(parent_vnode.clone()));
    if let Some(tree) = vm.vnode() {
        tree.set_parent(Some(parent_vnode.clone()));
    }
    *vm.0.render_children.borrow_mut() = render_children;

    *vm.0.attrs.borrow_mut() = parent_vnode.data().attrs.clone();

    let mut props_changed = false;
    if let (Some(data), Some(schema)) = (props_data, vm.options().props.clone()) {
        let validator = config::with_config(|c| Rc::clone(&c.prop_validator));
        without_observation(|| {
            for key in schema.keys() {
                let value = validator.validate(key, &schema, &data, vm);
                props_changed |= vm.set_prop(key, value);
            }
        });
        *vm.0.props_data.borrow_mut() = Some(data);
    }

    let old_listeners = vm.0.parent_listeners.take();
    let mut listeners = listeners.unwrap_or_default();
    update_component_listeners(vm, &mut listeners, &old_listeners);
    *vm.0.parent_listeners.borrow_mut() = listeners;

    if has_children {
        let children = vm.render_children();
        *vm.0.slots.borrow_mut() = resolve_slots(children.as_deref());
        lifecycle::force_update(vm);
    } else if props_changed {
        lifecycle::force_update(vm);
    }
}

// ============================================================================
// Slots
// ============================================================================

/// Group slot children by their `slot` name.
///
/// Children of a `<template slot="..">` are unwrapped into the slot. Slots
/// made only of whitespace text are dropped.
pub fn resolve_slots(children: Option<&[VNode]>) -> Slots {
    let mut slots = Slots::new();
    let Some(children) = children else {
        return slots;
    };
    for child in children {
        match &child.data().slot {
            Some(name) => {
                let slot = slots.entry(name.clone()).or_default();
                if child.tag() == Some("template") {
                    slot.extend(child.children().iter().cloned());
                } else {
                    slot.push(child.clone());
                }
            }
            None => slots
                .entry(DEFAULT_SLOT.to_string())
                .or_default()
                .push(child.clone()),
        }
    }
    slots.retain(|_, nodes| !nodes.iter().all(is_whitespace));
    slots
}

fn is_whitespace(node: &VNode) -> bool {
    node.tag().is_none() && node.text_content().is_some_and(|t| t.trim().is_empty())
}
