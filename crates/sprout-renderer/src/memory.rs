//! In-memory patch backend.

use std::cell::RefCell;
use std::rc::Rc;

use sprout_core::instance::{InstanceInit, RefTarget};
use sprout_core::vdom::TEXT_TAG;
use sprout_core::{
    Element, Instance, PatchHints, PatchSource, Patcher, VNode, active_instance, activate_child,
    create_instance, deactivate_child, mark_mounted, mount, update_child_component,
};

/// Attribute registering a node under a name in its owner's refs.
pub const REF_ATTR: &str = "ref";

#[derive(Default)]
struct RendererState {
    /// Nesting depth of `patch` calls.
    depth: usize,
    /// Component placeholders waiting for their insert hook, children first.
    inserted: Vec<VNode>,
}

/// Builds and patches [`Element`] trees in memory.
///
/// Clones share their insert queue, so nested component mounts started
/// from inside a patch get their insert hooks run when the outermost patch
/// finishes.
#[derive(Clone, Default)]
pub struct MemoryRenderer {
    state: Rc<RefCell<RendererState>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    fn as_patcher(&self) -> Rc<dyn Patcher> {
        Rc::new(self.clone())
    }

    // --- creation -------------------------------------------------------------

    fn create_elm(&self, vnode: &VNode, parent_elm: Option<&Element>, ref_elm: Option<&Element>) {
        if vnode.is_component() {
            self.create_component(vnode, parent_elm, ref_elm, None);
            return;
        }
        let elm = match vnode.tag() {
            Some(tag) => {
                let elm = Element::new(tag);
                for child in vnode.children() {
                    self.create_elm(child, Some(&elm), None);
                }
                elm
            }
            None => Element::text_node(vnode.text_content().unwrap_or_default()),
        };
        vnode.set_elm(Some(elm.clone()));
        register_ref(vnode);
        if let Some(parent) = parent_elm {
            parent.insert_before(elm, ref_elm);
        }
    }

    /// Create (or reuse a kept-alive) instance for a placeholder and mount
    /// it. `hydrate` is the server-rendered element to adopt, if any.
    fn create_component(
        &self,
        vnode: &VNode,
        parent_elm: Option<&Element>,
        ref_elm: Option<&Element>,
        hydrate: Option<Element>,
    ) {
        let Some(component) = vnode.component_options() else {
            return;
        };

        let reusable = vnode
            .component_instance()
            .filter(|vm| vnode.data().keep_alive && !vm.is_destroyed());
        let child = match reusable {
            Some(vm) => {
                update_child_component(
                    &vm,
                    component.props_data.clone(),
                    component.listeners.clone(),
                    vnode,
                    component.children.clone(),
                );
                vm
            }
            None => {
                let vm = create_instance(
                    Rc::clone(&component.options),
                    InstanceInit {
                        parent: active_instance(),
                        parent_vnode: Some(vnode.clone()),
                        parent_listeners: component.listeners.clone(),
                        render_children: component.children.clone(),
                        props_data: component.props_data.clone(),
                        ..InstanceInit::default()
                    },
                );
                vnode.set_component_instance(Some(vm.clone()));
                let hydrating = hydrate.is_some();
                mount(&vm, hydrate, self.as_patcher(), hydrating);
                vm
            }
        };

        vnode.set_elm(child.el());
        register_ref(vnode);
        if let (Some(parent), Some(elm)) = (parent_elm, child.el()) {
            parent.insert_before(elm, ref_elm);
        }
        self.state.borrow_mut().inserted.push(vnode.clone());
    }

    // --- hydration ------------------------------------------------------------

    /// Adopt an existing element tree for `vnode`. Returns `false` on a
    /// structural mismatch.
    fn hydrate(&self, elm: &Element, vnode: &VNode) -> bool {
        if vnode.is_component() {
            self.create_component(vnode, None, None, Some(elm.clone()));
            return vnode.elm().as_ref() == Some(elm);
        }
        match vnode.tag() {
            Some(tag) => {
                let existing = elm.children();
                if elm.tag() != tag || existing.len() != vnode.children().len() {
                    return false;
                }
                vnode.set_elm(Some(elm.clone()));
                register_ref(vnode);
                existing
                    .iter()
                    .zip(vnode.children())
                    .all(|(child_elm, child)| self.hydrate(child_elm, child))
            }
            None => {
                if elm.tag() != TEXT_TAG {
                    return false;
                }
                let text = vnode.text_content().unwrap_or_default();
                if elm.text().as_deref() != Some(text) {
                    elm.set_text(Some(text.to_string()));
                }
                vnode.set_elm(Some(elm.clone()));
                true
            }
        }
    }

    // --- patching -------------------------------------------------------------

    fn patch_vnode(&self, old: &VNode, vnode: &VNode) {
        if old == vnode {
            return;
        }
        let elm = old.elm();
        vnode.set_elm(elm.clone());

        if let Some(component) = vnode.component_options() {
            let Some(child) = old.component_instance() else {
                return;
            };
            vnode.set_component_instance(Some(child.clone()));
            update_child_component(
                &child,
                component.props_data.clone(),
                component.listeners.clone(),
                vnode,
                component.children.clone(),
            );
            return;
        }

        let Some(elm) = elm else {
            return;
        };
        if vnode.tag().is_none() {
            let text = vnode.text_content().map(str::to_string);
            if elm.text() != text {
                elm.set_text(text);
            }
            return;
        }
        self.update_children(&elm, old.children(), vnode.children());
    }

    /// Pairwise child reconciliation by position.
    fn update_children(&self, parent: &Element, old: &[VNode], new: &[VNode]) {
        for index in 0..old.len().max(new.len()) {
            match (old.get(index), new.get(index)) {
                (Some(old), Some(new)) if same_vnode(old, new) => self.patch_vnode(old, new),
                (Some(old), Some(new)) => {
                    self.create_elm(new, Some(parent), old.elm().as_ref());
                    self.remove_vnode(parent, old);
                }
                (None, Some(new)) => self.create_elm(new, Some(parent), None),
                (Some(old), None) => self.remove_vnode(parent, old),
                (None, None) => {}
            }
        }
    }

    fn remove_vnode(&self, parent: &Element, vnode: &VNode) {
        if let Some(elm) = vnode.elm() {
            parent.remove_child(&elm);
        }
        invoke_destroy_hook(vnode);
    }

    // --- insert queue ---------------------------------------------------------

    fn enter(&self) {
        self.state.borrow_mut().depth += 1;
    }

    /// Leave a patch; the outermost one runs the queued insert hooks.
    fn leave(&self) {
        let queue = {
            let mut state = self.state.borrow_mut();
            state.depth -= 1;
            if state.depth > 0 {
                return;
            }
            std::mem::take(&mut state.inserted)
        };
        for vnode in queue {
            invoke_insert_hook(&vnode);
        }
    }

    fn patch_inner(&self, old: PatchSource, vnode: &VNode, hints: PatchHints) -> Option<Element> {
        match old {
            PatchSource::Element(None) | PatchSource::Tree(None) => {
                self.create_elm(vnode, hints.parent_elm.as_ref(), hints.ref_elm.as_ref());
            }
            PatchSource::Element(Some(el)) => {
                if hints.hydrating {
                    if self.hydrate(&el, vnode) {
                        return vnode.elm();
                    }
                    tracing::warn!(
                        tag = el.tag(),
                        "server-rendered tree does not match the render output; rendering from scratch"
                    );
                }
                let parent = el.parent();
                self.create_elm(vnode, parent.as_ref(), Some(&el));
                if let Some(parent) = parent {
                    parent.remove_child(&el);
                }
            }
            PatchSource::Tree(Some(old)) if same_vnode(&old, vnode) => {
                self.patch_vnode(&old, vnode);
            }
            PatchSource::Tree(Some(old)) => {
                let old_elm = old.elm();
                let parent = old_elm.as_ref().and_then(Element::parent);
                self.create_elm(vnode, parent.as_ref(), old_elm.as_ref());

                let mut ancestor = vnode.parent();
                while let Some(placeholder) = ancestor {
                    placeholder.set_elm(vnode.elm());
                    ancestor = placeholder.parent();
                }

                if let (Some(parent), Some(old_elm)) = (parent, old_elm) {
                    parent.remove_child(&old_elm);
                }
                invoke_destroy_hook(&old);
            }
        }
        vnode.elm()
    }
}

impl Patcher for MemoryRenderer {
    fn patch(&self, old: PatchSource, vnode: Option<&VNode>, hints: PatchHints) -> Option<Element> {
        let Some(vnode) = vnode else {
            if let PatchSource::Tree(Some(old)) = old {
                invoke_destroy_hook(&old);
            }
            return None;
        };
        self.enter();
        let elm = self.patch_inner(old, vnode, hints);
        self.leave();
        elm
    }
}

fn same_vnode(a: &VNode, b: &VNode) -> bool {
    if a.tag() != b.tag() || a.text_content().is_some() != b.text_content().is_some() {
        return false;
    }
    match (a.component_options(), b.component_options()) {
        (Some(a), Some(b)) => Rc::ptr_eq(&a.options, &b.options),
        (None, None) => true,
        _ => false,
    }
}

fn register_ref(vnode: &VNode) {
    let Some(name) = vnode.data().attrs.get(REF_ATTR) else {
        return;
    };
    let Some(owner) = active_instance() else {
        return;
    };
    let target = match vnode.component_instance() {
        Some(vm) => RefTarget::Instance(vm),
        None => match vnode.elm() {
            Some(elm) => RefTarget::Element(elm),
            None => return,
        },
    };
    owner.set_ref(name.clone(), target);
}

fn unregister_ref(vnode: &VNode, owner: Option<&Instance>) {
    if let (Some(name), Some(owner)) = (vnode.data().attrs.get(REF_ATTR), owner) {
        owner.remove_ref(name);
    }
}

/// Component placeholder inserted into the tree.
fn invoke_insert_hook(vnode: &VNode) {
    let Some(vm) = vnode.component_instance() else {
        return;
    };
    if !vm.is_mounted() {
        mark_mounted(&vm);
    }
    if vnode.data().keep_alive {
        activate_child(&vm, true);
    }
}

/// Run destroy hooks over a removed subtree.
fn invoke_destroy_hook(vnode: &VNode) {
    if let Some(vm) = vnode.component_instance() {
        unregister_ref(vnode, vm.parent().as_ref());
        if !vm.is_destroyed() {
            if vnode.data().keep_alive {
                deactivate_child(&vm, true);
            } else {
                vm.destroy();
            }
        }
        if !vnode.data().keep_alive {
            vnode.set_component_instance(None);
        }
        return;
    }
    unregister_ref(vnode, active_instance().as_ref());
    for child in vnode.children() {
        invoke_destroy_hook(child);
    }
}
