//! Handles shared with the rendering backend.
//!
//! The core never looks inside a rendered tree beyond what it needs for
//! lifecycle bookkeeping: the placeholder/parent link, the hosted
//! component instance and the mounted element's owner back-reference.
//! Producing and diffing trees is the job of a [`Patcher`].

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::instance::{ComponentOptions, Instance, InstanceInner};
use crate::listeners::ListenerMap;
use crate::props::PropsData;

static NEXT_NODE_ID: AtomicUsize = AtomicUsize::new(1);

/// Tag of elements created for text nodes.
pub const TEXT_TAG: &str = "#text";

fn next_node_id() -> usize {
    NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed)
}

// ============================================================================
// Element
// ============================================================================

/// A mounted element produced by the patch backend.
#[derive(Clone)]
pub struct Element(Rc<ElementInner>);

struct ElementInner {
    id: usize,
    tag: String,
    text: RefCell<Option<String>>,
    children: RefCell<Vec<Element>>,
    parent: RefCell<Weak<ElementInner>>,
    owner: RefCell<Weak<InstanceInner>>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Rc::new(ElementInner {
            id: next_node_id(),
            tag: tag.into(),
            text: RefCell::new(None),
            children: RefCell::new(Vec::new()),
            parent: RefCell::new(Weak::new()),
            owner: RefCell::new(Weak::new()),
        }))
    }

    /// A text node.
    pub fn text_node(text: impl Into<String>) -> Self {
        let el = Self::new(TEXT_TAG);
        el.set_text(Some(text.into()));
        el
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn tag(&self) -> &str {
        &self.0.tag
    }

    pub fn text(&self) -> Option<String> {
        self.0.text.borrow().clone()
    }

    pub fn set_text(&self, text: Option<String>) {
        *self.0.text.borrow_mut() = text;
    }

    pub fn children(&self) -> Vec<Element> {
        self.0.children.borrow().clone()
    }

    pub fn parent(&self) -> Option<Element> {
        self.0.parent.borrow().upgrade().map(Element)
    }

    /// Remove this element from its parent, if it has one.
    pub fn detach(&self) {
        if let Some(parent) = self.parent() {
            parent.remove_child(self);
        }
    }

    fn adopt(&self, child: &Element) {
        child.detach();
        *child.0.parent.borrow_mut() = Rc::downgrade(&self.0);
    }

    pub fn append_child(&self, child: Element) {
        self.adopt(&child);
        self.0.children.borrow_mut().push(child);
    }

    /// Insert `child` before `reference`, or append when `reference` is not
    /// a child of this element.
    pub fn insert_before(&self, child: Element, reference: Option<&Element>) {
        self.adopt(&child);
        let mut children = self.0.children.borrow_mut();
        match reference.and_then(|r| children.iter().position(|c| c == r)) {
            Some(index) => children.insert(index, child),
            None => children.push(child),
        }
    }

    pub fn replace_child(&self, old: &Element, new: Element) -> bool {
        if !self.0.children.borrow().contains(old) {
            return false;
        }
        self.adopt(&new);
        let mut children = self.0.children.borrow_mut();
        match children.iter().position(|c| c == old) {
            Some(index) => {
                children[index] = new;
                *old.0.parent.borrow_mut() = Weak::new();
                true
            }
            None => false,
        }
    }

    pub fn remove_child(&self, child: &Element) -> bool {
        let mut children = self.0.children.borrow_mut();
        match children.iter().position(|c| c == child) {
            Some(index) => {
                children.remove(index);
                *child.0.parent.borrow_mut() = Weak::new();
                true
            }
            None => false,
        }
    }

    /// The instance whose root this element currently is.
    pub fn owner(&self) -> Option<Instance> {
        Instance::from_weak(&self.0.owner.borrow())
    }

    pub fn set_owner(&self, owner: Option<&Instance>) {
        *self.0.owner.borrow_mut() = owner.map(Instance::downgrade).unwrap_or_default();
    }
}

impl PartialEq for Element {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Element {}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Element")
            .field("id", &self.0.id)
            .field("tag", &self.0.tag)
            .finish()
    }
}

// ============================================================================
// VNode
// ============================================================================

/// Per-node data the lifecycle code consults.
#[derive(Debug, Clone, Default)]
pub struct VNodeData {
    pub attrs: IndexMap<String, String>,
    /// Named slot this node is passed into, if any.
    pub slot: Option<String>,
    /// Whether the placeholder passes scoped slots.
    pub scoped_slots: bool,
    /// Keep the hosted instance alive (deactivate instead of destroy).
    pub keep_alive: bool,
}

/// Payload of a component placeholder node.
#[derive(Clone)]
pub struct ComponentVNode {
    pub options: Rc<ComponentOptions>,
    pub props_data: Option<PropsData>,
    pub listeners: Option<ListenerMap>,
    pub children: Option<Vec<VNode>>,
}

impl ComponentVNode {
    pub fn new(options: Rc<ComponentOptions>) -> Self {
        Self {
            options,
            props_data: None,
            listeners: None,
            children: None,
        }
    }
}

/// A rendered tree node.
///
/// Cloning is cheap and preserves identity.
#[derive(Clone)]
pub struct VNode(Rc<VNodeInner>);

struct VNodeInner {
    id: usize,
    tag: Option<String>,
    text: Option<String>,
    data: VNodeData,
    children: Vec<VNode>,
    component: Option<ComponentVNode>,
    parent: RefCell<Option<VNode>>,
    elm: RefCell<Option<Element>>,
    instance: RefCell<Option<Instance>>,
}

impl VNode {
    fn build(
        tag: Option<String>,
        text: Option<String>,
        data: VNodeData,
        children: Vec<VNode>,
        component: Option<ComponentVNode>,
    ) -> Self {
        Self(Rc::new(VNodeInner {
            id: next_node_id(),
            tag,
            text,
            data,
            children,
            component,
            parent: RefCell::new(None),
            elm: RefCell::new(None),
            instance: RefCell::new(None),
        }))
    }

    pub fn element(tag: impl Into<String>, data: VNodeData, children: Vec<VNode>) -> Self {
        Self::build(Some(tag.into()), None, data, children, None)
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::build(None, Some(text.into()), VNodeData::default(), Vec::new(), None)
    }

    /// Placeholder rendered when a component produced nothing.
    pub fn empty() -> Self {
        Self::build(None, Some(String::new()), VNodeData::default(), Vec::new(), None)
    }

    /// Placeholder node for a child component.
    pub fn component(tag: impl Into<String>, data: VNodeData, component: ComponentVNode) -> Self {
        Self::build(Some(tag.into()), None, data, Vec::new(), Some(component))
    }

    pub fn id(&self) -> usize {
        self.0.id
    }

    pub fn tag(&self) -> Option<&str> {
        self.0.tag.as_deref()
    }

    pub fn text_content(&self) -> Option<&str> {
        self.0.text.as_deref()
    }

    pub fn data(&self) -> &VNodeData {
        &self.0.data
    }

    pub fn children(&self) -> &[VNode] {
        &self.0.children
    }

    pub fn component_options(&self) -> Option<&ComponentVNode> {
        self.0.component.as_ref()
    }

    pub fn is_component(&self) -> bool {
        self.0.component.is_some()
    }

    /// Placeholder this tree is the root of, when rendered by a child component.
    pub fn parent(&self) -> Option<VNode> {
        self.0.parent.borrow().clone()
    }

    pub fn set_parent(&self, parent: Option<VNode>) {
        *self.0.parent.borrow_mut() = parent;
    }

    pub fn elm(&self) -> Option<Element> {
        self.0.elm.borrow().clone()
    }

    pub fn set_elm(&self, elm: Option<Element>) {
        *self.0.elm.borrow_mut() = elm;
    }

    /// Instance hosted by this placeholder.
    pub fn component_instance(&self) -> Option<Instance> {
        self.0.instance.borrow().clone()
    }

    pub fn set_component_instance(&self, instance: Option<Instance>) {
        *self.0.instance.borrow_mut() = instance;
    }
}

impl PartialEq for VNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for VNode {}

impl std::fmt::Debug for VNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VNode")
            .field("id", &self.0.id)
            .field("tag", &self.0.tag)
            .field("text", &self.0.text)
            .field("children", &self.0.children.len())
            .field("component", &self.0.component.is_some())
            .finish()
    }
}

// ============================================================================
// Patching
// ============================================================================

/// What the patch function is diffing against.
#[derive(Debug, Clone)]
pub enum PatchSource {
    /// First patch: the element to mount onto or hydrate, if any.
    Element(Option<Element>),
    /// Update or teardown: the previously rendered tree.
    Tree(Option<VNode>),
}

/// Hints passed with the first patch of an instance.
#[derive(Debug, Clone, Default)]
pub struct PatchHints {
    pub hydrating: bool,
    pub remove_only: bool,
    pub parent_elm: Option<Element>,
    pub ref_elm: Option<Element>,
}

/// The rendering backend.
///
/// `patch(old, Some(new), ..)` mounts or updates and returns the resulting
/// root element. `patch(old, None, ..)` runs teardown over `old` and
/// returns `None`.
pub trait Patcher {
    fn patch(&self, old: PatchSource, vnode: Option<&VNode>, hints: PatchHints) -> Option<Element>;
}

impl<F> Patcher for F
where
    F: Fn(PatchSource, Option<&VNode>, PatchHints) -> Option<Element>,
{
    fn patch(&self, old: PatchSource, vnode: Option<&VNode>, hints: PatchHints) -> Option<Element> {
        self(old, vnode, hints)
    }
}
