//! Component instances.
//!
//! An [`Instance`] is a cheap, cloneable handle to one node of the
//! component tree. Parents own their children; the parent and root links
//! are weak. A mounted child is also held by its placeholder, which its
//! rendered tree links back to; [`destroy`](crate::lifecycle::destroy)
//! cuts that link, after which dropping the root frees the whole tree.
//!
//! All state lives behind `Cell`/`RefCell`. Accessors hand out owned
//! clones so no borrow is ever held while user callbacks run.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::Value;
use crate::error::Result;
use crate::events::EventBus;
use crate::hooks::{Hook, LifecycleHooks};
use crate::listeners::ListenerMap;
use crate::props::{PropsData, PropsSchema};
use crate::reactive::{Observer, Subscription};
use crate::update::Slots;
use crate::vdom::{Element, Patcher, VNode};

static NEXT_INSTANCE_ID: AtomicUsize = AtomicUsize::new(1);

/// Unique identifier of an instance.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct InstanceId(usize);

impl InstanceId {
    fn next() -> Self {
        Self(NEXT_INSTANCE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Render function of a component.
pub type RenderFn = Rc<dyn Fn(&Instance) -> Result<VNode>>;

/// Static description of a component.
#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub name: Option<String>,
    /// Structural wrapper that never shows up as anybody's parent.
    pub is_abstract: bool,
    pub render: Option<RenderFn>,
    pub props: Option<PropsSchema>,
    pub hooks: LifecycleHooks,
}

impl ComponentOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn abstract_component(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn render(mut self, render: impl Fn(&Instance) -> Result<VNode> + 'static) -> Self {
        self.render = Some(Rc::new(render));
        self
    }

    pub fn props(mut self, props: PropsSchema) -> Self {
        self.props = Some(props);
        self
    }

    pub fn hook(mut self, hook: Hook, f: impl Fn(&Instance) -> Result<()> + 'static) -> Self {
        self.hooks.add(hook, f);
        self
    }
}

impl fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("name", &self.name)
            .field("is_abstract", &self.is_abstract)
            .field("render", &self.render.is_some())
            .field("props", &self.props.as_ref().map(|p| p.keys().collect::<Vec<_>>()))
            .field("hooks", &self.hooks)
            .finish()
    }
}

/// Everything a parent hands to a new child at creation time.
#[derive(Clone, Default)]
pub struct InstanceInit {
    pub parent: Option<Instance>,
    /// Placeholder node representing the instance in its parent's tree.
    pub parent_vnode: Option<VNode>,
    pub parent_listeners: Option<ListenerMap>,
    /// Slot content passed by the parent.
    pub render_children: Option<Vec<VNode>>,
    pub props_data: Option<PropsData>,
    pub parent_elm: Option<Element>,
    pub ref_elm: Option<Element>,
    /// Root data object, shared between instances.
    pub data: Option<Rc<Observer>>,
}

/// Last lifecycle transition an instance went through.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum LifecycleState {
    #[default]
    New,
    Mounted,
    Updated,
    Activated,
    Deactivated,
    BeingDestroyed,
    Destroyed,
}

/// Target of a named ref.
#[derive(Clone, Debug, PartialEq)]
pub enum RefTarget {
    Element(Element),
    Instance(Instance),
}

// ============================================================================
// Instance
// ============================================================================

/// Handle to a component instance. Equality is identity.
#[derive(Clone)]
pub struct Instance(pub(crate) Rc<InstanceInner>);

pub(crate) struct InstanceInner {
    pub(crate) id: InstanceId,
    pub(crate) options: Rc<ComponentOptions>,
    pub(crate) bus: EventBus,

    pub(crate) parent: RefCell<Weak<InstanceInner>>,
    /// Empty when the instance is its own root.
    pub(crate) root: RefCell<Weak<InstanceInner>>,
    pub(crate) children: RefCell<Vec<Instance>>,
    pub(crate) refs: RefCell<IndexMap<String, RefTarget>>,

    pub(crate) el: RefCell<Option<Element>>,
    /// Tree produced by the last render.
    pub(crate) vnode: RefCell<Option<VNode>>,
    /// Placeholder the current tree is rendered for.
    pub(crate) placeholder: RefCell<Option<VNode>>,
    pub(crate) parent_vnode: RefCell<Option<VNode>>,
    pub(crate) parent_elm: RefCell<Option<Element>>,
    pub(crate) ref_elm: RefCell<Option<Element>>,
    pub(crate) patcher: RefCell<Option<Rc<dyn Patcher>>>,

    pub(crate) render_children: RefCell<Option<Vec<VNode>>>,
    pub(crate) slots: RefCell<Slots>,
    pub(crate) has_scoped_slots: Cell<bool>,
    pub(crate) attrs: RefCell<IndexMap<String, String>>,
    pub(crate) parent_listeners: RefCell<ListenerMap>,

    pub(crate) props: RefCell<IndexMap<String, Value>>,
    pub(crate) props_data: RefCell<Option<PropsData>>,

    pub(crate) render_watcher: RefCell<Option<Rc<dyn Subscription>>>,
    pub(crate) watchers: RefCell<Vec<Rc<dyn Subscription>>>,
    pub(crate) data: RefCell<Option<Rc<Observer>>>,

    pub(crate) state: Cell<LifecycleState>,
    pub(crate) is_mounted: Cell<bool>,
    pub(crate) is_being_destroyed: Cell<bool>,
    pub(crate) is_destroyed: Cell<bool>,
    pub(crate) teardown_started: Cell<bool>,
    /// `None` until the instance has been activated or deactivated once.
    pub(crate) inactive: Cell<Option<bool>>,
    pub(crate) direct_inactive: Cell<bool>,
}

impl Instance {
    /// Allocate a detached instance. Nothing runs; see
    /// [`create_instance`](crate::lifecycle::create_instance) for the full
    /// creation sequence.
    pub fn new(options: impl Into<Rc<ComponentOptions>>) -> Self {
        Self::with_init(options, InstanceInit::default())
    }

    /// Allocate an instance holding the creation inputs in `init`.
    ///
    /// The parent is recorded but the instance is not linked into the
    /// parent's children; that is the job of `init_lifecycle`.
    pub fn with_init(options: impl Into<Rc<ComponentOptions>>, init: InstanceInit) -> Self {
        let InstanceInit {
            parent,
            parent_vnode,
            parent_listeners,
            render_children,
            props_data,
            parent_elm,
            ref_elm,
            data,
        } = init;
        Self(Rc::new(InstanceInner {
            id: InstanceId::next(),
            options: options.into(),
            bus: EventBus::new(),
            parent: RefCell::new(parent.as_ref().map(Instance::downgrade).unwrap_or_default()),
            root: RefCell::new(Weak::new()),
            children: RefCell::new(Vec::new()),
            refs: RefCell::new(IndexMap::new()),
            el: RefCell::new(None),
            vnode: RefCell::new(None),
            placeholder: RefCell::new(None),
            parent_vnode: RefCell::new(parent_vnode),
            parent_elm: RefCell::new(parent_elm),
            ref_elm: RefCell::new(ref_elm),
            patcher: RefCell::new(None),
            render_children: RefCell::new(render_children),
            slots: RefCell::new(Slots::new()),
            has_scoped_slots: Cell::new(false),
            attrs: RefCell::new(IndexMap::new()),
            parent_listeners: RefCell::new(parent_listeners.unwrap_or_default()),
            props: RefCell::new(IndexMap::new()),
            props_data: RefCell::new(props_data),
            render_watcher: RefCell::new(None),
            watchers: RefCell::new(Vec::new()),
            data: RefCell::new(data),
            state: Cell::new(LifecycleState::New),
            is_mounted: Cell::new(false),
            is_being_destroyed: Cell::new(false),
            is_destroyed: Cell::new(false),
            teardown_started: Cell::new(false),
            inactive: Cell::new(None),
            direct_inactive: Cell::new(false),
        }))
    }

    pub(crate) fn downgrade(&self) -> Weak<InstanceInner> {
        Rc::downgrade(&self.0)
    }

    pub(crate) fn from_weak(weak: &Weak<InstanceInner>) -> Option<Instance> {
        weak.upgrade().map(Instance)
    }

    pub fn id(&self) -> InstanceId {
        self.0.id
    }

    pub fn options(&self) -> &ComponentOptions {
        &self.0.options
    }

    pub fn bus(&self) -> &EventBus {
        &self.0.bus
    }

    /// Readable name for logs: `<Root>`, `<Name>` or `<Anonymous>`.
    pub fn display_name(&self) -> String {
        if self.is_root() {
            return "<Root>".to_string();
        }
        match self.0.options.name.as_deref() {
            Some(name) if !name.is_empty() => format!("<{}>", classify(name)),
            _ => "<Anonymous>".to_string(),
        }
    }

    // --- tree -------------------------------------------------------------

    pub fn parent(&self) -> Option<Instance> {
        Instance::from_weak(&self.0.parent.borrow())
    }

    /// Root of the tree; the instance itself when it has no parent.
    pub fn root(&self) -> Instance {
        Instance::from_weak(&self.0.root.borrow()).unwrap_or_else(|| self.clone())
    }

    pub fn is_root(&self) -> bool {
        self.root() == *self
    }

    pub fn children(&self) -> Vec<Instance> {
        self.0.children.borrow().clone()
    }

    pub(crate) fn set_parent(&self, parent: Option<&Instance>) {
        *self.0.parent.borrow_mut() = parent.map(Instance::downgrade).unwrap_or_default();
    }

    pub(crate) fn set_root(&self, root: &Instance) {
        *self.0.root.borrow_mut() = if root == self {
            Weak::new()
        } else {
            root.downgrade()
        };
    }

    pub(crate) fn push_child(&self, child: &Instance) {
        self.0.children.borrow_mut().push(child.clone());
    }

    pub(crate) fn remove_child(&self, child: &Instance) -> bool {
        let mut children = self.0.children.borrow_mut();
        match children.iter().position(|c| c == child) {
            Some(index) => {
                children.remove(index);
                true
            }
            None => false,
        }
    }

    // --- refs -------------------------------------------------------------

    pub fn refs(&self) -> IndexMap<String, RefTarget> {
        self.0.refs.borrow().clone()
    }

    pub fn ref_target(&self, name: &str) -> Option<RefTarget> {
        self.0.refs.borrow().get(name).cloned()
    }

    pub fn set_ref(&self, name: impl Into<String>, target: RefTarget) {
        self.0.refs.borrow_mut().insert(name.into(), target);
    }

    pub fn remove_ref(&self, name: &str) -> Option<RefTarget> {
        self.0.refs.borrow_mut().shift_remove(name)
    }

    // --- rendering ----------------------------------------------------------

    /// Root element of the mounted tree.
    pub fn el(&self) -> Option<Element> {
        self.0.el.borrow().clone()
    }

    pub(crate) fn set_el(&self, el: Option<Element>) {
        *self.0.el.borrow_mut() = el;
    }

    /// Tree produced by the most recent render.
    pub fn vnode(&self) -> Option<VNode> {
        self.0.vnode.borrow().clone()
    }

    pub(crate) fn set_vnode(&self, vnode: Option<VNode>) {
        *self.0.vnode.borrow_mut() = vnode;
    }

    /// Placeholder node standing for this instance in its parent's tree.
    pub fn placeholder(&self) -> Option<VNode> {
        self.0.placeholder.borrow().clone()
    }

    pub(crate) fn set_placeholder(&self, vnode: Option<VNode>) {
        *self.0.placeholder.borrow_mut() = vnode;
    }

    pub fn parent_vnode(&self) -> Option<VNode> {
        self.0.parent_vnode.borrow().clone()
    }

    pub(crate) fn set_parent_vnode(&self, vnode: Option<VNode>) {
        *self.0.parent_vnode.borrow_mut() = vnode;
    }

    /// Placement hints for the first patch. Taking them clears them.
    pub(crate) fn take_placement_hints(&self) -> (Option<Element>, Option<Element>) {
        (
            self.0.parent_elm.borrow_mut().take(),
            self.0.ref_elm.borrow_mut().take(),
        )
    }

    pub fn patcher(&self) -> Option<Rc<dyn Patcher>> {
        self.0.patcher.borrow().clone()
    }

    pub(crate) fn set_patcher(&self, patcher: Option<Rc<dyn Patcher>>) {
        *self.0.patcher.borrow_mut() = patcher;
    }

    // --- slots, attrs, listeners -------------------------------------------

    pub fn render_children(&self) -> Option<Vec<VNode>> {
        self.0.render_children.borrow().clone()
    }

    pub fn slots(&self) -> Slots {
        self.0.slots.borrow().clone()
    }

    pub fn slot(&self, name: &str) -> Option<Vec<VNode>> {
        self.0.slots.borrow().get(name).cloned()
    }

    pub fn has_scoped_slots(&self) -> bool {
        self.0.has_scoped_slots.get()
    }

    /// Attributes passed through from the placeholder.
    pub fn attrs(&self) -> IndexMap<String, String> {
        self.0.attrs.borrow().clone()
    }

    /// Listener declarations passed by the parent.
    pub fn listeners(&self) -> ListenerMap {
        self.0.parent_listeners.borrow().clone()
    }

    // --- props --------------------------------------------------------------

    pub fn props(&self) -> IndexMap<String, Value> {
        self.0.props.borrow().clone()
    }

    pub fn prop(&self, key: &str) -> Option<Value> {
        self.0.props.borrow().get(key).cloned()
    }

    /// Typed view of a prop value.
    pub fn prop_as<T: Clone + 'static>(&self, key: &str) -> Option<T> {
        self.prop(key)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    /// Assign a prop. Returns whether the stored value changed identity.
    pub(crate) fn set_prop(&self, key: &str, value: Option<Value>) -> bool {
        let mut props = self.0.props.borrow_mut();
        let changed = match (props.get(key), &value) {
            (Some(old), Some(new)) => !Rc::ptr_eq(old, new),
            (None, None) => false,
            _ => true,
        };
        match value {
            Some(value) => {
                props.insert(key.to_string(), value);
            }
            None => {
                props.shift_remove(key);
            }
        }
        changed
    }

    pub fn props_data(&self) -> Option<PropsData> {
        self.0.props_data.borrow().clone()
    }

    // --- subscriptions ------------------------------------------------------

    /// Subscription driving this instance's render.
    pub fn render_watcher(&self) -> Option<Rc<dyn Subscription>> {
        self.0.render_watcher.borrow().clone()
    }

    pub fn watchers(&self) -> Vec<Rc<dyn Subscription>> {
        self.0.watchers.borrow().clone()
    }

    /// Register a subscription to be torn down with the instance.
    pub fn add_watcher(&self, watcher: Rc<dyn Subscription>) {
        self.0.watchers.borrow_mut().push(watcher);
    }

    /// Root data object, if the instance uses one.
    pub fn data(&self) -> Option<Rc<Observer>> {
        self.0.data.borrow().clone()
    }

    // --- state --------------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        self.0.state.get()
    }

    pub fn is_mounted(&self) -> bool {
        self.0.is_mounted.get()
    }

    pub fn is_being_destroyed(&self) -> bool {
        self.0.is_being_destroyed.get()
    }

    pub fn is_destroyed(&self) -> bool {
        self.0.is_destroyed.get()
    }

    /// Whether the instance sits in a deactivated keep-alive subtree.
    pub fn is_inactive(&self) -> bool {
        self.0.inactive.get() == Some(true)
    }

    pub fn is_direct_inactive(&self) -> bool {
        self.0.direct_inactive.get()
    }

    pub(crate) fn mark_updated(&self) {
        self.0.state.set(LifecycleState::Updated);
    }
}

/// `my-button` / `my_button` -> `MyButton`.
fn classify(name: &str) -> String {
    name.split(['-', '_'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

impl PartialEq for Instance {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Instance {}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.0.id)
            .field("name", &self.0.options.name)
            .field("state", &self.0.state.get())
            .field("children", &self.0.children.borrow().len())
            .field("events", &self.bus().event_names())
            .finish()
    }
}
