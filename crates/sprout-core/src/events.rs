//! Instance-scoped event bus.
//!
//! Every component instance owns an [`EventBus`] mapping event names to
//! ordered handler sequences, and exposes it through the [`EventEmitter`]
//! capability (`on` / `once` / `off` / `emit`). Handlers receive the
//! instance that emitted and the trailing arguments given to `emit`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use indexmap::IndexMap;

use crate::Value;
use crate::config;
use crate::error::{self, Result, Warning};
use crate::instance::Instance;

/// Prefix of the synthetic events fired for lifecycle hooks.
pub const HOOK_EVENT_PREFIX: &str = "hook:";

/// Unique identifier for an event handler.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct EventHandlerId(pub usize);

impl std::fmt::Display for EventHandlerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Global counter for generating unique event handler IDs.
static NEXT_HANDLER_ID: AtomicUsize = AtomicUsize::new(0);

fn next_handler_id() -> EventHandlerId {
    EventHandlerId(NEXT_HANDLER_ID.fetch_add(1, Ordering::Relaxed))
}

/// Signature of an event handler body.
pub type HandlerFn = dyn Fn(&Instance, &[Value]) -> Result<()>;

/// A registered callback.
///
/// Handlers compare by identity: clones of one handler are equal, two
/// handlers built from the same closure code are not.
#[derive(Clone)]
pub struct Handler {
    inner: Rc<HandlerInner>,
}

struct HandlerInner {
    id: EventHandlerId,
    func: Box<HandlerFn>,
    /// Handler this one wraps (set on `once` wrappers).
    original: Option<Handler>,
}

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Instance, &[Value]) -> Result<()> + 'static,
    {
        Self {
            inner: Rc::new(HandlerInner {
                id: next_handler_id(),
                func: Box::new(f),
                original: None,
            }),
        }
    }

    /// Wrap `original` so it unregisters itself from `event` before its
    /// first call.
    fn once(event: &str, original: Handler) -> Self {
        let event = event.to_string();
        let inner = Rc::new_cyclic(|me: &std::rc::Weak<HandlerInner>| {
            let me = me.clone();
            let target = original.clone();
            HandlerInner {
                id: next_handler_id(),
                func: Box::new(move |vm: &Instance, args: &[Value]| {
                    if let Some(inner) = me.upgrade() {
                        vm.off(event.as_str(), Some(&Handler { inner }));
                    }
                    target.call(vm, args)
                }),
                original: Some(original),
            }
        });
        Self { inner }
    }

    pub fn id(&self) -> EventHandlerId {
        self.inner.id
    }

    /// Handler wrapped by a `once` registration.
    pub fn original(&self) -> Option<&Handler> {
        self.inner.original.as_ref()
    }

    pub fn call(&self, vm: &Instance, args: &[Value]) -> Result<()> {
        (self.inner.func)(vm, args)
    }

    /// Identity match used by `off`: the handler itself or the handler a
    /// `once` wrapper stands for.
    fn matches(&self, other: &Handler) -> bool {
        self == other || self.original().is_some_and(|original| original == other)
    }
}

impl PartialEq for Handler {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Handler {}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.inner.id)
            .field("once", &self.inner.original.is_some())
            .finish()
    }
}

/// One event name or a list of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventNames {
    One(String),
    Many(Vec<String>),
}

impl From<&str> for EventNames {
    fn from(name: &str) -> Self {
        EventNames::One(name.to_string())
    }
}

impl From<String> for EventNames {
    fn from(name: String) -> Self {
        EventNames::One(name)
    }
}

impl From<&String> for EventNames {
    fn from(name: &String) -> Self {
        EventNames::One(name.clone())
    }
}

impl From<Vec<String>> for EventNames {
    fn from(names: Vec<String>) -> Self {
        EventNames::Many(names)
    }
}

impl From<Vec<&str>> for EventNames {
    fn from(names: Vec<&str>) -> Self {
        EventNames::Many(names.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for EventNames {
    fn from(names: &[&str]) -> Self {
        EventNames::Many(names.iter().map(|n| n.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for EventNames {
    fn from(names: [&str; N]) -> Self {
        EventNames::Many(names.iter().map(|n| n.to_string()).collect())
    }
}

// ============================================================================
// Event Bus
// ============================================================================

/// Handler store of one instance.
#[derive(Default)]
pub struct EventBus {
    events: RefCell<IndexMap<String, Vec<Handler>>>,
    has_hook_event: Cell<bool>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Marks the bus as observing hooks when the name
    /// carries the hook prefix; the mark is never cleared.
    pub fn add(&self, event: &str, handler: Handler) {
        tracing::trace!(event, handler = %handler.id(), "handler registered");
        self.events
            .borrow_mut()
            .entry(event.to_string())
            .or_default()
            .push(handler);
        if event.starts_with(HOOK_EVENT_PREFIX) {
            self.has_hook_event.set(true);
        }
    }

    /// Remove the most recently registered handler matching `handler`.
    ///
    /// Scans backward so the last registration goes first.
    pub fn remove(&self, event: &str, handler: &Handler) -> bool {
        let mut events = self.events.borrow_mut();
        let Some(handlers) = events.get_mut(event) else {
            return false;
        };
        let mut i = handlers.len();
        while i > 0 {
            i -= 1;
            if handlers[i].matches(handler) {
                let removed = handlers.remove(i);
                tracing::trace!(event, handler = %removed.id(), "handler removed");
                return true;
            }
        }
        false
    }

    /// Drop every handler for one event.
    pub fn clear_event(&self, event: &str) {
        self.events.borrow_mut().shift_remove(event);
    }

    /// Drop every handler for every event. The hook flag stays as it was.
    pub fn clear(&self) {
        *self.events.borrow_mut() = IndexMap::new();
    }

    /// Copy of the handler sequence for `event`, in registration order.
    pub fn snapshot(&self, event: &str) -> Option<Vec<Handler>> {
        self.events.borrow().get(event).cloned()
    }

    pub fn has_handlers(&self, event: &str) -> bool {
        self.events
            .borrow()
            .get(event)
            .is_some_and(|handlers| !handlers.is_empty())
    }

    pub fn handler_count(&self, event: &str) -> usize {
        self.events.borrow().get(event).map_or(0, Vec::len)
    }

    /// Names with at least one handler, in first-registration order.
    pub fn event_names(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether a hook event listener was ever registered.
    pub fn has_hook_event(&self) -> bool {
        self.has_hook_event.get()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().values().all(Vec::is_empty)
    }
}

// ============================================================================
// EventEmitter capability
// ============================================================================

/// Publish/subscribe surface of a component instance.
pub trait EventEmitter {
    /// Register `handler` for one or more events.
    fn on(&self, events: impl Into<EventNames>, handler: Handler) -> &Self;

    /// Register `handler` to run at most once.
    fn once(&self, event: &str, handler: Handler) -> &Self;

    /// Remove one registration of `handler`, or every handler of the named
    /// events when `handler` is `None`.
    fn off(&self, events: impl Into<EventNames>, handler: Option<&Handler>) -> &Self;

    /// Remove every handler of every event.
    fn off_all(&self) -> &Self;

    /// Call the handlers of `event` in registration order.
    fn emit(&self, event: &str, args: &[Value]) -> &Self;
}

impl EventEmitter for Instance {
    fn on(&self, events: impl Into<EventNames>, handler: Handler) -> &Self {
        match events.into() {
            EventNames::Many(names) => {
                for name in &names {
                    self.on(name, handler.clone());
                }
            }
            EventNames::One(name) => self.bus().add(&name, handler),
        }
        self
    }

    fn once(&self, event: &str, handler: Handler) -> &Self {
        self.on(event, Handler::once(event, handler))
    }

    fn off(&self, events: impl Into<EventNames>, handler: Option<&Handler>) -> &Self {
        match events.into() {
            EventNames::Many(names) => {
                for name in &names {
                    self.off(name, handler);
                }
            }
            EventNames::One(name) => match handler {
                None => self.bus().clear_event(&name),
                Some(handler) => {
                    self.bus().remove(&name, handler);
                }
            },
        }
        self
    }

    fn off_all(&self) -> &Self {
        self.bus().clear();
        self
    }

    fn emit(&self, event: &str, args: &[Value]) -> &Self {
        if config::diagnostics() {
            let lower = event.to_lowercase();
            if lower != event && self.bus().has_handlers(&lower) {
                error::tip(
                    Warning::EventCaseMismatch {
                        emitted: event.to_string(),
                        registered: lower,
                        component: self.display_name(),
                        suggestion: hyphenate(event),
                    },
                    Some(self),
                );
            }
        }

        // Dispatch walks a copy so handlers may register or remove handlers
        // without affecting the in-flight dispatch.
        let Some(handlers) = self.bus().snapshot(event) else {
            return self;
        };
        for handler in &handlers {
            if let Err(err) = handler.call(self, args) {
                tracing::trace!(event, handler = %handler.id(), "handler failed");
                error::report_error(err, Some(self), &format!("event handler for '{event}'"));
            }
        }
        self
    }
}

/// `fooBar` -> `foo-bar`.
fn hyphenate(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
