//! Listener declarations and their reconciliation across renders.
//!
//! A parent hands its child a [`ListenerMap`] on every render. Names carry
//! modifier prefixes (`&` passive, `~` once, `!` capture). The first time a
//! name shows up its handler is wrapped in an [`Invoker`] and registered;
//! afterwards only the invoker's target is swapped, so the event bus never
//! sees a re-registration for a declaration-only change.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::Value;
use crate::error::{self, Result, Warning};
use crate::events::{EventEmitter, Handler};
use crate::instance::Instance;

const PASSIVE_PREFIX: char = '&';
const ONCE_PREFIX: char = '~';
const CAPTURE_PREFIX: char = '!';

/// An event name with its modifiers parsed out.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NormalizedEvent {
    pub name: String,
    pub once: bool,
    pub capture: bool,
    pub passive: bool,
    pub params: Option<Vec<String>>,
}

thread_local! {
    static NORMALIZE_CACHE: RefCell<HashMap<String, NormalizedEvent>> =
        RefCell::new(HashMap::new());
}

/// Parse modifier prefixes off an annotated event name.
///
/// Prefixes are stripped left to right in the order passive, once,
/// capture; each only if present.
pub fn normalize_event(annotated: &str) -> NormalizedEvent {
    if let Some(hit) = NORMALIZE_CACHE.with(|cache| cache.borrow().get(annotated).cloned()) {
        return hit;
    }

    let rest = annotated;
    let (passive, rest) = strip(rest, PASSIVE_PREFIX);
    let (once, rest) = strip(rest, ONCE_PREFIX);
    let (capture, rest) = strip(rest, CAPTURE_PREFIX);
    let event = NormalizedEvent {
        name: rest.to_string(),
        once,
        capture,
        passive,
        params: None,
    };

    NORMALIZE_CACHE.with(|cache| {
        cache
            .borrow_mut()
            .insert(annotated.to_string(), event.clone());
    });
    event
}

fn strip(name: &str, prefix: char) -> (bool, &str) {
    match name.strip_prefix(prefix) {
        Some(rest) => (true, rest),
        None => (false, name),
    }
}

// ============================================================================
// Declarations
// ============================================================================

/// A declared listener value.
#[derive(Clone, Debug)]
pub enum Listener {
    /// The declaration resolved to nothing.
    Missing,
    Handler(Handler),
    Handlers(Vec<Handler>),
    /// Already wrapped and registered by an earlier reconciliation.
    Invoker(Invoker),
    /// A handler carrying backend parameters.
    WithParams {
        listener: Box<Listener>,
        params: Vec<String>,
    },
}

impl From<Handler> for Listener {
    fn from(handler: Handler) -> Self {
        Listener::Handler(handler)
    }
}

impl From<Vec<Handler>> for Listener {
    fn from(handlers: Vec<Handler>) -> Self {
        Listener::Handlers(handlers)
    }
}

impl From<Invoker> for Listener {
    fn from(invoker: Invoker) -> Self {
        Listener::Invoker(invoker)
    }
}

/// Listener declarations keyed by annotated event name, in insertion order.
pub type ListenerMap = IndexMap<String, Listener>;

/// What an invoker currently dispatches to.
#[derive(Clone, Debug)]
enum InvokerTarget {
    One(Handler),
    Many(Vec<Handler>),
}

/// Stable wrapper registered once per physical event binding.
///
/// The handler it exposes keeps its identity for the lifetime of the
/// binding; [`Invoker::set_target`] swaps what it calls.
#[derive(Clone)]
pub struct Invoker {
    target: Rc<RefCell<InvokerTarget>>,
    handler: Handler,
}

impl Invoker {
    fn new(target: InvokerTarget) -> Self {
        let target = Rc::new(RefCell::new(target));
        let current = Rc::clone(&target);
        let handler = Handler::new(move |vm: &Instance, args: &[Value]| {
            let snapshot = current.borrow().clone();
            match snapshot {
                InvokerTarget::One(handler) => handler.call(vm, args),
                InvokerTarget::Many(handlers) => {
                    for handler in &handlers {
                        handler.call(vm, args)?;
                    }
                    Ok(())
                }
            }
        });
        Self { target, handler }
    }

    /// Wrap a raw declaration. `None` for declarations with nothing to call.
    pub fn wrap(listener: &Listener) -> Option<Self> {
        match listener {
            Listener::Invoker(invoker) => Some(invoker.clone()),
            other => Self::target_of(other).map(Self::new),
        }
    }

    fn target_of(listener: &Listener) -> Option<InvokerTarget> {
        match listener {
            Listener::Missing => None,
            Listener::Handler(handler) => Some(InvokerTarget::One(handler.clone())),
            Listener::Handlers(handlers) => Some(InvokerTarget::Many(handlers.clone())),
            Listener::Invoker(invoker) => Some(invoker.target.borrow().clone()),
            Listener::WithParams { listener, .. } => Self::target_of(listener),
        }
    }

    /// The handler registered with the event bus.
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// Point the invoker at a new declaration.
    pub fn set_target(&self, listener: &Listener) {
        if let Some(target) = Self::target_of(listener) {
            *self.target.borrow_mut() = target;
        }
    }

    pub fn call(&self, vm: &Instance, args: &[Value]) -> Result<()> {
        self.handler.call(vm, args)
    }
}

impl PartialEq for Invoker {
    fn eq(&self, other: &Self) -> bool {
        self.handler == other.handler
    }
}

impl std::fmt::Debug for Invoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invoker")
            .field("handler", &self.handler.id())
            .field("target", &*self.target.borrow())
            .finish()
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Reconcile `on` against `old_on`.
///
/// New entries are wrapped and passed to `add`; entries present in both
/// have their invoker retargeted in place and `on` is rewritten to hold
/// the surviving invoker, so it can serve as `old_on` next time. Entries
/// gone from `on` are passed to `remove` with their old value.
pub fn update_listeners(
    on: &mut ListenerMap,
    old_on: &ListenerMap,
    mut add: impl FnMut(&NormalizedEvent, &Invoker),
    mut remove: impl FnMut(&NormalizedEvent, &Listener),
    vm: Option<&Instance>,
) {
    for (name, def) in on.iter_mut() {
        let mut event = normalize_event(name);
        let cur = match &*def {
            Listener::WithParams { listener, params } => {
                event.params = Some(params.clone());
                (**listener).clone()
            }
            other => other.clone(),
        };

        if matches!(cur, Listener::Missing) {
            error::warn(Warning::InvalidHandler { event: event.name }, vm);
            continue;
        }

        match old_on.get(name) {
            None | Some(Listener::Missing) => {
                let Some(invoker) = Invoker::wrap(&cur) else {
                    continue;
                };
                *def = Listener::Invoker(invoker.clone());
                add(&event, &invoker);
            }
            Some(Listener::Invoker(old)) => {
                let unchanged = matches!(&cur, Listener::Invoker(cur) if cur == old);
                if !unchanged {
                    old.set_target(&cur);
                    *def = Listener::Invoker(old.clone());
                }
            }
            Some(_) => {
                // An old declaration that was never registered through an
                // invoker: treat it as fresh.
                let Some(invoker) = Invoker::wrap(&cur) else {
                    continue;
                };
                *def = Listener::Invoker(invoker.clone());
                add(&event, &invoker);
            }
        }
    }

    for (name, old) in old_on {
        let gone = match on.get(name) {
            None | Some(Listener::Missing) => true,
            Some(_) => false,
        };
        if gone {
            let event = normalize_event(name);
            remove(&event, old);
        }
    }
}

/// Reconcile a component's parent listeners against its event bus.
///
/// `once` declarations register through [`EventEmitter::once`]; removal
/// goes through [`EventEmitter::off`] with the registered handler.
pub fn update_component_listeners(vm: &Instance, listeners: &mut ListenerMap, old: &ListenerMap) {
    update_listeners(
        listeners,
        old,
        |event, invoker| {
            if event.once {
                vm.once(&event.name, invoker.handler().clone());
            } else {
                vm.on(event.name.as_str(), invoker.handler().clone());
            }
        },
        |event, old| {
            match old {
                Listener::Invoker(invoker) => vm.off(event.name.as_str(), Some(invoker.handler())),
                Listener::Handler(handler) => vm.off(event.name.as_str(), Some(handler)),
                _ => vm.off(event.name.as_str(), None),
            };
        },
        Some(vm),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::instance::ComponentOptions;
    use std::cell::Cell;

    #[derive(Debug, PartialEq)]
    enum Op {
        Add(NormalizedEvent),
        Remove(NormalizedEvent),
    }

    fn reconcile(on: &mut ListenerMap, old: &ListenerMap) -> (Vec<Op>, Vec<Invoker>) {
        let ops = RefCell::new(Vec::new());
        let added = RefCell::new(Vec::new());
        update_listeners(
            on,
            old,
            |event, invoker| {
                ops.borrow_mut().push(Op::Add(event.clone()));
                added.borrow_mut().push(invoker.clone());
            },
            |event, _| ops.borrow_mut().push(Op::Remove(event.clone())),
            None,
        );
        (ops.into_inner(), added.into_inner())
    }

    fn recorder(label: &'static str, log: &Rc<RefCell<Vec<&'static str>>>) -> Handler {
        let log = Rc::clone(log);
        Handler::new(move |_, _| {
            log.borrow_mut().push(label);
            Ok(())
        })
    }

    fn plain(name: &str) -> NormalizedEvent {
        NormalizedEvent {
            name: name.to_string(),
            ..NormalizedEvent::default()
        }
    }

    #[test]
    fn normalize_parses_modifier_prefixes() {
        assert_eq!(
            normalize_event("~!submit"),
            NormalizedEvent {
                name: "submit".into(),
                once: true,
                capture: true,
                passive: false,
                params: None,
            }
        );
        assert_eq!(
            normalize_event("&click"),
            NormalizedEvent {
                name: "click".into(),
                passive: true,
                ..NormalizedEvent::default()
            }
        );
        let all = normalize_event("&~!scroll");
        assert!(all.passive && all.once && all.capture);
        assert_eq!(all.name, "scroll");
    }

    #[test]
    fn normalize_strips_in_fixed_order_only() {
        // Capture before once is not a once prefix.
        let event = normalize_event("!~x");
        assert!(event.capture);
        assert!(!event.once);
        assert_eq!(event.name, "~x");
    }

    #[test]
    fn new_entry_is_wrapped_and_added_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut on = ListenerMap::new();
        on.insert("click".into(), recorder("h1", &log).into());

        let (ops, added) = reconcile(&mut on, &ListenerMap::new());

        assert_eq!(ops, vec![Op::Add(plain("click"))]);
        assert_eq!(added.len(), 1);
        assert!(matches!(&on["click"], Listener::Invoker(inv) if *inv == added[0]));
    }

    #[test]
    fn changed_handler_retargets_without_add_or_remove() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let vm = Instance::new(ComponentOptions::default());

        let mut first = ListenerMap::new();
        first.insert("click".into(), recorder("h1", &log).into());
        let (_, added) = reconcile(&mut first, &ListenerMap::new());
        let invoker = added[0].clone();

        let mut second = ListenerMap::new();
        second.insert("click".into(), recorder("h2", &log).into());
        let (ops, _) = reconcile(&mut second, &first);

        assert!(ops.is_empty());
        assert!(matches!(&second["click"], Listener::Invoker(inv) if *inv == invoker));

        invoker.call(&vm, &[]).unwrap();
        assert_eq!(*log.borrow(), vec!["h2"]);
    }

    #[test]
    fn vanished_entry_is_removed() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut old = ListenerMap::new();
        old.insert("click".into(), recorder("h1", &log).into());
        reconcile(&mut old, &ListenerMap::new());

        let (ops, added) = reconcile(&mut ListenerMap::new(), &old);

        assert_eq!(ops, vec![Op::Remove(plain("click"))]);
        assert!(added.is_empty());
    }

    #[test]
    fn removal_reports_the_capture_flag() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut old = ListenerMap::new();
        old.insert("!focus".into(), recorder("h", &log).into());
        reconcile(&mut old, &ListenerMap::new());

        let (ops, _) = reconcile(&mut ListenerMap::new(), &old);
        assert_eq!(
            ops,
            vec![Op::Remove(NormalizedEvent {
                name: "focus".into(),
                capture: true,
                ..NormalizedEvent::default()
            })]
        );
    }

    #[test]
    fn additions_precede_removals_in_insertion_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut old = ListenerMap::new();
        old.insert("zeta".into(), recorder("z", &log).into());
        old.insert("alpha".into(), recorder("a", &log).into());
        reconcile(&mut old, &ListenerMap::new());

        let mut on = ListenerMap::new();
        on.insert("mid".into(), recorder("m", &log).into());
        on.insert("beta".into(), recorder("b", &log).into());

        let (ops, _) = reconcile(&mut on, &old);
        assert_eq!(
            ops,
            vec![
                Op::Add(plain("mid")),
                Op::Add(plain("beta")),
                Op::Remove(plain("zeta")),
                Op::Remove(plain("alpha")),
            ]
        );
    }

    #[test]
    fn missing_handler_warns_and_is_skipped() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let warnings_clone = Rc::clone(&warnings);
        config::set_config(Config {
            warn_handler: Some(Rc::new(move |w: &Warning, _: Option<&Instance>| {
                warnings_clone.borrow_mut().push(w.clone());
            })),
            ..Config::default()
        });

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut on = ListenerMap::new();
        on.insert("~broken".into(), Listener::Missing);
        on.insert("ok".into(), recorder("ok", &log).into());

        let (ops, _) = reconcile(&mut on, &ListenerMap::new());

        assert_eq!(ops, vec![Op::Add(plain("ok"))]);
        assert_eq!(
            *warnings.borrow(),
            vec![Warning::InvalidHandler {
                event: "broken".into()
            }]
        );
        config::set_config(Config::default());
    }

    #[test]
    fn params_are_forwarded_to_add() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut on = ListenerMap::new();
        on.insert(
            "tap".into(),
            Listener::WithParams {
                listener: Box::new(recorder("t", &log).into()),
                params: vec!["x".into(), "y".into()],
            },
        );

        let (ops, _) = reconcile(&mut on, &ListenerMap::new());
        assert_eq!(
            ops,
            vec![Op::Add(NormalizedEvent {
                name: "tap".into(),
                params: Some(vec!["x".into(), "y".into()]),
                ..NormalizedEvent::default()
            })]
        );
    }

    #[test]
    fn handler_sequences_dispatch_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let vm = Instance::new(ComponentOptions::default());
        let mut on = ListenerMap::new();
        on.insert(
            "input".into(),
            vec![recorder("a", &log), recorder("b", &log)].into(),
        );

        let (_, added) = reconcile(&mut on, &ListenerMap::new());
        added[0].call(&vm, &[]).unwrap();

        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn component_listeners_bind_to_the_event_bus() {
        let vm = Instance::new(ComponentOptions::default());
        let calls = Rc::new(Cell::new(0));

        let calls_clone = Rc::clone(&calls);
        let mut first = ListenerMap::new();
        first.insert(
            "~done".into(),
            Handler::new(move |_, _| {
                calls_clone.set(calls_clone.get() + 1);
                Ok(())
            })
            .into(),
        );
        update_component_listeners(&vm, &mut first, &ListenerMap::new());
        assert_eq!(vm.bus().handler_count("done"), 1);

        vm.emit("done", &[]);
        vm.emit("done", &[]);
        assert_eq!(calls.get(), 1);

        let log = Rc::new(RefCell::new(Vec::new()));
        let mut second = ListenerMap::new();
        second.insert("save".into(), recorder("save", &log).into());
        update_component_listeners(&vm, &mut second, &first);
        vm.emit("save", &[]);
        assert_eq!(*log.borrow(), vec!["save"]);

        update_component_listeners(&vm, &mut ListenerMap::new(), &second);
        assert_eq!(vm.bus().handler_count("save"), 0);
    }
}
