//! Lifecycle hooks.
//!
//! Components register callbacks per [`Hook`] in their
//! [`ComponentOptions`](crate::ComponentOptions). [`call_hook`] runs them in
//! registration order with the instance as receiver, isolating failures the
//! same way event dispatch does.
//!
//! # Hook events
//!
//! Every hook can also be observed from outside the component by listening
//! for `hook:<name>` on the instance:
//!
//! ```ignore
//! vm.on("hook:mounted", Handler::new(|vm, _| {
//!     tracing::info!("{} mounted", vm.display_name());
//!     Ok(())
//! }));
//! ```
//!
//! The synthetic event is only emitted for instances that registered at
//! least one `hook:` listener at some point.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{self, Result};
use crate::events::{EventEmitter, HOOK_EVENT_PREFIX};
use crate::instance::Instance;

/// Lifecycle transitions a component can hook into.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Hook {
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    BeforeUpdate,
    Updated,
    Activated,
    Deactivated,
    BeforeDestroy,
    Destroyed,
}

impl Hook {
    pub const ALL: [Hook; 10] = [
        Hook::BeforeCreate,
        Hook::Created,
        Hook::BeforeMount,
        Hook::Mounted,
        Hook::BeforeUpdate,
        Hook::Updated,
        Hook::Activated,
        Hook::Deactivated,
        Hook::BeforeDestroy,
        Hook::Destroyed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Hook::BeforeCreate => "beforeCreate",
            Hook::Created => "created",
            Hook::BeforeMount => "beforeMount",
            Hook::Mounted => "mounted",
            Hook::BeforeUpdate => "beforeUpdate",
            Hook::Updated => "updated",
            Hook::Activated => "activated",
            Hook::Deactivated => "deactivated",
            Hook::BeforeDestroy => "beforeDestroy",
            Hook::Destroyed => "destroyed",
        }
    }

    /// Name of the synthetic event emitted for this hook.
    pub fn event_name(self) -> String {
        format!("{HOOK_EVENT_PREFIX}{}", self.as_str())
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signature of a lifecycle hook callback.
pub type HookFn = Rc<dyn Fn(&Instance) -> Result<()>>;

/// Registered hook callbacks of a component.
#[derive(Clone, Default)]
pub struct LifecycleHooks {
    hooks: HashMap<Hook, Vec<HookFn>>,
}

impl LifecycleHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback for `hook`.
    pub fn add(&mut self, hook: Hook, f: impl Fn(&Instance) -> Result<()> + 'static) {
        self.hooks.entry(hook).or_default().push(Rc::new(f));
    }

    /// Callbacks for `hook`, in registration order.
    pub fn get(&self, hook: Hook) -> &[HookFn] {
        self.hooks.get(&hook).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self, hook: Hook) -> usize {
        self.get(hook).len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.values().all(Vec::is_empty)
    }
}

impl fmt::Debug for LifecycleHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for hook in Hook::ALL {
            let count = self.len(hook);
            if count > 0 {
                map.entry(&hook.as_str(), &count);
            }
        }
        map.finish()
    }
}

/// Run the callbacks registered for `hook` on `vm`.
///
/// A failing callback is reported with context `"<hook> hook"` and the
/// remaining callbacks still run. Afterwards `hook:<name>` is emitted if
/// the instance has ever had a hook listener.
pub fn call_hook(vm: &Instance, hook: Hook) {
    let handlers = vm.options().hooks.get(hook).to_vec();
    for handler in &handlers {
        if let Err(err) = handler(vm) {
            error::report_error(err, Some(vm), &format!("{hook} hook"));
        }
    }
    if vm.bus().has_hook_event() {
        vm.emit(&hook.event_name(), &[]);
    }
}
