//! Core types and traits for sprout.
//!
//! Component instances, their event bus, listener reconciliation, lifecycle
//! transitions and the update path into a pluggable patch backend.

pub mod config;
pub mod error;
pub mod events;
pub mod hooks;
pub mod instance;
pub mod lifecycle;
pub mod listeners;
pub mod props;
pub mod reactive;
pub mod update;
pub mod vdom;

use std::any::Any;
use std::rc::Rc;

/// A dynamically typed value: event arguments, prop values.
pub type Value = Rc<dyn Any>;

// Re-export error handling
pub use error::{Error, ErrorReporter, Result, Warning, report_error};

// Re-export the instance model
pub use instance::{
    ComponentOptions, Instance, InstanceId, InstanceInit, LifecycleState, RefTarget, RenderFn,
};

// Re-export event handling types
pub use events::{EventBus, EventEmitter, EventHandlerId, EventNames, Handler};
pub use listeners::{Invoker, Listener, ListenerMap, NormalizedEvent, normalize_event};

// Re-export lifecycle operations
pub use hooks::{Hook, HookFn, LifecycleHooks, call_hook};
pub use lifecycle::{
    activate_child, create_instance, deactivate_child, destroy, force_update, mark_mounted, mount,
};
pub use update::{ActiveInstanceGuard, Slots, active_instance, update_child_component};

// Re-export collaborator seams
pub use props::{PropSpec, PropValidator, PropsData, PropsSchema};
pub use reactive::{Observer, Subscription, SubscriptionFactory, Watcher, WatcherOptions, batch};
pub use vdom::{ComponentVNode, Element, PatchHints, PatchSource, Patcher, VNode, VNodeData};
