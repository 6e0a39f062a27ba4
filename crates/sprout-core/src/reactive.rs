//! Reactive subscriptions and the update scheduler.
//!
//! Dependency tracking lives outside the core. What the lifecycle code
//! needs is a [`Subscription`]: something it can evaluate once when
//! mounting, ask to re-evaluate later, and tear down for good. The built-in
//! [`Watcher`] implements that contract on top of a small per-thread
//! scheduler:
//!
//! - `update()` queues the watcher.
//! - The queue is flushed right away unless a flush, a watcher evaluation
//!   or a [`batch`] is already in progress; then it is flushed when the
//!   outermost one ends.
//! - Flushing runs watchers in creation order, so parents re-render before
//!   their children, and fires `updated` hooks for flushed render watchers
//!   afterwards.
//!
//! # Example
//!
//! ```ignore
//! batch(|| {
//!     parent.force_update();
//!     child.force_update();
//!     // Nothing has re-rendered yet.
//! });
//! // Both have, parent first.
//! ```

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::{self, Result, Warning};
use crate::hooks::{self, Hook};
use crate::instance::{Instance, InstanceInner};

/// Number of times one watcher may re-run within a single flush before it
/// is considered stuck.
pub const MAX_UPDATE_COUNT: usize = 100;

// ============================================================================
// Subscription contract
// ============================================================================

/// A reactive subscription owned by a component instance.
pub trait Subscription {
    /// Evaluate now.
    fn run(&self);
    /// Request re-evaluation. May be deferred.
    fn update(&self);
    /// Unsubscribe for good. Later `run`/`update` calls do nothing.
    fn teardown(&self);
    /// Whether `teardown` has not been called yet.
    fn is_active(&self) -> bool;
}

/// Body of a subscription.
pub type Evaluator = Rc<dyn Fn() -> Result<()>>;

/// Creation options for a subscription.
#[derive(Debug, Clone, Default)]
pub struct WatcherOptions {
    /// Drives the instance's render.
    pub render: bool,
    /// Used in error reports.
    pub label: Option<String>,
}

/// Builds subscriptions for instances.
pub trait SubscriptionFactory {
    fn create(
        &self,
        instance: &Instance,
        evaluator: Evaluator,
        options: WatcherOptions,
    ) -> Rc<dyn Subscription>;
}

/// Factory for the built-in [`Watcher`].
#[derive(Debug, Default, Clone, Copy)]
pub struct WatcherFactory;

impl SubscriptionFactory for WatcherFactory {
    fn create(
        &self,
        instance: &Instance,
        evaluator: Evaluator,
        options: WatcherOptions,
    ) -> Rc<dyn Subscription> {
        Rc::new(Watcher::new(instance, evaluator, options))
    }
}

// ============================================================================
// Scheduler
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
struct WatcherId(usize);

#[derive(Default)]
struct Scheduler {
    queue: Vec<Watcher>,
    /// Nesting depth of flushes, evaluations and batches.
    busy: usize,
    next_id: usize,
}

impl Scheduler {
    fn next_id(&mut self) -> WatcherId {
        let id = WatcherId(self.next_id);
        self.next_id += 1;
        id
    }
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler::default());
}

/// Marks the scheduler busy for its lifetime and flushes the queue when the
/// outermost guard drops.
struct BusyGuard;

impl BusyGuard {
    fn enter() -> Self {
        SCHEDULER.with(|s| s.borrow_mut().busy += 1);
        BusyGuard
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        if leave() {
            flush_queue();
        }
    }
}

/// Busy marker held while a flush is draining; dropping it never flushes.
struct FlushGuard;

impl FlushGuard {
    fn enter() -> Self {
        SCHEDULER.with(|s| s.borrow_mut().busy += 1);
        FlushGuard
    }
}

impl Drop for FlushGuard {
    fn drop(&mut self) {
        leave();
    }
}

/// Returns whether the scheduler went idle.
fn leave() -> bool {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        s.busy -= 1;
        s.busy == 0
    })
}

fn enqueue(watcher: &Watcher) {
    let busy = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if !s.queue.iter().any(|w| w.inner.id == watcher.inner.id) {
            s.queue.push(watcher.clone());
        }
        s.busy > 0
    });
    if !busy {
        flush_queue();
    }
}

fn dequeue(id: WatcherId) {
    SCHEDULER.with(|s| s.borrow_mut().queue.retain(|w| w.inner.id != id));
}

fn take_next() -> Option<Watcher> {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        let index = s
            .queue
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.inner.id)
            .map(|(index, _)| index)?;
        Some(s.queue.remove(index))
    })
}

fn flush_queue() {
    let mut runs: HashMap<WatcherId, usize> = HashMap::new();
    loop {
        {
            let _flushing = FlushGuard::enter();
            let mut flushed: Vec<Watcher> = Vec::new();

            while let Some(watcher) = take_next() {
                let count = runs.entry(watcher.inner.id).or_default();
                *count += 1;
                if *count > MAX_UPDATE_COUNT {
                    let owner = watcher.owner();
                    let component = owner
                        .as_ref()
                        .map_or_else(|| "<none>".to_string(), Instance::display_name);
                    error::warn(Warning::InfiniteUpdateLoop { component }, owner.as_ref());
                    continue;
                }
                watcher.run();
                if !flushed.iter().any(|w| w.inner.id == watcher.inner.id) {
                    flushed.push(watcher);
                }
            }

            call_updated_hooks(&flushed);
        }
        // Updated hooks may have queued more work.
        if pending_updates() == 0 {
            break;
        }
    }
}

/// `updated` fires children first, for render watchers whose instance is
/// still mounted.
fn call_updated_hooks(flushed: &[Watcher]) {
    for watcher in flushed.iter().rev() {
        if !watcher.inner.options.render || !watcher.is_active() {
            continue;
        }
        let Some(vm) = watcher.owner() else {
            continue;
        };
        if vm.is_mounted() && !vm.is_destroyed() {
            vm.mark_updated();
            hooks::call_hook(&vm, Hook::Updated);
        }
    }
}

/// Defer watcher flushing until `f` returns.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let _busy = BusyGuard::enter();
    f()
}

/// Number of watchers waiting for the next flush.
pub fn pending_updates() -> usize {
    SCHEDULER.with(|s| s.borrow().queue.len())
}

// ============================================================================
// Watcher
// ============================================================================

/// The default [`Subscription`].
#[derive(Clone)]
pub struct Watcher {
    inner: Rc<WatcherInner>,
}

struct WatcherInner {
    id: WatcherId,
    owner: Weak<InstanceInner>,
    evaluator: Evaluator,
    options: WatcherOptions,
    active: Cell<bool>,
}

impl Watcher {
    pub fn new(instance: &Instance, evaluator: Evaluator, options: WatcherOptions) -> Self {
        let id = SCHEDULER.with(|s| s.borrow_mut().next_id());
        Self {
            inner: Rc::new(WatcherInner {
                id,
                owner: instance.downgrade(),
                evaluator,
                options,
                active: Cell::new(true),
            }),
        }
    }

    fn owner(&self) -> Option<Instance> {
        Instance::from_weak(&self.inner.owner)
    }

    fn label(&self) -> &str {
        match &self.inner.options.label {
            Some(label) => label,
            None if self.inner.options.render => "render watcher",
            None => "watcher",
        }
    }
}

impl Subscription for Watcher {
    fn run(&self) {
        if !self.inner.active.get() {
            return;
        }
        let _busy = BusyGuard::enter();
        let evaluator = Rc::clone(&self.inner.evaluator);
        if let Err(err) = evaluator() {
            let owner = self.owner();
            error::report_error(err, owner.as_ref(), self.label());
        }
    }

    fn update(&self) {
        if self.inner.active.get() {
            enqueue(self);
        }
    }

    fn teardown(&self) {
        if self.inner.active.replace(false) {
            dequeue(self.inner.id);
        }
    }

    fn is_active(&self) -> bool {
        self.inner.active.get()
    }
}

// ============================================================================
// Observation
// ============================================================================

/// Observation record of a root data object.
///
/// `vm_count` counts the instances using the object as their root data.
#[derive(Debug, Default)]
pub struct Observer {
    vm_count: Cell<usize>,
}

impl Observer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vm_count(&self) -> usize {
        self.vm_count.get()
    }

    pub fn retain(&self) {
        self.vm_count.set(self.vm_count.get() + 1);
    }

    pub fn release(&self) {
        self.vm_count.set(self.vm_count.get().saturating_sub(1));
    }
}

thread_local! {
    static SHOULD_OBSERVE: Cell<bool> = const { Cell::new(true) };
}

/// Whether newly assigned values should be deeply observed.
///
/// Nothing in this crate observes values; this is the switch an external
/// observer (or a [`PropValidator`](crate::props::PropValidator)) reads
/// before wrapping a value it is handed.
pub fn is_observing() -> bool {
    SHOULD_OBSERVE.with(Cell::get)
}

/// Run `f` with deep observation of assigned values switched off.
pub fn without_observation<R>(f: impl FnOnce() -> R) -> R {
    let previous = SHOULD_OBSERVE.with(|flag| flag.replace(false));
    let result = f();
    SHOULD_OBSERVE.with(|flag| flag.set(previous));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Config};
    use crate::instance::ComponentOptions;

    fn counting_watcher(vm: &Instance, log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> Watcher {
        let log = Rc::clone(log);
        Watcher::new(
            vm,
            Rc::new(move || -> Result<()> {
                log.borrow_mut().push(label);
                Ok(())
            }),
            WatcherOptions::default(),
        )
    }

    #[test]
    fn update_outside_batch_runs_immediately() {
        let vm = Instance::new(ComponentOptions::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let watcher = counting_watcher(&vm, &log, "w");

        watcher.update();

        assert_eq!(*log.borrow(), vec!["w"]);
        assert_eq!(pending_updates(), 0);
    }

    #[test]
    fn batch_defers_and_dedupes_in_creation_order() {
        let vm = Instance::new(ComponentOptions::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let first = counting_watcher(&vm, &log, "first");
        let second = counting_watcher(&vm, &log, "second");

        batch(|| {
            second.update();
            first.update();
            second.update();
            assert!(log.borrow().is_empty());
            assert_eq!(pending_updates(), 2);
        });

        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    #[test]
    fn teardown_cancels_pending_and_future_runs() {
        let vm = Instance::new(ComponentOptions::default());
        let log = Rc::new(RefCell::new(Vec::new()));
        let watcher = counting_watcher(&vm, &log, "w");

        batch(|| {
            watcher.update();
            watcher.teardown();
        });
        watcher.update();
        watcher.run();

        assert!(log.borrow().is_empty());
        assert!(!watcher.is_active());
    }

    #[test]
    fn update_requested_during_evaluation_runs_afterwards() {
        let vm = Instance::new(ComponentOptions::default());
        let runs = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Watcher>>> = Rc::new(RefCell::new(None));

        let runs_clone = Rc::clone(&runs);
        let slot_clone = Rc::clone(&slot);
        let watcher = Watcher::new(
            &vm,
            Rc::new(move || -> Result<()> {
                let depth = runs_clone.get();
                runs_clone.set(depth + 1);
                if depth == 0 {
                    let me = slot_clone.borrow().clone();
                    if let Some(me) = me {
                        me.update();
                        // Still inside the first evaluation.
                        assert_eq!(runs_clone.get(), 1);
                    }
                }
                Ok(())
            }),
            WatcherOptions::default(),
        );
        *slot.borrow_mut() = Some(watcher.clone());

        watcher.run();

        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn runaway_watcher_is_stopped_with_a_warning() {
        let warnings = Rc::new(RefCell::new(Vec::new()));
        let warnings_clone = Rc::clone(&warnings);
        config::set_config(Config {
            warn_handler: Some(Rc::new(move |w: &Warning, _: Option<&Instance>| {
                warnings_clone.borrow_mut().push(w.clone());
            })),
            ..Config::default()
        });

        let vm = Instance::new(ComponentOptions::default());
        let runs = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<Watcher>>> = Rc::new(RefCell::new(None));
        let runs_clone = Rc::clone(&runs);
        let slot_clone = Rc::clone(&slot);
        let watcher = Watcher::new(
            &vm,
            Rc::new(move || -> Result<()> {
                runs_clone.set(runs_clone.get() + 1);
                let me = slot_clone.borrow().clone();
                if let Some(me) = me {
                    me.update();
                }
                Ok(())
            }),
            WatcherOptions::default(),
        );
        *slot.borrow_mut() = Some(watcher.clone());

        watcher.update();

        assert_eq!(runs.get(), MAX_UPDATE_COUNT);
        assert_eq!(warnings.borrow().len(), 1);
        assert!(matches!(
            warnings.borrow()[0],
            Warning::InfiniteUpdateLoop { .. }
        ));
        assert_eq!(pending_updates(), 0);
        config::set_config(Config::default());
    }

    #[test]
    fn failing_evaluator_is_reported_with_its_label() {
        let reports = Rc::new(RefCell::new(Vec::new()));
        let reports_clone = Rc::clone(&reports);
        config::set_config(Config {
            error_handler: Some(Rc::new(
                move |err: &crate::Error, _: Option<&Instance>, info: &str| {
                    reports_clone.borrow_mut().push(format!("{info}: {err}"));
                },
            )),
            ..Config::default()
        });

        let vm = Instance::new(ComponentOptions::default());
        let render = Watcher::new(
            &vm,
            Rc::new(|| -> Result<()> { Err("no tree".into()) }),
            WatcherOptions {
                render: true,
                label: None,
            },
        );
        let named = Watcher::new(
            &vm,
            Rc::new(|| -> Result<()> { Err("bad".into()) }),
            WatcherOptions {
                render: false,
                label: Some("watcher \"count\"".into()),
            },
        );
        render.run();
        named.run();

        assert_eq!(
            *reports.borrow(),
            vec![
                "render watcher: no tree".to_string(),
                "watcher \"count\": bad".to_string()
            ]
        );
        config::set_config(Config::default());
    }

    #[test]
    fn without_observation_restores_previous_state() {
        assert!(is_observing());
        let inner = without_observation(|| {
            assert!(!is_observing());
            without_observation(is_observing)
        });
        assert!(!inner);
        assert!(is_observing());
    }

    #[test]
    fn observer_count_never_underflows() {
        let observer = Observer::new();
        observer.retain();
        observer.retain();
        observer.release();
        assert_eq!(observer.vm_count(), 1);
        observer.release();
        observer.release();
        assert_eq!(observer.vm_count(), 0);
    }
}
