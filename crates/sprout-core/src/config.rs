//! Runtime configuration.
//!
//! Configuration is per thread, like the rest of the core's shared state.
//! Read it with [`with_config`], tweak it with [`configure`], or swap it
//! wholesale with [`set_config`].

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{ErrorReporter, WarnHandler};
use crate::props::{DefaultPropValidator, PropValidator};
use crate::reactive::{SubscriptionFactory, WatcherFactory};

/// Global knobs consulted by the lifecycle, event and update code.
#[derive(Clone)]
pub struct Config {
    /// Suppress every warning and tip.
    pub silent: bool,
    /// Non-production diagnostics (case-mismatch tips and similar).
    pub diagnostics: bool,
    /// Wrap render and patch calls in tracing spans.
    pub performance: bool,
    /// Receives callback failures. Falls back to `tracing::error!`.
    pub error_handler: Option<Rc<dyn ErrorReporter>>,
    /// Receives warnings. Falls back to `tracing::warn!`.
    pub warn_handler: Option<WarnHandler>,
    /// Validates incoming prop values.
    pub prop_validator: Rc<dyn PropValidator>,
    /// Builds the render subscription installed by `mount`.
    pub subscriptions: Rc<dyn SubscriptionFactory>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            silent: false,
            diagnostics: cfg!(debug_assertions),
            performance: false,
            error_handler: None,
            warn_handler: None,
            prop_validator: Rc::new(DefaultPropValidator),
            subscriptions: Rc::new(WatcherFactory),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("silent", &self.silent)
            .field("diagnostics", &self.diagnostics)
            .field("performance", &self.performance)
            .field("error_handler", &self.error_handler.is_some())
            .field("warn_handler", &self.warn_handler.is_some())
            .finish_non_exhaustive()
    }
}

thread_local! {
    static CONFIG: RefCell<Config> = RefCell::new(Config::default());
}

/// Read the current configuration.
///
/// Clone what you need out of the closure; calling back into user code
/// while the configuration is borrowed would block [`configure`].
pub fn with_config<R>(f: impl FnOnce(&Config) -> R) -> R {
    CONFIG.with(|config| f(&config.borrow()))
}

/// Mutate the current configuration in place.
pub fn configure(f: impl FnOnce(&mut Config)) {
    CONFIG.with(|config| f(&mut config.borrow_mut()));
}

/// Replace the current configuration.
pub fn set_config(config: Config) {
    CONFIG.with(|current| *current.borrow_mut() = config);
}

/// Whether diagnostics mode is on.
pub fn diagnostics() -> bool {
    with_config(|c| c.diagnostics)
}
