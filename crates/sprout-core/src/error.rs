//! Error and warning routing.
//!
//! Nothing in the core is fatal. User callbacks (event handlers, lifecycle
//! hooks, render functions) fail with [`Error`], which is caught at the
//! dispatch boundary and handed to [`report_error`]. Misuse that does not
//! stop anything is described by a [`Warning`] and routed through [`warn`]
//! or [`tip`].

use std::rc::Rc;

use thiserror::Error;

use crate::config;
use crate::instance::Instance;

/// Failure raised by a user-supplied callback.
#[derive(Debug, Error)]
pub enum Error {
    /// A plain message.
    #[error("{0}")]
    Message(String),
    /// Any other error the callback wants to surface.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + 'static>),
}

impl Error {
    /// Create an error from a message.
    pub fn msg(message: impl Into<String>) -> Self {
        Error::Message(message.into())
    }
}

impl From<&str> for Error {
    fn from(message: &str) -> Self {
        Error::Message(message.to_string())
    }
}

impl From<String> for Error {
    fn from(message: String) -> Self {
        Error::Message(message)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Non-fatal advisories raised by the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    #[error("Invalid handler for event \"{event}\": got undefined")]
    InvalidHandler { event: String },

    #[error(
        "Event \"{emitted}\" is emitted in component {component} but the handler is \
         registered for \"{registered}\". Note that markup attributes are case-insensitive \
         and you cannot listen to camelCase events from in-markup templates. You should \
         probably use \"{suggestion}\" instead of \"{emitted}\"."
    )]
    EventCaseMismatch {
        emitted: String,
        registered: String,
        component: String,
        suggestion: String,
    },

    #[error("Failed to mount component: render function not defined.")]
    MissingRender,

    #[error("Missing required prop: \"{key}\"")]
    MissingRequiredProp { key: String },

    #[error("You may have an infinite update loop in {component}.")]
    InfiniteUpdateLoop { component: String },

    #[error("Cannot patch {component}: no patch function has been installed.")]
    MissingPatcher { component: String },
}

/// Receives errors raised by user callbacks.
///
/// Implementations must not panic; the core keeps dispatching after every
/// report.
pub trait ErrorReporter {
    fn report(&self, error: &Error, instance: Option<&Instance>, info: &str);
}

impl<F> ErrorReporter for F
where
    F: Fn(&Error, Option<&Instance>, &str),
{
    fn report(&self, error: &Error, instance: Option<&Instance>, info: &str) {
        self(error, instance, info)
    }
}

/// Handler for [`Warning`]s, installed through [`config::Config::warn_handler`].
pub type WarnHandler = Rc<dyn Fn(&Warning, Option<&Instance>)>;

/// Route a callback failure to the configured reporter.
///
/// `info` names where the failure happened, e.g. `mounted hook` or
/// `event handler for 'click'`.
pub fn report_error(error: Error, instance: Option<&Instance>, info: &str) {
    let reporter = config::with_config(|c| c.error_handler.clone());
    match reporter {
        Some(reporter) => reporter.report(&error, instance, info),
        None => {
            let component = instance.map(Instance::display_name);
            tracing::error!(
                component = component.as_deref().unwrap_or("<none>"),
                info,
                "Error in {info}: {error}"
            );
        }
    }
}

/// Raise a warning unless the configuration is silent.
pub fn warn(warning: Warning, instance: Option<&Instance>) {
    let (silent, handler) = config::with_config(|c| (c.silent, c.warn_handler.clone()));
    if silent {
        return;
    }
    match handler {
        Some(handler) => handler(&warning, instance),
        None => {
            let component = instance.map(Instance::display_name);
            tracing::warn!(
                component = component.as_deref().unwrap_or("<none>"),
                "{warning}"
            );
        }
    }
}

/// Raise a diagnostic-only advisory.
///
/// Tips are dropped outside diagnostics mode and when the configuration is
/// silent.
pub fn tip(warning: Warning, instance: Option<&Instance>) {
    let (silent, diagnostics, handler) =
        config::with_config(|c| (c.silent, c.diagnostics, c.warn_handler.clone()));
    if silent || !diagnostics {
        return;
    }
    match handler {
        Some(handler) => handler(&warning, instance),
        None => tracing::debug!("tip: {warning}"),
    }
}
