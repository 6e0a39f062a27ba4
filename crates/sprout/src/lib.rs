//! Sprout - a small component framework core.
//!
//! Component instances with a lifecycle (create, mount, update, destroy,
//! keep-alive activation), an instance-scoped event bus, listener
//! reconciliation across re-renders and a pluggable patch backend.
//!
//! # Quick Start
//!
//! ```ignore
//! use sprout::prelude::*;
//!
//! let counter = ComponentOptions::new()
//!     .name("counter")
//!     .render(|_| Ok(VNode::element("button", VNodeData::default(), vec![VNode::text("+1")])))
//!     .hook(Hook::Mounted, |vm| {
//!         tracing::info!("{} mounted", vm.display_name());
//!         Ok(())
//!     });
//!
//! sprout::logging::init();
//! let root = App::new(counter).mount(None);
//! root.on("increment", Handler::new(|_, _| Ok(())));
//! root.emit("increment", &[]);
//! root.destroy();
//! ```
//!
//! # Crates
//!
//! | Crate | Contents |
//! |-------|----------|
//! | [`core`] | instances, events, listeners, hooks, lifecycle, updates |
//! | [`renderer`] | [`MemoryRenderer`](renderer::MemoryRenderer), the default patch backend |

pub mod app;
pub mod logging;

pub mod prelude {
    //! Common imports for sprout applications.
    pub use crate::app::App;
    pub use sprout_core::{
        ComponentOptions, ComponentVNode, Element, Error, EventEmitter, Handler, Hook, Instance,
        InstanceInit, Listener, ListenerMap, PropSpec, PropsData, PropsSchema, Result, VNode,
        VNodeData, Value, Warning, batch,
    };
    pub use sprout_renderer::MemoryRenderer;
}

pub use app::App;
pub use sprout_core::config::{Config, configure, set_config, with_config};
pub use sprout_core::{batch, create_instance, mount};

pub use sprout_core as core;
pub use sprout_renderer as renderer;
