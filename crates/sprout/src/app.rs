//! Application entry point.

use std::rc::Rc;

use sprout_core::reactive::Observer;
use sprout_core::{
    ComponentOptions, Element, Instance, InstanceInit, ListenerMap, Patcher, PropsData,
    create_instance, mount,
};
use sprout_renderer::MemoryRenderer;

/// Builder for a root component instance.
///
/// ```ignore
/// let root = App::new(ComponentOptions::new().name("app").render(view))
///     .props(props)
///     .mount(Some(host));
/// ```
pub struct App {
    options: Rc<ComponentOptions>,
    listeners: Option<ListenerMap>,
    props: Option<PropsData>,
    data: Option<Rc<Observer>>,
    patcher: Option<Rc<dyn Patcher>>,
}

impl App {
    pub fn new(options: impl Into<Rc<ComponentOptions>>) -> Self {
        Self {
            options: options.into(),
            listeners: None,
            props: None,
            data: None,
            patcher: None,
        }
    }

    /// Listener declarations registered on the root instance.
    pub fn listeners(mut self, listeners: ListenerMap) -> Self {
        self.listeners = Some(listeners);
        self
    }

    /// Raw prop values for the root instance.
    pub fn props(mut self, props: PropsData) -> Self {
        self.props = Some(props);
        self
    }

    /// Root data object.
    pub fn data(mut self, data: Rc<Observer>) -> Self {
        self.data = Some(data);
        self
    }

    /// Patch backend. Defaults to [`MemoryRenderer`].
    pub fn patcher(mut self, patcher: impl Patcher + 'static) -> Self {
        self.patcher = Some(Rc::new(patcher));
        self
    }

    /// Create the root instance and mount it, replacing `el` if given.
    pub fn mount(self, el: Option<Element>) -> Instance {
        self.start(el, false)
    }

    /// Create the root instance and adopt the server-rendered `el`.
    pub fn mount_hydrating(self, el: Element) -> Instance {
        self.start(Some(el), true)
    }

    fn start(self, el: Option<Element>, hydrating: bool) -> Instance {
        let vm = create_instance(
            self.options,
            InstanceInit {
                parent_listeners: self.listeners,
                props_data: self.props,
                data: self.data,
                ..InstanceInit::default()
            },
        );
        let patcher = self
            .patcher
            .unwrap_or_else(|| Rc::new(MemoryRenderer::new()));
        tracing::info!(component = %vm.display_name(), hydrating, "mounting application");
        mount(&vm, el, patcher, hydrating)
    }
}
