// View configuration.
//
// A `LiveView` is the process-wide binding of a mount, a renderer, and an
// event table to one URL.  It is immutable after `build()` and shared behind
// an `Arc` by every connection it serves.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use lv_protocol::{Params, RenderTree};
use serde::Serialize;
use tracing::error;

use crate::component::Component;
use crate::error::LiveError;
use crate::pubsub::{Backend, LocalBus};
use crate::registry::{ErrorFn, EventFn, EventRegistry, EventResult, MountFn};
use crate::session::{CookieStore, DEFAULT_SESSION_NAME};
use crate::socket::Socket;
use crate::template::{FnRenderer, Renderer, Template};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_OUTBOUND_QUEUE: usize = 32;
const DEFAULT_INBOUND_QUEUE: usize = 64;
const DEFAULT_PROTOCOL_ERROR_LIMIT: u32 = 5;
const DEFAULT_PROTOCOL_ERROR_WINDOW: Duration = Duration::from_secs(10);

/// Tunables for a view.  `session_key` is the only required field.
pub struct ViewConfig {
    /// Secret the session cookie signing key is derived from (>= 32 bytes).
    pub session_key: Vec<u8>,
    /// Session cookie name.
    pub session_name: String,
    /// A socket idle this long is closed.
    pub idle_timeout: Duration,
    /// Optional per-dispatch deadline for user callbacks.
    pub handler_timeout: Option<Duration>,
    /// Outbound frame queue depth; a full queue parks the event loop.
    pub outbound_queue: usize,
    /// Inbound event queue depth; overflow closes the connection.
    pub inbound_queue: usize,
    /// Undecodable frames tolerated per window before closing.
    pub protocol_error_limit: u32,
    pub protocol_error_window: Duration,
}

impl ViewConfig {
    pub fn new(session_key: impl Into<Vec<u8>>) -> Self {
        Self {
            session_key: session_key.into(),
            session_name: DEFAULT_SESSION_NAME.to_owned(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            handler_timeout: None,
            outbound_queue: DEFAULT_OUTBOUND_QUEUE,
            inbound_queue: DEFAULT_INBOUND_QUEUE,
            protocol_error_limit: DEFAULT_PROTOCOL_ERROR_LIMIT,
            protocol_error_window: DEFAULT_PROTOCOL_ERROR_WINDOW,
        }
    }
}

/// A live view: everything the handler needs to serve one URL.
pub struct LiveView<S> {
    pub(crate) config: ViewConfig,
    pub(crate) store: CookieStore,
    pub(crate) mount: MountFn<S>,
    pub(crate) renderer: Arc<dyn Renderer<S>>,
    pub(crate) registry: EventRegistry<S>,
    pub(crate) params: Option<EventFn<S>>,
    pub(crate) connected_cb: Option<EventFn<S>>,
    pub(crate) disconnected_cb: Option<EventFn<S>>,
    pub(crate) error_handler: ErrorFn,
    pub(crate) bus: Arc<dyn Backend>,
}

impl<S> LiveView<S> {
    pub fn builder(config: ViewConfig) -> ViewBuilder<S> {
        ViewBuilder {
            config,
            mount: None,
            renderer: None,
            events: Vec::new(),
            components: Vec::new(),
            params: None,
            connected_cb: None,
            disconnected_cb: None,
            error_handler: None,
            bus: None,
        }
    }

    /// The bus this view publishes and subscribes on.
    pub fn bus(&self) -> Arc<dyn Backend> {
        self.bus.clone()
    }
}

pub struct ViewBuilder<S> {
    config: ViewConfig,
    mount: Option<MountFn<S>>,
    renderer: Option<Arc<dyn Renderer<S>>>,
    events: Vec<(String, EventFn<S>)>,
    components: Vec<Component<S>>,
    params: Option<EventFn<S>>,
    connected_cb: Option<EventFn<S>>,
    disconnected_cb: Option<EventFn<S>>,
    error_handler: Option<ErrorFn>,
    bus: Option<Arc<dyn Backend>>,
}

impl<S> ViewBuilder<S> {
    /// Set the mount callback (required).  Runs once for the HTTP render and
    /// again, on a fresh socket, at upgrade.
    pub fn mount<F>(mut self, mount: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>) -> BoxFuture<'a, EventResult<S>> + Send + Sync + 'static,
    {
        self.mount = Some(Arc::new(mount));
        self
    }

    /// Use a custom renderer.
    pub fn render<R>(mut self, renderer: R) -> Self
    where
        R: Renderer<S> + 'static,
    {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    /// Use a plain function as the renderer (handy for composed or
    /// component-bearing trees).
    pub fn render_with<F>(self, render: F) -> Self
    where
        F: Fn(&S) -> Result<RenderTree, LiveError> + Send + Sync + 'static,
    {
        self.render(FnRenderer::new(render))
    }

    /// Use the default `{{ ... }}` template renderer with `source`.
    pub fn template(self, source: &str) -> Result<Self, LiveError>
    where
        S: Serialize,
    {
        let template = Template::parse(source)?;
        Ok(self.render(template))
    }

    /// Register an event handler.
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>, Params) -> BoxFuture<'a, EventResult<S>>
            + Send
            + Sync
            + 'static,
    {
        self.events.push((name.into(), Arc::new(handler)));
        self
    }

    /// Register a component sub-view.
    pub fn component(mut self, component: Component<S>) -> Self {
        self.components.push(component);
        self
    }

    /// Handle URL-change (`params`) frames.
    pub fn on_params<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>, Params) -> BoxFuture<'a, EventResult<S>>
            + Send
            + Sync
            + 'static,
    {
        self.params = Some(Arc::new(handler));
        self
    }

    /// Lifecycle callback run in the event loop right after the baseline
    /// render is sent.
    pub fn on_connected<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>, Params) -> BoxFuture<'a, EventResult<S>>
            + Send
            + Sync
            + 'static,
    {
        self.connected_cb = Some(Arc::new(handler));
        self
    }

    /// Lifecycle callback run when the socket tears down.
    pub fn on_disconnected<F>(mut self, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>, Params) -> BoxFuture<'a, EventResult<S>>
            + Send
            + Sync
            + 'static,
    {
        self.disconnected_cb = Some(Arc::new(handler));
        self
    }

    /// Observe mount/handshake/transport failures.
    pub fn error_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&LiveError) + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Share a bus between views (or plug in a distributed backend).
    pub fn pubsub(mut self, bus: Arc<dyn Backend>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Validate and freeze the view.
    pub fn build(self) -> Result<Arc<LiveView<S>>, LiveError> {
        let store = CookieStore::new(&self.config.session_key, self.config.session_name.clone())?;
        let mount = self.mount.ok_or(LiveError::MissingCallback("mount"))?;
        let renderer = self.renderer.ok_or(LiveError::MissingCallback("render"))?;
        let registry = EventRegistry::build(self.events, self.components)?;

        Ok(Arc::new(LiveView {
            config: self.config,
            store,
            mount,
            renderer,
            registry,
            params: self.params,
            connected_cb: self.connected_cb,
            disconnected_cb: self.disconnected_cb,
            error_handler: self
                .error_handler
                .unwrap_or_else(|| Arc::new(|e: &LiveError| error!(error = %e, "live view error"))),
            bus: self.bus.unwrap_or_else(|| Arc::new(LocalBus::new())),
        }))
    }
}
