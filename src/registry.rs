// Event dispatch table.
//
// Populated at view construction, immutable afterwards, shared behind the
// view's `Arc` and therefore safe for concurrent reads from every socket
// loop.  Unknown names are the caller's problem to log and drop -- never a
// reason to close a connection, since clients can race template updates.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use lv_protocol::Params;

use crate::component::Component;
use crate::error::{HandlerError, LiveError};
use crate::socket::Socket;

/// Reserved: URL-change frames route to the params callback instead.
pub const PARAMS_EVENT: &str = "params";

/// The outcome of a user callback: the next assigns, or a programmer error.
pub type EventResult<S> = Result<S, HandlerError>;

/// An async event callback: `(socket, payload) -> next assigns`.
pub type EventFn<S> =
    Arc<dyn for<'a> Fn(&'a mut Socket<S>, Params) -> BoxFuture<'a, EventResult<S>> + Send + Sync>;

/// The mount callback, run on the HTTP render and again at upgrade.
pub type MountFn<S> =
    Arc<dyn for<'a> Fn(&'a mut Socket<S>) -> BoxFuture<'a, EventResult<S>> + Send + Sync>;

/// Observer for mount/handshake/transport failures.
pub type ErrorFn = Arc<dyn Fn(&LiveError) + Send + Sync>;

fn is_reserved(name: &str) -> bool {
    name.is_empty() || name == PARAMS_EVENT
}

/// Immutable name -> callback table, with `id:event` routing into component
/// tables.
pub struct EventRegistry<S> {
    events: HashMap<String, EventFn<S>>,
    components: Vec<Component<S>>,
}

impl<S> EventRegistry<S> {
    /// Validate and freeze the table.
    pub(crate) fn build(
        events: Vec<(String, EventFn<S>)>,
        components: Vec<Component<S>>,
    ) -> Result<Self, LiveError> {
        let mut table = HashMap::new();
        for (name, handler) in events {
            if is_reserved(&name) || name.contains(':') {
                return Err(LiveError::ReservedEvent(name));
            }
            table.insert(name, handler);
        }
        for component in &components {
            if component.id().is_empty() || component.id().contains(':') {
                return Err(LiveError::ReservedEvent(component.id().to_owned()));
            }
            if components
                .iter()
                .filter(|other| other.id() == component.id())
                .count()
                > 1
            {
                return Err(LiveError::DuplicateComponent(component.id().to_owned()));
            }
            if let Some(name) = component.reserved_event_name() {
                return Err(LiveError::ReservedEvent(name.to_owned()));
            }
        }
        Ok(Self {
            events: table,
            components,
        })
    }

    /// Look up the callback for an event name.
    ///
    /// Names shaped `id:event` route to the component with that id.
    pub(crate) fn lookup(&self, name: &str) -> Option<&EventFn<S>> {
        if let Some((component_id, event)) = name.split_once(':') {
            return self
                .components
                .iter()
                .find(|component| component.id() == component_id)
                .and_then(|component| component.handler(event));
        }
        self.events.get(name)
    }

    /// Component definitions in registration order (their mounts run in this
    /// order, after the parent mount).
    pub(crate) fn components(&self) -> &[Component<S>] {
        &self.components
    }
}
