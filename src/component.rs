// Component sub-views.
//
// A component is a named slice of a view: its own mount and event table,
// rendering into a stable hole of the parent's render tree.  Component state
// lives inside the parent's typed assigns; handlers therefore share the
// parent's state type and return the whole next assigns, same as top-level
// handlers.  Events named `id:event` route to the component's table.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use lv_protocol::Params;

use crate::registry::{EventFn, EventResult, MountFn};
use crate::socket::Socket;

/// A named sub-view registered on a view builder.
///
/// The component's mount runs during socket mount, after the parent mount
/// and in registration order, and may initialize its slice of the assigns.
pub struct Component<S> {
    id: String,
    mount: Option<MountFn<S>>,
    events: HashMap<String, EventFn<S>>,
}

impl<S> Component<S> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            mount: None,
            events: HashMap::new(),
        }
    }

    /// Set the component mount callback.
    pub fn mount<F>(mut self, mount: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>) -> BoxFuture<'a, EventResult<S>> + Send + Sync + 'static,
    {
        self.mount = Some(Arc::new(mount));
        self
    }

    /// Register a handler for `id:name` events.
    pub fn on<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Socket<S>, Params) -> BoxFuture<'a, EventResult<S>>
            + Send
            + Sync
            + 'static,
    {
        self.events.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn handler(&self, event: &str) -> Option<&EventFn<S>> {
        self.events.get(event)
    }

    pub(crate) fn mount_fn(&self) -> Option<&MountFn<S>> {
        self.mount.as_ref()
    }

    /// The first event name that collides with the reserved set, if any.
    pub(crate) fn reserved_event_name(&self) -> Option<&str> {
        self.events
            .keys()
            .find(|name| name.is_empty() || name.contains(':'))
            .map(String::as_str)
    }
}
