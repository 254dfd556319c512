// Per-connection state container.
//
// A socket is owned exclusively by its event loop; every mutating operation
// here is called with `&mut` from that loop (directly or from inside a user
// callback it is driving), so there are no locks.  Side effects queued by a
// callback are drained by the loop after the dispatch, delivered after the
// patch frame and before the ack.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use lv_protocol::{BusEvent, InboundFrame, Params, RenderTree};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use url::Url;

use crate::error::LiveError;
use crate::pubsub::Backend;
use crate::session::Session;

/// One unit of work for a socket's serialized event loop.
#[derive(Debug)]
pub(crate) enum LoopEvent {
    /// A decoded frame from the browser.
    Frame(InboundFrame),
    /// An event the socket sent to itself.
    SelfEvent { name: String, data: Params },
    /// A pub/sub delivery for a subscribed topic.
    Bus(BusEvent),
}

/// A client-bound side effect queued during a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Effect {
    PatchUrl { url: String },
    Redirect { url: String },
    Push {
        event: String,
        payload: serde_json::Value,
    },
}

/// The per-connection state container.
///
/// `connected` is false during the initial HTTP render and true for the
/// live session; some operations (self events, subscriptions) need the live
/// event loop and fail with [`LiveError::NotConnected`] before the upgrade.
pub struct Socket<S> {
    session: Session,
    url: Option<Url>,
    connected: bool,
    assigns: Option<S>,
    pub(crate) last_render: Option<RenderTree>,
    pub(crate) effects: VecDeque<Effect>,
    self_tx: Option<mpsc::Sender<LoopEvent>>,
    bus: Arc<dyn Backend>,
    subscriptions: HashMap<String, JoinHandle<()>>,
    closed: bool,
}

impl<S> Socket<S> {
    /// Build the throwaway socket used for the initial HTTP render.
    pub(crate) fn pre_upgrade(session: Session, url: Option<Url>, bus: Arc<dyn Backend>) -> Self {
        Self {
            session,
            url,
            connected: false,
            assigns: None,
            last_render: None,
            effects: VecDeque::new(),
            self_tx: None,
            bus,
            subscriptions: HashMap::new(),
            closed: false,
        }
    }

    /// Build the live socket backing an upgraded connection.
    pub(crate) fn live(
        session: Session,
        url: Option<Url>,
        bus: Arc<dyn Backend>,
        self_tx: mpsc::Sender<LoopEvent>,
    ) -> Self {
        let mut socket = Self::pre_upgrade(session, url, bus);
        socket.connected = true;
        socket.self_tx = Some(self_tx);
        socket
    }

    /// The session this socket was established under.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Mutable session access; persisted only if mutated during the initial
    /// HTTP mount (the cookie is written once, with the first response).
    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The session id.
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Whether this socket is backed by a live connection.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// The browser URL as currently seen by the server.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// The current assigns.
    pub fn assigns(&self) -> &S {
        self.assigns
            .as_ref()
            .expect("assigns are always set once mount has run")
    }

    /// In-place access to the current assigns.
    pub fn assigns_mut(&mut self) -> &mut S {
        self.assigns
            .as_mut()
            .expect("assigns are always set once mount has run")
    }

    pub(crate) fn set_assigns(&mut self, assigns: S) {
        self.assigns = Some(assigns);
    }

    pub(crate) fn set_url(&mut self, url: Option<Url>) {
        self.url = url;
    }

    /// Update the server's view of the browser URL and queue a pushState
    /// instruction for the client.
    ///
    /// Relative inputs (`"?page=2"`, `"/rooms/1"`) resolve against the
    /// current URL when one is known.
    pub fn patch_url(&mut self, url: &str) {
        let resolved = match &self.url {
            Some(current) => current.join(url).ok(),
            None => Url::parse(url).ok(),
        };
        match resolved {
            Some(full) => {
                self.effects.push_back(Effect::PatchUrl {
                    url: full.to_string(),
                });
                self.url = Some(full);
            }
            // Not resolvable server-side; pass through untouched.
            None => self.effects.push_back(Effect::PatchUrl {
                url: url.to_owned(),
            }),
        }
    }

    /// Queue a full client navigation to `url`.
    pub fn redirect(&mut self, url: &str) {
        self.effects.push_back(Effect::Redirect {
            url: url.to_owned(),
        });
    }

    /// Queue an arbitrary client event, delivered to a registered hook.
    pub fn push_event(&mut self, event: &str, payload: serde_json::Value) {
        self.effects.push_back(Effect::Push {
            event: event.to_owned(),
            payload,
        });
    }

    /// Enqueue an event to this socket's own queue, processed as if it had
    /// arrived from the client (FIFO with inbound frames).
    pub fn send_self(&mut self, event: &str, data: Params) -> Result<(), LiveError> {
        let Some(tx) = &self.self_tx else {
            return Err(LiveError::NotConnected);
        };
        tx.try_send(LoopEvent::SelfEvent {
            name: event.to_owned(),
            data,
        })
        .map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => LiveError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => LiveError::Closed,
        })
    }

    /// Publish an event on the bus.  Failures are surfaced to the caller and
    /// never to subscribers.
    pub fn broadcast(&self, topic: &str, event: &str, data: Params) -> Result<(), LiveError> {
        let message = BusEvent {
            event: event.to_owned(),
            data,
        };
        let payload = serde_json::to_vec(&message)?;
        self.bus.publish(topic, payload)?;
        Ok(())
    }

    /// Deliver future publishes on `topic` into this socket's event queue.
    ///
    /// Re-subscribing to the same topic replaces the previous subscription.
    /// All subscriptions end when the socket is torn down.
    pub fn subscribe(&mut self, topic: &str) -> Result<(), LiveError> {
        let Some(tx) = &self.self_tx else {
            return Err(LiveError::NotConnected);
        };
        let mut rx = self.bus.subscribe(topic);
        let tx = tx.clone();
        let topic_name = topic.to_owned();
        let forwarder = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => match serde_json::from_slice::<BusEvent>(&payload) {
                        Ok(message) => {
                            if tx.send(LoopEvent::Bus(message)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(topic = %topic_name, error = %e, "dropping undecodable bus payload");
                        }
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(topic = %topic_name, skipped, "socket lagged behind topic");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        if let Some(previous) = self.subscriptions.insert(topic.to_owned(), forwarder) {
            previous.abort();
        }
        Ok(())
    }

    /// Stop delivering `topic` publishes to this socket.
    pub fn unsubscribe(&mut self, topic: &str) {
        if let Some(forwarder) = self.subscriptions.remove(topic) {
            forwarder.abort();
        }
    }

    /// Whether the event loop has shut this socket down.
    pub fn closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn close(&mut self) {
        self.closed = true;
        for (_, forwarder) in self.subscriptions.drain() {
            forwarder.abort();
        }
    }

    /// Drop effects queued by a failed dispatch, preserving observable state.
    pub(crate) fn discard_effects(&mut self) {
        self.effects.clear();
    }

    pub(crate) fn take_effects(&mut self) -> VecDeque<Effect> {
        std::mem::take(&mut self.effects)
    }
}

impl<S> Drop for Socket<S> {
    fn drop(&mut self) {
        self.close();
    }
}
