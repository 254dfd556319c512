// lv-protocol: Live view wire protocol types and serialization.
//
// All frames are JSON objects with a top-level `t` field for discriminated
// deserialization, an optional correlation id under `i`, and the payload
// under `d` (plus the event name under `n` for inbound frames).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod tree;

pub use tree::{Dynamic, Patch, PatchValue, RenderTree, TreeError};

/// Free-form event payload decoded from the frame's `d` field.
///
/// No validation is applied beyond JSON decoding; handlers interpret the
/// values they care about and ignore the rest.
pub type Params = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Browser -> Server frames
// ---------------------------------------------------------------------------

/// All inbound frame kinds.
///
/// ```json
/// { "t": "event", "n": "temp-up", "d": {}, "i": "1" }
/// ```
///
/// `i` is a client-generated correlation id; when present, the server answers
/// the dispatch with an `ack` frame carrying the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum InboundFrame {
    /// An application-level DOM event (`live-click`, `live-submit`, ...).
    Event {
        #[serde(rename = "n")]
        name: String,
        #[serde(rename = "d", default, skip_serializing_if = "Params::is_empty")]
        data: Params,
        #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// A URL change (`live-patch` click or browser back/forward). The payload
    /// carries the new query parameters.
    Params {
        #[serde(rename = "d", default, skip_serializing_if = "Params::is_empty")]
        data: Params,
        #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    /// A client hook event. An empty `n` is the reserved hook mount ping.
    Hook {
        #[serde(rename = "n", default)]
        name: String,
        #[serde(rename = "d", default, skip_serializing_if = "Params::is_empty")]
        data: Params,
        #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
}

impl InboundFrame {
    /// The correlation id carried by the frame, if any.
    pub fn id(&self) -> Option<&str> {
        match self {
            InboundFrame::Event { id, .. }
            | InboundFrame::Params { id, .. }
            | InboundFrame::Hook { id, .. } => id.as_deref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Browser frames
// ---------------------------------------------------------------------------

/// A server-initiated client event, delivered to a registered hook.
///
/// Dispatch failures reuse this frame with `event = "err"` so the client can
/// surface programmer errors without tearing the connection down.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub event: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
}

/// Payload of a `redirect` frame. The client performs a full navigation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedirectPayload {
    pub url: String,
}

/// Payload of an `err` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrPayload {
    pub message: String,
}

/// All outbound frame kinds.
///
/// A session starts with one `render` frame (statics + full dynamics); every
/// later state change travels as a sparse `patch`. Statics are never resent
/// except inside a full subtree replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "lowercase")]
pub enum OutboundFrame {
    /// Baseline render: the full tree, statics included.
    Render {
        #[serde(rename = "d")]
        tree: RenderTree,
    },
    /// Sparse update against the client's cached statics.
    Patch {
        #[serde(rename = "d")]
        patch: Patch,
    },
    /// Full-page navigation instruction.
    Redirect {
        #[serde(rename = "d")]
        redirect: RedirectPayload,
    },
    /// Server-initiated client event (hooks, pushState instructions, errors).
    Push {
        #[serde(rename = "d")]
        push: PushPayload,
    },
    /// Protocol-level error, correlated to an inbound frame when possible.
    Err {
        #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(rename = "d")]
        error: ErrPayload,
    },
    /// Dispatch acknowledgement. Emitted at most once per inbound id, after
    /// any patch the dispatch produced.
    Ack {
        #[serde(rename = "i")]
        id: String,
    },
}

// ---------------------------------------------------------------------------
// PubSub envelope
// ---------------------------------------------------------------------------

/// The message shape published on the bus by `Socket::broadcast`.
///
/// Backends move opaque bytes; this envelope is what those bytes decode to
/// when a delivery reaches a subscribed socket's event queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEvent {
    pub event: String,
    #[serde(default, skip_serializing_if = "Params::is_empty")]
    pub data: Params,
}
