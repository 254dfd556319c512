use thiserror::Error;

/// The error type user callbacks return.
///
/// Expected domain failures should not use this: return `Ok` with error state
/// in the assigns and let the template render it. An `Err` from a handler is
/// treated as a programmer error and pushed to the client's `err` hook.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Library-level failures.
#[derive(Debug, Error)]
pub enum LiveError {
    /// The template source had an unterminated or stray expression delimiter.
    #[error("template parse error: {0}")]
    TemplateParse(String),

    /// Expression compilation or evaluation failed.
    #[error("template render error: {0}")]
    Template(#[from] minijinja::Error),

    /// A render tree or patch violated the statics/dynamics contract.
    #[error("render tree error: {0}")]
    Tree(#[from] lv_protocol::TreeError),

    /// JSON encoding of a session or frame failed.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The user mount callback failed.
    #[error("mount failed: {0}")]
    Mount(#[source] HandlerError),

    /// An upgrade arrived without a verifiable session cookie.
    #[error("session cookie missing or invalid")]
    InvalidSession,

    /// An operation that needs a live connection ran on a pre-upgrade socket.
    #[error("socket is not connected")]
    NotConnected,

    /// The socket's event queue was full when a self event was enqueued.
    #[error("socket event queue is full")]
    QueueFull,

    /// The socket's event loop has already terminated.
    #[error("socket is closed")]
    Closed,

    /// The configured session key is too short to derive a signing key from.
    #[error("session key must be at least 32 bytes")]
    SessionKey,

    /// `params` and the empty string may not be registered as event names.
    #[error("event name {0:?} is reserved")]
    ReservedEvent(String),

    /// Two components were registered under the same id.
    #[error("component id {0:?} is already registered")]
    DuplicateComponent(String),

    /// The view builder was missing a required piece.
    #[error("view is missing a {0} callback")]
    MissingCallback(&'static str),

    /// A bus publish failed in the backend.
    #[error(transparent)]
    PubSub(#[from] crate::pubsub::PubSubError),
}
