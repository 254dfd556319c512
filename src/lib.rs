//! Server-driven live views over a persistent bidirectional connection.
//!
//! The server owns authoritative per-session state ("assigns"), renders HTML
//! from it through a template, and streams minimal patches to the browser
//! after every state transition.  One serialized event loop per socket is
//! the only place a connection's state is touched, so application handlers
//! never deal with locks.
//!
//! A view binds a mount, a renderer, and an event table to one URL:
//!
//! ```rust,no_run
//! use futures_util::future::BoxFuture;
//! use liveview::{EventResult, LiveView, Socket, ViewConfig};
//! use lv_protocol::Params;
//! use serde::Serialize;
//!
//! #[derive(Clone, Serialize)]
//! struct Thermostat {
//!     c: f64,
//! }
//!
//! fn mount(_socket: &mut Socket<Thermostat>) -> BoxFuture<'_, EventResult<Thermostat>> {
//!     Box::pin(async { Ok(Thermostat { c: 19.5 }) })
//! }
//!
//! fn up(socket: &mut Socket<Thermostat>, _p: Params) -> BoxFuture<'_, EventResult<Thermostat>> {
//!     Box::pin(async move { Ok(Thermostat { c: socket.assigns().c + 0.1 }) })
//! }
//!
//! # fn main() -> Result<(), liveview::LiveError> {
//! let view = LiveView::builder(ViewConfig::new(vec![0u8; 32]))
//!     .mount(mount)
//!     .template(r#"<div>{{ c | round(1) }}</div><button live-click="up">+</button>"#)?
//!     .on("up", up)
//!     .build()?;
//! let app = axum::Router::new()
//!     .nest("/thermostat", liveview::view_router(view))
//!     .merge(liveview::client_router());
//! # let _ = app;
//! # Ok(())
//! # }
//! ```

pub mod component;
pub mod diff;
pub mod error;
pub mod handler;
pub mod pubsub;
pub mod registry;
pub mod session;
pub mod socket;
pub mod template;
pub mod view;

pub use component::Component;
pub use error::{HandlerError, LiveError};
pub use handler::{ERR_EVENT, PATCH_URL_EVENT, client_router, view_router};
pub use pubsub::{Backend, LocalBus, PubSubError};
pub use registry::{EventFn, EventResult, MountFn, PARAMS_EVENT};
pub use session::{CookieStore, DEFAULT_SESSION_NAME, Session};
pub use socket::Socket;
pub use template::{FnRenderer, Renderer, Template};
pub use view::{LiveView, ViewBuilder, ViewConfig};

/// Re-export of the wire-format crate.
pub use lv_protocol as protocol;
