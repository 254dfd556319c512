// HTTP entry point and the per-socket event loop.
//
// Every live URL is served by one router: a plain GET produces the initial
// HTML (mount, render, bootstrap payload, session cookie), and the same URL
// with websocket upgrade headers becomes the live session.  Each session
// runs three tasks: a reader decoding frames into a bounded queue, a writer
// draining the bounded outbound queue, and the serialized event loop that
// owns the socket and is the only place assigns, the last render, and the
// URL are touched.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderValue, StatusCode, header, request::Parts};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use lv_protocol::{
    BusEvent, InboundFrame, OutboundFrame, Params, PushPayload, RedirectPayload, RenderTree,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use crate::diff::diff;
use crate::error::LiveError;
use crate::registry::EventFn;
use crate::session::Session;
use crate::socket::{Effect, LoopEvent, Socket};
use crate::view::LiveView;

/// Client event name carrying a server-initiated pushState instruction.
pub const PATCH_URL_EVENT: &str = "live:patch";
/// Client event name carrying a dispatch failure.
pub const ERR_EVENT: &str = "err";

const LIVE_JS: &str = include_str!("../assets/live.js");

/// Build the router serving one live view at `/`.
///
/// Nest it wherever the view should live:
/// `Router::new().nest("/thermostat", view_router(view))`.
pub fn view_router<S: Send + 'static>(view: Arc<LiveView<S>>) -> Router {
    Router::new().route("/", get(entry::<S>)).with_state(view)
}

/// Router serving the embedded browser client at `/live.js`.
pub fn client_router() -> Router {
    Router::new().route("/live.js", get(live_js))
}

async fn live_js() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        LIVE_JS,
    )
}

fn wants_upgrade(parts: &Parts) -> bool {
    parts
        .headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn entry<S: Send + 'static>(
    State(view): State<Arc<LiveView<S>>>,
    request: Request,
) -> Response {
    let (mut parts, _body) = request.into_parts();
    if wants_upgrade(&parts) {
        upgrade(view, &mut parts).await
    } else {
        http_entry(view, &parts).await
    }
}

fn request_url(parts: &Parts) -> Option<Url> {
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost");
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());
    Url::parse(&format!("http://{host}{path_and_query}")).ok()
}

// ---------------------------------------------------------------------------
// Initial HTTP render
// ---------------------------------------------------------------------------

/// Mount the view (and its components, in registration order) on `socket`.
async fn mount_all<S>(view: &LiveView<S>, socket: &mut Socket<S>) -> Result<(), LiveError> {
    let assigns = (view.mount)(socket).await.map_err(LiveError::Mount)?;
    socket.set_assigns(assigns);
    for component in view.registry.components() {
        if let Some(mount) = component.mount_fn() {
            let assigns = mount(socket).await.map_err(LiveError::Mount)?;
            socket.set_assigns(assigns);
        }
    }
    Ok(())
}

fn internal_error() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
}

/// Rendered page plus the bootstrap payload the client reads at connect:
/// session id, template statics, and the initial dynamics.
fn bootstrap_html(tree: &RenderTree, session_id: &str) -> Result<String, LiveError> {
    let bootstrap = serde_json::to_string(&serde_json::json!({
        "sid": session_id,
        "tree": tree,
    }))?;
    // Keep `</script>` and friends from terminating the bootstrap block.
    let bootstrap = bootstrap.replace('<', "\\u003c");
    Ok(format!(
        "{}\n<script type=\"application/json\" id=\"live-bootstrap\">{bootstrap}</script>",
        tree.to_html()
    ))
}

async fn http_entry<S: Send + 'static>(view: Arc<LiveView<S>>, parts: &Parts) -> Response {
    let session = view.store.load(&parts.headers).unwrap_or_default();
    let mut socket = Socket::pre_upgrade(session, request_url(parts), view.bus.clone());

    if let Err(e) = mount_all(&view, &mut socket).await {
        (view.error_handler)(&e);
        return internal_error();
    }
    let tree = match view.renderer.render(socket.assigns()) {
        Ok(tree) => tree,
        Err(e) => {
            (view.error_handler)(&e);
            return internal_error();
        }
    };
    let page = match bootstrap_html(&tree, socket.id()) {
        Ok(page) => page,
        Err(e) => {
            (view.error_handler)(&e);
            return internal_error();
        }
    };
    let cookie = match view.store.save(socket.session()) {
        Ok(cookie) => cookie,
        Err(e) => {
            (view.error_handler)(&e);
            return internal_error();
        }
    };
    let Ok(set_cookie) = HeaderValue::from_str(&cookie.encoded().to_string()) else {
        return internal_error();
    };

    let mut response = Html(page).into_response();
    response.headers_mut().insert(header::SET_COOKIE, set_cookie);
    response
}

// ---------------------------------------------------------------------------
// Upgrade and live session
// ---------------------------------------------------------------------------

async fn upgrade<S: Send + 'static>(view: Arc<LiveView<S>>, parts: &mut Parts) -> Response {
    let Some(session) = view.store.load(&parts.headers) else {
        (view.error_handler)(&LiveError::InvalidSession);
        return (StatusCode::UNAUTHORIZED, "session cookie missing or invalid").into_response();
    };
    let url = request_url(parts);
    match <WebSocketUpgrade as FromRequestParts<()>>::from_request_parts(parts, &()).await {
        Ok(ws) => ws.on_upgrade(move |socket| run_live_socket(socket, view, session, url)),
        Err(rejection) => rejection.into_response(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientGone,
    Idle,
    SlowClient,
    Protocol,
    Transport,
    Render,
    /// A redirect frame was delivered; the client is navigating away.
    Redirect,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientGone => "client-gone",
            CloseReason::Idle => "idle",
            CloseReason::SlowClient => "slow-client",
            CloseReason::Protocol => "protocol",
            CloseReason::Transport => "transport",
            CloseReason::Render => "render",
            CloseReason::Redirect => "redirect",
        }
    }

    /// Reasons the server announces in a close frame before hanging up.
    fn announced(self) -> bool {
        matches!(
            self,
            CloseReason::Idle | CloseReason::SlowClient | CloseReason::Protocol
        )
    }
}

enum SessionOutcome {
    /// Mount or baseline render failed; the session never established.
    Failed,
    Closed(CloseReason),
}

async fn run_live_socket<S: Send + 'static>(
    ws: WebSocket,
    view: Arc<LiveView<S>>,
    session: Session,
    url: Option<Url>,
) {
    let session_id = session.id.clone();
    let (sink, stream) = ws.split();

    let (out_tx, out_rx) = mpsc::channel::<Message>(view.config.outbound_queue);
    let writer = tokio::spawn(write_loop(sink, out_rx));

    let (event_tx, mut event_rx) = mpsc::channel::<LoopEvent>(view.config.inbound_queue);
    let (close_tx, mut close_rx) = watch::channel::<Option<CloseReason>>(None);
    let reader = tokio::spawn(read_loop(
        stream,
        event_tx.clone(),
        close_tx,
        view.config.protocol_error_limit,
        view.config.protocol_error_window,
    ));

    let mut socket = Socket::live(session, url, view.bus.clone(), event_tx);
    info!(session_id = %session_id, "live session connected");

    let outcome = drive_session(&view, &mut socket, &mut event_rx, &mut close_rx, &out_tx).await;

    match outcome {
        SessionOutcome::Failed => {
            info!(session_id = %session_id, "live session failed to establish");
        }
        SessionOutcome::Closed(reason) => {
            info!(session_id = %session_id, reason = reason.as_str(), "live session ended");
            if let Some(callback) = &view.disconnected_cb {
                // Same treatment as every other dispatch: deadline enforced,
                // queued effects flushed (the writer is still draining, so a
                // goodbye push can reach the client).
                let callback = callback.clone();
                if let Err(reason) =
                    dispatch_callback(&view, &mut socket, &callback, Params::new(), None, &out_tx)
                        .await
                {
                    debug!(session_id = %session_id, reason = reason.as_str(), "disconnect callback did not complete");
                }
            }
            if reason.announced() {
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: reason.as_str().into(),
                }));
                let _ = out_tx.send(close).await;
            }
        }
    }

    socket.close();
    reader.abort();
    // Writer drains whatever is queued, then the sink closes.
    drop(out_tx);
    drop(socket);
    let _ = writer.await;
}

async fn drive_session<S>(
    view: &LiveView<S>,
    socket: &mut Socket<S>,
    event_rx: &mut mpsc::Receiver<LoopEvent>,
    close_rx: &mut watch::Receiver<Option<CloseReason>>,
    out_tx: &mpsc::Sender<Message>,
) -> SessionOutcome {
    // Fresh mount: nothing survives from the HTTP render.
    if let Err(e) = mount_all(view, socket).await {
        (view.error_handler)(&e);
        return SessionOutcome::Failed;
    }
    let baseline = match view.renderer.render(socket.assigns()) {
        Ok(tree) => tree,
        Err(e) => {
            (view.error_handler)(&e);
            return SessionOutcome::Failed;
        }
    };
    if send_frame(out_tx, &OutboundFrame::Render {
        tree: baseline.clone(),
    })
    .await
    .is_err()
    {
        return SessionOutcome::Failed;
    }
    socket.last_render = Some(baseline);
    match flush_effects(socket, out_tx).await {
        Ok(false) => {}
        // Mount redirected: the baseline is delivered and the client leaves.
        Ok(true) => return SessionOutcome::Closed(CloseReason::Redirect),
        Err(_) => return SessionOutcome::Failed,
    }

    if let Some(callback) = &view.connected_cb {
        let callback = callback.clone();
        if let Err(reason) =
            dispatch_callback(view, socket, &callback, Params::new(), None, out_tx).await
        {
            return SessionOutcome::Closed(reason);
        }
    }

    loop {
        tokio::select! {
            biased;

            item = tokio::time::timeout(view.config.idle_timeout, event_rx.recv()) => match item {
                Err(_elapsed) => return SessionOutcome::Closed(CloseReason::Idle),
                // The socket always holds a live sender, so `None` means the
                // loop state is torn; treat it as a transport failure.
                Ok(None) => return SessionOutcome::Closed(CloseReason::Transport),
                Ok(Some(item)) => {
                    if let Err(reason) = dispatch(view, socket, item, out_tx).await {
                        return SessionOutcome::Closed(reason);
                    }
                }
            },

            changed = close_rx.changed() => {
                let reason = match changed {
                    Ok(()) => close_rx.borrow().unwrap_or(CloseReason::Transport),
                    Err(_) => CloseReason::Transport,
                };
                return SessionOutcome::Closed(reason);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn dispatch<S>(
    view: &LiveView<S>,
    socket: &mut Socket<S>,
    item: LoopEvent,
    out_tx: &mpsc::Sender<Message>,
) -> Result<(), CloseReason> {
    match item {
        LoopEvent::Frame(InboundFrame::Event { name, data, id }) => {
            dispatch_named(view, socket, &name, data, id, out_tx).await
        }
        LoopEvent::Frame(InboundFrame::Hook { name, data, id }) => {
            if name.is_empty() {
                // Reserved hook mount ping: acknowledge, nothing to run.
                ack(out_tx, id).await
            } else {
                dispatch_named(view, socket, &name, data, id, out_tx).await
            }
        }
        LoopEvent::Frame(InboundFrame::Params { data, id }) => match &view.params {
            Some(callback) => {
                let callback = callback.clone();
                dispatch_callback(view, socket, &callback, data, id, out_tx).await
            }
            None => {
                debug!("params frame with no params handler registered");
                ack(out_tx, id).await
            }
        },
        LoopEvent::SelfEvent { name, data } => {
            dispatch_named(view, socket, &name, data, None, out_tx).await
        }
        LoopEvent::Bus(BusEvent { event, data }) => {
            dispatch_named(view, socket, &event, data, None, out_tx).await
        }
    }
}

async fn dispatch_named<S>(
    view: &LiveView<S>,
    socket: &mut Socket<S>,
    name: &str,
    data: Params,
    id: Option<String>,
    out_tx: &mpsc::Sender<Message>,
) -> Result<(), CloseReason> {
    let Some(handler) = view.registry.lookup(name) else {
        // Clients can race template updates; drop, never close.  No ack:
        // nothing was dispatched.
        warn!(event = %name, "no handler registered for event");
        return Ok(());
    };
    let handler = handler.clone();
    dispatch_callback(view, socket, &handler, data, id, out_tx).await
}

async fn dispatch_callback<S>(
    view: &LiveView<S>,
    socket: &mut Socket<S>,
    handler: &EventFn<S>,
    data: Params,
    id: Option<String>,
    out_tx: &mpsc::Sender<Message>,
) -> Result<(), CloseReason> {
    let url_before = socket.url().cloned();
    let outcome = match view.config.handler_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, handler(socket, data)).await {
            Ok(outcome) => outcome,
            Err(_) => Err("handler deadline exceeded".into()),
        },
        None => handler(socket, data).await,
    };

    let redirected = match outcome {
        Ok(next) => {
            socket.set_assigns(next);
            let tree = match view.renderer.render(socket.assigns()) {
                Ok(tree) => tree,
                Err(e) => {
                    // The client's DOM no longer matches anything we can
                    // diff against; tear the session down.
                    (view.error_handler)(&e);
                    return Err(CloseReason::Render);
                }
            };
            let frame = match socket.last_render.as_ref() {
                Some(prev) => match diff(prev, &tree) {
                    Some(patch) if patch.is_empty() => None,
                    Some(patch) => Some(OutboundFrame::Patch { patch }),
                    // Structural change: fresh baseline instead of a patch.
                    None => Some(OutboundFrame::Render { tree: tree.clone() }),
                },
                None => Some(OutboundFrame::Render { tree: tree.clone() }),
            };
            socket.last_render = Some(tree);
            if let Some(frame) = frame {
                send_frame(out_tx, &frame).await?;
            }
            flush_effects(socket, out_tx).await?
        }
        Err(e) => {
            // Programmer error: surface to the client's err hook, keep the
            // pre-dispatch assigns, render, and URL, stay connected.
            warn!(error = %e, "event handler failed; state preserved");
            socket.discard_effects();
            socket.set_url(url_before);
            send_frame(out_tx, &OutboundFrame::Push {
                push: PushPayload {
                    event: ERR_EVENT.to_owned(),
                    payload: serde_json::json!({ "message": e.to_string() }),
                },
            })
            .await?;
            false
        }
    };

    ack(out_tx, id).await?;
    if redirected {
        // The redirect is on the wire; the client is leaving.
        return Err(CloseReason::Redirect);
    }
    Ok(())
}

/// Deliver queued side effects in order.  Returns whether a redirect went
/// out; the caller closes the socket once the dispatch finishes.
async fn flush_effects<S>(
    socket: &mut Socket<S>,
    out_tx: &mpsc::Sender<Message>,
) -> Result<bool, CloseReason> {
    let mut redirected = false;
    for effect in socket.take_effects() {
        let frame = match effect {
            Effect::PatchUrl { url } => OutboundFrame::Push {
                push: PushPayload {
                    event: PATCH_URL_EVENT.to_owned(),
                    payload: serde_json::json!({ "url": url }),
                },
            },
            Effect::Redirect { url } => {
                redirected = true;
                OutboundFrame::Redirect {
                    redirect: RedirectPayload { url },
                }
            }
            Effect::Push { event, payload } => OutboundFrame::Push {
                push: PushPayload { event, payload },
            },
        };
        send_frame(out_tx, &frame).await?;
    }
    Ok(redirected)
}

async fn ack(out_tx: &mpsc::Sender<Message>, id: Option<String>) -> Result<(), CloseReason> {
    match id {
        Some(id) => send_frame(out_tx, &OutboundFrame::Ack { id }).await,
        None => Ok(()),
    }
}

/// Enqueue one frame.  A full queue parks the caller until the writer
/// drains; a dead writer is a transport failure.
async fn send_frame(
    out_tx: &mpsc::Sender<Message>,
    frame: &OutboundFrame,
) -> Result<(), CloseReason> {
    let json = serde_json::to_string(frame).map_err(|_| CloseReason::Transport)?;
    out_tx
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| CloseReason::Transport)
}

// ---------------------------------------------------------------------------
// Reader / writer tasks
// ---------------------------------------------------------------------------

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    events: mpsc::Sender<LoopEvent>,
    close: watch::Sender<Option<CloseReason>>,
    error_limit: u32,
    error_window: Duration,
) {
    let mut recent_errors: VecDeque<Instant> = VecDeque::new();
    let reason = loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<InboundFrame>(&text) {
                Ok(frame) => match events.try_send(LoopEvent::Frame(frame)) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => break CloseReason::SlowClient,
                    // The event loop is already gone; nothing to report.
                    Err(mpsc::error::TrySendError::Closed(_)) => return,
                },
                Err(e) => {
                    warn!(error = %e, "dropping undecodable frame");
                    let now = Instant::now();
                    recent_errors.push_back(now);
                    while recent_errors
                        .front()
                        .is_some_and(|at| now.duration_since(*at) > error_window)
                    {
                        recent_errors.pop_front();
                    }
                    if recent_errors.len() > error_limit as usize {
                        break CloseReason::Protocol;
                    }
                }
            },
            Some(Ok(Message::Close(_))) | None => break CloseReason::ClientGone,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "websocket read failed");
                break CloseReason::Transport;
            }
        }
    };
    let _ = close.send(Some(reason));
}

async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut frames: mpsc::Receiver<Message>) {
    while let Some(message) = frames.recv().await {
        let closing = matches!(message, Message::Close(_));
        if sink.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = sink.close().await;
}
