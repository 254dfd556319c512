// End-to-end view session flow: initial HTTP render, upgrade, events,
// patches, acks, and the dispatch error policy.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use liveview::{Component, EventResult, LiveError, LiveView, Socket, ViewConfig};
use lv_protocol::{Dynamic, InboundFrame, OutboundFrame, Params, PatchValue, RenderTree};
use lv_test_utils::{MockLiveClient, cookie_pair};

const SESSION_KEY: [u8; 32] = [9u8; 32];

#[derive(Clone, serde::Serialize)]
struct Thermostat {
    c: f64,
}

fn mount(_socket: &mut Socket<Thermostat>) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async { Ok(Thermostat { c: 19.5 }) })
}

fn temp_up(socket: &mut Socket<Thermostat>, _p: Params) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async move {
        Ok(Thermostat {
            c: socket.assigns().c + 0.1,
        })
    })
}

fn noop(socket: &mut Socket<Thermostat>, _p: Params) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async move { Ok(socket.assigns().clone()) })
}

fn always_fails(
    _socket: &mut Socket<Thermostat>,
    _p: Params,
) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async { Err("thermostat hardware on fire".into()) })
}

fn kick(socket: &mut Socket<Thermostat>, _p: Params) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async move {
        socket.send_self("tick", Params::new())?;
        Ok(socket.assigns().clone())
    })
}

fn tick(socket: &mut Socket<Thermostat>, _p: Params) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async move {
        Ok(Thermostat {
            c: socket.assigns().c + 1.0,
        })
    })
}

fn thermostat_view() -> Arc<LiveView<Thermostat>> {
    LiveView::builder(ViewConfig::new(SESSION_KEY.to_vec()))
        .mount(mount)
        .template(r#"<div>{{ c | round(1) }}</div><button live-click="up">+</button>"#)
        .expect("template parses")
        .on("up", temp_up)
        .on("noop", noop)
        .on("bad", always_fails)
        .on("kick", kick)
        .on("tick", tick)
        .build()
        .expect("view builds")
}

async fn serve(view: Arc<LiveView<Thermostat>>) -> SocketAddr {
    let app = axum::Router::new()
        .merge(liveview::view_router(view))
        .merge(liveview::client_router());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

/// Initial GET plus upgrade: returns the connected client and the baseline
/// render frame it received.
async fn connect(addr: SocketAddr) -> (MockLiveClient, RenderTree) {
    let response = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("initial render");
    let set_cookie = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("session cookie is set")
        .to_str()
        .expect("cookie is ascii")
        .to_owned();

    let mut client =
        MockLiveClient::connect_with_cookie(&format!("ws://{addr}/"), &cookie_pair(&set_cookie))
            .await
            .expect("upgrade");
    let baseline = match client.recv_frame().await.expect("baseline frame") {
        OutboundFrame::Render { tree } => tree,
        other => panic!("expected render frame, got {other:?}"),
    };
    (client, baseline)
}

fn event(name: &str, id: &str) -> InboundFrame {
    InboundFrame::Event {
        name: name.to_owned(),
        data: Params::new(),
        id: Some(id.to_owned()),
    }
}

#[tokio::test]
async fn initial_render_carries_html_bootstrap_and_cookie() {
    let addr = serve(thermostat_view()).await;
    let response = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("initial render");
    assert!(response.headers().contains_key(reqwest::header::SET_COOKIE));

    let body = response.text().await.expect("body");
    assert!(body.contains("<div>19.5</div>"), "rendered html: {body}");
    assert!(body.contains(r#"id="live-bootstrap""#));
    assert!(body.contains(r#""sid""#));
}

#[tokio::test]
async fn live_js_is_served() {
    let addr = serve(thermostat_view()).await;
    let response = reqwest::get(format!("http://{addr}/live.js"))
        .await
        .expect("client bundle");
    assert!(response.status().is_success());
    let body = response.text().await.expect("body");
    assert!(body.contains("live-click"));
}

#[tokio::test]
async fn click_event_produces_patch_then_ack() {
    let addr = serve(thermostat_view()).await;
    let (mut client, baseline) = connect(addr).await;
    assert_eq!(
        baseline.dynamics(),
        &[Dynamic::Text("19.5".to_owned())],
        "baseline dynamics"
    );

    client.send_frame(&event("up", "1")).await.expect("send");

    match client.recv_frame().await.expect("patch") {
        OutboundFrame::Patch { patch } => {
            assert_eq!(patch.len(), 1);
            assert_eq!(patch.get(0), Some(&PatchValue::Text("19.6".to_owned())));
        }
        other => panic!("expected patch, got {other:?}"),
    }
    match client.recv_frame().await.expect("ack") {
        OutboundFrame::Ack { id } => assert_eq!(id, "1"),
        other => panic!("expected ack, got {other:?}"),
    }
}

#[tokio::test]
async fn unchanged_render_sends_ack_without_a_patch() {
    let addr = serve(thermostat_view()).await;
    let (mut client, _baseline) = connect(addr).await;

    client.send_frame(&event("noop", "5")).await.expect("send");

    match client.recv_frame().await.expect("ack") {
        OutboundFrame::Ack { id } => assert_eq!(id, "5"),
        other => panic!("expected bare ack, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_event_is_dropped_without_ack_or_close() {
    let addr = serve(thermostat_view()).await;
    let (mut client, _baseline) = connect(addr).await;

    client.send_frame(&event("nope", "7")).await.expect("send");
    assert!(
        client
            .expect_silence(Duration::from_millis(300))
            .await
            .is_none(),
        "unknown event must produce no frames"
    );

    // The connection is still healthy.
    client.send_frame(&event("up", "8")).await.expect("send");
    assert!(matches!(
        client.recv_frame().await.expect("patch"),
        OutboundFrame::Patch { .. }
    ));
}

#[tokio::test]
async fn failing_handler_pushes_err_and_preserves_state() {
    let addr = serve(thermostat_view()).await;
    let (mut client, _baseline) = connect(addr).await;

    client.send_frame(&event("bad", "2")).await.expect("send");

    match client.recv_frame().await.expect("err push") {
        OutboundFrame::Push { push } => {
            assert_eq!(push.event, "err");
            let message = push.payload["message"].as_str().unwrap_or_default();
            assert!(message.contains("on fire"), "payload: {:?}", push.payload);
        }
        other => panic!("expected err push, got {other:?}"),
    }
    assert!(matches!(
        client.recv_frame().await.expect("ack"),
        OutboundFrame::Ack { .. }
    ));

    // Assigns were preserved: the next bump starts from 19.5, not garbage.
    client.send_frame(&event("up", "3")).await.expect("send");
    match client.recv_frame().await.expect("patch") {
        OutboundFrame::Patch { patch } => {
            assert_eq!(patch.get(0), Some(&PatchValue::Text("19.6".to_owned())));
        }
        other => panic!("expected patch, got {other:?}"),
    }
}

#[tokio::test]
async fn self_events_dispatch_after_the_triggering_event() {
    let addr = serve(thermostat_view()).await;
    let (mut client, _baseline) = connect(addr).await;

    client.send_frame(&event("kick", "4")).await.expect("send");

    // kick leaves assigns untouched: ack first, then the self event's patch.
    assert!(matches!(
        client.recv_frame().await.expect("ack"),
        OutboundFrame::Ack { .. }
    ));
    match client.recv_frame().await.expect("tick patch") {
        OutboundFrame::Patch { patch } => {
            assert_eq!(patch.get(0), Some(&PatchValue::Text("20.5".to_owned())));
        }
        other => panic!("expected patch, got {other:?}"),
    }
}

#[tokio::test]
async fn upgrade_without_a_session_cookie_is_refused() {
    let addr = serve(thermostat_view()).await;
    let err = MockLiveClient::connect_anonymous(&format!("ws://{addr}/")).await;
    assert!(err.is_err(), "handshake must be rejected");
}

#[tokio::test]
async fn repeated_undecodable_frames_close_the_connection() {
    let addr = serve(thermostat_view()).await;
    let (mut client, _baseline) = connect(addr).await;

    for _ in 0..8 {
        client.send_text("{not json").await.expect("send garbage");
    }
    assert!(client.server_closed().await, "server should hang up");
}

#[tokio::test]
async fn structural_render_change_sends_a_fresh_baseline() {
    #[derive(Clone, serde::Serialize)]
    struct Mode {
        fancy: bool,
    }

    fn mode_mount(_socket: &mut Socket<Mode>) -> BoxFuture<'_, EventResult<Mode>> {
        Box::pin(async { Ok(Mode { fancy: false }) })
    }

    fn switch(socket: &mut Socket<Mode>, _p: Params) -> BoxFuture<'_, EventResult<Mode>> {
        Box::pin(async move {
            Ok(Mode {
                fancy: !socket.assigns().fancy,
            })
        })
    }

    // A renderer whose statics depend on the assigns, i.e. a structural
    // change between renderings.
    fn render_mode(assigns: &Mode) -> Result<RenderTree, LiveError> {
        let statics = if assigns.fancy {
            vec!["<li class=\"x\">".to_owned(), "</li>".to_owned()]
        } else {
            vec!["<li>".to_owned(), "</li>".to_owned()]
        };
        Ok(RenderTree::new(
            statics,
            vec![Dynamic::Text("item".to_owned())],
        )?)
    }

    let view = LiveView::builder(ViewConfig::new(SESSION_KEY.to_vec()))
        .mount(mode_mount)
        .render_with(render_mode)
        .on("switch", switch)
        .build()
        .expect("view builds");
    let app = axum::Router::new().merge(liveview::view_router(view));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let response = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("initial render");
    let cookie = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("cookie")
        .to_str()
        .expect("ascii")
        .to_owned();
    let mut client =
        MockLiveClient::connect_with_cookie(&format!("ws://{addr}/"), &cookie_pair(&cookie))
            .await
            .expect("upgrade");
    let baseline = match client.recv_frame().await.expect("baseline") {
        OutboundFrame::Render { tree } => tree,
        other => panic!("expected render, got {other:?}"),
    };
    assert_eq!(baseline.statics(), ["<li>", "</li>"]);

    client
        .send_frame(&InboundFrame::Event {
            name: "switch".to_owned(),
            data: Params::new(),
            id: Some("1".to_owned()),
        })
        .await
        .expect("send");

    match client.recv_frame().await.expect("fresh baseline") {
        OutboundFrame::Render { tree } => {
            assert_eq!(tree.statics(), ["<li class=\"x\">", "</li>"]);
        }
        other => panic!("expected full render after structural change, got {other:?}"),
    }
    assert!(matches!(
        client.recv_frame().await.expect("ack"),
        OutboundFrame::Ack { .. }
    ));
}

#[tokio::test]
async fn component_events_patch_only_the_component_subtree() {
    #[derive(Clone, serde::Serialize)]
    struct Dashboard {
        title: String,
        count: u64,
    }

    fn dash_mount(_socket: &mut Socket<Dashboard>) -> BoxFuture<'_, EventResult<Dashboard>> {
        Box::pin(async {
            Ok(Dashboard {
                title: "ops".to_owned(),
                count: 0,
            })
        })
    }

    fn counter_mount(socket: &mut Socket<Dashboard>) -> BoxFuture<'_, EventResult<Dashboard>> {
        Box::pin(async move {
            let mut next = socket.assigns().clone();
            next.count = 0;
            Ok(next)
        })
    }

    fn counter_inc(
        socket: &mut Socket<Dashboard>,
        _p: Params,
    ) -> BoxFuture<'_, EventResult<Dashboard>> {
        Box::pin(async move {
            let mut next = socket.assigns().clone();
            next.count += 1;
            Ok(next)
        })
    }

    // The counter renders as a nested subtree at a stable hole in the
    // parent tree.
    fn render_dashboard(assigns: &Dashboard) -> Result<RenderTree, LiveError> {
        let counter = RenderTree::new(
            vec!["<span>".to_owned(), "</span>".to_owned()],
            vec![Dynamic::Text(assigns.count.to_string())],
        )?;
        Ok(RenderTree::new(
            vec!["<h1>".to_owned(), "</h1>".to_owned(), String::new()],
            vec![
                Dynamic::Text(assigns.title.clone()),
                Dynamic::Tree(counter),
            ],
        )?)
    }

    let view = LiveView::builder(ViewConfig::new(SESSION_KEY.to_vec()))
        .mount(dash_mount)
        .render_with(render_dashboard)
        .component(
            Component::new("counter")
                .mount(counter_mount)
                .on("inc", counter_inc),
        )
        .build()
        .expect("view builds");
    let app = axum::Router::new().merge(liveview::view_router(view));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });

    let response = reqwest::get(format!("http://{addr}/"))
        .await
        .expect("initial render");
    let cookie = response
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("cookie")
        .to_str()
        .expect("ascii")
        .to_owned();
    let mut client =
        MockLiveClient::connect_with_cookie(&format!("ws://{addr}/"), &cookie_pair(&cookie))
            .await
            .expect("upgrade");
    match client.recv_frame().await.expect("baseline") {
        OutboundFrame::Render { tree } => {
            assert_eq!(tree.to_html(), "<h1>ops</h1><span>0</span>");
        }
        other => panic!("expected baseline render, got {other:?}"),
    }

    client
        .send_frame(&InboundFrame::Event {
            name: "counter:inc".to_owned(),
            data: Params::new(),
            id: Some("1".to_owned()),
        })
        .await
        .expect("send");

    match client.recv_frame().await.expect("patch") {
        OutboundFrame::Patch { patch } => {
            assert_eq!(patch.len(), 1, "only the component subtree changed");
            let Some(PatchValue::Nested(nested)) = patch.get(1) else {
                panic!("expected nested patch at the component hole");
            };
            assert_eq!(nested.get(0), Some(&PatchValue::Text("1".to_owned())));
        }
        other => panic!("expected patch, got {other:?}"),
    }
    assert!(matches!(
        client.recv_frame().await.expect("ack"),
        OutboundFrame::Ack { .. }
    ));
}
