// Broadcast flow: two live sockets subscribed to the same topic both
// observe published events through their own serialized loops.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use liveview::{Backend, EventResult, LiveView, LocalBus, Socket, ViewConfig};
use lv_protocol::{BusEvent, InboundFrame, OutboundFrame, Params, PatchValue};
use lv_test_utils::{MockLiveClient, cookie_pair};

const SESSION_KEY: [u8; 32] = [5u8; 32];
const ROOM: &str = "room:1";

#[derive(Clone, serde::Serialize)]
struct ChatRoom {
    messages: Vec<String>,
}

fn mount(socket: &mut Socket<ChatRoom>) -> BoxFuture<'_, EventResult<ChatRoom>> {
    Box::pin(async move {
        if socket.connected() {
            socket.subscribe(ROOM)?;
        }
        Ok(ChatRoom {
            messages: Vec::new(),
        })
    })
}

fn say(socket: &mut Socket<ChatRoom>, params: Params) -> BoxFuture<'_, EventResult<ChatRoom>> {
    Box::pin(async move {
        let mut data = Params::new();
        if let Some(body) = params.get("body") {
            data.insert("body".to_owned(), body.clone());
        }
        socket.broadcast(ROOM, "new-message", data)?;
        // The speaker's own copy arrives through the subscription, like
        // everyone else's.
        Ok(socket.assigns().clone())
    })
}

fn new_message(
    socket: &mut Socket<ChatRoom>,
    params: Params,
) -> BoxFuture<'_, EventResult<ChatRoom>> {
    Box::pin(async move {
        let mut next = socket.assigns().clone();
        let body = params
            .get("body")
            .and_then(|value| value.as_str())
            .unwrap_or("?")
            .to_owned();
        next.messages.push(body);
        Ok(next)
    })
}

async fn serve(bus: Arc<LocalBus>) -> SocketAddr {
    let view: Arc<LiveView<ChatRoom>> = LiveView::builder(ViewConfig::new(SESSION_KEY.to_vec()))
        .mount(mount)
        .template("<ul>{{ messages | join(\",\") }}</ul>")
        .expect("template parses")
        .on("say", say)
        .on("new-message", new_message)
        .pubsub(bus)
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
    addr
}

async fn connect(addr: SocketAddr) -> MockLiveClient {
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
        OutboundFrame::Render { .. } => client,
        other => panic!("expected baseline render, got {other:?}"),
    }
}

fn expect_message_patch(frame: OutboundFrame, joined: &str) {
    match frame {
        OutboundFrame::Patch { patch } => {
            assert_eq!(patch.get(0), Some(&PatchValue::Text(joined.to_owned())));
        }
        other => panic!("expected patch with {joined:?}, got {other:?}"),
    }
}

#[tokio::test]
async fn broadcast_from_one_socket_reaches_every_subscriber() {
    let bus = Arc::new(LocalBus::new());
    let addr = serve(bus).await;

    let mut speaker = connect(addr).await;
    let mut listener = connect(addr).await;

    let mut data = Params::new();
    data.insert("body".to_owned(), serde_json::json!("hello"));
    speaker
        .send_frame(&InboundFrame::Event {
            name: "say".to_owned(),
            data,
            id: Some("1".to_owned()),
        })
        .await
        .expect("send");

    // The speaker's dispatch itself changes nothing: ack first, then its
    // own subscription delivery patches the room.
    match speaker.recv_frame().await.expect("ack") {
        OutboundFrame::Ack { id } => assert_eq!(id, "1"),
        other => panic!("expected ack, got {other:?}"),
    }
    expect_message_patch(speaker.recv_frame().await.expect("own delivery"), "hello");
    expect_message_patch(listener.recv_frame().await.expect("delivery"), "hello");
}

#[tokio::test]
async fn external_publisher_reaches_all_sockets_in_order() {
    let bus = Arc::new(LocalBus::new());
    let addr = serve(bus.clone()).await;

    let mut first = connect(addr).await;
    let mut second = connect(addr).await;

    // A publisher that is not a socket at all, e.g. a background job.
    for body in ["one", "two"] {
        let mut data = Params::new();
        data.insert("body".to_owned(), serde_json::json!(body));
        let payload = serde_json::to_vec(&BusEvent {
            event: "new-message".to_owned(),
            data,
        })
        .expect("encode");
        bus.publish(ROOM, payload).expect("publish");
    }

    for client in [&mut first, &mut second] {
        expect_message_patch(client.recv_frame().await.expect("first delivery"), "one");
        expect_message_patch(
            client.recv_frame().await.expect("second delivery"),
            "one,two",
        );
    }
}

#[tokio::test]
async fn publishing_to_a_room_with_no_sockets_is_harmless() {
    let bus = Arc::new(LocalBus::new());
    let _addr = serve(bus.clone()).await;

    let payload = serde_json::to_vec(&BusEvent {
        event: "new-message".to_owned(),
        data: Params::new(),
    })
    .expect("encode");
    bus.publish("room:empty", payload).expect("publish");
}
