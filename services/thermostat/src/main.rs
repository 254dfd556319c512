// thermostat: a minimal live view service.
//
// GET / renders the thermostat; the page upgrades to a live session and the
// +/- buttons round-trip through the server, which streams back one-number
// patches.

use std::env;

use futures_util::future::BoxFuture;
use liveview::{EventResult, LiveView, Socket, ViewConfig};
use lv_protocol::Params;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const TEMPLATE: &str = r#"<html>
<head><title>Thermostat</title><script src="/live.js"></script></head>
<body>
<div class="temp">{{ c | round(1) }}&deg;C</div>
<button live-click="temp-down">-</button>
<button live-click="temp-up">+</button>
</body>
</html>"#;

#[derive(Clone, Serialize)]
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

fn temp_down(
    socket: &mut Socket<Thermostat>,
    _p: Params,
) -> BoxFuture<'_, EventResult<Thermostat>> {
    Box::pin(async move {
        Ok(Thermostat {
            c: socket.assigns().c - 0.1,
        })
    })
}

fn session_key() -> Vec<u8> {
    match env::var("SESSION_KEY") {
        Ok(key) if key.len() >= 32 => key.into_bytes(),
        _ => {
            warn!("SESSION_KEY unset or too short; using a development-only key");
            b"thermostat-development-only-key-0001".to_vec()
        }
    }
}

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_owned());

    let view = LiveView::builder(ViewConfig::new(session_key()))
        .mount(mount)
        .template(TEMPLATE)
        .expect("thermostat template should parse")
        .on("temp-up", temp_up)
        .on("temp-down", temp_down)
        .build()
        .expect("thermostat view should build");

    let app = axum::Router::new()
        .merge(liveview::view_router(view))
        .merge(liveview::client_router());

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "thermostat listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
    info!("thermostat shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
