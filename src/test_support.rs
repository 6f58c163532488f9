//! Local HTTP fixture server for prober and scheduler tests.

use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Concurrency bookkeeping for the `/track` route.
#[derive(Default)]
pub struct Counters {
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub hits: AtomicUsize,
}

pub struct Fixture {
    pub addr: SocketAddr,
    pub counters: Arc<Counters>,
}

impl Fixture {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn track(State(counters): State<Arc<Counters>>) -> &'static str {
    counters.hits.fetch_add(1, Ordering::SeqCst);
    let now = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    counters.max_in_flight.fetch_max(now, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    counters.in_flight.fetch_sub(1, Ordering::SeqCst);
    "tracked"
}

/// 200 when the country cookie is exactly `countryCode-NL`, 204 when no
/// cookie was sent, 400 otherwise.
async fn cookie(headers: HeaderMap) -> StatusCode {
    match headers.get("cookie").and_then(|v| v.to_str().ok()) {
        Some("countryCode=countryCode-NL") => StatusCode::OK,
        None => StatusCode::NO_CONTENT,
        Some(_) => StatusCode::BAD_REQUEST,
    }
}

pub async fn spawn_fixture() -> Fixture {
    let counters = Arc::new(Counters::default());
    let app = Router::new()
        .route("/ok", get(|| async { "ok" }))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        )
        .route("/cookie", get(cookie))
        .route("/track", get(track))
        .with_state(counters.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Fixture { addr, counters }
}

/// An address nothing listens on.
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}
