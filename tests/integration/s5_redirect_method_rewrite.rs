//! S5: a POST receiving a 303 is rewritted to a GET by the HTTP client
//! itself (below the device state machine). Expected: two hops total,
//! final response 200.

#[path = "support.rs"]
mod support;

use axum::body::Body;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use escl_driver::http::{HttpClient, HttpQuery, Method};
use escl_driver::reactor::Reactor;
use escl_driver::uri::Uri;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Default)]
struct HopCounts {
    post_hits: Arc<AtomicUsize>,
    get_hits: Arc<AtomicUsize>,
}

async fn original(axum::extract::State(state): axum::extract::State<HopCounts>) -> Response {
    state.post_hits.fetch_add(1, Ordering::SeqCst);
    Response::builder()
        .status(StatusCode::SEE_OTHER)
        .header("location", "/new")
        .body(Body::empty())
        .unwrap()
}

async fn new_location(axum::extract::State(state): axum::extract::State<HopCounts>) -> Response {
    state.get_hits.fetch_add(1, Ordering::SeqCst);
    Response::builder().status(StatusCode::OK).body(Body::from("ok")).unwrap()
}

#[tokio::test]
async fn s5_redirect_method_rewrite() {
    let state = HopCounts::default();
    let router = Router::new()
        .route("/original", post(original))
        .route("/new", get(new_location))
        .with_state(state.clone());
    let addr = support::spawn(router).await;

    let reactor = Reactor::start();
    let client = HttpClient::new(reactor.handle());
    let uri = Uri::parse(&format!("http://{addr}/original"), false).unwrap();
    let query = HttpQuery::new(Method::Post, uri);

    let (_, join) = client.spawn(query);
    let resp = join.await.expect("query task").expect("query succeeded");

    assert_eq!(resp.status, 200);
    assert_eq!(state.post_hits.load(Ordering::SeqCst), 1, "original POST must be hit exactly once");
    assert_eq!(state.get_hits.load(Ordering::SeqCst), 1, "redirect target must be hit as a GET exactly once");
}
