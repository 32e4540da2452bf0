//! Shared fixture plumbing for the end-to-end scenario tests: binding a
//! fake device's `axum::Router` to an ephemeral port and spawning it in
//! the background.

use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// Binds `router` to an ephemeral localhost port and spawns it in the
/// background, returning the address it's listening on. The server task
/// outlives the test (it's never joined); the process tearing down at
/// the end of the test is what stops it.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}
