//! Shared helpers for unit tests.

use axum::Router;

/// Serve `app` on an ephemeral loopback port and return its base URL.
pub async fn spawn_mock_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}
