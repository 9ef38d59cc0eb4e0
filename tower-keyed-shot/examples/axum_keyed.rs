use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::error_handling::HandleErrorLayer;
use axum::extract::ConnectInfo;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use keyed_shot::MemoryStore;
use keyed_shot::TokenBucketLimiter;
use tower::BoxError;
use tower::ServiceBuilder;
use tower_keyed_shot::KeyedRateLimitLayer;
use tower_keyed_shot::ShotError;

/// Rate limit by client address; requests without one share a bucket.
fn client_key(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    // 1. Setup Strategy: bursts of 10, then 1 request per second per client
    let store = Arc::new(MemoryStore::new());
    let strategy = Arc::new(TokenBucketLimiter::new(store).quota(10.0, 1.0)?);

    // 2. Setup Keyed Layer
    let keyed_layer = KeyedRateLimitLayer::new(strategy, client_key);

    // 3. Build the Router
    let app = Router::new()
        .route("/", get(|| async { "Hello, Shot!" }))
        .layer(
            ServiceBuilder::new()
                // 1. The outermost layer: catches BoxError and returns Response
                .layer(HandleErrorLayer::new(handle_shot_error))
                // 2. The middle layer: introduces BoxError
                .layer(keyed_layer)
                // 3. Converts the Route's Infallible to BoxError
                .map_err(BoxError::from),
        );

    // 4. Serve
    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000").await?;
    println!("📡 Listening on http://127.0.0.1:3000");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// The signature must match BoxError -> IntoResponse
async fn handle_shot_error(err: BoxError) -> impl IntoResponse {
    if let Some(shot_err) = err.downcast_ref::<ShotError>() {
        shot_err.clone().into_response()
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal Service Error").into_response()
    }
}
