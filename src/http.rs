//! HTTP readiness endpoint for the broker topology probe.
//!
//! Requires the `http` feature. Uses axum for routing.
//!
//! ## Routes
//!
//! - `GET /health/readiness` returns `200 {"status":"UP"}` when every
//!   required destination exists, otherwise
//!   `503 {"status":"DOWN","missing":[...]}`.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use outbox_relay::{http, BrokerTopologyProbe, InMemoryBroker, RelayConfig};
//!
//! let config = RelayConfig::load_from_file("relay.json")?;
//! let broker = Arc::new(InMemoryBroker::with_destinations(["orders"]));
//! // Each existence check gets at most `publish-timeout`.
//! let probe = Arc::new(BrokerTopologyProbe::from_config(broker, &config));
//!
//! // Compose with other axum routes
//! let app = http::router(probe.clone());
//!
//! // Or serve directly
//! http::serve(probe, "0.0.0.0:8080").await?;
//! ```

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::error;

use crate::delivery::DeliveryChannel;
use crate::probe::BrokerTopologyProbe;

/// Build an axum `Router` serving the readiness endpoint.
pub fn router<C>(probe: Arc<BrokerTopologyProbe<C>>) -> Router
where
    C: DeliveryChannel + ?Sized + 'static,
{
    Router::new()
        .route("/health/readiness", get(readiness_handler::<C>))
        .with_state(probe)
}

/// Serve the readiness endpoint at the given address (e.g. `"0.0.0.0:8080"`).
pub async fn serve<C>(
    probe: Arc<BrokerTopologyProbe<C>>,
    addr: &str,
) -> Result<(), std::io::Error>
where
    C: DeliveryChannel + ?Sized + 'static,
{
    let app = router(probe);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

async fn readiness_handler<C>(
    State(probe): State<Arc<BrokerTopologyProbe<C>>>,
) -> impl IntoResponse
where
    C: DeliveryChannel + ?Sized + 'static,
{
    // Broker admin calls block.
    match tokio::task::spawn_blocking(move || probe.check()).await {
        Ok(health) if health.is_up() => (StatusCode::OK, Json(json!(health))).into_response(),
        Ok(health) => (StatusCode::SERVICE_UNAVAILABLE, Json(json!(health))).into_response(),
        Err(e) => {
            error!(error = %e, "readiness check panicked");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "DOWN", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}
