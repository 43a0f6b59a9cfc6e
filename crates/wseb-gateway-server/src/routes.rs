//! Route configuration.
//!
//! Emulated endpoints are not fixed routes: sessions bind paths at runtime,
//! so every request goes through one dispatcher that parses the emulation
//! suffix and looks up the service or session.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use wseb_proto::{Endpoint, EndpointPath};

use crate::error::GatewayError;
use crate::state::GatewayState;
use crate::{create, downstream, upstream};

/// Create the gateway router.
pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .fallback(dispatch)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_check(State(state): State<Arc<GatewayState>>) -> String {
    format!("ok sessions={}\n", state.registry().session_count())
}

async fn dispatch(State(state): State<Arc<GatewayState>>, request: Request) -> Response {
    let Some(path) = EndpointPath::parse(request.uri().path()) else {
        return GatewayError::NotFound(request.uri().path().to_string()).into_response();
    };

    let result = match path.endpoint {
        Endpoint::Create => create::handle(&state, &path, request).await,
        Endpoint::Downstream(_) => downstream::handle(&state, &path, request).await,
        Endpoint::Upstream(_) => upstream::handle(&state, &path, request).await,
    };
    result.unwrap_or_else(IntoResponse::into_response)
}
