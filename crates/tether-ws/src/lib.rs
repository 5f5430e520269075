mod handler;

use axum::{
    extract::{ws::WebSocketUpgrade, Query, State},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tether_core::AppState;

pub fn gateway_router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct GatewayParams {
    token: Option<String>,
}

/// The bearer credential is presented at connection time, either as a
/// `token` query parameter or an `Authorization: Bearer` header; it is not
/// re-checked per event.
fn bearer_from_headers(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::to_string)
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<GatewayParams>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let token = params.token.or_else(|| bearer_from_headers(&headers));
    ws.on_upgrade(move |socket| handler::handle_connection(socket, state, token))
}
