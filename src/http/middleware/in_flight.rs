//! In-flight request accounting.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::http::server::AppState;

pub async fn track_in_flight(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let _guard = state.in_flight.track();
    next.run(req).await
}
