use axum::{
    Json, Router,
    http::{StatusCode, Uri},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;

use crate::{
    journal, routines,
    web::{AppState, auth},
};

/// Advertised in 404 responses to aid diagnosis of misrouted requests.
const KNOWN_ROUTES: &[&str] = &[
    "GET /health",
    "POST /api/journal/analyze",
    "GET /api/journal/entries",
    "GET /api/tasks",
    "POST /api/tasks",
    "PATCH /api/tasks/:id",
    "DELETE /api/tasks/:id",
    "GET /api/tasks/completions/:date",
    "POST /api/tasks/completions",
    "DELETE /api/tasks/completions/:task_id/:date",
];

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(journal::router())
        .merge(routines::router())
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .fallback(unknown_route)
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

async fn unknown_route(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "not_found",
            "details": format!("No route for {}", uri.path()),
            "availableRoutes": KNOWN_ROUTES,
        })),
    )
}
