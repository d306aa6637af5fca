use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};
use http::{
    header::{AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use tower_http::cors::CorsLayer;

use crate::{request_tracing, ServerState};

use super::inbox;

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState, allowed_origins: &[String]) -> Router {
        let origins = allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse::<HeaderValue>() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!("Ignoring invalid CORS origin {:?}", origin);
                    None
                }
            })
            .collect::<Vec<_>>();

        let cors_layer = CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::DELETE])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true);

        Router::new()
            .route("/", get(|| async { "Inbox stats server" }))
            .nest(
                "/api/inbox",
                Router::new()
                    .route("/", delete(inbox::remove))
                    .route("/process", post(inbox::process))
                    .route("/cancel", post(inbox::cancel))
                    .route("/status", get(inbox::status))
                    .route("/top-senders", get(inbox::top_senders))
                    .route("/stats", get(inbox::stats))
                    .route("/emails", get(inbox::emails))
                    .route("/emails/:id", delete(inbox::trash_email)),
            )
            .layer(request_tracing::trace_with_request_id_layer())
            .layer(cors_layer)
            .with_state(state)
            .fallback(handler_404)
    }
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}
