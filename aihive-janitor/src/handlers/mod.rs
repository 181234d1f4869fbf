use std::future::ready;

use axum::routing::get;
use axum::Router;
use health::HealthRegistry;

pub mod app;

pub fn router(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(app::index))
        .route("/_readiness", get(app::index))
        .route(
        "/_liveness",
        get(move || ready(liveness.get_status())),
    )
}
