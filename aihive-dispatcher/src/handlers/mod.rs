use axum::{routing, Router};

use crate::state::AppState;

pub mod app;
pub mod artifact;
pub mod status;
pub mod submit;

pub fn router(state: AppState) -> Router {
    let flavor = state.flavor.tag;

    Router::new()
        .route("/", routing::get(app::index))
        .route(
        &format!("/{flavor}/api/v1/{flavor}-offline"),
        routing::post(submit::post),
    )
        .route(
        &format!("/{flavor}/api/v1/status/:id"),
        routing::get(status::get),
    )
        .route(
        &format!("/{flavor}/api/v1/file/:id"),
        routing::get(artifact::get),
    )
        .with_state(state)
}
