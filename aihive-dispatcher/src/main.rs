//! Binary entry point for the Ingress API + Result Consumer process: serves
//! the submit/status/artifact HTTP surface for one flavor and,
//! concurrently, drains that flavor's result queue.

use std::path::PathBuf;
use std::sync::Arc;

use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use health::HealthRegistry;
use tokio::sync::Mutex;

use aihive_common::broker::BrokerAdapter;
use aihive_common::callback::CallbackClient;
use aihive_common::flavor;
use aihive_common::job_store::JobStore;
use aihive_common::metrics::setup_metrics_routes;

use config::Config;
use state::AppState;

mod config;
mod error;
mod handlers;
mod result_consumer;
mod state;

#[cfg(test)]
mod test_support;

async fn listen(router: axum::Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    let config = Config::init_from_env().expect("failed to load configuration from env");

    let _log_guard = aihive_common::logging::init(
        &config.console_log_level,
        &config.file_log_level,
        &config.log_dir(),
        "aihive-dispatcher",
    );

    let flavor = flavor::lookup(config.flavor.as_str())
        .unwrap_or_else(|| panic!("unknown flavor: {}", config.flavor.as_str()));

    let store = JobStore::new(&config.db_connection)
        .await
        .expect("failed to connect to job store");

    let broker = Arc::new(Mutex::new(BrokerAdapter::new(
                config.queue_connection.clone(),
                flavor.queue_names(),
    )));

    let callback = CallbackClient::with_timeout(
        config.tenant_base_url.clone(),
        config.callback_timeout_secs.0,
    );

    let state = AppState {
        store: Arc::new(store),
        broker,
        callback: Arc::new(callback),
        flavor,
        staging_root: PathBuf::from(config.staging_root()),
    };

    let liveness = HealthRegistry::new("liveness");
    let result_consumer_liveness = liveness
        .register("result-consumer".to_string(), time::Duration::seconds(30))
        .await;

    let router = handlers::router(state.clone())
        .route("/_readiness", axum::routing::get(|| async { "ok" }))
        .route(
        "/_liveness",
        axum::routing::get(move || {
                let liveness = liveness.clone();
                async move { liveness.get_status() }
        }),
    );
    let router = setup_metrics_routes(router);
    let http_server = Box::pin(listen(router, config.bind()));
    let result_consumer = Box::pin(result_consumer::run(state, result_consumer_liveness));

    // The HTTP server and the Result Consumer loop race via
    // `futures::future::select`: neither is expected to return, so
    // whichever finishes first ends the process.
    match select(http_server, result_consumer).await {
        Either::Left((listen_result, _)) => {
            if let Err(error) = listen_result {
                tracing::error!(%error, "dispatcher http server exited");
            }
        }
        Either::Right((_, _)) => {
            tracing::error!("result consumer task exited");
        }
    }
}
