//! Binary entry point for the Worker Loop: consumes one flavor's task
//! queue, invoking the registered `Executor` for each task.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use envconfig::Envconfig;
use eyre::Result;
use health::HealthRegistry;
use std::future::ready;
use tokio::sync::{oneshot, Mutex};

use aihive_common::broker::BrokerAdapter;
use aihive_common::flavor;
use aihive_common::metrics::setup_metrics_routes;
use aihive_common::tts;

use config::Config;
use error::WorkerError;
use worker::WorkerLoop;

mod config;
mod error;
mod worker;

async fn listen(router: Router, bind: String) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> Result<(), WorkerError> {
    let config = Config::init_from_env().expect("failed to load configuration from env");

    let _log_guard = aihive_common::logging::init(
        &config.console_log_level,
        &config.file_log_level,
        &config.log_dir(),
        "aihive-worker",
    );

    let flavor_descriptor = flavor::lookup(config.flavor.as_str())
        .unwrap_or_else(|| panic!("unknown flavor: {}", config.flavor.as_str()));

    tts::init_result_root(config.result_root());

    let liveness = HealthRegistry::new("liveness");
    let worker_liveness = liveness
        .register("worker-loop".to_string(), time::Duration::seconds(30))
        .await;

    // Eager connect so a misconfigured `QUEUE_CONNECTION` fails the process
    // at startup rather than surfacing only once the loop's first
    // `reconnect` silently retries forever.
    let broker = BrokerAdapter::connect(&config.queue_connection, flavor_descriptor.queue_names()).await?;
    let broker = Arc::new(Mutex::new(broker));

    let worker_loop = WorkerLoop::new(
        broker,
        (flavor_descriptor.executor)(),
        config.worker_name.clone(),
        worker_liveness,
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let worker_task = tokio::spawn(worker_loop.run(shutdown_rx));

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())));
    let router = setup_metrics_routes(router);
    let bind = config.bind();

    let http_server = tokio::spawn(async move {
        if let Err(error) = listen(router, bind).await {
            tracing::error!(%error, "worker http server exited");
        }
    });

    shutdown_signal().await;
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = worker_task.await;
    http_server.abort();

    Ok(())
}

async fn index() -> &'static str {
    "aihive worker"
}
