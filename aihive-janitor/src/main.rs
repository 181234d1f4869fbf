//! Binary entry point for the Janitor: a daily scheduled sweep of
//! staged input files and abandoned `pending` rows.

use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, Utc};
use envconfig::Envconfig;
use eyre::Result;
use futures::future::{select, Either};
use health::HealthRegistry;

use aihive_common::job_store::JobStore;
use aihive_common::metrics::setup_metrics_routes;

use config::Config;
use sweep::SweepConfig;

mod config;
mod handlers;
mod sweep;

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
        "aihive-janitor",
    );

    let store = JobStore::new(&config.db_connection)
        .await
        .expect("failed to connect to job store");

    let schedule = cron::Schedule::from_str(&config.schedule)
        .unwrap_or_else(|_| panic!("invalid cron schedule: {}", config.schedule));
    let timezone: chrono_tz::Tz = config
        .schedule_timezone
        .parse()
        .unwrap_or_else(|_| panic!("invalid schedule timezone: {}", config.schedule_timezone));

    let sweep_config = SweepConfig {
        staging_root: PathBuf::from(config.staging_root()),
        retention: Duration::seconds(config.retention_secs),
        stale_pending: Duration::seconds(config.stale_pending_secs),
    };

    let liveness = HealthRegistry::new("liveness");
    // Generous relative to a once-a-day cadence: the handle only needs to
    // be reported more often than this deadline, not once per sweep.
    let sweep_liveness = liveness
        .register("sweep-loop".to_string(), time::Duration::hours(26))
        .await;

    let sweep_loop = async move {
        loop {
            sweep_liveness.report_healthy().await;

            let delay = sweep::time_until_next_fire(&schedule, timezone, Utc::now());
            tracing::info!(delay_secs = delay.as_secs(), "janitor sleeping until next sweep");
            tokio::time::sleep(delay).await;

            tracing::info!("janitor sweep starting");
            sweep::run_once(&store, &sweep_config).await;
            tracing::info!("janitor sweep complete");
        }
    };

    let router = handlers::router(liveness);
    let router = setup_metrics_routes(router);
    let http_server = Box::pin(listen(router, config.bind()));

    // The HTTP server and the background sweep loop race via
    // `futures::future::select` since neither is expected to return.
    match select(http_server, Box::pin(sweep_loop)).await {
        Either::Left((listen_result, _)) => {
            if let Err(error) = listen_result {
                tracing::error!(%error, "janitor http server exited");
            }
        }
        Either::Right((_, _)) => {
            tracing::error!("janitor sweep loop exited");
        }
    }
}
