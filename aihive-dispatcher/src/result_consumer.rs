//! The Result Consumer: the dispatcher's background task that drains
//! the flavor's result queue, reconciles the Job Store, and dispatches the
//! matching Callback Client call. Runs concurrently with the HTTP server,
//! racing both via `futures::future::select` since neither is expected to
//! return.

use aihive_common::broker::{decode_delivery, next_delivery};
use aihive_common::callback::CompletedPayload;
use aihive_common::flavor::FlavorDescriptor;
use aihive_common::job_store::{JobStatus, JobStore};
use aihive_common::messages::ResultMessage;
use health::HealthHandle;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Runs forever, reconnecting on broker drops. Never returns under
/// normal operation; intended to be raced against the HTTP listener.
pub async fn run(state: AppState, liveness: HealthHandle) {
    loop {
        liveness.report_healthy().await;

        let mut consumer = {
            let mut broker = state.broker.lock().await;
            match broker.consume_results("result-consumer").await {
                Ok(consumer) => consumer,
                Err(error) => {
                    warn!(%error, "failed to start result consumer, reconnecting");
                    broker_reconnect(&state).await;
                    continue;
                }
            }
        };

        loop {
            liveness.report_healthy().await;

            let delivery = match next_delivery(&mut consumer).await {
                Some(delivery) => delivery,
                None => {
                    warn!("result consumer stream closed, reconnecting");
                    broker_reconnect(&state).await;
                    break;
                }
            };

            let delivery_tag = delivery.delivery_tag;

            match decode_delivery::<ResultMessage>(&delivery.data) {
                Ok(message) => {
                    handle_result(&state, message).await;
                }
                Err(error) => {
                    error!(%error, "failed to decode result message, dropping");
                }
            }

            // Ack unconditionally after the DB write + webhook attempt:
            // webhook failure must not cause a requeue, since that would
            // re-run the executor for no benefit.
            let mut broker = state.broker.lock().await;
            if let Err(error) = broker.ack(delivery_tag).await {
                warn!(%error, "failed to ack result message");
            }
        }
    }
}

async fn broker_reconnect(state: &AppState) {
    let mut broker = state.broker.lock().await;
    broker.reconnect().await;
}

async fn handle_result(state: &AppState, message: ResultMessage) {
    let next_status = JobStatus::from(message.status);

    let updated = state
        .store
        .apply_transition(
        message.id,
        next_status,
        message.result_data.clone(),
        message.result_path.clone(),
        message.error.clone(),
    )
        .await;

    let job = match updated {
        Ok(Some(job)) => job,
        Ok(None) => {
            // Either an unknown id or an attempted status regression /
            // repeat of an already-terminal state; lifecycle
            // errors are dropped with a warning, not escalated.
            warn!(id = %message.id, status = ?next_status, "dropped result update: unknown id or non-advancing transition");
            return;
        }
        Err(error) => {
            error!(%error, id = %message.id, "failed to persist result message");
            return;
        }
    };

    info!(id = %job.id, status = ?job.status, "job status updated");

    dispatch_callback(state.flavor, &state.callback, &state.store, &job).await;
}

async fn dispatch_callback(
    flavor: &'static FlavorDescriptor,
    callback: &aihive_common::callback::CallbackClient,
    store: &JobStore,
    job: &aihive_common::job_store::Job,
) {
    match job.status {
        JobStatus::InProgress => {
            let _ = callback.set_inprogress(store, job.id).await;
        }
        JobStatus::Completed => {
            let payload = if flavor.produces_artifact {
                match &job.result_path {
                    Some(path) => CompletedPayload::Artifact { path: path.clone() },
                    None => {
                        warn!(id = %job.id, "completed artifact flavor with no result_path");
                        return;
                    }
                }
            } else {
                CompletedPayload::Inline(
                    job.result
                        .clone()
                        .map(|json| json.0)
                        .unwrap_or(serde_json::Value::Null),
                )
            };
            let _ = callback.set_completed(store, job.id, payload).await;
        }
        JobStatus::Failed => {
            let _ = callback.set_failed(store, job.id).await;
        }
        JobStatus::Pending => {
            // A result message never carries `pending`; unreachable in
            // practice since `apply_transition` only advances past it.
        }
    }
}
