//! The Worker Loop: pulls task messages from the flavor's task queue,
//! invokes the registered `Executor`, and publishes progress/terminal result
//! messages. One process runs exactly one logical consumer
//! (`prefetch=1`) to preserve per-job serialization; horizontal
//! concurrency comes from running more worker processes.

use std::sync::Arc;

use aihive_common::broker::{decode_delivery, next_delivery, BrokerAdapter};
use aihive_common::flavor::{Executor, ExecutorError, ExecutorOutput};
use aihive_common::messages::{ResultMessage, ResultStatus, TaskMessage};
use health::HealthHandle;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{error, info, warn};

/// One decoded task handed from the broker-consuming loop to the
/// executor-driving task, carrying the delivery tag needed to ack once
/// processing (publish + ack) is complete.
struct PendingTask {
    delivery_tag: u64,
    message: TaskMessage,
}

pub struct WorkerLoop {
    broker: Arc<Mutex<BrokerAdapter>>,
    executor: Box<dyn Executor>,
    worker_name: String,
    liveness: HealthHandle,
}

impl WorkerLoop {
    pub fn new(
        broker: Arc<Mutex<BrokerAdapter>>,
        executor: Box<dyn Executor>,
        worker_name: impl Into<String>,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            broker,
            executor,
            worker_name: worker_name.into(),
            liveness,
        }
    }

    /// Runs until `shutdown` resolves (SIGINT/SIGTERM). We stop pulling new
    /// deliveries as soon as the signal fires but let whatever task is
    /// already in the processing channel finish and ack; anything still
    /// sitting un-acked in the broker is redelivered to whichever worker
    /// reconnects next.
    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) {
        // Bounded to 1: an in-memory queue of size 1, drained by a
        // companion task. This decouples the AMQP consumer loop — which
        // must keep reading so the connection stays responsive — from the
        // potentially seconds-to-minutes-long `Executor` call, while still
        // only ever having one job in flight, matching `prefetch=1`.
        let (tx, rx) = mpsc::channel::<PendingTask>(1);

        let processor = tokio::spawn(run_processor(self.broker.clone(), self.executor, rx));

        let mut consumer = self.connect_consumer().await;

        loop {
            self.liveness.report_healthy().await;

            let delivery = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, draining in-flight task before exit");
                    break;
                }
                delivery = next_delivery(&mut consumer) => delivery,
            };

            let delivery = match delivery {
                Some(delivery) => delivery,
                None => {
                    warn!("task consumer stream closed, reconnecting");
                    self.broker.lock().await.reconnect().await;
                    consumer = self.connect_consumer().await;
                    continue;
                }
            };

            let delivery_tag = delivery.delivery_tag;

            match decode_delivery::<TaskMessage>(&delivery.data) {
                Ok(message) => {
                    info!(id = %message.id, flavor = %message.flavor, "task received");
                    // Backpressure, not drop: blocks until the processor has
                    // finished (and acked) whatever it was working on.
                    if tx
                        .send(PendingTask {
                            delivery_tag,
                            message,
                    })
                        .await
                        .is_err()
                    {
                        error!("processing task exited unexpectedly, stopping consumer loop");
                        break;
                    }
                }
                Err(error) => {
                    error!(%error, "failed to decode task message, dropping without redelivery");
                    let mut broker = self.broker.lock().await;
                    let _ = broker.nack(delivery_tag, false).await;
                }
            }
        }

        drop(tx);
        let _ = processor.await;
    }

    async fn connect_consumer(&self) -> lapin::Consumer {
        loop {
            let mut broker = self.broker.lock().await;
            match broker.consume_tasks(&self.worker_name).await {
                Ok(consumer) => return consumer,
                Err(error) => {
                    warn!(%error, "failed to start task consumer, reconnecting");
                    drop(broker);
                    self.broker.lock().await.reconnect().await;
                }
            }
        }
    }
}

async fn run_processor(
    broker: Arc<Mutex<BrokerAdapter>>,
    executor: Box<dyn Executor>,
    mut rx: mpsc::Receiver<PendingTask>,
) {
    while let Some(pending) = rx.recv().await {
        process_one(&broker, executor.as_ref(), pending).await;
    }
}

/// Executes one task end to end: publish `in_progress`, invoke the
/// `Executor`, publish the terminal result, ack. The broker
/// publish/ack calls retry through reconnect rather than giving up, since a
/// dropped result message would leave the Result Consumer (and thus the
/// tenant platform) with no idea the job ever finished.
async fn process_one(broker: &Arc<Mutex<BrokerAdapter>>, executor: &dyn Executor, pending: PendingTask) {
    let PendingTask {
        delivery_tag,
        message,
    } = pending;

    publish_result(
        broker,
        &ResultMessage {
            id: message.id,
            status: ResultStatus::InProgress,
            result_data: None,
            result_path: None,
            error: None,
        },
    )
        .await;

    let outcome = executor
        .execute(&message.inputs, message.model.as_deref())
        .await;

    if let Err(error) = &outcome {
        warn!(id = %message.id, %error, "executor failed");
        if let Some(path) = error.partial_artifact_path() {
            delete_partial_artifact(message.id, path).await;
        }
    }

    let result = build_result_message(message.id, outcome);
    publish_result(broker, &result).await;

    let mut guard = broker.lock().await;
    if let Err(error) = guard.ack(delivery_tag).await {
        error!(%error, id = %message.id, "failed to ack task message");
    }
}

/// Pure conversion of an `Executor` outcome into the wire `ResultMessage`,
/// split out from [`process_one`] so it's testable without a broker.
/// Failure messages carry only the top line of the error, capped to a
/// bounded length so a verbose error can't blow out the `error` column.
fn build_result_message(
    id: uuid::Uuid,
    outcome: Result<ExecutorOutput, ExecutorError>,
) -> ResultMessage {
    match outcome {
        Ok(ExecutorOutput::Inline(value)) => ResultMessage {
            id,
            status: ResultStatus::Completed,
            result_data: Some(value),
            result_path: None,
            error: None,
        },
        Ok(ExecutorOutput::Artifact(path)) => ResultMessage {
            id,
            status: ResultStatus::Completed,
            result_data: None,
            result_path: Some(path),
            error: None,
        },
        Err(error) => ResultMessage {
            id,
            status: ResultStatus::Failed,
            result_data: None,
            result_path: None,
            error: Some(short_string(&error.to_string())),
        },
    }
}

const MAX_ERROR_LEN: usize = 500;

fn short_string(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or(message);
    if first_line.chars().count() <= MAX_ERROR_LEN {
        first_line.to_owned()
    } else {
        let mut truncated: String = first_line.chars().take(MAX_ERROR_LEN).collect();
        truncated.push('…');
        truncated
    }
}

/// P4 Artifact-absent-on-failure: a failed job must never leave a produced
/// artifact behind, so any partially written file the executor reports is
/// removed before the `failed` result message goes out.
async fn delete_partial_artifact(job_id: uuid::Uuid, path: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(id = %job_id, %path, "removed partially written artifact after executor failure"),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
        Err(error) => warn!(id = %job_id, %path, %error, "failed to remove partial artifact"),
    }
}

async fn publish_result(broker: &Arc<Mutex<BrokerAdapter>>, message: &ResultMessage) {
    loop {
        let mut guard = broker.lock().await;
        match guard.publish_result(message).await {
            Ok(()) => return,
            Err(error) => {
                warn!(%error, "failed to publish result message, reconnecting");
                guard.reconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aihive_common::messages::TaskInputs;
    use async_trait::async_trait;

    #[test]
    fn short_string_keeps_only_the_first_line() {
        let message = "top frame\nsecond frame\nthird frame";
        assert_eq!(short_string(message), "top frame");
    }

    #[test]
    fn short_string_truncates_long_messages() {
        let message = "x".repeat(MAX_ERROR_LEN + 50);
        let shortened = short_string(&message);
        assert_eq!(shortened.chars().count(), MAX_ERROR_LEN + 1);
        assert!(shortened.ends_with('…'));
    }

    #[test]
    fn successful_inline_outcome_becomes_a_completed_result() {
        let id = uuid::Uuid::new_v4();
        let result = build_result_message(id, Ok(ExecutorOutput::Inline(serde_json::json!({"text": "hi"}))));

        assert_eq!(result.id, id);
        assert_eq!(result.status, ResultStatus::Completed);
        assert!(result.result_data.is_some());
        assert!(result.result_path.is_none());
        assert!(result.error.is_none());
    }

    #[test]
    fn successful_artifact_outcome_carries_a_path_and_no_inline_data() {
        let id = uuid::Uuid::new_v4();
        let result = build_result_message(id, Ok(ExecutorOutput::Artifact("/var/result/x.wav".to_owned())));

        assert_eq!(result.status, ResultStatus::Completed);
        assert_eq!(result.result_path.as_deref(), Some("/var/result/x.wav"));
        assert!(result.result_data.is_none());
    }

    #[test]
    fn failure_outcome_becomes_failed_with_no_artifact_or_inline_data() {
        let id = uuid::Uuid::new_v4();
        let result = build_result_message(id, Err(ExecutorError::failed("boom")));

        assert_eq!(result.status, ResultStatus::Failed);
        assert_eq!(result.error.as_deref(), Some("boom"));
        assert!(result.result_path.is_none());
        assert!(result.result_data.is_none());
    }

    struct AlwaysFails;

    #[async_trait]
    impl Executor for AlwaysFails {
        async fn execute(
            &self,
            _inputs: &TaskInputs,
            _model: Option<&str>,
        ) -> Result<ExecutorOutput, ExecutorError> {
            Err(ExecutorError::failed("synthetic failure"))
        }
    }

    #[tokio::test]
    async fn a_failing_executor_never_panics_the_caller() {
        let executor = AlwaysFails;
        let outcome = executor.execute(&TaskInputs::default(), None).await;
        assert!(matches!(
                build_result_message(uuid::Uuid::new_v4(), outcome).status,
                ResultStatus::Failed
        ));
    }

    #[tokio::test]
    async fn failed_executor_with_a_partial_artifact_has_it_removed() {
        let dir = std::env::temp_dir().join(format!("aihive-worker-test-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let path = dir.join("partial.wav");
        tokio::fs::write(&path, b"not really a wav").await.unwrap();
        let path_str = path.to_string_lossy().into_owned();

        let error = ExecutorError::failed_with_artifact("writing artifact: disk full", &path_str);
        assert_eq!(error.partial_artifact_path(), Some(path_str.as_str()));

        delete_partial_artifact(uuid::Uuid::new_v4(), &path_str).await;

        assert!(!path.exists());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }
}
