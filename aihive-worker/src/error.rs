use thiserror::Error;

use aihive_common::broker::BrokerError;

/// Errors surfaced by the Worker Loop. None of these should crash the
/// process on a per-task basis: `BrokerError` during the steady state is
/// retried internally by `BrokerAdapter::reconnect`. `Executor` errors
/// never reach this type at all (they're turned into a `failed` result
/// message by `worker::process_one`). This enum exists for the one fatal
/// path: `main`'s initial `BrokerAdapter::connect`, where a bad
/// `QUEUE_CONNECTION` should fail the process immediately rather than loop
/// forever inside `reconnect`.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("broker error: {0}")]
    BrokerError(#[from] BrokerError),
}
