use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;

use aihive_common::broker::BrokerAdapter;
use aihive_common::callback::CallbackClient;
use aihive_common::flavor::FlavorDescriptor;
use aihive_common::job_store::JobStore;

/// Shared process-wide state for the dispatcher: the config object and the
/// broker connection are process-wide, initialized once at startup. The
/// broker is behind a `Mutex` because `publish` internally awaits a lapin
/// confirm and `reconnect` needs exclusive access; the single-threaded
/// event-loop scheduling model means this is never meaningfully contended.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub broker: Arc<Mutex<BrokerAdapter>>,
    pub callback: Arc<CallbackClient>,
    pub flavor: &'static FlavorDescriptor,
    pub staging_root: PathBuf,
}
