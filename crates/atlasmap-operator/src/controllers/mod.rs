//! AtlasMap controller and its shared state

pub mod atlasmap;
pub mod retry;

use std::sync::Arc;

use crate::actions::Pipeline;
use crate::client::ClusterClient;
use crate::config::OperatorConfig;

use self::retry::RetryTracker;

/// Shared state for the controller
pub struct ControllerContext {
    /// Cluster operations used by the pipeline
    pub client: Arc<dyn ClusterClient>,
    /// Action list, fixed for the lifetime of the process
    pub pipeline: Arc<Pipeline>,
    /// Operator configuration
    pub config: Arc<OperatorConfig>,
    /// Retry attempt counter for exponential backoff
    pub retry_tracker: Arc<RetryTracker>,
}
