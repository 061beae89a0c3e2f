//! Background publishing.
//!
//! Server calls block, so a publish is moved onto tokio's blocking pool.
//! The session's in-flight guard still applies: a second publish for the
//! same root fails at `Preflight` while the first is running.

use crate::error::PublishResult;
use crate::publish::{PublishOutcome, PublishRequest};
use crate::server::DepotServer;
use crate::session::DepotSession;
use std::sync::Arc;
use streamkeeper_core::StreamHierarchy;
use tokio::task::JoinHandle;
use tracing::debug;

/// Publish on the blocking pool. The hierarchy is moved in; capture it
/// again after the task completes if it is still needed.
pub fn spawn_publish<S>(
    session: Arc<DepotSession<S>>,
    hierarchy: StreamHierarchy,
    request: PublishRequest,
) -> JoinHandle<PublishResult<PublishOutcome>>
where
    S: DepotServer + Send + Sync + 'static,
{
    debug!(stream = %request.stream, "Spawning background publish");
    tokio::task::spawn_blocking(move || session.publish(&hierarchy, &request))
}
