//! Explicit server session handle.
//!
//! A [`DepotSession`] bundles one connected [`DepotServer`] with what was
//! learned at connect time (capabilities, rule strategy) and the history
//! settings. Every operation takes the session explicitly; there is no
//! process-wide "current connection".

use crate::server::{DepotServer, ServerCapabilities, WorkspaceInfo};
use crate::strategy::RuleStrategy;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use streamkeeper_core::{
    build_hierarchy, Config, Error, HistoryConfig, Result, Rule, StreamHierarchy, StreamPath,
    StreamRecord, StreamSource,
};
use tracing::{debug, info};

pub struct DepotSession<S: DepotServer> {
    server: S,
    capabilities: ServerCapabilities,
    strategy: RuleStrategy,
    history: HistoryConfig,
    in_flight: Mutex<HashSet<String>>,
}

impl<S: DepotServer> DepotSession<S> {
    /// Connect `server` and fix the rule strategy for this connection.
    pub fn connect(server: S, config: &Config) -> Result<Self> {
        config.validate()?;
        if !server.is_connected() {
            server.connect()?;
        }

        let capabilities = server.capabilities()?;
        let strategy = RuleStrategy::select(&capabilities);
        info!(
            server_year = capabilities.server_year,
            strategy = ?strategy,
            "Depot session established"
        );

        Ok(Self {
            server,
            capabilities,
            strategy,
            history: config.history.clone(),
            in_flight: Mutex::new(HashSet::new()),
        })
    }

    /// Disconnect and hand the adapter back.
    pub fn disconnect(self) -> Result<S> {
        self.server.disconnect()?;
        info!("Depot session closed");
        Ok(self.server)
    }

    pub fn server(&self) -> &S {
        &self.server
    }

    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    pub fn strategy(&self) -> RuleStrategy {
        self.strategy
    }

    pub fn history_config(&self) -> &HistoryConfig {
        &self.history
    }

    pub fn is_connected(&self) -> bool {
        self.server.is_connected()
    }

    pub fn ensure_connected(&self) -> Result<()> {
        if self.server.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    pub fn workspace(&self) -> Result<WorkspaceInfo> {
        self.ensure_connected()?;
        self.server.workspace()
    }

    /// Build the hierarchy rooted at `root` from the server.
    pub fn load_hierarchy(&self, root: &StreamPath) -> Result<StreamHierarchy> {
        self.ensure_connected()?;
        build_hierarchy(self, root)
    }

    /// Claim the publish slot for a hierarchy root.
    pub(crate) fn begin_publish(&self, root: &StreamPath) -> Result<PublishGuard<'_>> {
        let key = root.key();
        let mut in_flight = lock(&self.in_flight);
        if !in_flight.insert(key.clone()) {
            return Err(Error::PublishInProgress(root.to_string()));
        }
        debug!(root = %root, "Publish slot claimed");
        Ok(PublishGuard {
            in_flight: &self.in_flight,
            key,
        })
    }

    /// True while a publish for `root` is running.
    pub fn is_publishing(&self, root: &StreamPath) -> bool {
        lock(&self.in_flight).contains(&root.key())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the publish slot on drop.
pub(crate) struct PublishGuard<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for PublishGuard<'_> {
    fn drop(&mut self) {
        lock(self.in_flight).remove(&self.key);
    }
}

impl<S: DepotServer> StreamSource for DepotSession<S> {
    fn fetch_stream_record(&self, path: &StreamPath) -> Result<StreamRecord> {
        self.ensure_connected()?;
        self.server.fetch_stream_record(path)
    }

    fn fetch_all_stream_records(&self) -> Result<Vec<StreamRecord>> {
        self.ensure_connected()?;
        self.server.fetch_all_stream_records()
    }

    fn fetch_stream_rules(&self, path: &StreamPath) -> Result<Vec<Rule>> {
        self.ensure_connected()?;
        let spec = self.server.fetch_stream_spec(path)?;
        Ok(self.strategy.decode(&spec))
    }
}
