//! Startup-time eager activation.
//!
//! Three independent triggers run once activation requests become
//! serviceable: the `*` wildcard, workspace-content matches, and the
//! deferred `onStartupFinished` fan-out. The first two joined together are
//! the scanner's completion; the third is fire-and-forget and bounded by a
//! deferral timeout so a hanging scan cannot postpone it forever.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::activation::{ActivationReason, ExtensionActivator};
use crate::barrier::Latch;
use crate::extension::{
    ExtensionId, STARTUP_FINISHED_EVENT, WILDCARD_EVENT, WORKSPACE_CONTAINS_PREFIX,
};
use crate::host::ResourceProbe;
use crate::registry::ExtensionRegistry;

/// Drives the eager activation pass and later workspace re-scans.
pub struct EagerScanner {
    activator: Arc<ExtensionActivator>,
    registry: Arc<ExtensionRegistry>,
    probe: Arc<dyn ResourceProbe>,

    /// Upper bound on how long `onStartupFinished` waits for the eager
    /// scans to settle.
    startup_finished_delay: Duration,

    /// Folders already visited by a workspace-contains scan. Folders are
    /// scanned once; only additions trigger further scans.
    scanned_folders: Mutex<HashSet<PathBuf>>,

    /// Opens when the wildcard and workspace-contains scans have settled.
    scans_settled: Arc<Latch>,
}

impl EagerScanner {
    pub fn new(
        activator: Arc<ExtensionActivator>,
        registry: Arc<ExtensionRegistry>,
        probe: Arc<dyn ResourceProbe>,
        startup_finished_delay: Duration,
    ) -> Self {
        Self {
            activator,
            registry,
            probe,
            startup_finished_delay,
            scanned_folders: Mutex::new(HashSet::new()),
            scans_settled: Arc::new(Latch::new()),
        }
    }

    /// Run the startup pass over `folders`.
    ///
    /// Resolves once the wildcard and workspace-contains scans have settled.
    /// The `onStartupFinished` fan-out is spawned fire-and-forget and may
    /// still be in flight when this returns.
    pub async fn run(&self, folders: Vec<PathBuf>) {
        let activator = Arc::clone(&self.activator);
        let settled = Arc::clone(&self.scans_settled);
        let delay = self.startup_finished_delay;
        tokio::spawn(async move {
            if timeout(delay, settled.wait()).await.is_err() {
                debug!("eager scans still running at the startup-finished bound");
            }
            activator
                .activate_by_event(STARTUP_FINISHED_EVENT, true)
                .await;
        });

        let wildcard = self.activator.activate_by_event(WILDCARD_EVENT, true);
        let contains = self.scan_folders(folders);
        futures::join!(wildcard, contains);
        self.scans_settled.open();
        debug!("eager activation scans settled");
    }

    /// Scan folders added after startup. Previously scanned folders are
    /// skipped, so an addition never repeats earlier existence checks.
    pub async fn folders_added(&self, folders: Vec<PathBuf>) {
        self.scan_folders(folders).await;
    }

    async fn scan_folders(&self, folders: Vec<PathBuf>) {
        let fresh: Vec<PathBuf> = {
            let mut scanned = self.scanned_folders.lock();
            folders
                .into_iter()
                .filter(|folder| scanned.insert(folder.clone()))
                .collect()
        };
        if fresh.is_empty() {
            return;
        }

        let catalog = self.registry.snapshot();
        let mut probes = Vec::new();
        for folder in &fresh {
            for descriptor in catalog.owned() {
                // Joining the memoized record would be harmless; skipping
                // saves the existence-check round trip.
                if self.activator.is_activated(&descriptor.id) {
                    continue;
                }
                for pattern in descriptor.workspace_contains_patterns() {
                    probes.push(self.probe_and_activate(
                        folder.clone(),
                        descriptor.id.clone(),
                        pattern.to_string(),
                    ));
                }
            }
        }
        debug!(folders = fresh.len(), probes = probes.len(), "scanning workspace folders");
        join_all(probes).await;
    }

    async fn probe_and_activate(&self, folder: PathBuf, id: ExtensionId, pattern: String) {
        if !self.probe.exists(&folder, &pattern).await {
            return;
        }
        let event = format!("{WORKSPACE_CONTAINS_PREFIX}{pattern}");
        if let Err(err) = self
            .activator
            .activate_by_id(&id, ActivationReason::startup(event))
            .await
        {
            warn!(
                extension = %id,
                folder = %folder.display(),
                error = %err,
                "workspace-contains activation failed"
            );
        }
    }
}
