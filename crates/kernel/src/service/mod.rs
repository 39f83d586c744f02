//! The extension service: phase orchestration and the public surface.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::activation::{ActivatedExtension, ActivationReason, ExtensionActivator};
use crate::barrier::{PhaseGate, StartupPhase};
use crate::config::Config;
use crate::error::{KernelError, KernelResult};
use crate::extension::{ExtensionId, ExtensionsDelta};
use crate::host::HostServices;
use crate::registry::{ExtensionCatalog, ExtensionRegistry};
use crate::scanner::EagerScanner;
use crate::shutdown;

/// The extension host kernel.
///
/// Wrapped in Arc internally so Clone is cheap; clones share all state.
#[derive(Clone)]
pub struct ExtensionService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: Config,
    host: HostServices,
    registry: Arc<ExtensionRegistry>,
    activator: Arc<ExtensionActivator>,
    scanner: Arc<EagerScanner>,
    gate: PhaseGate,

    /// `start()` is one-shot; restart is not a supported transition.
    started: AtomicBool,
    host_started: AtomicBool,

    workspace_folders: Mutex<Vec<PathBuf>>,
}

impl ExtensionService {
    pub fn new(
        config: Config,
        catalog: ExtensionCatalog,
        host: HostServices,
        workspace_folders: Vec<PathBuf>,
    ) -> Self {
        let registry = Arc::new(ExtensionRegistry::new(catalog));
        let activator = Arc::new(ExtensionActivator::new(Arc::clone(&registry), host.clone()));
        let scanner = Arc::new(EagerScanner::new(
            Arc::clone(&activator),
            Arc::clone(&registry),
            Arc::clone(&host.probe),
            config.startup_finished_delay,
        ));
        Self {
            inner: Arc::new(ServiceInner {
                config,
                host,
                registry,
                activator,
                scanner,
                gate: PhaseGate::new(),
                started: AtomicBool::new(false),
                host_started: AtomicBool::new(false),
                workspace_folders: Mutex::new(workspace_folders),
            }),
        }
    }

    /// Drive startup.
    ///
    /// Runs the boot hooks and opens the first two phases; under automatic
    /// startup it then runs the extension host through the eager activation
    /// pass. Boot hook failures are fatal and abort startup. Calling this
    /// twice fails with [`KernelError::AlreadyStarted`].
    pub async fn start(&self) -> Result<()> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(KernelError::AlreadyStarted.into());
        }
        info!("starting extension service");

        self.inner
            .host
            .boot
            .prepare()
            .await
            .context("pre-activation setup failed")?;
        self.inner
            .gate
            .open(StartupPhase::AlmostReadyToRunExtensions);

        self.inner
            .host
            .boot
            .workspace_ready()
            .await
            .context("workspace initialization failed")?;
        self.inner.gate.open(StartupPhase::ReadyToStartHost);

        if self.inner.config.auto_start {
            self.start_extension_host().await?;
        }
        Ok(())
    }

    /// Start the extension host: unblock activation requests and run the
    /// eager activation pass.
    ///
    /// Invoked by [`Self::start`] under automatic startup, or by the
    /// embedder when it drives this step itself. One-shot like `start()`.
    pub async fn start_extension_host(&self) -> KernelResult<()> {
        if self.inner.host_started.swap(true, Ordering::SeqCst) {
            return Err(KernelError::AlreadyStarted);
        }
        self.inner.gate.wait(StartupPhase::ReadyToStartHost).await;
        self.inner.gate.open(StartupPhase::ReadyToRunExtensions);

        let folders = self.inner.workspace_folders.lock().clone();
        self.inner.scanner.run(folders).await;

        self.inner.gate.open(StartupPhase::EagerExtensionsActivated);
        info!("extension host in steady state");
        Ok(())
    }

    /// Activate `id`, joining any attempt already recorded for it.
    ///
    /// Queued until activation requests become serviceable; there is no
    /// timeout on that gate. Unknown ids are ignored at this boundary.
    pub async fn activate_by_id(
        &self,
        id: &ExtensionId,
        reason: ActivationReason,
    ) -> KernelResult<()> {
        self.inner
            .gate
            .wait(StartupPhase::ReadyToRunExtensions)
            .await;
        match self.inner.activator.activate_by_id(id, reason).await {
            Err(KernelError::UnknownExtension { id }) => {
                debug!(extension = %id, "ignoring activation request for unknown extension");
                Ok(())
            }
            other => other,
        }
    }

    /// Activate every owned extension declaring `event`.
    ///
    /// Resolves once all attempts have settled; individual failures stay on
    /// the records.
    pub async fn activate_by_event(&self, event: &str, startup: bool) {
        self.inner
            .gate
            .wait(StartupPhase::ReadyToRunExtensions)
            .await;
        self.inner.activator.activate_by_event(event, startup).await;
    }

    pub fn is_activated(&self, id: &ExtensionId) -> bool {
        self.inner.activator.is_activated(id)
    }

    /// The activated record for `id`; fails with
    /// [`KernelError::NotActivated`] for anything else.
    pub fn get_activated_extension(
        &self,
        id: &ExtensionId,
    ) -> KernelResult<Arc<ActivatedExtension>> {
        self.inner.activator.get_activated_extension(id)
    }

    /// The current catalog snapshot.
    pub fn catalog(&self) -> Arc<ExtensionCatalog> {
        self.inner.registry.snapshot()
    }

    /// The latest startup phase reached so far.
    pub fn current_phase(&self) -> Option<StartupPhase> {
        self.inner.gate.current()
    }

    /// Apply a catalog delta as one atomic snapshot swap.
    pub async fn apply_extensions_delta(&self, delta: ExtensionsDelta) {
        if delta.is_empty() {
            return;
        }
        let catalog = self.inner.registry.apply_delta(&delta);
        info!(
            global = catalog.global().len(),
            owned = catalog.owned().len(),
            "applied extensions delta"
        );
    }

    /// Register an additional workspace folder and scan it alone for
    /// workspace-contains matches. Folders already known are not revisited.
    pub async fn add_workspace_folder(&self, folder: PathBuf) {
        self.inner.workspace_folders.lock().push(folder.clone());
        self.inner
            .gate
            .wait(StartupPhase::ReadyToRunExtensions)
            .await;
        self.inner.scanner.folders_added(vec![folder]).await;
    }

    /// Deactivate every activated extension, without a time bound.
    pub async fn deactivate_all(&self) {
        shutdown::deactivate_all(&self.inner.activator).await;
    }

    /// Orderly shutdown: deactivation raced against the configured grace
    /// period, then the exit code is handed back to the embedder. Extensions
    /// whose deactivate hook is still running when the grace elapses are
    /// abandoned, not killed.
    pub async fn terminate(&self, reason: &str, exit_code: i32) -> i32 {
        info!(reason, exit_code, "terminating extension host");
        shutdown::deactivate_all_with_grace(
            Arc::clone(&self.inner.activator),
            self.inner.config.shutdown_grace,
        )
        .await;
        exit_code
    }
}
