//! Innesto test utilities.
//!
//! Scripted collaborator implementations and descriptor fixtures for
//! exercising the kernel without real modules: a module loader driven by
//! per-extension scripts, a static workspace probe with a query log, a
//! recording remote activator, and no-op boot hooks.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use innesto_kernel::activation::{ActivationReason, DisposableStore};
use innesto_kernel::extension::{ExtensionDescriptor, ExtensionId};
use innesto_kernel::host::{
    ActivateHook, ActivationContext, BootHooks, ContextBuilder, DeactivateHook, ExtensionExports,
    HostServices, LoadedModule, ModuleLoader, ModuleShape, RemoteActivator, ResourceProbe,
};
use innesto_kernel::registry::ExtensionCatalog;

/// Start building a descriptor fixture.
pub fn descriptor(id: &str) -> DescriptorBuilder {
    DescriptorBuilder {
        inner: ExtensionDescriptor {
            id: ExtensionId::new(id),
            activation_events: Vec::new(),
            entry_point: Some("main".to_string()),
            builtin: false,
            remote: false,
            dependencies: Vec::new(),
        },
    }
}

/// Builder for descriptor fixtures.
#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    inner: ExtensionDescriptor,
}

impl DescriptorBuilder {
    /// Declare an activation event.
    pub fn event(mut self, event: &str) -> Self {
        self.inner.activation_events.push(event.to_string());
        self
    }

    /// Declare a dependency.
    pub fn depends_on(mut self, id: &str) -> Self {
        self.inner.dependencies.push(ExtensionId::new(id));
        self
    }

    /// Drop the entry point, making this an empty extension.
    pub fn empty(mut self) -> Self {
        self.inner.entry_point = None;
        self
    }

    /// Mark as host-delegated.
    pub fn remote(mut self) -> Self {
        self.inner.remote = true;
        self
    }

    /// Mark as builtin.
    pub fn builtin(mut self) -> Self {
        self.inner.builtin = true;
        self
    }

    pub fn build(self) -> ExtensionDescriptor {
        self.inner
    }
}

/// Catalog fixture where every descriptor is owned by this kernel instance.
pub fn owned_catalog(descriptors: Vec<ExtensionDescriptor>) -> ExtensionCatalog {
    let owned: Vec<ExtensionId> = descriptors.iter().map(|d| d.id.clone()).collect();
    ExtensionCatalog::new(descriptors, owned)
}

#[derive(Debug, Clone, Default)]
enum ActivateScript {
    /// Resolve with the given exports.
    #[default]
    Succeed,
    SucceedWith(JsonValue),
    Fail(String),
    /// Never resolve.
    Hang,
    /// No activate hook; the loaded value is the export surface.
    Bare(Option<JsonValue>),
}

/// Behavior of a scripted deactivate hook.
#[derive(Debug, Clone)]
pub enum DeactivateScript {
    Succeed,
    Fail(String),
    /// Never resolve.
    Hang,
}

/// Per-extension behavior of the scripted loader.
///
/// Extensions without a script load and activate successfully with no
/// exports and no deactivate hook.
#[derive(Debug, Clone, Default)]
pub struct ModuleScript {
    load_error: Option<String>,
    activate: ActivateScript,
    activate_delay: Duration,
    deactivate: Option<DeactivateScript>,
    disposal_flags: Vec<Arc<AtomicBool>>,
}

impl ModuleScript {
    /// Activate successfully with no exports.
    pub fn ok() -> Self {
        Self::default()
    }

    /// Activate successfully, exporting `value`.
    pub fn with_exports(value: JsonValue) -> Self {
        Self {
            activate: ActivateScript::SucceedWith(value),
            ..Self::default()
        }
    }

    /// Module without an activate hook; `value` is the export surface.
    pub fn bare(value: Option<JsonValue>) -> Self {
        Self {
            activate: ActivateScript::Bare(value),
            ..Self::default()
        }
    }

    /// The activate hook fails with `message`.
    pub fn failing(message: &str) -> Self {
        Self {
            activate: ActivateScript::Fail(message.to_string()),
            ..Self::default()
        }
    }

    /// The activate hook never resolves.
    pub fn hanging() -> Self {
        Self {
            activate: ActivateScript::Hang,
            ..Self::default()
        }
    }

    /// Loading the module itself fails.
    pub fn load_failing(message: &str) -> Self {
        Self {
            load_error: Some(message.to_string()),
            ..Self::default()
        }
    }

    /// Suspend the activate hook for `delay` before resolving.
    pub fn activate_delay(mut self, delay: Duration) -> Self {
        self.activate_delay = delay;
        self
    }

    /// Attach a deactivate hook with the given behavior.
    pub fn deactivate(mut self, script: DeactivateScript) -> Self {
        self.deactivate = Some(script);
        self
    }

    /// Register a disposable during activation that sets `flag` on release.
    pub fn disposal_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.disposal_flags.push(flag);
        self
    }
}

/// Module loader driven by per-extension [`ModuleScript`]s.
///
/// Records every activate and deactivate hook invocation, in order, so
/// tests can assert at-most-once execution and dependency ordering.
#[derive(Default)]
pub struct ScriptedLoader {
    scripts: Mutex<HashMap<ExtensionId, ModuleScript>>,
    activate_log: Arc<Mutex<Vec<ExtensionId>>>,
    deactivate_log: Arc<Mutex<Vec<ExtensionId>>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script for `id`.
    pub fn script(&self, id: &str, script: ModuleScript) {
        self.scripts.lock().insert(ExtensionId::new(id), script);
    }

    /// How many times the activate hook of `id` actually ran.
    pub fn activate_calls(&self, id: &str) -> usize {
        let id = ExtensionId::new(id);
        self.activate_log.lock().iter().filter(|x| **x == id).count()
    }

    /// Activate hook invocations in execution order.
    pub fn activation_order(&self) -> Vec<ExtensionId> {
        self.activate_log.lock().clone()
    }

    /// How many times the deactivate hook of `id` ran.
    pub fn deactivate_calls(&self, id: &str) -> usize {
        let id = ExtensionId::new(id);
        self.deactivate_log
            .lock()
            .iter()
            .filter(|x| **x == id)
            .count()
    }
}

#[async_trait]
impl ModuleLoader for ScriptedLoader {
    async fn load(&self, descriptor: &ExtensionDescriptor) -> anyhow::Result<LoadedModule> {
        let script = self
            .scripts
            .lock()
            .get(&descriptor.id)
            .cloned()
            .unwrap_or_default();

        if let Some(message) = &script.load_error {
            bail!("{message}");
        }

        let deactivate: Option<Arc<dyn DeactivateHook>> =
            script.deactivate.clone().map(|behavior| {
                Arc::new(ScriptedDeactivate {
                    id: descriptor.id.clone(),
                    behavior,
                    log: Arc::clone(&self.deactivate_log),
                }) as Arc<dyn DeactivateHook>
            });

        let shape = match &script.activate {
            ActivateScript::Bare(value) => {
                ModuleShape::Bare(value.clone().map(json_exports))
            }
            _ => ModuleShape::HasActivate(Box::new(ScriptedActivate {
                id: descriptor.id.clone(),
                script,
                log: Arc::clone(&self.activate_log),
            })),
        };

        Ok(LoadedModule { shape, deactivate })
    }
}

struct ScriptedActivate {
    id: ExtensionId,
    script: ModuleScript,
    log: Arc<Mutex<Vec<ExtensionId>>>,
}

#[async_trait]
impl ActivateHook for ScriptedActivate {
    async fn activate(
        &self,
        context: ActivationContext,
    ) -> anyhow::Result<Option<ExtensionExports>> {
        self.log.lock().push(self.id.clone());

        if self.script.activate_delay > Duration::ZERO {
            tokio::time::sleep(self.script.activate_delay).await;
        }

        for flag in &self.script.disposal_flags {
            let flag = Arc::clone(flag);
            context
                .subscriptions
                .push_fn(move || flag.store(true, Ordering::SeqCst));
        }

        match &self.script.activate {
            ActivateScript::Succeed => Ok(None),
            ActivateScript::SucceedWith(value) => Ok(Some(json_exports(value.clone()))),
            ActivateScript::Fail(message) => bail!("{message}"),
            ActivateScript::Hang => {
                std::future::pending::<()>().await;
                Ok(None)
            }
            ActivateScript::Bare(value) => Ok(value.clone().map(json_exports)),
        }
    }
}

struct ScriptedDeactivate {
    id: ExtensionId,
    behavior: DeactivateScript,
    log: Arc<Mutex<Vec<ExtensionId>>>,
}

#[async_trait]
impl DeactivateHook for ScriptedDeactivate {
    async fn deactivate(&self) -> anyhow::Result<()> {
        self.log.lock().push(self.id.clone());
        match &self.behavior {
            DeactivateScript::Succeed => Ok(()),
            DeactivateScript::Fail(message) => bail!("{message}"),
            DeactivateScript::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

fn json_exports(value: JsonValue) -> ExtensionExports {
    Arc::new(value)
}

/// Context builder that hands out a plain context with no payload.
pub struct PlainContexts;

#[async_trait]
impl ContextBuilder for PlainContexts {
    async fn build(
        &self,
        _descriptor: &ExtensionDescriptor,
        subscriptions: DisposableStore,
    ) -> anyhow::Result<ActivationContext> {
        Ok(ActivationContext {
            subscriptions,
            payload: None,
        })
    }
}

/// Workspace probe answering from a fixed match set, with a query log.
#[derive(Default)]
pub struct StaticProbe {
    matches: HashSet<(PathBuf, String)>,
    queries: Mutex<Vec<(PathBuf, String)>>,
    hang: bool,
}

impl StaticProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// A probe that records the query and then never resolves.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::default()
        }
    }

    /// Report `pattern` as present under `folder`.
    pub fn matching(mut self, folder: impl Into<PathBuf>, pattern: &str) -> Self {
        self.matches.insert((folder.into(), pattern.to_string()));
        self
    }

    /// Every existence check issued so far, in order.
    pub fn queries(&self) -> Vec<(PathBuf, String)> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl ResourceProbe for StaticProbe {
    async fn exists(&self, folder: &Path, pattern: &str) -> bool {
        self.queries
            .lock()
            .push((folder.to_path_buf(), pattern.to_string()));
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.matches
            .contains(&(folder.to_path_buf(), pattern.to_string()))
    }
}

/// Remote activator that records calls and fails for a configured id set.
#[derive(Default)]
pub struct ScriptedRemote {
    failing: HashSet<ExtensionId>,
    calls: Mutex<Vec<ExtensionId>>,
}

impl ScriptedRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delegated activation of `id` will fail.
    pub fn failing_for(mut self, id: &str) -> Self {
        self.failing.insert(ExtensionId::new(id));
        self
    }

    /// Ids delegated so far, in order.
    pub fn calls(&self) -> Vec<ExtensionId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RemoteActivator for ScriptedRemote {
    async fn activate(&self, id: &ExtensionId, _reason: &ActivationReason) -> anyhow::Result<()> {
        self.calls.lock().push(id.clone());
        if self.failing.contains(id) {
            bail!("delegated activation of '{id}' failed");
        }
        Ok(())
    }
}

/// Boot hooks that succeed immediately.
pub struct NoopBoot;

#[async_trait]
impl BootHooks for NoopBoot {
    async fn prepare(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn workspace_ready(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Assemble host services from scripted parts.
pub fn host_services(
    loader: Arc<ScriptedLoader>,
    probe: Arc<StaticProbe>,
    remote: Arc<ScriptedRemote>,
) -> HostServices {
    HostServices {
        loader,
        contexts: Arc::new(PlainContexts),
        probe,
        remote,
        boot: Arc::new(NoopBoot),
    }
}

/// Host services with default probe and remote activator.
pub fn host_with_loader(loader: Arc<ScriptedLoader>) -> HostServices {
    host_services(
        loader,
        Arc::new(StaticProbe::new()),
        Arc::new(ScriptedRemote::new()),
    )
}
