//! Contracts consumed from the embedding host.
//!
//! The kernel orders, gates, and memoizes activation; actually loading
//! module code, building activation contexts, probing workspace content,
//! and reaching externally owned hosts are the embedder's business. These
//! traits specify that boundary. Implementations may suspend freely; the
//! kernel treats every call as a suspension point.

use std::any::Any;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::activation::{ActivationReason, DisposableStore};
use crate::extension::{ExtensionDescriptor, ExtensionId};

/// Opaque API surface an extension exports after activation.
pub type ExtensionExports = Arc<dyn Any + Send + Sync>;

/// Context handed to a module's activate hook.
pub struct ActivationContext {
    /// Disposables the module registers during activation. The same store is
    /// kept on the activation record and released at deactivation.
    pub subscriptions: DisposableStore,

    /// Host-defined payload (storage, secrets, environment variables, ...).
    pub payload: Option<Arc<dyn Any + Send + Sync>>,
}

/// The activate half of a module's entry point.
#[async_trait]
pub trait ActivateHook: Send + Sync {
    async fn activate(&self, context: ActivationContext)
    -> anyhow::Result<Option<ExtensionExports>>;
}

/// The optional shutdown hook of a loaded module.
#[async_trait]
pub trait DeactivateHook: Send + Sync {
    async fn deactivate(&self) -> anyhow::Result<()>;
}

/// Shape of a loaded module, resolved once at load time rather than
/// re-checked per call.
pub enum ModuleShape {
    /// The module exposes an activate hook; whatever it returns is the
    /// export surface.
    HasActivate(Box<dyn ActivateHook>),

    /// No activate hook: the loaded value itself is the export surface.
    Bare(Option<ExtensionExports>),
}

/// A module returned by the loader.
pub struct LoadedModule {
    pub shape: ModuleShape,

    /// Optional shutdown hook. Absence is not an error.
    pub deactivate: Option<Arc<dyn DeactivateHook>>,
}

/// Loads the module behind a descriptor's entry point.
#[async_trait]
pub trait ModuleLoader: Send + Sync {
    async fn load(&self, descriptor: &ExtensionDescriptor) -> anyhow::Result<LoadedModule>;
}

/// Builds the activation context for a descriptor.
///
/// Construction may await external readiness signals (persisted state being
/// loaded, ...) and completes before the module's activate hook is invoked.
#[async_trait]
pub trait ContextBuilder: Send + Sync {
    async fn build(
        &self,
        descriptor: &ExtensionDescriptor,
        subscriptions: DisposableStore,
    ) -> anyhow::Result<ActivationContext>;
}

/// Answers workspace-content existence checks for eager activation.
#[async_trait]
pub trait ResourceProbe: Send + Sync {
    /// Whether `folder` contains something matching `pattern`.
    async fn exists(&self, folder: &Path, pattern: &str) -> bool;
}

/// Performs activation for extensions owned by an external host.
#[async_trait]
pub trait RemoteActivator: Send + Sync {
    async fn activate(&self, id: &ExtensionId, reason: &ActivationReason) -> anyhow::Result<()>;
}

/// Hooks driven during kernel startup. Failures here are fatal.
#[async_trait]
pub trait BootHooks: Send + Sync {
    /// Pre-activation setup, before any phase opens.
    async fn prepare(&self) -> anyhow::Result<()>;

    /// Resolves once workspace/context initialization has finished.
    async fn workspace_ready(&self) -> anyhow::Result<()>;
}

/// The full set of collaborators the kernel is constructed with.
///
/// Handed in explicitly at construction; the kernel holds no ambient or
/// static access to any of them.
#[derive(Clone)]
pub struct HostServices {
    pub loader: Arc<dyn ModuleLoader>,
    pub contexts: Arc<dyn ContextBuilder>,
    pub probe: Arc<dyn ResourceProbe>,
    pub remote: Arc<dyn RemoteActivator>,
    pub boot: Arc<dyn BootHooks>,
}
