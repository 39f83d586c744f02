//! Innesto extension host kernel.
//!
//! Decides when independently authored extensions may load, in what order
//! dependents activate relative to each other, how activation failures are
//! isolated, and how an orderly, time-bounded shutdown is performed.
//! Loading module code, building activation contexts, and probing workspace
//! content are collaborator contracts (see [`host`]); everything the kernel
//! owns is driven through [`service::ExtensionService`].

pub mod activation;
pub mod barrier;
pub mod config;
pub mod error;
pub mod extension;
pub mod host;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod shutdown;

pub use activation::{
    ActivatedExtension, ActivationReason, ActivationTimes, Disposable, DisposableStore,
    ExtensionActivator,
};
pub use barrier::{Latch, PhaseGate, StartupPhase};
pub use config::Config;
pub use error::{KernelError, KernelResult};
pub use extension::{ExtensionDescriptor, ExtensionId, ExtensionsDelta};
pub use host::HostServices;
pub use registry::{ExtensionCatalog, ExtensionRegistry};
pub use service::ExtensionService;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing for embedders and tests.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
