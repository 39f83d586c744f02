//! Per-extension activation state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::DisposableStore;
use crate::error::KernelError;
use crate::extension::ExtensionId;
use crate::host::{DeactivateHook, ExtensionExports};

/// The event/startup pair that caused an activation attempt.
#[derive(Debug, Clone)]
pub struct ActivationReason {
    /// True when the attempt came from the startup-time eager pass.
    pub startup: bool,

    /// The concrete activation event, e.g. `onCommand:x` or `*`.
    pub activation_event: String,
}

impl ActivationReason {
    pub fn startup(event: impl Into<String>) -> Self {
        Self {
            startup: true,
            activation_event: event.into(),
        }
    }

    pub fn on_demand(event: impl Into<String>) -> Self {
        Self {
            startup: false,
            activation_event: event.into(),
        }
    }
}

/// Wall-clock timings of a completed activation.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActivationTimes {
    /// Loading the module behind the entry point.
    pub code_loading: Duration,

    /// Building the activation context.
    pub context_build: Duration,

    /// Running the module's activate hook until it resolved.
    pub activate_call: Duration,
}

/// A successfully activated extension.
pub struct ActivatedExtension {
    pub id: ExtensionId,

    /// Opaque export surface. `None` for API-less modules and for
    /// placeholder records (empty or host-delegated extensions).
    pub exports: Option<ExtensionExports>,

    pub times: ActivationTimes,
    pub reason: ActivationReason,

    pub(crate) deactivate: Option<Arc<dyn DeactivateHook>>,
    pub(crate) subscriptions: DisposableStore,
}

impl ActivatedExtension {
    /// Record for an extension that ran no local module code: no exports,
    /// no disposables, no deactivate hook.
    pub(crate) fn placeholder(id: ExtensionId, reason: ActivationReason) -> Self {
        Self {
            id,
            exports: None,
            times: ActivationTimes::default(),
            reason,
            deactivate: None,
            subscriptions: DisposableStore::new(),
        }
    }

    /// Number of disposables the module registered during activation.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub(crate) fn deactivate_hook(&self) -> Option<&Arc<dyn DeactivateHook>> {
        self.deactivate.as_ref()
    }

    /// Release the record's disposables; ownership of the bag ends here.
    pub(crate) fn release_subscriptions(&self) -> Vec<anyhow::Error> {
        self.subscriptions.release_all()
    }
}

impl fmt::Debug for ActivatedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivatedExtension")
            .field("id", &self.id)
            .field("has_exports", &self.exports.is_some())
            .field("times", &self.times)
            .field("reason", &self.reason)
            .field("subscriptions", &self.subscriptions)
            .finish()
    }
}

/// Lifecycle state of one owned extension.
///
/// No entry in the record map means `NotActivated`. The transition
/// `Activating → Activated | Failed` installs the final record before the
/// watch flag flips, so a joiner woken by the flag always reads a settled
/// outcome.
pub(crate) enum ActivationRecord {
    /// An attempt is in flight; joiners wait on the channel and re-read.
    Activating(watch::Receiver<bool>),
    Activated(Arc<ActivatedExtension>),
    Failed(KernelError),
}
