//! At-most-once, dependency-ordered extension activation.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, join_all};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{
    ActivatedExtension, ActivationReason, ActivationRecord, ActivationTimes, DisposableStore,
};
use crate::error::{KernelError, KernelResult};
use crate::extension::{ExtensionDescriptor, ExtensionId};
use crate::host::{HostServices, LoadedModule, ModuleShape};
use crate::registry::{ExtensionCatalog, ExtensionRegistry};

/// Serializes and memoizes activation per extension identifier.
///
/// One record per owned extension, moving `NotActivated → Activating →
/// {Activated | Failed}` exactly once. Concurrent requests for the same
/// identifier join the single in-flight attempt and observe the same
/// outcome; failed attempts are never retried automatically.
pub struct ExtensionActivator {
    registry: Arc<ExtensionRegistry>,
    host: HostServices,
    records: DashMap<ExtensionId, ActivationRecord>,
}

/// What the claim step decided for this caller.
enum Claim {
    Join(watch::Receiver<bool>),
    Run(watch::Sender<bool>),
}

impl ExtensionActivator {
    pub fn new(registry: Arc<ExtensionRegistry>, host: HostServices) -> Self {
        Self {
            registry,
            host,
            records: DashMap::new(),
        }
    }

    pub fn is_activated(&self, id: &ExtensionId) -> bool {
        self.records
            .get(id)
            .is_some_and(|record| matches!(&*record, ActivationRecord::Activated(_)))
    }

    /// The activated record for `id`.
    ///
    /// Fails with [`KernelError::NotActivated`] for anything but an
    /// `Activated` record; check [`Self::is_activated`] first or treat the
    /// failure as "never activated".
    pub fn get_activated_extension(
        &self,
        id: &ExtensionId,
    ) -> KernelResult<Arc<ActivatedExtension>> {
        let activated = self.records.get(id).and_then(|record| match &*record {
            ActivationRecord::Activated(ext) => Some(Arc::clone(ext)),
            _ => None,
        });
        activated.ok_or_else(|| KernelError::NotActivated { id: id.clone() })
    }

    /// Snapshot of every currently activated extension.
    pub fn activated(&self) -> Vec<Arc<ActivatedExtension>> {
        self.records
            .iter()
            .filter_map(|record| match record.value() {
                ActivationRecord::Activated(ext) => Some(Arc::clone(ext)),
                _ => None,
            })
            .collect()
    }

    /// Activate `id`, or join the attempt already recorded for it.
    ///
    /// Fails with [`KernelError::UnknownExtension`] when `id` is not in the
    /// owned catalog; the public boundary ignores that case, dependency
    /// resolution converts it into a hard failure on the dependent.
    pub async fn activate_by_id(&self, id: &ExtensionId, reason: ActivationReason) -> KernelResult<()> {
        self.activate_boxed(id, reason).await
    }

    // Boxed so dependency activation can recurse through it.
    fn activate_boxed<'a>(
        &'a self,
        id: &'a ExtensionId,
        reason: ActivationReason,
    ) -> BoxFuture<'a, KernelResult<()>> {
        async move {
            loop {
                // An existing record wins over catalog resolution: an
                // extension removed by a later delta keeps its record.
                let pending = {
                    match self.records.get(id).as_deref() {
                        Some(ActivationRecord::Activated(_)) => return Ok(()),
                        Some(ActivationRecord::Failed(err)) => return Err(err.clone()),
                        Some(ActivationRecord::Activating(rx)) => Some(rx.clone()),
                        None => None,
                    }
                };
                if let Some(mut rx) = pending {
                    // The final record is installed before the flag flips;
                    // the next iteration reads the settled outcome.
                    if rx.wait_for(|done| *done).await.is_err() {
                        // The running attempt was dropped before settling.
                        // Mark the record so joiners read a failure instead
                        // of spinning on a dead channel.
                        self.settle_abandoned(id);
                    }
                    continue;
                }

                let catalog = self.registry.snapshot();
                let Some(descriptor) = catalog.owned_descriptor(id).cloned() else {
                    return Err(KernelError::UnknownExtension { id: id.clone() });
                };

                let claim = match self.records.entry(descriptor.id.clone()) {
                    Entry::Occupied(entry) => match entry.get() {
                        ActivationRecord::Activated(_) => return Ok(()),
                        ActivationRecord::Failed(err) => return Err(err.clone()),
                        ActivationRecord::Activating(rx) => Claim::Join(rx.clone()),
                    },
                    Entry::Vacant(slot) => {
                        let (tx, rx) = watch::channel(false);
                        slot.insert(ActivationRecord::Activating(rx));
                        Claim::Run(tx)
                    }
                };

                match claim {
                    Claim::Join(mut rx) => {
                        let _ = rx.wait_for(|done| *done).await;
                    }
                    Claim::Run(tx) => {
                        let outcome = self.run_activation(&catalog, &descriptor, reason).await;
                        let record = match &outcome {
                            Ok(ext) => ActivationRecord::Activated(Arc::clone(ext)),
                            Err(err) => {
                                warn!(extension = %descriptor.id, error = %err, "activation failed");
                                ActivationRecord::Failed(err.clone())
                            }
                        };
                        self.records.insert(descriptor.id.clone(), record);
                        tx.send_replace(true);
                        return outcome.map(|_| ());
                    }
                }
            }
        }
        .boxed()
    }

    /// Activate every owned extension declaring `event`, concurrently.
    ///
    /// Resolves once all attempts have settled. A failing extension never
    /// fails the others; failures stay on the individual records and callers
    /// that care must inspect them via [`Self::get_activated_extension`].
    pub async fn activate_by_event(&self, event: &str, startup: bool) {
        let catalog = self.registry.snapshot();
        let ids = catalog.extensions_for_event(event).to_vec();
        if ids.is_empty() {
            return;
        }
        debug!(event, count = ids.len(), "activating extensions by event");

        let attempts = ids.iter().map(|id| {
            let reason = if startup {
                ActivationReason::startup(event)
            } else {
                ActivationReason::on_demand(event)
            };
            async move {
                if let Err(err) = self.activate_by_id(id, reason).await {
                    debug!(extension = %id, error = %err, "activation attempt settled with failure");
                }
            }
        });
        join_all(attempts).await;
    }

    async fn run_activation(
        &self,
        catalog: &ExtensionCatalog,
        descriptor: &ExtensionDescriptor,
        reason: ActivationReason,
    ) -> KernelResult<Arc<ActivatedExtension>> {
        debug!(
            extension = %descriptor.id,
            event = %reason.activation_event,
            startup = reason.startup,
            "activating extension"
        );

        self.activate_dependencies(catalog, descriptor, &reason)
            .await?;

        let activated = if descriptor.remote {
            // Delegated to an external owner; only a stub lives here.
            self.host
                .remote
                .activate(&descriptor.id, &reason)
                .await
                .map_err(|err| self.activation_failed(descriptor, &err))?;
            ActivatedExtension::placeholder(descriptor.id.clone(), reason)
        } else if descriptor.entry_point.is_none() {
            // Empty extension: nothing to load, nothing to export.
            ActivatedExtension::placeholder(descriptor.id.clone(), reason)
        } else {
            self.load_and_activate(descriptor, reason).await?
        };

        info!(
            extension = %activated.id,
            event = %activated.reason.activation_event,
            startup = activated.reason.startup,
            code_loading_ms = activated.times.code_loading.as_millis() as u64,
            activate_ms = activated.times.activate_call.as_millis() as u64,
            "extension activated"
        );
        Ok(Arc::new(activated))
    }

    /// Activate declared dependencies before the module's own
    /// initialization.
    ///
    /// A dependency that is absent from the owned catalog, or that closes a
    /// cycle back to the dependent, fails the dependent with
    /// [`KernelError::MissingExtensionDependency`]; the dependency's own
    /// record is unaffected. A dependency that exists but fails to activate
    /// fails the dependent with the captured cause.
    async fn activate_dependencies(
        &self,
        catalog: &ExtensionCatalog,
        descriptor: &ExtensionDescriptor,
        reason: &ActivationReason,
    ) -> KernelResult<()> {
        if descriptor.dependencies.is_empty() {
            return Ok(());
        }

        // Pure graph validation, before any suspension point: every member
        // of a dependency cycle fails here without ever parking a waiter.
        for dep in &descriptor.dependencies {
            if catalog.owned_descriptor(dep).is_none() || reaches(catalog, dep, &descriptor.id) {
                return Err(KernelError::MissingExtensionDependency {
                    dependent: descriptor.id.clone(),
                    missing: dep.clone(),
                });
            }
        }

        for dep in &descriptor.dependencies {
            let dep_reason = reason.clone();
            if let Err(err) = self.activate_boxed(dep, dep_reason).await {
                return Err(match err {
                    // The catalog changed underneath us; same contract as a
                    // dependency that was never there.
                    KernelError::UnknownExtension { id } => {
                        KernelError::MissingExtensionDependency {
                            dependent: descriptor.id.clone(),
                            missing: id,
                        }
                    }
                    other => KernelError::ActivationFailed {
                        id: descriptor.id.clone(),
                        details: format!("dependency '{dep}' failed to activate: {other}"),
                    },
                });
            }
        }
        Ok(())
    }

    async fn load_and_activate(
        &self,
        descriptor: &ExtensionDescriptor,
        reason: ActivationReason,
    ) -> KernelResult<ActivatedExtension> {
        let started = Instant::now();
        let LoadedModule { shape, deactivate } = self
            .host
            .loader
            .load(descriptor)
            .await
            .map_err(|err| self.activation_failed(descriptor, &err))?;
        let code_loading = started.elapsed();

        let subscriptions = DisposableStore::new();
        let started = Instant::now();
        let context = match self
            .host
            .contexts
            .build(descriptor, subscriptions.clone())
            .await
        {
            Ok(context) => context,
            Err(err) => {
                self.release_failed(descriptor, &subscriptions);
                return Err(self.activation_failed(descriptor, &err));
            }
        };
        let context_build = started.elapsed();

        let started = Instant::now();
        let exports = match shape {
            ModuleShape::HasActivate(hook) => match hook.activate(context).await {
                Ok(exports) => exports,
                Err(err) => {
                    // Whatever the module registered before failing is
                    // released now; a failed record owns no resources.
                    self.release_failed(descriptor, &subscriptions);
                    return Err(self.activation_failed(descriptor, &err));
                }
            },
            ModuleShape::Bare(exports) => exports,
        };
        let activate_call = started.elapsed();

        Ok(ActivatedExtension {
            id: descriptor.id.clone(),
            exports,
            times: ActivationTimes {
                code_loading,
                context_build,
                activate_call,
            },
            reason,
            deactivate,
            subscriptions,
        })
    }

    fn settle_abandoned(&self, id: &ExtensionId) {
        if let Some(mut record) = self.records.get_mut(id) {
            if matches!(&*record, ActivationRecord::Activating(_)) {
                warn!(extension = %id, "activation attempt abandoned before settling");
                *record = ActivationRecord::Failed(KernelError::ActivationFailed {
                    id: id.clone(),
                    details: "activation attempt was abandoned".into(),
                });
            }
        }
    }

    fn activation_failed(&self, descriptor: &ExtensionDescriptor, err: &anyhow::Error) -> KernelError {
        KernelError::ActivationFailed {
            id: descriptor.id.clone(),
            details: format!("{err:#}"),
        }
    }

    fn release_failed(&self, descriptor: &ExtensionDescriptor, subscriptions: &DisposableStore) {
        for failure in subscriptions.release_all() {
            warn!(
                extension = %descriptor.id,
                error = %failure,
                "failed to release subscription of failed activation"
            );
        }
    }
}

/// Whether `target` is reachable from `from` along declared dependencies in
/// the owned catalog.
fn reaches(catalog: &ExtensionCatalog, from: &ExtensionId, target: &ExtensionId) -> bool {
    let mut stack = vec![from.clone()];
    let mut visited: HashSet<ExtensionId> = HashSet::new();
    while let Some(id) = stack.pop() {
        if &id == target {
            return true;
        }
        if !visited.insert(id.clone()) {
            continue;
        }
        if let Some(descriptor) = catalog.owned_descriptor(&id) {
            stack.extend(descriptor.dependencies.iter().cloned());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, deps: &[&str]) -> ExtensionDescriptor {
        ExtensionDescriptor {
            id: ExtensionId::new(id),
            activation_events: Vec::new(),
            entry_point: Some("main".into()),
            builtin: false,
            remote: false,
            dependencies: deps.iter().map(|d| ExtensionId::new(*d)).collect(),
        }
    }

    fn catalog(descriptors: Vec<ExtensionDescriptor>) -> ExtensionCatalog {
        let owned: Vec<ExtensionId> = descriptors.iter().map(|d| d.id.clone()).collect();
        ExtensionCatalog::new(descriptors, owned)
    }

    #[test]
    fn reaches_follows_transitive_dependencies() {
        let catalog = catalog(vec![
            descriptor("a", &["b"]),
            descriptor("b", &["c"]),
            descriptor("c", &[]),
        ]);
        assert!(reaches(&catalog, &"a".into(), &"c".into()));
        assert!(!reaches(&catalog, &"c".into(), &"a".into()));
    }

    #[test]
    fn reaches_detects_self_cycles() {
        let catalog = catalog(vec![descriptor("a", &["b"]), descriptor("b", &["a"])]);
        // b -> a closes the cycle back to a.
        assert!(reaches(&catalog, &"b".into(), &"a".into()));
    }

    #[test]
    fn reaches_terminates_on_cycles_not_involving_the_target() {
        let catalog = catalog(vec![
            descriptor("a", &["b"]),
            descriptor("b", &["a"]),
            descriptor("lone", &[]),
        ]);
        assert!(!reaches(&catalog, &"a".into(), &"lone".into()));
    }
}
