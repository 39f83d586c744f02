//! Best-effort, isolated, time-bounded deactivation.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::activation::{ActivatedExtension, ExtensionActivator};
use crate::error::KernelError;

/// Deactivate every currently activated extension.
///
/// The activated set is snapshotted once, then each extension is handled
/// concurrently: the optional deactivate hook runs first, the record's
/// disposables are released after. Every failure is logged and contained to
/// its extension; the whole set always completes, successes and failures
/// commingled.
pub async fn deactivate_all(activator: &ExtensionActivator) {
    let activated = activator.activated();
    info!(count = activated.len(), "deactivating extensions");
    join_all(activated.iter().map(|ext| deactivate_one(ext))).await;
}

async fn deactivate_one(ext: &ActivatedExtension) {
    if let Some(hook) = ext.deactivate_hook() {
        if let Err(err) = hook.deactivate().await {
            let err = KernelError::Deactivation {
                id: ext.id.clone(),
                details: format!("{err:#}"),
            };
            warn!(extension = %ext.id, error = %err, "deactivate hook failed");
        }
    }
    for failure in ext.release_subscriptions() {
        warn!(extension = %ext.id, error = %failure, "failed to release subscription");
    }
}

/// Race [`deactivate_all`] against the shutdown grace period.
///
/// On elapse the remaining work is abandoned, not cancelled: the spawned
/// deactivation task keeps running, it is simply no longer waited on.
pub async fn deactivate_all_with_grace(activator: Arc<ExtensionActivator>, grace: Duration) {
    let pending = tokio::spawn(async move { deactivate_all(&activator).await });
    match tokio::time::timeout(grace, pending).await {
        Ok(Ok(())) => info!("all extensions deactivated"),
        Ok(Err(err)) => warn!(error = %err, "deactivation task aborted"),
        Err(_) => warn!(
            grace_ms = grace.as_millis() as u64,
            "shutdown grace elapsed; abandoning remaining deactivations"
        ),
    }
}
