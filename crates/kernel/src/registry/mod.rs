//! Extension catalogs and incremental delta application.
//!
//! Two catalogs are tracked: the *global* catalog of every known extension
//! and the *owned* subset this kernel instance is responsible for
//! activating. Both live in one immutable [`ExtensionCatalog`] snapshot, so
//! installing a delta is a single `Arc` swap and no query can ever observe
//! the global catalog updated while the owned one is stale or vice versa.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::extension::{ExtensionDescriptor, ExtensionId, ExtensionsDelta};

/// Immutable snapshot of the global and owned catalogs.
///
/// Owned ⊆ global by identifier. The activation-event index covers owned
/// extensions only; event strings are matched textually.
#[derive(Debug, Default)]
pub struct ExtensionCatalog {
    global: Vec<Arc<ExtensionDescriptor>>,
    owned: Vec<Arc<ExtensionDescriptor>>,
    owned_ids: HashSet<ExtensionId>,
    by_id: HashMap<ExtensionId, Arc<ExtensionDescriptor>>,
    event_index: HashMap<String, Vec<ExtensionId>>,
}

impl ExtensionCatalog {
    /// Build a catalog from the full global list and the set of owned ids.
    ///
    /// Duplicate ids in `global` are collapsed, last occurrence wins. Owned
    /// ids without a matching global descriptor are dropped by the filter.
    pub fn new(
        global: Vec<ExtensionDescriptor>,
        owned_ids: impl IntoIterator<Item = ExtensionId>,
    ) -> Self {
        let mut deduped: Vec<Arc<ExtensionDescriptor>> = Vec::with_capacity(global.len());
        for descriptor in global {
            let descriptor = Arc::new(descriptor);
            match deduped.iter_mut().find(|d| d.id == descriptor.id) {
                Some(slot) => *slot = descriptor,
                None => deduped.push(descriptor),
            }
        }
        Self::from_parts(deduped, owned_ids.into_iter().collect())
    }

    fn from_parts(global: Vec<Arc<ExtensionDescriptor>>, owned_ids: HashSet<ExtensionId>) -> Self {
        let by_id: HashMap<ExtensionId, Arc<ExtensionDescriptor>> = global
            .iter()
            .map(|d| (d.id.clone(), Arc::clone(d)))
            .collect();

        let owned: Vec<Arc<ExtensionDescriptor>> = global
            .iter()
            .filter(|d| owned_ids.contains(&d.id))
            .cloned()
            .collect();

        // The owned set is exactly the filtered global set; ids that no
        // longer resolve must not linger in the membership set either.
        let owned_ids: HashSet<ExtensionId> = owned.iter().map(|d| d.id.clone()).collect();

        let mut event_index: HashMap<String, Vec<ExtensionId>> = HashMap::new();
        for descriptor in &owned {
            for event in &descriptor.activation_events {
                event_index
                    .entry(event.clone())
                    .or_default()
                    .push(descriptor.id.clone());
            }
        }

        Self {
            global,
            owned,
            owned_ids,
            by_id,
            event_index,
        }
    }

    /// Compute the catalog that results from applying `delta`.
    ///
    /// Pure: `self` is untouched. Removing an unknown id is a no-op because
    /// deltas may race with concurrently computed deltas. Adding an id that
    /// already exists replaces its descriptor wholesale.
    pub fn apply_delta(&self, delta: &ExtensionsDelta) -> Self {
        let removed: HashSet<&ExtensionId> = delta.to_remove.iter().collect();
        let mut global: Vec<Arc<ExtensionDescriptor>> = self
            .global
            .iter()
            .filter(|d| !removed.contains(&d.id))
            .cloned()
            .collect();

        for descriptor in &delta.to_add {
            let descriptor = Arc::new(descriptor.clone());
            match global.iter_mut().find(|d| d.id == descriptor.id) {
                Some(slot) => *slot = descriptor,
                None => global.push(descriptor),
            }
        }

        let mut owned_ids = self.owned_ids.clone();
        for id in &delta.my_to_remove {
            owned_ids.remove(id);
        }
        for id in &delta.my_to_add {
            owned_ids.insert(id.clone());
        }

        Self::from_parts(global, owned_ids)
    }

    pub fn global(&self) -> &[Arc<ExtensionDescriptor>] {
        &self.global
    }

    pub fn owned(&self) -> &[Arc<ExtensionDescriptor>] {
        &self.owned
    }

    /// Look up a descriptor in the global catalog.
    pub fn descriptor(&self, id: &ExtensionId) -> Option<&Arc<ExtensionDescriptor>> {
        self.by_id.get(id)
    }

    /// Look up a descriptor this kernel instance is responsible for.
    pub fn owned_descriptor(&self, id: &ExtensionId) -> Option<&Arc<ExtensionDescriptor>> {
        self.by_id.get(id).filter(|_| self.owned_ids.contains(id))
    }

    pub fn owns(&self, id: &ExtensionId) -> bool {
        self.owned_ids.contains(id)
    }

    /// Owned extensions declaring `event` verbatim.
    pub fn extensions_for_event(&self, event: &str) -> &[ExtensionId] {
        self.event_index.get(event).map_or(&[], Vec::as_slice)
    }
}

/// Shared handle to the current catalog snapshot.
pub struct ExtensionRegistry {
    // Written only by delta application; never held across an await.
    snapshot: RwLock<Arc<ExtensionCatalog>>,
}

impl ExtensionRegistry {
    pub fn new(catalog: ExtensionCatalog) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(catalog)),
        }
    }

    /// The current snapshot. Holders see a consistent global/owned pair for
    /// as long as they keep the `Arc`, regardless of later deltas.
    pub fn snapshot(&self) -> Arc<ExtensionCatalog> {
        Arc::clone(&self.snapshot.read())
    }

    /// Apply `delta` and install the result as one atomic swap.
    pub fn apply_delta(&self, delta: &ExtensionsDelta) -> Arc<ExtensionCatalog> {
        let mut slot = self.snapshot.write();
        let next = Arc::new(slot.apply_delta(delta));
        *slot = Arc::clone(&next);
        debug!(
            global = next.global.len(),
            owned = next.owned.len(),
            "installed extension catalog"
        );
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(id: &str, events: &[&str]) -> ExtensionDescriptor {
        ExtensionDescriptor {
            id: ExtensionId::new(id),
            activation_events: events.iter().map(|s| s.to_string()).collect(),
            entry_point: Some("main".into()),
            builtin: false,
            remote: false,
            dependencies: Vec::new(),
        }
    }

    fn catalog(ids: &[&str]) -> ExtensionCatalog {
        let global: Vec<_> = ids.iter().map(|id| descriptor(id, &[])).collect();
        let owned = ids.iter().map(|id| ExtensionId::new(*id));
        ExtensionCatalog::new(global, owned)
    }

    #[test]
    fn owned_is_filtered_from_global() {
        let global = vec![descriptor("a.ext", &[]), descriptor("b.ext", &[])];
        let catalog = ExtensionCatalog::new(global, [ExtensionId::new("A.EXT")]);

        assert_eq!(catalog.global().len(), 2);
        assert_eq!(catalog.owned().len(), 1);
        assert!(catalog.owns(&ExtensionId::new("a.ext")));
        assert!(!catalog.owns(&ExtensionId::new("b.ext")));
        assert!(catalog.descriptor(&ExtensionId::new("b.ext")).is_some());
        assert!(
            catalog
                .owned_descriptor(&ExtensionId::new("b.ext"))
                .is_none()
        );
    }

    #[test]
    fn delta_adds_and_removes_in_one_step() {
        let registry = ExtensionRegistry::new(catalog(&["a.ext", "b.ext"]));
        let before = registry.snapshot();

        let delta = ExtensionsDelta {
            to_add: vec![descriptor("c.ext", &["*"])],
            to_remove: vec![ExtensionId::new("b.ext")],
            my_to_add: vec![ExtensionId::new("c.ext")],
            my_to_remove: vec![ExtensionId::new("b.ext")],
        };
        let after = registry.apply_delta(&delta);

        // The pre-delta snapshot is untouched: an interleaved reader sees
        // either the old pair or the new pair, never a mix.
        assert!(before.owns(&ExtensionId::new("b.ext")));
        assert!(!before.owns(&ExtensionId::new("c.ext")));
        assert!(after.owns(&ExtensionId::new("c.ext")));
        assert!(!after.owns(&ExtensionId::new("b.ext")));
        assert!(after.descriptor(&ExtensionId::new("b.ext")).is_none());
        assert_eq!(
            after.extensions_for_event("*"),
            &[ExtensionId::new("c.ext")]
        );
    }

    #[test]
    fn removing_unknown_id_is_a_noop() {
        let registry = ExtensionRegistry::new(catalog(&["a.ext"]));
        let delta = ExtensionsDelta {
            to_remove: vec![ExtensionId::new("ghost.ext")],
            my_to_remove: vec![ExtensionId::new("ghost.ext")],
            ..Default::default()
        };
        let after = registry.apply_delta(&delta);
        assert_eq!(after.global().len(), 1);
        assert_eq!(after.owned().len(), 1);
    }

    #[test]
    fn re_adding_replaces_the_descriptor_wholesale() {
        let registry = ExtensionRegistry::new(catalog(&["a.ext"]));
        let delta = ExtensionsDelta {
            to_add: vec![descriptor("A.EXT", &["onCommand:x"])],
            ..Default::default()
        };
        let after = registry.apply_delta(&delta);
        assert_eq!(after.global().len(), 1);
        assert_eq!(
            after.extensions_for_event("onCommand:x"),
            &[ExtensionId::new("a.ext")]
        );
    }

    #[test]
    fn owned_ids_without_a_descriptor_are_dropped() {
        let catalog = ExtensionCatalog::new(
            vec![descriptor("a.ext", &[])],
            [ExtensionId::new("a.ext"), ExtensionId::new("gone.ext")],
        );
        assert!(!catalog.owns(&ExtensionId::new("gone.ext")));
        assert_eq!(catalog.owned().len(), 1);
    }

    #[test]
    fn event_index_only_covers_owned_extensions() {
        let global = vec![
            descriptor("a.ext", &["onCommand:x"]),
            descriptor("b.ext", &["onCommand:x"]),
        ];
        let catalog = ExtensionCatalog::new(global, [ExtensionId::new("a.ext")]);
        assert_eq!(
            catalog.extensions_for_event("onCommand:x"),
            &[ExtensionId::new("a.ext")]
        );
        assert!(catalog.extensions_for_event("onCommand:y").is_empty());
    }
}
