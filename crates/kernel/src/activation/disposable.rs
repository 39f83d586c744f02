//! Disposable resources registered by a module during activation.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

/// A resource released when its owning extension deactivates.
pub trait Disposable: Send {
    fn dispose(&mut self) -> anyhow::Result<()>;
}

struct FnDisposable(Option<Box<dyn FnOnce() + Send>>);

impl Disposable for FnDisposable {
    fn dispose(&mut self) -> anyhow::Result<()> {
        if let Some(f) = self.0.take() {
            f();
        }
        Ok(())
    }
}

/// The bag of disposables an extension registered while activating.
///
/// Owned by the extension's activation record; released exactly once at
/// deactivation. Clones share the same bag, so the handle given to the
/// module's activation context and the one kept on the record are the same
/// store.
#[derive(Clone)]
pub struct DisposableStore {
    inner: Arc<Mutex<Option<Vec<Box<dyn Disposable>>>>>,
}

impl DisposableStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(Vec::new()))),
        }
    }

    /// Register a disposable. Registrations after release are dropped.
    pub fn push(&self, disposable: Box<dyn Disposable>) {
        match &mut *self.inner.lock() {
            Some(items) => items.push(disposable),
            None => debug!("disposable registered after release; dropping"),
        }
    }

    /// Register a plain callback as a disposable.
    pub fn push_fn<F: FnOnce() + Send + 'static>(&self, f: F) {
        self.push(Box::new(FnDisposable(Some(Box::new(f)))));
    }

    pub fn len(&self) -> usize {
        self.inner.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_released(&self) -> bool {
        self.inner.lock().is_none()
    }

    /// Release every registered disposable, continuing past individual
    /// failures, and return the failures for the caller to log. A second
    /// release is a no-op.
    pub fn release_all(&self) -> Vec<anyhow::Error> {
        let Some(items) = self.inner.lock().take() else {
            return Vec::new();
        };
        let mut failures = Vec::new();
        for mut item in items {
            if let Err(err) = item.dispose() {
                failures.push(err);
            }
        }
        failures
    }
}

impl Default for DisposableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DisposableStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisposableStore")
            .field("len", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}
