//! One-shot synchronization latches and the startup phase chain.
//!
//! A [`Latch`] opens exactly once and stays open forever; any number of
//! waiters may block on it. The [`PhaseGate`] strings four latches into the
//! kernel's life-cycle state machine: later phases never open before
//! earlier ones.

use std::fmt;

use tokio::sync::watch;

/// A one-shot, monotonic, multi-waiter latch.
pub struct Latch {
    tx: watch::Sender<bool>,
}

impl Latch {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Open the latch. Re-opening an already-open latch is a no-op.
    pub fn open(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_open(&self) -> bool {
        *self.tx.borrow()
    }

    /// Suspend until the latch is open; returns immediately if it already is.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` cannot observe a closed
        // channel while this borrow is alive.
        let _ = rx.wait_for(|open| *open).await;
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch").field("open", &self.is_open()).finish()
    }
}

/// The kernel's ordered startup phases, each backed by one latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StartupPhase {
    /// Pre-activation setup has completed.
    AlmostReadyToRunExtensions,
    /// Workspace/context initialization has been signalled.
    ReadyToStartHost,
    /// Activation requests may now be serviced.
    ReadyToRunExtensions,
    /// The eager startup activation pass has settled; steady state.
    EagerExtensionsActivated,
}

impl StartupPhase {
    const ALL: [StartupPhase; 4] = [
        StartupPhase::AlmostReadyToRunExtensions,
        StartupPhase::ReadyToStartHost,
        StartupPhase::ReadyToRunExtensions,
        StartupPhase::EagerExtensionsActivated,
    ];

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|p| *p == self)
            .unwrap_or_default()
    }
}

impl fmt::Display for StartupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartupPhase::AlmostReadyToRunExtensions => write!(f, "almost_ready_to_run_extensions"),
            StartupPhase::ReadyToStartHost => write!(f, "ready_to_start_host"),
            StartupPhase::ReadyToRunExtensions => write!(f, "ready_to_run_extensions"),
            StartupPhase::EagerExtensionsActivated => write!(f, "eager_extensions_activated"),
        }
    }
}

/// The chain of startup latches.
pub struct PhaseGate {
    latches: [Latch; 4],
}

impl PhaseGate {
    pub fn new() -> Self {
        Self {
            latches: [Latch::new(), Latch::new(), Latch::new(), Latch::new()],
        }
    }

    /// Open `phase` and every earlier phase.
    ///
    /// Opening earlier phases alongside keeps the chain monotonic even if a
    /// caller skips ahead; each individual open is idempotent.
    pub fn open(&self, phase: StartupPhase) {
        for p in StartupPhase::ALL.iter().take(phase.index() + 1) {
            if !self.latches[p.index()].is_open() {
                tracing::debug!(phase = %p, "startup phase reached");
                self.latches[p.index()].open();
            }
        }
    }

    pub fn is_open(&self, phase: StartupPhase) -> bool {
        self.latches[phase.index()].is_open()
    }

    /// Suspend until `phase` has been reached.
    pub async fn wait(&self, phase: StartupPhase) {
        self.latches[phase.index()].wait().await;
    }

    /// The latest phase reached so far, if any.
    pub fn current(&self) -> Option<StartupPhase> {
        StartupPhase::ALL
            .iter()
            .rev()
            .find(|p| self.is_open(**p))
            .copied()
    }
}

impl Default for PhaseGate {
    fn default() -> Self {
        Self::new()
    }
}
