//! Client-side reconciliation.
//!
//! A [`Reconciler`] is one viewer's controller: it holds the working
//! annotation session and the last rendered tree, coalesces edits into
//! debounced saves, and polls for tree drift. It never sleeps on its own;
//! the caller drives it with [`Reconciler::tick`] and an injected [`Clock`].

mod debounce;
mod drift;
mod session;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::annotations::AnnotationState;
use crate::error::{SessionError, TransportError};
use crate::tree::TreeNode;

pub use debounce::Debouncer;
pub use drift::DriftMonitor;
pub use session::AnnotationSession;

/// The three calls a viewer makes against the sync surface.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    async fn get_state(&self) -> Result<AnnotationState, TransportError>;
    async fn put_state(&self, state: &AnnotationState) -> Result<(), TransportError>;
    async fn get_tree(&self) -> Result<TreeNode, TransportError>;
}

#[async_trait]
impl<T: SyncTransport + ?Sized> SyncTransport for Arc<T> {
    async fn get_state(&self) -> Result<AnnotationState, TransportError> {
        (**self).get_state().await
    }

    async fn put_state(&self, state: &AnnotationState) -> Result<(), TransportError> {
        (**self).put_state(state).await
    }

    async fn get_tree(&self) -> Result<TreeNode, TransportError> {
        (**self).get_tree().await
    }
}

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock advanced by hand, for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Quiet period before edits are saved (default: 300ms)
    pub debounce: Duration,
    /// Interval between drift polls (default: 30s)
    pub poll_interval: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
            poll_interval: Duration::from_secs(30),
        }
    }
}

/// What a [`Reconciler::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// A due save was sent (successfully or not)
    pub saved: bool,
    /// A drift poll was attempted
    pub polled: bool,
}

pub struct Reconciler<T, C> {
    transport: T,
    clock: C,
    session: AnnotationSession,
    tree: TreeNode,
    pending: Debouncer<AnnotationState>,
    drift: DriftMonitor,
    last_save_error: Option<TransportError>,
}

impl<T: SyncTransport, C: Clock> Reconciler<T, C> {
    /// Start from the snapshot embedded in the page.
    pub fn new(
        tree: TreeNode,
        state: AnnotationState,
        transport: T,
        clock: C,
        config: ReconcilerConfig,
    ) -> Self {
        let now = clock.now_ms();
        let drift = DriftMonitor::new(&tree, config.poll_interval, now);
        Self {
            transport,
            clock,
            session: AnnotationSession::new(state),
            tree,
            pending: Debouncer::new(config.debounce),
            drift,
            last_save_error: None,
        }
    }

    /// Replace the embedded state with the store's current value.
    ///
    /// On failure the embedded state stays in use.
    pub async fn cold_start(&mut self) -> Result<(), TransportError> {
        match self.transport.get_state().await {
            Ok(state) => {
                self.session.replace_state(state);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to load state, keeping the embedded snapshot: {}", e);
                Err(e)
            }
        }
    }

    pub fn session(&self) -> &AnnotationSession {
        &self.session
    }

    pub fn tree(&self) -> &TreeNode {
        &self.tree
    }

    /// Apply an edit. If it reports a change, the full state is scheduled
    /// for saving.
    pub fn mutate<F>(&mut self, edit: F) -> bool
    where
        F: FnOnce(&mut AnnotationSession) -> bool,
    {
        let changed = edit(&mut self.session);
        if changed {
            self.schedule_save();
        }
        changed
    }

    /// Like [`mutate`](Self::mutate) for edits that can be rejected.
    pub fn try_mutate<F>(&mut self, edit: F) -> Result<bool, SessionError>
    where
        F: FnOnce(&mut AnnotationSession) -> Result<bool, SessionError>,
    {
        let changed = edit(&mut self.session)?;
        if changed {
            self.schedule_save();
        }
        Ok(changed)
    }

    /// Edit view-only state; nothing is saved.
    pub fn view<F, R>(&mut self, edit: F) -> R
    where
        F: FnOnce(&mut AnnotationSession) -> R,
    {
        edit(&mut self.session)
    }

    fn schedule_save(&mut self) {
        let now = self.clock.now_ms();
        if self.pending.schedule(self.session.state().clone(), now) {
            debug!("Coalesced pending save");
        }
    }

    /// Run whatever is due: the pending save, then the drift poll.
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let now = self.clock.now_ms();

        if let Some(state) = self.pending.take_due(now) {
            self.send(state).await;
            report.saved = true;
        }

        if self.drift.poll_due(now) {
            report.polled = true;
            match self.transport.get_tree().await {
                Ok(fresh) => {
                    if self.drift.observe(&fresh, now) {
                        debug!("Tree changed on disk since last render");
                    }
                }
                Err(e) => {
                    debug!("Drift poll failed: {}", e);
                    self.drift.skip(now);
                }
            }
        }

        report
    }

    /// Send the pending save immediately. Returns whether one was pending.
    pub async fn flush_now(&mut self) -> bool {
        match self.pending.take_now() {
            Some(state) => {
                self.send(state).await;
                true
            }
            None => false,
        }
    }

    async fn send(&mut self, state: AnnotationState) {
        match self.transport.put_state(&state).await {
            Ok(()) => self.last_save_error = None,
            Err(e) => {
                // In-memory state is kept; the next edit saves it again.
                warn!("Failed to save state: {}", e);
                self.last_save_error = Some(e);
            }
        }
    }

    /// Fetch a fresh tree and render it, keeping annotations.
    pub async fn refresh(&mut self) -> Result<(), TransportError> {
        let tree = self.transport.get_tree().await.map_err(|e| {
            warn!("Tree refresh failed: {}", e);
            e
        })?;
        let now = self.clock.now_ms();
        self.drift.reset(&tree, now);
        self.session.retain_selection(&tree);
        self.tree = tree;
        Ok(())
    }

    pub fn is_stale(&self) -> bool {
        self.drift.is_stale()
    }

    pub fn has_pending_save(&self) -> bool {
        self.pending.is_pending()
    }

    pub fn last_save_error(&self) -> Option<&TransportError> {
        self.last_save_error.as_ref()
    }

    /// Earliest time at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline_ms(&self) -> u64 {
        let poll = self.drift.next_poll_ms();
        self.pending.deadline().map_or(poll, |d| d.min(poll))
    }
}
