//! Resource bring-up.
//!
//! A driver becomes visible to the host only after its resource has
//! answered a version query:
//!
//! ```text
//! Probing ──► Reachable(version) ──► Registering ──► Registered
//!    │
//!    └──────► Unreachable (terminal)
//! ```
//!
//! Registration is posted through [`HostCore::run_once_on_next_turn`]
//! and never called from the verification task itself. Removing the
//! driver before the posted job runs suppresses registration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::client::{IsiClient, IsiVersion, Reachability};
use crate::host::{Feature, HostCore};

/// Bring-up progress of one driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpState {
    Probing,
    Reachable(IsiVersion),
    Registering,
    Registered,
    Unreachable,
}

impl BringUpState {
    /// Whether no further transition will happen.
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, BringUpState::Registered | BringUpState::Unreachable)
    }
}

/// Handle on a running bring-up.
pub struct BringUp {
    feature: Feature,
    state: watch::Receiver<BringUpState>,
    version: Arc<OnceLock<IsiVersion>>,
    removed: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl BringUp {
    /// Start verifying `client`'s resource and register `feature` with
    /// `host` once it proves reachable.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(client: Arc<IsiClient>, feature: Feature, host: Arc<dyn HostCore>) -> Self {
        let (tx, rx) = watch::channel(BringUpState::Probing);
        let tx = Arc::new(tx);
        let version = Arc::new(OnceLock::new());
        let removed = Arc::new(AtomicBool::new(false));

        let task = tokio::spawn({
            let version = version.clone();
            let removed = removed.clone();
            async move {
                match client.verify().await {
                    Reachability::Reachable(v) => {
                        tracing::debug!(
                            "Resource 0x{:02X}, with version {} reachable",
                            client.resource(),
                            v
                        );
                        let _ = version.set(v);
                        tx.send_replace(BringUpState::Reachable(v));

                        if removed.load(Ordering::Acquire) {
                            return;
                        }
                        tx.send_replace(BringUpState::Registering);

                        let job_host = host.clone();
                        host.run_once_on_next_turn(Box::new(move || {
                            if removed.load(Ordering::Acquire) {
                                tracing::debug!("{} driver removed before registration", feature);
                                return;
                            }
                            job_host.register(feature);
                            tx.send_replace(BringUpState::Registered);
                        }));
                    }
                    Reachability::Unreachable => {
                        tracing::debug!("Unable to bootstrap {} driver", feature);
                        tx.send_replace(BringUpState::Unreachable);
                    }
                }
            }
        });

        Self {
            feature,
            state: rx,
            version,
            removed,
            task,
        }
    }

    #[inline]
    pub fn feature(&self) -> Feature {
        self.feature
    }

    /// Current state.
    pub fn state(&self) -> BringUpState {
        *self.state.borrow()
    }

    /// Version reported by the resource, once known.
    pub fn version(&self) -> Option<IsiVersion> {
        self.version.get().copied()
    }

    /// Wait until registered or unreachable.
    ///
    /// If the bring-up is abandoned (removed) first, returns the last
    /// state it reached.
    pub async fn settled(&self) -> BringUpState {
        let mut state = self.state.clone();
        let settled = state.wait_for(BringUpState::is_settled).await.map(|s| *s);
        settled.unwrap_or_else(|_| *state.borrow())
    }

    /// Stop the bring-up; a registration not yet run is skipped.
    pub fn remove(&self) {
        self.removed.store(true, Ordering::Release);
        if !self.state().is_settled() && self.version().is_none() {
            self.task.abort();
        }
    }

    /// Whether [`remove`](Self::remove) was called.
    #[inline]
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl Drop for BringUp {
    fn drop(&mut self) {
        self.remove();
    }
}
