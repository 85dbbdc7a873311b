//! Port Forwarding (C13): local, remote, and SOCKS5 (dynamic) tunnels
//! layered on top of an [`crate::adapter::ssh::session::Session`].
//!
//! Grounded on `other_examples/0400b8da_pRizz-opencode-web-service__packages-core-src-host-tunnel.rs.rs`'s
//! `SshTunnel` for the open/wait-ready/close lifecycle shape (reimplemented
//! against `russh` channels rather than shelling out to the `ssh` binary,
//! since per-flow channel control needs to be programmatic here) and on
//! `navikt-autoforward`'s forwarding module for the accept-loop/dial-loop
//! shape that pipes each flow in both directions.

pub mod local;
pub mod remote;
pub mod socks;

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::adapter::ssh::session::Session;
use crate::error::ExecResult;

pub use local::LocalForward;
pub use remote::RemoteForward;
pub use socks::{SocksAuth, SocksForward};

/// Lifecycle state of one tunnel, per spec.md's per-tunnel state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TunnelState {
    /// Listener/request is being established.
    Opening = 0,
    /// Accepting and piping new flows.
    Open = 1,
    /// No longer accepting new flows; draining in-flight ones.
    Closing = 2,
    /// Fully torn down.
    Closed = 3,
}

impl TunnelState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Opening,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

#[derive(Default)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: TunnelState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn get(&self) -> TunnelState {
        TunnelState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub(crate) fn set(&self, state: TunnelState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// Re-dial strategy used when the underlying SSH session dies while a
/// tunnel is open. Disabled by default: a dead session simply closes every
/// tunnel built on it (fate-sharing, per spec.md §4.11).
#[derive(Clone)]
pub struct ReconnectPolicy {
    /// Whether to attempt re-dialing at all.
    pub enabled: bool,
    /// Maximum number of re-dial attempts before giving up and closing.
    pub max_attempts: u32,
    /// Delay between re-dial attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

/// A closure capable of producing a fresh, authenticated [`Session`] to the
/// same target a tunnel was originally opened against, used by
/// [`ReconnectPolicy`] when the original session dies mid-flight.
pub type Redial = Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ExecResult<Session>> + Send>> + Send + Sync>;

/// Shared session handle every tunnel flow dials through, swappable in
/// place when a [`ReconnectPolicy`] redial succeeds.
#[derive(Clone)]
pub(crate) struct SessionSlot {
    inner: Arc<RwLock<Arc<Session>>>,
}

impl SessionSlot {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(session))),
        }
    }

    pub(crate) async fn get(&self) -> Arc<Session> {
        self.inner.read().await.clone()
    }

    pub(crate) async fn is_alive(&self) -> bool {
        self.inner.read().await.is_alive()
    }

    pub(crate) async fn replace(&self, session: Session) {
        *self.inner.write().await = Arc::new(session);
    }
}

/// Attempt `policy.max_attempts` redials via `redial`, swapping the result
/// into `slot` on success. Returns whether the session is alive when this
/// returns (i.e. whether the caller should keep running).
pub(crate) async fn try_reconnect(
    slot: &SessionSlot,
    policy: &ReconnectPolicy,
    redial: &Option<Redial>,
) -> bool {
    if slot.is_alive().await {
        return true;
    }
    if !policy.enabled {
        return false;
    }
    let Some(redial) = redial else { return false };

    for attempt in 0..policy.max_attempts {
        tokio::time::sleep(policy.delay * attempt.max(1)).await;
        if let Ok(session) = redial().await {
            slot.replace(session).await;
            return true;
        }
    }
    false
}

/// A handle to a running tunnel: observe its state, or close it (which
/// fate-shares down to every in-flight flow it owns).
pub struct TunnelHandle {
    state: Arc<StateCell>,
    stop: tokio::sync::watch::Sender<bool>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TunnelHandle {
    pub(crate) fn new(
        state: Arc<StateCell>,
        stop: tokio::sync::watch::Sender<bool>,
        task: tokio::task::JoinHandle<()>,
    ) -> Self {
        Self {
            state,
            stop,
            task: Some(task),
        }
    }

    /// The tunnel's current lifecycle state.
    pub fn state(&self) -> TunnelState {
        self.state.get()
    }

    /// Request a graceful close: refuses new flows immediately, then waits
    /// for the background task to finish draining in-flight ones.
    pub async fn close(mut self) {
        self.state.set(TunnelState::Closing);
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.state.set(TunnelState::Closed);
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_round_trips_through_u8() {
        let cell = StateCell::new(TunnelState::Opening);
        assert_eq!(cell.get(), TunnelState::Opening);
        cell.set(TunnelState::Open);
        assert_eq!(cell.get(), TunnelState::Open);
        cell.set(TunnelState::Closing);
        assert_eq!(cell.get(), TunnelState::Closing);
        cell.set(TunnelState::Closed);
        assert_eq!(cell.get(), TunnelState::Closed);
    }

    #[test]
    fn reconnect_policy_defaults_to_disabled() {
        assert!(!ReconnectPolicy::default().enabled);
    }
}
