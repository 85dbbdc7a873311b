//! Local port forwarding: accept TCP connections on this machine and pipe
//! each one through the SSH session to a `host:port` on the remote side
//! (the moral equivalent of `ssh -L`).
//!
//! Grounded on `navikt-autoforward`'s forwarding loop (accept, dial,
//! bidirectional copy, repeat) and `pRizz-opencode-web-service`'s
//! `SshTunnel` for the handle/close shape.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;

use super::{try_reconnect, ReconnectPolicy, Redial, SessionSlot, StateCell, TunnelHandle, TunnelState};
use crate::adapter::ssh::session::Session;
use crate::error::{ExecError, ExecResult};

/// A running local (`-L`-style) forward: `bind_addr` on this host pipes to
/// `remote_host:remote_port` as seen from the far end of the SSH session.
pub struct LocalForward;

impl LocalForward {
    /// Start listening on `bind_addr` and forwarding each accepted
    /// connection to `remote_host:remote_port` through `session`.
    ///
    /// Returns once the listener is bound, alongside the address it bound
    /// to (useful when `bind_addr` asks for an ephemeral port via `:0`);
    /// the accept loop runs in the background until [`TunnelHandle::close`]
    /// is called or drops.
    pub async fn open(
        session: Session,
        bind_addr: &str,
        remote_host: String,
        remote_port: u16,
        reconnect: ReconnectPolicy,
        redial: Option<Redial>,
    ) -> ExecResult<(TunnelHandle, SocketAddr)> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ExecError::connection(bind_addr.to_string(), e.to_string()))?;
        let bound_addr = listener
            .local_addr()
            .map_err(|e| ExecError::connection(bind_addr.to_string(), e.to_string()))?;

        let state = Arc::new(StateCell::new(TunnelState::Opening));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let slot = SessionSlot::new(session);

        state.set(TunnelState::Open);
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    accepted = listener.accept() => {
                        let Ok((stream, _peer)) = accepted else { continue };
                        if !try_reconnect(&slot, &reconnect, &redial).await {
                            break;
                        }
                        let session = slot.get().await;
                        let remote_host = remote_host.clone();
                        tokio::spawn(pipe_one(session, stream, remote_host, remote_port));
                    }
                }
            }
            task_state.set(TunnelState::Closing);
        });

        Ok((TunnelHandle::new(state, stop_tx, task), bound_addr))
    }
}

async fn pipe_one(
    session: Arc<Session>,
    mut client: tokio::net::TcpStream,
    remote_host: String,
    remote_port: u16,
) {
    let channel = match session
        .open_direct_tcpip(&remote_host, remote_port, "127.0.0.1", 0)
        .await
    {
        Ok(channel) => channel,
        Err(e) => {
            tracing::debug!(error = %e, "local forward: failed to open direct-tcpip channel");
            return;
        }
    };

    let mut remote = channel.into_stream();
    if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut remote).await {
        tracing::debug!(error = %e, "local forward: flow ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_is_copyable_into_local_forward_calls() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.enabled);
    }
}
