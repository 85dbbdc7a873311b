//! Remote port forwarding: ask the SSH peer to listen on its side and
//! deliver inbound connections back to us, which we then pipe to a local
//! `host:port` (the moral equivalent of `ssh -R`).

use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::watch;

use super::{try_reconnect, ReconnectPolicy, Redial, SessionSlot, StateCell, TunnelHandle, TunnelState};
use crate::adapter::ssh::session::{ForwardedChannel, Session};
use crate::error::ExecResult;

/// A running remote (`-R`-style) forward: the SSH peer listens on
/// `remote_address:remote_port` and every inbound connection is piped to
/// `local_host:local_port` as seen from this machine.
pub struct RemoteForward;

impl RemoteForward {
    /// Request the remote listener and start piping inbound connections.
    /// Returns once the peer has acknowledged the listen request, alongside
    /// the port it bound (useful when `remote_port` is `0` and the peer
    /// picks one); the pipe loop runs in the background until
    /// [`TunnelHandle::close`] is called or drops.
    pub async fn open(
        session: Session,
        remote_address: String,
        remote_port: u16,
        local_host: String,
        local_port: u16,
        reconnect: ReconnectPolicy,
        redial: Option<Redial>,
    ) -> ExecResult<(TunnelHandle, u32)> {
        let bound_port = session
            .request_remote_forward(&remote_address, remote_port)
            .await?;

        let state = Arc::new(StateCell::new(TunnelState::Opening));
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let slot = SessionSlot::new(session);

        state.set(TunnelState::Open);
        let task_state = state.clone();
        let loop_remote_address = remote_address.clone();
        let task = tokio::spawn(async move {
            loop {
                let session = slot.get().await;
                tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                    forwarded = session.next_forwarded() => {
                        match forwarded {
                            Some(incoming) => {
                                if !try_reconnect(&slot, &reconnect, &redial).await {
                                    break;
                                }
                                let local_host = local_host.clone();
                                tokio::spawn(pipe_one(incoming, local_host, local_port));
                            }
                            None => {
                                if !try_reconnect(&slot, &reconnect, &redial).await {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
            let session = slot.get().await;
            let _ = session.cancel_remote_forward(&loop_remote_address, remote_port).await;
            task_state.set(TunnelState::Closing);
        });

        Ok((TunnelHandle::new(state, stop_tx, task), bound_port))
    }
}

async fn pipe_one(incoming: ForwardedChannel, local_host: String, local_port: u16) {
    let mut local = match TcpStream::connect((local_host.as_str(), local_port)).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::debug!(error = %e, "remote forward: failed to dial local target");
            return;
        }
    };

    let mut remote = incoming.channel.into_stream();
    if let Err(e) = tokio::io::copy_bidirectional(&mut local, &mut remote).await {
        tracing::debug!(error = %e, "remote forward: flow ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_policy_defaults_are_usable_as_is() {
        let _ = ReconnectPolicy::default();
    }
}
