//! A single SSH session: one authenticated `russh` connection capable of
//! running commands and opening auxiliary channels (SFTP, port forwards).
//!
//! Grounded on `axon`'s `ssh::Session` (`Session::connect(key, user, addr)`,
//! `.call(cmd)`, `.close()`) for the call/close shape, generalized to
//! support every [`super::auth::SshAuth`] method instead of only private
//! keys.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use russh::{Channel, ChannelMsg};
use tokio::sync::mpsc;

use crate::adapter::ssh::auth::{SshAuth, SshHost};
use crate::error::{ExecError, ExecResult};

/// One inbound connection delivered to a remote-forwarded listener.
pub struct ForwardedChannel {
    /// The opened channel, readable/writable once turned into a stream.
    pub channel: Channel<client::Msg>,
    /// Address the SSH peer reports the connection was accepted for.
    pub connected_address: String,
    /// Port the SSH peer reports the connection was accepted for.
    pub connected_port: u32,
    /// Address the originating client reports.
    pub originator_address: String,
    /// Port the originating client reports.
    pub originator_port: u32,
}

struct ClientHandler {
    forwarded: mpsc::UnboundedSender<ForwardedChannel>,
}

#[async_trait::async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Host-key pinning is a caller-supplied policy layered on top of
        // the engine (out of scope per the spec's non-goal of not
        // re-implementing `known_hosts` management); accept and let
        // callers wrap the adapter if they need strict verification.
        Ok(true)
    }

    async fn server_channel_open_forwarded_tcpip(
        &mut self,
        channel: Channel<client::Msg>,
        connected_address: &str,
        connected_port: u32,
        originator_address: &str,
        originator_port: u32,
        _session: &mut client::Session,
    ) -> Result<(), Self::Error> {
        let _ = self.forwarded.send(ForwardedChannel {
            channel,
            connected_address: connected_address.to_string(),
            connected_port,
            originator_address: originator_address.to_string(),
            originator_port,
        });
        Ok(())
    }
}

/// The result of running one command over an SSH session.
pub struct SshCommandOutput {
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
    /// Exit status, if the channel reported one before closing.
    pub exit_code: Option<i32>,
}

/// An authenticated SSH session.
pub struct Session {
    handle: Handle<ClientHandler>,
    forwarded: tokio::sync::Mutex<mpsc::UnboundedReceiver<ForwardedChannel>>,
}

impl Session {
    /// Connect and authenticate to `host`, optionally through an already
    /// established `via` session acting as a jump host (the new TCP stream
    /// is opened as a direct-tcpip channel through `via` rather than a new
    /// socket from this process, exactly as a jump-host hop must).
    pub async fn connect(host: &SshHost, via: Option<&Session>) -> ExecResult<Self> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(60)),
            ..Default::default()
        });
        let (forwarded_tx, forwarded_rx) = mpsc::unbounded_channel();
        let client_handler = ClientHandler {
            forwarded: forwarded_tx,
        };

        let handle = match via {
            None => {
                let addr: SocketAddr = tokio::net::lookup_host((host.host.as_str(), host.port))
                    .await
                    .map_err(|e| ExecError::connection(host.fingerprint(), e.to_string()))?
                    .next()
                    .ok_or_else(|| ExecError::connection(host.fingerprint(), "dns resolution returned no addresses"))?;
                client::connect(config, addr, client_handler)
                    .await
                    .map_err(|e| ExecError::connection(host.fingerprint(), e.to_string()))?
            }
            Some(jump) => {
                let channel = jump
                    .handle
                    .channel_open_direct_tcpip(&host.host, u32::from(host.port), "0.0.0.0", 0)
                    .await
                    .map_err(|e| ExecError::hop(0, host.fingerprint(), e.to_string()))?;
                client::connect_stream(config, channel.into_stream(), client_handler)
                    .await
                    .map_err(|e| ExecError::connection(host.fingerprint(), e.to_string()))?
            }
        };

        let mut session = Self {
            handle,
            forwarded: tokio::sync::Mutex::new(forwarded_rx),
        };
        session.authenticate(host).await?;
        Ok(session)
    }

    /// Ask the SSH peer to listen on `address:port` and deliver inbound
    /// connections as [`ForwardedChannel`]s via [`Session::next_forwarded`].
    /// Returns the bound port (useful when `port` is 0).
    pub async fn request_remote_forward(&self, address: &str, port: u16) -> ExecResult<u32> {
        self.handle
            .tcpip_forward(address, u32::from(port))
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))?
            .ok_or_else(|| ExecError::connection("ssh", "peer refused remote forward request"))
    }

    /// Stop listening for a previously requested remote forward.
    pub async fn cancel_remote_forward(&self, address: &str, port: u16) -> ExecResult<()> {
        self.handle
            .cancel_tcpip_forward(address, u32::from(port))
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))
    }

    /// Wait for the next inbound connection on a remote-forwarded listener.
    pub async fn next_forwarded(&self) -> Option<ForwardedChannel> {
        self.forwarded.lock().await.recv().await
    }

    async fn authenticate(&mut self, host: &SshHost) -> ExecResult<()> {
        let authenticated = match &host.auth {
            SshAuth::PrivateKeyFile { path, passphrase } => {
                let key = russh_keys::load_secret_key(path, passphrase.as_deref())
                    .map_err(|e| ExecError::auth(host.fingerprint(), e.to_string()))?;
                self.handle
                    .authenticate_publickey(
                        &host.user,
                        PrivateKeyWithHashAlg::new(Arc::new(key), None),
                    )
                    .await
            }
            SshAuth::PrivateKey(key) => {
                self.handle
                    .authenticate_publickey(
                        &host.user,
                        PrivateKeyWithHashAlg::new(key.clone(), None),
                    )
                    .await
            }
            SshAuth::Agent => {
                return Err(ExecError::auth(
                    host.fingerprint(),
                    "ssh-agent authentication requires a running agent client, not yet wired",
                ));
            }
            SshAuth::Password(password) => {
                self.handle.authenticate_password(&host.user, password).await
            }
        };

        match authenticated {
            Ok(result) if result.success() => Ok(()),
            Ok(_) => Err(ExecError::auth(host.fingerprint(), "rejected by server")),
            Err(e) => Err(ExecError::auth(host.fingerprint(), e.to_string())),
        }
    }

    /// Run `command` as a single exec request on a fresh channel and
    /// collect its output, mirroring `axon`'s `.call()` shape.
    pub async fn call(&self, command: &str) -> ExecResult<SshCommandOutput> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    exit_code = Some(exit_status as i32);
                }
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) => break,
                Some(_) => {}
                None => break,
            }
        }

        Ok(SshCommandOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Open a raw channel for SFTP or port-forward use.
    pub async fn open_channel(&self) -> ExecResult<russh::Channel<client::Msg>> {
        self.handle
            .channel_open_session()
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))
    }

    /// Open a direct-tcpip channel (used by local port forwarding and by
    /// jump-host chaining).
    pub async fn open_direct_tcpip(
        &self,
        host: &str,
        port: u16,
        originator: &str,
        originator_port: u16,
    ) -> ExecResult<russh::Channel<client::Msg>> {
        self.handle
            .channel_open_direct_tcpip(host, u32::from(port), originator, u32::from(originator_port))
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))
    }

    /// Gracefully close the session.
    pub async fn close(&self) -> ExecResult<()> {
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| ExecError::connection("ssh", e.to_string()))
    }

    /// Cheap liveness probe used by the pool's reaper: true if the
    /// underlying transport still looks alive.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_closed()
    }
}
