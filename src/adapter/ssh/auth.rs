//! SSH authentication methods and target descriptors (C8).
//!
//! Grounded on `axon`'s use of `russh::keys::PrivateKey` for key-based auth
//! and `other_examples/2e070de1_adolago-rustible__src-connection-mod.rs.rs`'s
//! `ConnectionType::Ssh` variant for the descriptor shape, extended with
//! password/keyboard-interactive/agent methods the spec requires that
//! neither source fully covered.

use std::path::PathBuf;

/// How to authenticate an SSH connection.
#[derive(Clone)]
pub enum SshAuth {
    /// A private key loaded from a file, optionally passphrase-protected.
    PrivateKeyFile {
        /// Path to the key file.
        path: PathBuf,
        /// Passphrase, if the key is encrypted.
        passphrase: Option<String>,
    },
    /// A private key already loaded into memory.
    PrivateKey(std::sync::Arc<russh_keys::PrivateKey>),
    /// Defer to `ssh-agent` over `SSH_AUTH_SOCK`.
    Agent,
    /// A plaintext password (also used as the fallback for
    /// keyboard-interactive prompts).
    Password(String),
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PrivateKeyFile { path, .. } => {
                f.debug_struct("PrivateKeyFile").field("path", path).finish()
            }
            Self::PrivateKey(_) => write!(f, "PrivateKey(..)"),
            Self::Agent => write!(f, "Agent"),
            Self::Password(_) => write!(f, "Password(***)"),
        }
    }
}

/// One hop in a jump-host chain, or the final destination.
#[derive(Debug, Clone)]
pub struct SshHost {
    /// Hostname or IP.
    pub host: String,
    /// Port, defaults to 22.
    pub port: u16,
    /// Username to authenticate as.
    pub user: String,
    /// Authentication method for this hop.
    pub auth: SshAuth,
}

impl SshHost {
    /// Start describing a host with its default port (22).
    pub fn new(host: impl Into<String>, user: impl Into<String>, auth: SshAuth) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            auth,
        }
    }

    /// Override the port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// A stable fingerprint used as the connection pool key: user@host:port.
    pub fn fingerprint(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

/// Full target descriptor for an SSH adapter: the final host plus any
/// jump hosts to traverse first, resolved in order.
#[derive(Debug, Clone)]
pub struct SshTarget {
    /// Jump hosts to connect through, in order (empty for a direct
    /// connection).
    pub jump_hosts: Vec<SshHost>,
    /// The final destination host.
    pub destination: SshHost,
}

impl SshTarget {
    /// A direct connection with no jump hosts.
    pub fn direct(destination: SshHost) -> Self {
        Self {
            jump_hosts: Vec::new(),
            destination,
        }
    }

    /// Add a jump host to traverse before reaching the destination.
    #[must_use]
    pub fn via(mut self, jump_host: SshHost) -> Self {
        self.jump_hosts.push(jump_host);
        self
    }

    /// The full chain: jump hosts followed by the destination.
    pub fn chain(&self) -> Vec<&SshHost> {
        self.jump_hosts.iter().chain(std::iter::once(&self.destination)).collect()
    }

    /// Pool fingerprint for the destination (jump hosts pool independently
    /// by their own fingerprint as the pool dials through the chain).
    pub fn fingerprint(&self) -> String {
        let mut fp = self.destination.fingerprint();
        if !self.jump_hosts.is_empty() {
            let hops: Vec<String> = self.jump_hosts.iter().map(SshHost::fingerprint).collect();
            fp = format!("{}>{}", hops.join(">"), fp);
        }
        fp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_includes_user_host_port() {
        let host = SshHost::new("db-1", "deploy", SshAuth::Agent).port(2222);
        assert_eq!(host.fingerprint(), "deploy@db-1:2222");
    }

    #[test]
    fn target_fingerprint_includes_jump_chain() {
        let bastion = SshHost::new("bastion", "ops", SshAuth::Agent);
        let dest = SshHost::new("db-1", "deploy", SshAuth::Agent);
        let target = SshTarget::direct(dest).via(bastion);
        // via() pushes before direct's existing destination stays the same;
        // chain() always reports jump hosts before the destination.
        assert!(target.fingerprint().contains("bastion"));
        assert!(target.fingerprint().ends_with("deploy@db-1:22"));
    }
}
