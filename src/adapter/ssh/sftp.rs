//! File transfer over SFTP for the SSH adapter (C8's upload/download
//! surface), layered on an already-authenticated [`Session`]'s channel.
//!
//! Grounded on `russh-sftp`'s `SftpSession::new` over a `russh` channel
//! (the crate's documented request/response pattern), wired into this
//! codebase's `tokio::fs`-based copy style already used by
//! [`crate::adapter::local::LocalAdapter`].

use std::path::Path;

use russh_sftp::client::SftpSession;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::adapter::ssh::session::Session;
use crate::adapter::TransferOptions;
use crate::error::{ExecError, ExecResult};

/// Open an SFTP subsystem channel on `session`.
async fn open_sftp(session: &Session) -> ExecResult<SftpSession> {
    let channel = session
        .open_channel()
        .await
        .map_err(|e| ExecError::connection("sftp", e.to_string()))?;
    channel
        .request_subsystem(true, "sftp")
        .await
        .map_err(|e| ExecError::connection("sftp", e.to_string()))?;
    SftpSession::new(channel.into_stream())
        .await
        .map_err(|e| ExecError::connection("sftp", e.to_string()))
}

/// Copy `local` to `remote` over SFTP.
pub async fn upload(
    session: &Session,
    local: &Path,
    remote: &Path,
    opts: TransferOptions,
) -> ExecResult<()> {
    let sftp = open_sftp(session).await?;
    let remote_str = remote.to_string_lossy().into_owned();

    if !opts.overwrite {
        if sftp.metadata(remote_str.clone()).await.is_ok() {
            return Err(ExecError::upload_failed(
                local.display().to_string(),
                remote_str,
                "destination already exists and overwrite was not requested",
            ));
        }
    }

    let mut data = Vec::new();
    tokio::fs::File::open(local)
        .await
        .map_err(ExecError::from)?
        .read_to_end(&mut data)
        .await
        .map_err(ExecError::from)?;

    let mut remote_file = sftp
        .create(remote_str.clone())
        .await
        .map_err(|e| ExecError::upload_failed(local.display().to_string(), remote_str.clone(), e.to_string()))?;
    remote_file
        .write_all(&data)
        .await
        .map_err(|e| ExecError::upload_failed(local.display().to_string(), remote_str.clone(), e.to_string()))?;
    remote_file
        .shutdown()
        .await
        .map_err(|e| ExecError::upload_failed(local.display().to_string(), remote_str, e.to_string()))?;

    if opts.preserve_mode {
        if let Ok(local_meta) = tokio::fs::metadata(local).await {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = local_meta.permissions().mode();
                let _ = sftp.set_metadata(
                    remote.to_string_lossy().into_owned(),
                    russh_sftp::protocol::FileAttributes {
                        permissions: Some(mode),
                        ..Default::default()
                    },
                ).await;
            }
            #[cfg(not(unix))]
            let _ = local_meta;
        }
    }

    Ok(())
}

/// Copy `remote` to `local` over SFTP.
pub async fn download(
    session: &Session,
    remote: &Path,
    local: &Path,
    _opts: TransferOptions,
) -> ExecResult<()> {
    let sftp = open_sftp(session).await?;
    let remote_str = remote.to_string_lossy().into_owned();

    let mut remote_file = sftp
        .open(remote_str.clone())
        .await
        .map_err(|e| ExecError::download_failed(remote_str.clone(), local.display().to_string(), e.to_string()))?;
    let mut data = Vec::new();
    remote_file
        .read_to_end(&mut data)
        .await
        .map_err(|e| ExecError::download_failed(remote_str.clone(), local.display().to_string(), e.to_string()))?;

    tokio::fs::write(local, data).await.map_err(|e| {
        ExecError::download_failed(remote_str, local.display().to_string(), e.to_string())
    })?;

    Ok(())
}
