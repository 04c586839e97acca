// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use tokio::fs as tokiofs;
use tokio::io::{AsyncBufRead, AsyncWriteExt, BufReader};

use super::SshSession;

const UPLOAD_BUFFER_BYTES: usize = 256 * 1024;
const PARTIAL_SUFFIX: &str = ".part";

impl SshSession {
    async fn sftp(&self) -> Result<SftpSession> {
        let channel = self.handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(sftp)
    }

    pub async fn ensure_remote_dir(&self, remote_dir: &str) -> Result<()> {
        let sftp = self.sftp().await?;
        let result = ensure_remote_dir_with_sftp(&sftp, remote_dir).await;
        let _ = sftp.close().await;
        result
    }

    /// Streams a local file to `remote_path` through a sibling partial file.
    pub async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        let local = tokiofs::File::open(local_path)
            .await
            .with_context(|| format!("opening local file {}", local_path.display()))?;
        let mut reader = BufReader::with_capacity(UPLOAD_BUFFER_BYTES, local);
        let sftp = self.sftp().await?;
        let result = write_then_rename(&sftp, remote_path, &mut reader).await;
        let _ = sftp.close().await;
        result
    }

    pub async fn upload_bytes(&self, content: &[u8], remote_path: &str) -> Result<()> {
        let mut reader = content;
        let sftp = self.sftp().await?;
        let result = write_then_rename(&sftp, remote_path, &mut reader).await;
        let _ = sftp.close().await;
        result
    }

    pub async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let sftp = self.sftp().await?;
        let result = download_file(&sftp, remote_path, local_path).await;
        let _ = sftp.close().await;
        result
    }
}

async fn ensure_remote_dir_with_sftp(sftp: &SftpSession, remote_dir: &str) -> Result<()> {
    tracing::debug!("remote dir: {remote_dir}");
    for cur in build_remote_dir_paths(remote_dir) {
        match sftp.metadata(&cur).await {
            Ok(meta) => {
                if !meta.is_dir() {
                    return Err(anyhow!(
                        "remote path exists but is not a directory: {}",
                        cur
                    ));
                }
            }
            Err(e) => {
                tracing::debug!("metadata for {cur} unavailable ({e}), creating");
                if let Err(create_err) = sftp.create_dir(&cur).await {
                    // another writer may have created it in between
                    match sftp.metadata(&cur).await {
                        Ok(meta) if meta.is_dir() => continue,
                        _ => {
                            return Err(create_err).context(format!("creating path {}", &cur));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Nothing is visible at `remote_path` until the content is complete.
async fn write_then_rename<R>(sftp: &SftpSession, remote_path: &str, reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let part = partial_path(remote_path);
    if let Err(err) = write_remote(sftp, &part, reader).await {
        discard_partial(sftp, &part).await;
        return Err(err);
    }
    if sftp.try_exists(remote_path).await.unwrap_or(false) {
        if let Err(err) = sftp.remove_file(remote_path).await {
            discard_partial(sftp, &part).await;
            return Err(err).context(format!("replacing existing {remote_path}"));
        }
    }
    if let Err(err) = sftp.rename(&part, remote_path).await {
        discard_partial(sftp, &part).await;
        return Err(err).context(format!("renaming {part} to {remote_path}"));
    }
    Ok(())
}

async fn write_remote<R>(sftp: &SftpSession, remote_path: &str, reader: &mut R) -> Result<()>
where
    R: AsyncBufRead + Unpin + ?Sized,
{
    let flags = OpenFlags::WRITE
        .union(OpenFlags::CREATE)
        .union(OpenFlags::TRUNCATE);
    let mut rfile = sftp
        .open_with_flags(remote_path, flags)
        .await
        .with_context(|| format!("opening remote file {remote_path}"))?;
    let written = tokio::io::copy_buf(reader, &mut rfile)
        .await
        .with_context(|| format!("writing {remote_path}"))?;
    rfile.flush().await?;
    rfile.shutdown().await?;
    tracing::debug!(bytes = written, "wrote {remote_path}");
    Ok(())
}

async fn discard_partial(sftp: &SftpSession, part: &str) {
    if let Err(err) = sftp.remove_file(part).await {
        tracing::debug!("could not remove partial file {part}: {err}");
    }
}

async fn download_file(sftp: &SftpSession, remote_path: &str, local_path: &Path) -> Result<()> {
    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokiofs::create_dir_all(parent).await?;
    }
    let mut rfile = sftp
        .open(remote_path)
        .await
        .with_context(|| format!("opening remote file {remote_path}"))?;
    let mut lfile = tokiofs::File::create(local_path)
        .await
        .with_context(|| format!("creating local file {}", local_path.display()))?;
    tokio::io::copy(&mut rfile, &mut lfile).await?;
    lfile.flush().await?;
    Ok(())
}

pub(crate) fn partial_path(remote_path: &str) -> String {
    format!("{remote_path}{PARTIAL_SUFFIX}")
}

/// Every prefix directory of `remote_dir`, shortest first. The root itself is omitted.
pub(crate) fn build_remote_dir_paths(remote_dir: &str) -> Vec<String> {
    let absolute = remote_dir.starts_with('/');
    let mut paths = Vec::new();
    let mut cur = String::new();
    for seg in remote_dir.split('/').filter(|s| !s.is_empty() && *s != ".") {
        if absolute || !cur.is_empty() {
            cur.push('/');
        }
        cur.push_str(seg);
        paths.push(cur.clone());
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::{build_remote_dir_paths, partial_path};

    #[test]
    fn build_remote_dir_paths_handles_root_and_dot_segments() {
        let paths = build_remote_dir_paths("/tmp/./cache//files/");
        assert_eq!(
            paths,
            vec![
                "/tmp".to_string(),
                "/tmp/cache".to_string(),
                "/tmp/cache/files".to_string()
            ]
        );
    }

    #[test]
    fn build_remote_dir_paths_relative() {
        assert_eq!(
            build_remote_dir_paths("scratch/t1"),
            vec!["scratch".to_string(), "scratch/t1".to_string()]
        );
        assert!(build_remote_dir_paths("/").is_empty());
    }

    #[test]
    fn partial_path_is_a_sibling() {
        assert_eq!(partial_path("/s/t1/input.wav"), "/s/t1/input.wav.part");
    }
}
