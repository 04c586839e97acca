// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use russh::Disconnect;
use russh::client::Config;
use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};
use russh::keys::ssh_key::PublicKey;

mod auth;
mod exec;
mod sftp;

pub use exec::CapturedOutput;

/// russh client handler that checks the server key against known_hosts.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
    known_hosts_path: Option<PathBuf>,
}

impl ClientHandler {
    fn new(host: String, port: u16, known_hosts_path: Option<PathBuf>) -> Self {
        Self {
            host,
            port,
            known_hosts_path,
        }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(&mut self, key: &PublicKey) -> Result<bool, Self::Error> {
        verify_server_key(&self.host, self.port, key, self.known_hosts_path.as_deref())
    }
}

/// Known keys pass, unknown hosts are learned, changed keys are refused.
fn verify_server_key(
    host: &str,
    port: u16,
    key: &PublicKey,
    known_hosts_path: Option<&Path>,
) -> anyhow::Result<bool> {
    let known = match known_hosts_path {
        Some(path) => russh::keys::check_known_hosts_path(host, port, key, path),
        None => russh::keys::check_known_hosts(host, port, key),
    };
    match known {
        Ok(true) => return Ok(true),
        Ok(false) => {}
        Err(err) => {
            tracing::warn!(host, port, "server key rejected: {err}");
            return Err(anyhow!("host key check for {host}:{port} failed: {err}"));
        }
    }

    tracing::info!(host, port, "unknown host, recording its key in known_hosts");
    let learned = match known_hosts_path {
        Some(path) => learn_known_hosts_path(host, port, key, path),
        None => learn_known_hosts(host, port, key),
    };
    learned.map_err(|err| anyhow!("could not record host key for {host}:{port}: {err}"))?;
    Ok(true)
}

pub fn client_config(inactivity_timeout: Duration) -> Arc<Config> {
    Arc::new(Config {
        inactivity_timeout: Some(inactivity_timeout),
        channel_buffer_size: 64,
        window_size: 1024 * 1024,
        ..Default::default()
    })
}

/// One authenticated connection, opened for a single transport operation.
pub struct SshSession {
    handle: russh::client::Handle<ClientHandler>,
}

impl SshSession {
    pub async fn close(self) {
        if let Err(err) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("ssh disconnect failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAICzVAOxzbAFVU2q/Chsw6ZdUnj9cQrD3sV0FjEHf8Q18";
    const SECOND: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIJaORD0dVdYx1mMaIvNZ8C5ph/A+oMeYXyTDGkOcH5Dk";

    fn key(raw: &str) -> PublicKey {
        PublicKey::from_openssh(raw).unwrap()
    }

    #[test]
    fn unknown_host_is_learned_then_trusted() {
        let dir = tempfile::TempDir::new().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        std::fs::write(&known_hosts, "").unwrap();

        assert!(verify_server_key("hpc.example.org", 2222, &key(FIRST), Some(&known_hosts)).unwrap());
        let recorded = std::fs::read_to_string(&known_hosts).unwrap();
        assert!(recorded.contains("hpc.example.org"));
        assert!(verify_server_key("hpc.example.org", 2222, &key(FIRST), Some(&known_hosts)).unwrap());
    }

    #[test]
    fn changed_host_key_is_refused() {
        let dir = tempfile::TempDir::new().unwrap();
        let known_hosts = dir.path().join("known_hosts");
        std::fs::write(&known_hosts, "").unwrap();

        verify_server_key("hpc.example.org", 22, &key(FIRST), Some(&known_hosts)).unwrap();
        let err = verify_server_key("hpc.example.org", 22, &key(SECOND), Some(&known_hosts))
            .unwrap_err();
        assert!(err.to_string().contains("hpc.example.org:22"));
    }
}
