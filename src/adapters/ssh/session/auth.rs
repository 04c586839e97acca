// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use anyhow::{Context, Result};
use russh::client::{AuthResult, Config};
use russh::keys::PrivateKeyWithHashAlg;

use crate::adapters::ssh::AuthenticationFailure;
use crate::app::types::ConnectionProfile;

use super::{ClientHandler, SshSession};

enum AuthDecision {
    Success,
    Failure { partial_success: bool },
}

fn auth_decision(result: AuthResult) -> AuthDecision {
    match result {
        AuthResult::Success => AuthDecision::Success,
        AuthResult::Failure {
            partial_success, ..
        } => AuthDecision::Failure { partial_success },
    }
}

impl SshSession {
    /// Connects and authenticates with the profile's identity file.
    pub async fn open(profile: &ConnectionProfile, config: Arc<Config>) -> Result<Self> {
        let handler = ClientHandler::new(
            profile.host.clone(),
            profile.port,
            profile.known_hosts_path.clone(),
        );
        let mut handle =
            russh::client::connect(config, (profile.host.as_str(), profile.port), handler)
                .await
                .context("SSH connect failed")?;
        tracing::debug!(
            host = %profile.host,
            user = %profile.user,
            "connection established, authenticating"
        );

        let key = russh::keys::load_secret_key(&profile.identity_path, None).with_context(|| {
            format!(
                "failed to load secret key at {}",
                profile.identity_path.display()
            )
        })?;
        // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
        let pk = PrivateKeyWithHashAlg::new(
            Arc::new(key),
            handle.best_supported_rsa_hash().await?.flatten(),
        );
        let result = handle
            .authenticate_publickey(profile.user.clone(), pk)
            .await
            .context("publickey authentication request failed")?;
        match auth_decision(result) {
            AuthDecision::Success => Ok(Self { handle }),
            AuthDecision::Failure { partial_success } => {
                tracing::debug!(partial_success, "publickey authentication rejected");
                Err(anyhow::Error::new(AuthenticationFailure).context(format!(
                    "server rejected key for {}@{}",
                    profile.user, profile.host
                )))
            }
        }
    }
}
