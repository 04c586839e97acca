// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::ChannelMsg;

use super::SshSession;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `None` when the channel closed without reporting a status (e.g. killed by a signal).
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
}

fn handle_capture_message(msg: &ChannelMsg, captured: &mut CapturedOutput) -> bool {
    match msg {
        ChannelMsg::Data { data } => {
            captured.stdout.extend_from_slice(data);
            false
        }
        ChannelMsg::ExtendedData { data, ext: 1 } => {
            captured.stderr.extend_from_slice(data);
            false
        }
        ChannelMsg::ExitStatus { exit_status } => {
            captured.exit_code = Some(*exit_status as i32);
            false
        }
        ChannelMsg::ExitSignal { signal_name, .. } => {
            captured.exit_signal = Some(format!("{signal_name:?}"));
            false
        }
        ChannelMsg::Close => true,
        _ => false,
    }
}

impl SshSession {
    // Execute command over SSH, retrieving stdout, stderr and exit code as output
    pub async fn exec_capture(&self, cmd: &str) -> Result<CapturedOutput> {
        let mut chan = self.handle.channel_open_session().await?;
        tracing::debug!("executing '{}'", cmd);
        chan.exec(true, cmd).await.context("exec request")?;
        let mut captured = CapturedOutput::default();
        while let Some(msg) = chan.wait().await {
            if handle_capture_message(&msg, &mut captured) {
                break;
            }
        }
        let _ = chan.close().await;
        Ok(captured)
    }
}
