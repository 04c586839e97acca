// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use crate::app::ports::{TelemetryEvent, TelemetryPort};

#[derive(Clone, Default)]
pub struct TracingTelemetry;

impl TracingTelemetry {
    pub fn new() -> Self {
        Self
    }
}

impl TelemetryPort for TracingTelemetry {
    fn event(&self, name: &'static str, fields: TelemetryEvent) {
        let TelemetryEvent {
            task_id,
            state,
            host,
            remote_path,
            scheduler_id,
            error,
        } = fields;

        if error.is_some() {
            tracing::warn!(
                target: "hpcstage::telemetry",
                event = name,
                task_id = task_id.as_deref(),
                state = state,
                host = host.as_deref(),
                remote_path = remote_path.as_deref(),
                scheduler_id = scheduler_id,
                error = error.as_deref(),
            );
        } else {
            tracing::info!(
                target: "hpcstage::telemetry",
                event = name,
                task_id = task_id.as_deref(),
                state = state,
                host = host.as_deref(),
                remote_path = remote_path.as_deref(),
                scheduler_id = scheduler_id,
            );
        }
    }
}
