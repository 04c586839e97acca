// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod clock;
pub mod task_store;
pub mod telemetry;
pub mod transport;

pub use clock::ClockPort;
pub use task_store::TaskStorePort;
#[allow(unused_imports)]
pub use telemetry::{NoopTelemetry, TelemetryEvent, TelemetryPort};
pub use transport::{RemoteTransportPort, TransportError, TransportResult};
