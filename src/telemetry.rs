//! The telemetry seam.
//!
//! One record per operation, handed to whatever sink the front-end
//! wires in. The default sink folds the record into the log stream.

use tracing::info;

use crate::errors::ExitStatus;

#[derive(Clone, Debug)]
pub struct TelemetryRecord {
    /// "install", "remove", ...
    pub operation: &'static str,
    pub bundles: Vec<String>,
    pub version: u32,
    pub status: ExitStatus,
    /// Bytes pulled over the fetcher during the operation.
    pub bytes: u64,
}

pub trait Telemetry {
    fn record(&self, record: &TelemetryRecord);
}

/// Emits the record as a single structured log event.
#[derive(Debug, Default)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn record(&self, record: &TelemetryRecord) {
        info!(
            operation = record.operation,
            bundles = record.bundles.join(",").as_str(),
            version = record.version,
            status = record.status.code(),
            bytes = record.bytes,
            "operation finished"
        );
    }
}

/// Swallows records; used by tests and front-ends that opted out.
#[derive(Debug, Default)]
pub struct NullTelemetry;

impl Telemetry for NullTelemetry {
    fn record(&self, _record: &TelemetryRecord) {}
}
