//! Entry/step/exit diagnostics around one service operation.
//!
//! Records are emitted at `debug` through the `log` facade and carry metadata
//! only: keys, object numbers, column names and error kinds, never data values.

use crate::service::object_service::ServiceError;
use log::{debug, warn};
use std::fmt::Display;
use std::time::Instant;

pub(crate) struct OperationTrace<'a> {
    service: &'a str,
    operation: &'static str,
    started_at: Instant,
}

impl<'a> OperationTrace<'a> {
    pub(crate) fn enter(service: &'a str, operation: &'static str, detail: impl Display) -> Self {
        debug!("event=op_entry module=service service={service} op={operation} {detail}");
        Self {
            service,
            operation,
            started_at: Instant::now(),
        }
    }

    pub(crate) fn step(&self, step: &str) {
        debug!(
            "event=op_step module=service service={} op={} step={step}",
            self.service, self.operation
        );
    }

    pub(crate) fn exit(self, detail: impl Display) {
        debug!(
            "event=op_exit module=service service={} op={} status=ok duration_ms={} {detail}",
            self.service,
            self.operation,
            self.started_at.elapsed().as_millis()
        );
    }

    pub(crate) fn fail(self, err: &ServiceError) {
        let kind = err.kind();
        if kind.is_caller_error() {
            debug!(
                "event=op_exit module=service service={} op={} status=error duration_ms={} error_kind={} error={}",
                self.service,
                self.operation,
                self.started_at.elapsed().as_millis(),
                kind,
                err
            );
        } else {
            warn!(
                "event=op_exit module=service service={} op={} status=error duration_ms={} error_kind={} error={}",
                self.service,
                self.operation,
                self.started_at.elapsed().as_millis(),
                kind,
                err
            );
        }
    }
}

/// Comma-separated column names of a data map, for metadata-only logging.
pub(crate) fn column_list(data: &crate::model::row::DataMap) -> String {
    if data.is_empty() {
        return "-".to_string();
    }
    data.keys().map(String::as_str).collect::<Vec<_>>().join(",")
}
