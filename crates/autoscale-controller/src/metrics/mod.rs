//! Prometheus metrics owned by the controller.
//!
//! Metrics live in a registry private to [`ControllerMetrics`]; the handle is
//! built once at startup and cloned into the reconciler and the HTTP server.

mod server;

use std::sync::Arc;

use error_stack::Report;
use prometheus::Encoder;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use prometheus::TextEncoder;
use thiserror::Error;

pub use self::server::MetricsServer;
pub use self::server::MetricsServerError;
use crate::autoscaler::AutoscalerKind;

/// Label used when a request resolves to no workload.
pub const UNKNOWN_KIND: &str = "unknown";

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric {name}: {message}")]
    Register { name: &'static str, message: String },
    #[error("failed to encode metrics: {message}")]
    Encode { message: String },
}

struct Inner {
    registry: Registry,
    reconciles: IntCounterVec,
    sync_failures: IntCounterVec,
}

/// Handle to the controller's metrics.
#[derive(Clone)]
pub struct ControllerMetrics {
    inner: Arc<Inner>,
}

fn counter(
    registry: &Registry,
    name: &'static str,
    help: &str,
    labels: &[&str],
) -> Result<IntCounterVec, Report<MetricsError>> {
    let register_error = |e: prometheus::Error| MetricsError::Register {
        name,
        message: e.to_string(),
    };
    let counter = IntCounterVec::new(Opts::new(name, help), labels).map_err(register_error)?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(register_error)?;
    Ok(counter)
}

impl ControllerMetrics {
    pub fn new() -> Result<Self, Report<MetricsError>> {
        let registry = Registry::new();
        let reconciles = counter(
            &registry,
            "infraflow_autoscaler_reconcile_total",
            "Reconciliation attempts by workload kind",
            &["kind"],
        )?;
        let sync_failures = counter(
            &registry,
            "infraflow_autoscaler_sync_failures_total",
            "Background autoscaler syncs that failed",
            &["autoscaler"],
        )?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                reconciles,
                sync_failures,
            }),
        })
    }

    pub fn record_reconcile(&self, kind: &str) {
        self.inner.reconciles.with_label_values(&[kind]).inc();
    }

    pub fn record_sync_failure(&self, autoscaler: AutoscalerKind) {
        self.inner
            .sync_failures
            .with_label_values(&[autoscaler.as_str()])
            .inc();
    }

    pub fn reconcile_count(&self, kind: &str) -> u64 {
        self.inner.reconciles.with_label_values(&[kind]).get()
    }

    pub fn sync_failure_count(&self, autoscaler: AutoscalerKind) -> u64 {
        self.inner
            .sync_failures
            .with_label_values(&[autoscaler.as_str()])
            .get()
    }

    /// Renders every metric in the Prometheus text format.
    pub fn encode(&self) -> Result<String, Report<MetricsError>> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.inner.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encode {
                message: e.to_string(),
            })?;
        String::from_utf8(buffer).map_err(|e| {
            Report::new(MetricsError::Encode {
                message: e.to_string(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn counts_reconciles_per_kind() {
        let metrics = ControllerMetrics::new().unwrap();

        metrics.record_reconcile("Deployment");
        metrics.record_reconcile("Deployment");
        metrics.record_reconcile(UNKNOWN_KIND);

        assert_eq!(metrics.reconcile_count("Deployment"), 2);
        assert_eq!(metrics.reconcile_count(UNKNOWN_KIND), 1);
        assert_eq!(metrics.reconcile_count("DaemonSet"), 0);
    }

    #[test]
    fn handles_do_not_share_state() {
        let first = ControllerMetrics::new().unwrap();
        let second = ControllerMetrics::new().unwrap();

        first.record_sync_failure(AutoscalerKind::Vertical);

        assert_eq!(first.sync_failure_count(AutoscalerKind::Vertical), 1);
        assert_eq!(second.sync_failure_count(AutoscalerKind::Vertical), 0);
    }

    #[test]
    fn encodes_text_format() {
        let metrics = ControllerMetrics::new().unwrap();
        metrics.record_reconcile("StatefulSet");

        let body = metrics.encode().unwrap();

        assert!(body.contains("infraflow_autoscaler_reconcile_total{kind=\"StatefulSet\"} 1"));
    }
}
