// Prometheus metrics for yavirtd client calls
//
// - Requests per transport/operation/outcome (counter)
// - Request latency per transport/operation (histogram)
// - Open streams per transport/kind (gauge)

use lazy_static::lazy_static;
use prometheus::{Encoder, HistogramVec, IntCounterVec, IntGaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::sync::Once;
use std::time::Instant;

use crate::client::TransportKind;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    pub static ref REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("yavirt_client_requests_total", "Total number of yavirtd requests"),
        &["transport", "operation", "outcome"]
    ).expect("Failed to create requests total metric");

    pub static ref REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "yavirt_client_request_duration_seconds",
            "yavirtd request latency in seconds"
        ),
        &["transport", "operation"]
    ).expect("Failed to create request duration metric");

    pub static ref ACTIVE_STREAMS: IntGaugeVec = IntGaugeVec::new(
        prometheus::Opts::new("yavirt_client_active_streams", "Number of open yavirtd streams"),
        &["transport", "kind"]
    ).expect("Failed to create active streams metric");
}

static INIT: Once = Once::new();

/// Register all client metrics with [`REGISTRY`]; later calls are no-ops
pub fn init() {
    INIT.call_once(|| {
        let collectors: [Box<dyn prometheus::core::Collector>; 3] = [
            Box::new(REQUESTS_TOTAL.clone()),
            Box::new(REQUEST_DURATION_SECONDS.clone()),
            Box::new(ACTIVE_STREAMS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                tracing::warn!("Failed to register metric: {}", e);
            }
        }
    });
}

/// Record the outcome and latency of one request
pub fn observe(transport: TransportKind, operation: &str, started: Instant, ok: bool) {
    let transport = transport.as_str();
    let outcome = if ok { "ok" } else { "error" };
    REQUESTS_TOTAL
        .with_label_values(&[transport, operation, outcome])
        .inc();
    REQUEST_DURATION_SECONDS
        .with_label_values(&[transport, operation])
        .observe(started.elapsed().as_secs_f64());
}

/// Gauge guard: increments on creation, decrements on drop
pub struct StreamGuard {
    transport: TransportKind,
    kind: &'static str,
}

impl StreamGuard {
    pub fn open(transport: TransportKind, kind: &'static str) -> Self {
        ACTIVE_STREAMS
            .with_label_values(&[transport.as_str(), kind])
            .inc();
        Self { transport, kind }
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        ACTIVE_STREAMS
            .with_label_values(&[self.transport.as_str(), self.kind])
            .dec();
    }
}

/// Gather all metrics in Prometheus text format
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))?;
    String::from_utf8(buffer).map_err(|e| anyhow::anyhow!("Invalid UTF-8 in metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        observe(TransportKind::Http, "metrics_idempotent", Instant::now(), true);
        let text = gather_metrics().unwrap();
        assert!(text.contains("yavirt_client_requests_total"));
    }

    #[test]
    fn test_observe_counts_outcomes() {
        let ok = REQUESTS_TOTAL.with_label_values(&["grpc", "metrics_outcome", "ok"]);
        let err = REQUESTS_TOTAL.with_label_values(&["grpc", "metrics_outcome", "error"]);
        let (ok_before, err_before) = (ok.get(), err.get());

        observe(TransportKind::Grpc, "metrics_outcome", Instant::now(), true);
        observe(TransportKind::Grpc, "metrics_outcome", Instant::now(), false);
        observe(TransportKind::Grpc, "metrics_outcome", Instant::now(), false);

        assert_eq!(ok.get() - ok_before, 1);
        assert_eq!(err.get() - err_before, 2);
    }

    #[test]
    fn test_stream_guard_tracks_open_streams() {
        let gauge = ACTIVE_STREAMS.with_label_values(&["http", "metrics_guard"]);
        assert_eq!(gauge.get(), 0);
        {
            let _a = StreamGuard::open(TransportKind::Http, "metrics_guard");
            let _b = StreamGuard::open(TransportKind::Http, "metrics_guard");
            assert_eq!(gauge.get(), 2);
        }
        assert_eq!(gauge.get(), 0);
    }
}
