//! Prometheus metrics for planner and runtime observability.
//!
//! Counts boxing plans per builder, unsupported edges and synthesized tasks,
//! and times kernel invocations inside actors.

use crate::utils::error::{HierflowError, Result};
use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global metrics registry
static REGISTRY: OnceLock<MetricsRegistry> = OnceLock::new();

/// Collection of all hierflow metrics
pub struct MetricsRegistry {
    pub registry: Registry,

    // Boxing metrics
    pub boxing_builds: CounterVec,
    pub boxing_unsupported: Counter,
    pub boxing_tasks_created: Counter,

    // Actor metrics
    pub actor_executions: Counter,
    pub kernel_duration: HistogramVec,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all metrics registered.
    ///
    /// Metric names and options are static, so construction only fails on a
    /// programming error.
    pub fn new() -> Self {
        let registry = Registry::new();

        let boxing_builds = CounterVec::new(
            Opts::new("hierflow_boxing_builds_total", "Boxing plans synthesized, by builder"),
            &["builder"],
        ).expect("valid metric definition");
        registry.register(Box::new(boxing_builds.clone())).expect("metric registered once");

        let boxing_unsupported = Counter::with_opts(
            Opts::new("hierflow_boxing_unsupported_total", "Tensor edges no builder could handle")
        ).expect("valid metric definition");
        registry.register(Box::new(boxing_unsupported.clone())).expect("metric registered once");

        let boxing_tasks_created = Counter::with_opts(
            Opts::new("hierflow_boxing_tasks_created_total", "Data-movement tasks created by boxing")
        ).expect("valid metric definition");
        registry.register(Box::new(boxing_tasks_created.clone())).expect("metric registered once");

        let actor_executions = Counter::with_opts(
            Opts::new("hierflow_actor_executions_total", "Actor execute calls")
        ).expect("valid metric definition");
        registry.register(Box::new(actor_executions.clone())).expect("metric registered once");

        let kernel_duration = HistogramVec::new(
            HistogramOpts::new("hierflow_kernel_seconds", "Kernel invocation time")
                .buckets(vec![0.00001, 0.0001, 0.001, 0.01, 0.1, 1.0]),
            &["op_name", "ward"],
        ).expect("valid metric definition");
        registry.register(Box::new(kernel_duration.clone())).expect("metric registered once");

        Self {
            registry,
            boxing_builds,
            boxing_unsupported,
            boxing_tasks_created,
            actor_executions,
            kernel_duration,
        }
    }

    /// Gather all metrics as Prometheus text format.
    pub fn gather(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| HierflowError::Config(format!("metrics encoding failed: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| HierflowError::Config(format!("metrics are not utf-8: {}", e)))
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the global metrics registry.
pub fn get_metrics() -> &'static MetricsRegistry {
    REGISTRY.get_or_init(MetricsRegistry::new)
}

/// Record a successful boxing plan.
pub fn record_boxing_build(builder: &str, tasks_created: usize) {
    let m = get_metrics();
    m.boxing_builds.with_label_values(&[builder]).inc();
    m.boxing_tasks_created.inc_by(tasks_created as f64);
}

/// Record an edge that could not be boxed.
pub fn record_boxing_unsupported() {
    get_metrics().boxing_unsupported.inc();
}

/// Record one kernel invocation.
pub fn record_kernel_invocation(op_name: &str, ward: &str, duration_secs: f64) {
    get_metrics()
        .kernel_duration
        .with_label_values(&[op_name, ward])
        .observe(duration_secs);
}

/// Start a simple HTTP server to expose metrics on the given port.
#[cfg(feature = "metrics-server")]
pub async fn start_metrics_server(port: u16) -> std::io::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tracing::{info, warn};

    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!(port = port, "Metrics server started");

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let _ = socket.read(&mut buf).await;

            let metrics = match get_metrics().gather() {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "Failed to gather metrics");
                    String::new()
                }
            };
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
                metrics.len(),
                metrics
            );

            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}
