use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

use crate::mcp::protocol::methods;

/// Metric name prefix for all server metrics
const PREFIX: &str = "cms_mcp";

lazy_static! {
    // Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Session Metrics
    pub static ref MCP_SESSIONS_CREATED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_mcp_sessions_created_total"),
        "Total MCP sessions created"
    ).expect("Failed to create mcp_sessions_created_total metric");

    pub static ref MCP_SESSIONS_CLOSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_mcp_sessions_closed_total"), "Total MCP sessions closed"),
        &["reason"]
    ).expect("Failed to create mcp_sessions_closed_total metric");

    pub static ref MCP_ACTIVE_SSE_STREAMS: Gauge = Gauge::new(
        format!("{PREFIX}_mcp_active_sse_streams"),
        "Number of open SSE streams"
    ).expect("Failed to create mcp_active_sse_streams metric");

    // Queue Metrics
    pub static ref MCP_MESSAGES_ENQUEUED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_mcp_messages_enqueued_total"),
        "Total messages queued for SSE delivery"
    ).expect("Failed to create mcp_messages_enqueued_total metric");

    pub static ref MCP_MESSAGES_DELIVERED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_mcp_messages_delivered_total"),
        "Total messages written to SSE streams"
    ).expect("Failed to create mcp_messages_delivered_total metric");

    pub static ref MCP_MESSAGES_DROPPED_TOTAL: Counter = Counter::new(
        format!("{PREFIX}_mcp_messages_dropped_total"),
        "Messages dropped because a session queue was full"
    ).expect("Failed to create mcp_messages_dropped_total metric");

    pub static ref MCP_GC_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_mcp_gc_runs_total"), "Session garbage collection runs"),
        &["trigger"]
    ).expect("Failed to create mcp_gc_runs_total metric");

    // Dispatch Metrics
    pub static ref MCP_DISPATCH_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_mcp_dispatch_duration_seconds"),
            "Time spent in the message dispatcher"
        )
        .buckets(vec![0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
        &["method"]
    ).expect("Failed to create mcp_dispatch_duration_seconds metric");

    // Error Metrics
    pub static ref ERRORS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_errors_total"), "Total errors by type and endpoint"),
        &["error_type", "endpoint"]
    ).expect("Failed to create errors_total metric");

    pub static ref PROCESS_MEMORY_BYTES: Gauge = Gauge::new(
        format!("{PREFIX}_process_memory_bytes"),
        "Process memory usage in bytes"
    ).expect("Failed to create process_memory_bytes metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(MCP_SESSIONS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MCP_SESSIONS_CLOSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MCP_ACTIVE_SSE_STREAMS.clone()));
    let _ = REGISTRY.register(Box::new(MCP_MESSAGES_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MCP_MESSAGES_DELIVERED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MCP_MESSAGES_DROPPED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MCP_GC_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MCP_DISPATCH_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(ERRORS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(PROCESS_MEMORY_BYTES.clone()));

    tracing::info!("Metrics system initialized successfully");
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_session_created() {
    MCP_SESSIONS_CREATED_TOTAL.inc();
}

pub fn record_session_closed(reason: &str) {
    MCP_SESSIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
}

pub fn stream_opened() {
    MCP_ACTIVE_SSE_STREAMS.inc();
}

pub fn stream_closed() {
    MCP_ACTIVE_SSE_STREAMS.dec();
}

pub fn record_message_enqueued() {
    MCP_MESSAGES_ENQUEUED_TOTAL.inc();
}

pub fn record_message_dropped() {
    MCP_MESSAGES_DROPPED_TOTAL.inc();
}

pub fn record_messages_delivered(count: usize) {
    MCP_MESSAGES_DELIVERED_TOTAL.inc_by(count as f64);
}

pub fn record_gc_run(trigger: &str) {
    MCP_GC_RUNS_TOTAL.with_label_values(&[trigger]).inc();
}

/// Record time spent dispatching one message.
///
/// The method comes from the client, so anything outside the known set is
/// folded into `other` to keep label cardinality bounded.
pub fn record_dispatch(method: &str, duration: Duration) {
    let label = match method {
        methods::INITIALIZE
        | methods::INITIALIZED
        | methods::SHUTDOWN
        | methods::TOOLS_LIST
        | methods::TOOLS_CALL
        | methods::PING => method,
        m if m.starts_with(methods::NOTIFICATION_PREFIX) => "notification",
        _ => "other",
    };
    MCP_DISPATCH_DURATION_SECONDS
        .with_label_values(&[label])
        .observe(duration.as_secs_f64());
}

/// Record an error
pub fn record_error(error_type: &str, endpoint: &str) {
    ERRORS_TOTAL
        .with_label_values(&[error_type, endpoint])
        .inc();
}

/// Update process memory usage
pub fn update_memory_usage() {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if line.starts_with("VmRSS:") {
                    // RSS is reported in kB
                    if let Some(kb_str) = line.split_whitespace().nth(1) {
                        if let Ok(kb) = kb_str.parse::<f64>() {
                            PROCESS_MEMORY_BYTES.set(kb * 1024.0);
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    update_memory_usage();

    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
