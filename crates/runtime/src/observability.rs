//! Process-wide metric registries and trace-id propagation
//!
//! Registries are lazily created statics: the API server and the workers
//! share the same accessors, and each process exposes its own registry over
//! a `/metrics` endpoint in the Prometheus text format.

use std::sync::OnceLock;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use uuid::Uuid;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUEST_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static SSE_STARTUP_LATENCY: OnceLock<HistogramVec> = OnceLock::new();
static STAGE_DURATION: OnceLock<HistogramVec> = OnceLock::new();
static LLM_SUMMARY_ATTEMPTS: OnceLock<IntCounterVec> = OnceLock::new();
static LLM_SUMMARY_FALLBACKS: OnceLock<IntCounterVec> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

/// Duration of HTTP requests, labelled by method, matched path, and status.
pub fn http_request_duration() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION.get_or_init(|| {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                "devlens_http_request_duration_seconds",
                "Duration of HTTP requests.",
            ),
            &["method", "path", "status"],
        )
        .expect("valid histogram options");
        registry()
            .register(Box::new(histogram.clone()))
            .expect("histogram registers once");
        histogram
    })
}

/// Latency until the first SSE event is emitted, labelled by endpoint.
pub fn sse_startup_latency() -> &'static HistogramVec {
    SSE_STARTUP_LATENCY.get_or_init(|| {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                "devlens_sse_startup_latency_seconds",
                "Latency until first SSE event is emitted.",
            ),
            &["endpoint"],
        )
        .expect("valid histogram options");
        registry()
            .register(Box::new(histogram.clone()))
            .expect("histogram registers once");
        histogram
    })
}

/// Duration of pipeline stages, labelled by stage and outcome.
pub fn stage_duration() -> &'static HistogramVec {
    STAGE_DURATION.get_or_init(|| {
        let histogram = HistogramVec::new(
            HistogramOpts::new(
                "devlens_analysis_stage_duration_seconds",
                "Duration of analysis worker stages.",
            ),
            &["stage", "status"],
        )
        .expect("valid histogram options");
        registry()
            .register(Box::new(histogram.clone()))
            .expect("histogram registers once");
        histogram
    })
}

/// Completion attempts per provider and outcome.
pub fn llm_summary_attempts() -> &'static IntCounterVec {
    LLM_SUMMARY_ATTEMPTS.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new(
                "devlens_llm_summary_attempts_total",
                "Architecture summary completion attempts.",
            ),
            &["provider", "outcome"],
        )
        .expect("valid counter options");
        registry()
            .register(Box::new(counter.clone()))
            .expect("counter registers once");
        counter
    })
}

/// Times a failed provider was skipped in favor of the next option.
pub fn llm_summary_fallbacks() -> &'static IntCounterVec {
    LLM_SUMMARY_FALLBACKS.get_or_init(|| {
        let counter = IntCounterVec::new(
            Opts::new(
                "devlens_llm_summary_fallbacks_total",
                "Architecture summary provider fallbacks.",
            ),
            &["provider"],
        )
        .expect("valid counter options");
        registry()
            .register(Box::new(counter.clone()))
            .expect("counter registers once");
        counter
    })
}

pub fn observe_sse_startup(endpoint: &str, seconds: f64) {
    sse_startup_latency()
        .with_label_values(&[endpoint])
        .observe(seconds.max(0.0));
}

pub fn record_stage_duration(stage: &str, status: &str, seconds: f64) {
    stage_duration()
        .with_label_values(&[stage, status])
        .observe(seconds.max(0.0));
}

/// Render the registry in the Prometheus text exposition format.
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&registry().gather(), &mut buffer) {
        tracing::warn!(%error, "metrics encoding failed");
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Use the incoming `X-Trace-Id` when present, otherwise mint one.
pub fn resolve_trace_id(incoming: Option<&str>) -> String {
    match incoming.map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => Uuid::new_v4().simple().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_render_after_recording() {
        record_stage_duration("parsing", "success", 1.25);
        observe_sse_startup("/api/v1/repos/{repo_id}/status", 0.05);
        llm_summary_attempts()
            .with_label_values(&["openrouter", "error"])
            .inc();
        let rendered = render_metrics();
        assert!(rendered.contains("devlens_analysis_stage_duration_seconds"));
        assert!(rendered.contains("devlens_sse_startup_latency_seconds"));
        assert!(rendered.contains("devlens_llm_summary_attempts_total"));
    }

    #[test]
    fn trace_ids_prefer_the_incoming_header() {
        assert_eq!(resolve_trace_id(Some("abc123")), "abc123");
        assert_eq!(resolve_trace_id(Some("  abc123  ")), "abc123");
        let minted = resolve_trace_id(None);
        assert_eq!(minted.len(), 32);
        assert_ne!(resolve_trace_id(Some("")), "");
    }

    #[test]
    fn negative_durations_clamp_to_zero() {
        // Must not panic; prometheus histograms reject NaN but accept 0.
        record_stage_duration("embedding", "error", -5.0);
    }
}
