use std::sync::Arc;

use prometheus::{
    Counter, CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    proto::MetricFamily,
};

use lci_core::{MetricsBackend, RequeueReason};
use lci_model::JobStatus;

const NAMESPACE: &str = "lci";

/// Build jobs run from seconds to hours.
const DURATION_BUCKETS: [f64; 10] = [1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0];

/// Prometheus implementation of [`MetricsBackend`].
///
/// Label values are bounded: `source` is a sandbox kind or `"queue"`, `status`
/// a terminal [`JobStatus`], `reason` a [`RequeueReason`].
#[derive(Clone)]
pub struct PrometheusMetrics {
    jobs_started: CounterVec,
    jobs_finished: CounterVec,
    job_duration: HistogramVec,
    sandbox_errors: CounterVec,
    requeues: CounterVec,
    claims_rejected: Counter,
    registry: Arc<Registry>,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::new_with_registry(Arc::new(Registry::new()))
    }

    /// Registers the collectors on an existing registry.
    pub fn new_with_registry(registry: Arc<Registry>) -> Result<Self, prometheus::Error> {
        let jobs_started = CounterVec::new(
            Opts::new("jobs_started_total", "Build jobs handed to a sandbox").namespace(NAMESPACE),
            &["source"],
        )?;
        registry.register(Box::new(jobs_started.clone()))?;

        let jobs_finished = CounterVec::new(
            Opts::new("jobs_finished_total", "Build jobs that reached a terminal state")
                .namespace(NAMESPACE),
            &["source", "status"],
        )?;
        registry.register(Box::new(jobs_finished.clone()))?;

        let job_duration = HistogramVec::new(
            HistogramOpts::new("job_duration_seconds", "Build job run time in seconds")
                .namespace(NAMESPACE)
                .buckets(DURATION_BUCKETS.to_vec()),
            &["source"],
        )?;
        registry.register(Box::new(job_duration.clone()))?;

        let sandbox_errors = CounterVec::new(
            Opts::new("sandbox_errors_total", "Sandbox setup and teardown failures")
                .namespace(NAMESPACE),
            &["source", "error_kind"],
        )?;
        registry.register(Box::new(sandbox_errors.clone()))?;

        let requeues = CounterVec::new(
            Opts::new("requeues_total", "Running jobs put back at the queue head")
                .namespace(NAMESPACE),
            &["reason"],
        )?;
        registry.register(Box::new(requeues.clone()))?;

        let claims_rejected = Counter::with_opts(
            Opts::new("claims_rejected_total", "Claimed jobs refused by a full execution pool")
                .namespace(NAMESPACE),
        )?;
        registry.register(Box::new(claims_rejected.clone()))?;

        Ok(Self {
            jobs_started,
            jobs_finished,
            job_duration,
            sandbox_errors,
            requeues,
            claims_rejected,
            registry,
        })
    }

    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition of every registered metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.gather(), &mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

impl MetricsBackend for PrometheusMetrics {
    fn record_job_started(&self, source: &str) {
        self.jobs_started.with_label_values(&[source]).inc();
    }

    fn record_job_finished(&self, source: &str, status: JobStatus, duration_ms: u64) {
        self.jobs_finished
            .with_label_values(&[source, status.as_label()])
            .inc();
        self.job_duration
            .with_label_values(&[source])
            .observe(duration_ms as f64 / 1000.0);
    }

    fn record_sandbox_error(&self, source: &str, error_kind: &str) {
        self.sandbox_errors
            .with_label_values(&[source, error_kind])
            .inc();
    }

    fn record_requeue(&self, reason: RequeueReason) {
        self.requeues.with_label_values(&[reason.as_label()]).inc();
    }

    fn record_claim_rejected(&self) {
        self.claims_rejected.inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family<'a>(families: &'a [MetricFamily], name: &str) -> &'a MetricFamily {
        families
            .iter()
            .find(|f| f.name() == name)
            .unwrap_or_else(|| panic!("metric {name} not found"))
    }

    #[test]
    fn finished_jobs_are_split_by_status() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_job_finished("docker", JobStatus::Completed, 1_500);
        metrics.record_job_finished("docker", JobStatus::Failed, 200);
        metrics.record_job_finished("queue", JobStatus::Cancelled, 0);

        let families = metrics.gather();
        assert_eq!(family(&families, "lci_jobs_finished_total").get_metric().len(), 3);
        assert_eq!(family(&families, "lci_job_duration_seconds").get_metric().len(), 2);
    }

    #[test]
    fn started_and_sandbox_errors_are_counted() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_job_started("process");
        metrics.record_job_started("process");
        metrics.record_sandbox_error("docker", "spawn_failed");

        let families = metrics.gather();
        assert_eq!(family(&families, "lci_sandbox_errors_total").get_metric().len(), 1);
        let text = metrics.render().unwrap();
        assert!(text.contains(r#"lci_jobs_started_total{source="process"} 2"#), "{text}");
    }

    #[test]
    fn render_contains_requeues_and_rejections() {
        let metrics = PrometheusMetrics::new().unwrap();
        metrics.record_requeue(RequeueReason::AgentLost);
        metrics.record_requeue(RequeueReason::Paused);
        metrics.record_claim_rejected();

        let text = metrics.render().unwrap();
        assert!(text.contains(r#"lci_requeues_total{reason="agent_lost"} 1"#), "{text}");
        assert!(text.contains(r#"lci_requeues_total{reason="paused"} 1"#), "{text}");
        assert!(text.contains("lci_claims_rejected_total 1"), "{text}");
    }

    #[test]
    fn shared_registry_sees_the_collectors() {
        let registry = Arc::new(Registry::new());
        let metrics = PrometheusMetrics::new_with_registry(registry.clone()).unwrap();
        metrics.record_claim_rejected();
        assert!(!registry.gather().is_empty());
        assert!(PrometheusMetrics::new_with_registry(registry).is_err());
    }
}
