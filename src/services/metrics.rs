//! Prometheus metrics registry for the control plane.

use prometheus::{
    histogram_opts, opts, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Registry,
    TextEncoder,
};

/// All counters, gauges and histograms the plane exports at `/metrics`.
pub struct MetricsService {
    registry: Registry,
    pub task_submitted_total: IntCounterVec,
    pub task_completed_total: IntCounterVec,
    pub task_failed_total: IntCounterVec,
    pub task_retry_total: IntCounterVec,
    pub task_duration_seconds: HistogramVec,
    pub task_queue_size: IntGauge,
    pub agent_spawned_total: IntCounterVec,
    pub agent_active: IntGaugeVec,
    pub webhook_delivery_total: IntCounterVec,
    pub http_requests_total: IntCounterVec,
}

impl MetricsService {
    pub fn new() -> Self {
        let registry = Registry::new();

        let task_submitted_total = IntCounterVec::new(
            opts!("corral_tasks_submitted_total", "Tasks submitted"),
            &["task_type", "priority"],
        )
        .expect("metric definition");
        let task_completed_total = IntCounterVec::new(
            opts!("corral_tasks_completed_total", "Tasks completed"),
            &["task_type", "status"],
        )
        .expect("metric definition");
        let task_failed_total = IntCounterVec::new(
            opts!("corral_tasks_failed_total", "Tasks failed"),
            &["task_type", "error_type"],
        )
        .expect("metric definition");
        let task_retry_total = IntCounterVec::new(
            opts!("corral_tasks_retried_total", "Task retries scheduled"),
            &["task_type"],
        )
        .expect("metric definition");
        let task_duration_seconds = HistogramVec::new(
            histogram_opts!(
                "corral_task_duration_seconds",
                "Wall-clock task duration",
                vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]
            ),
            &["task_type"],
        )
        .expect("metric definition");
        let task_queue_size = IntGauge::new("corral_task_queue_size", "Active tasks in the queue")
            .expect("metric definition");
        let agent_spawned_total = IntCounterVec::new(
            opts!("corral_agents_spawned_total", "Agents spawned"),
            &["agent_type"],
        )
        .expect("metric definition");
        let agent_active = IntGaugeVec::new(
            opts!("corral_agents_active", "Agents by type and status"),
            &["agent_type", "status"],
        )
        .expect("metric definition");
        let webhook_delivery_total = IntCounterVec::new(
            opts!("corral_webhook_deliveries_total", "Webhook delivery outcomes"),
            &["status"],
        )
        .expect("metric definition");
        let http_requests_total = IntCounterVec::new(
            opts!("corral_http_requests_total", "HTTP requests served"),
            &["method", "status"],
        )
        .expect("metric definition");

        for collector in [
            Box::new(task_submitted_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(task_completed_total.clone()),
            Box::new(task_failed_total.clone()),
            Box::new(task_retry_total.clone()),
            Box::new(task_duration_seconds.clone()),
            Box::new(task_queue_size.clone()),
            Box::new(agent_spawned_total.clone()),
            Box::new(agent_active.clone()),
            Box::new(webhook_delivery_total.clone()),
            Box::new(http_requests_total.clone()),
        ] {
            registry.register(collector).expect("metric registration");
        }

        Self {
            registry,
            task_submitted_total,
            task_completed_total,
            task_failed_total,
            task_retry_total,
            task_duration_seconds,
            task_queue_size,
            agent_spawned_total,
            agent_active,
            webhook_delivery_total,
            http_requests_total,
        }
    }

    /// Text exposition for the scrape endpoint.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for MetricsService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = MetricsService::new();
        metrics
            .task_submitted_total
            .with_label_values(&["research", "0"])
            .inc();
        metrics.task_queue_size.set(3);

        let text = metrics.render();
        assert!(text.contains("corral_tasks_submitted_total"));
        assert!(text.contains("corral_task_queue_size 3"));
    }
}
