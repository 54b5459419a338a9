// Prometheus metrics for the toolguard execution core
//
// Exposed on the ops server's /metrics endpoint:
// - Executions by outcome (counter) and duration (histogram)
// - Active managed processes (gauge)
// - Spawns and spawn failures (counters)
// - Validation, capacity and resource-limit rejections (counters)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

lazy_static! {
    pub static ref REGISTRY: Arc<Registry> = Arc::new(Registry::new());

    // Execution metrics
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("executions_total", "Total number of execute() calls by outcome"),
        &["outcome"]
    ).expect("Failed to create executions total metric");

    pub static ref EXECUTION_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new("execution_duration_seconds", "Execution wall-clock time in seconds")
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 60.0, 300.0]),
        &["outcome"]
    ).expect("Failed to create execution duration metric");

    // Process metrics
    pub static ref ACTIVE_PROCESSES: IntGauge = IntGauge::new(
        "active_processes",
        "Number of managed child processes currently running"
    ).expect("Failed to create active processes metric");

    pub static ref PROCESSES_SPAWNED_TOTAL: IntCounter = IntCounter::new(
        "processes_spawned_total",
        "Total number of spawn attempts"
    ).expect("Failed to create processes spawned metric");

    pub static ref SPAWN_ERRORS_TOTAL: IntCounter = IntCounter::new(
        "spawn_errors_total",
        "Total number of spawn attempts refused by the OS"
    ).expect("Failed to create spawn errors metric");

    // Rejection metrics
    pub static ref VALIDATION_REJECTIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("validation_rejections_total", "Commands rejected by validation"),
        &["risk_class"]
    ).expect("Failed to create validation rejections metric");

    pub static ref CAPACITY_REJECTIONS_TOTAL: IntCounter = IntCounter::new(
        "capacity_rejections_total",
        "Executions refused because the concurrency ceiling was reached"
    ).expect("Failed to create capacity rejections metric");

    pub static ref RESOURCE_VIOLATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("resource_violations_total", "Processes terminated for exceeding a resource limit"),
        &["limit"]
    ).expect("Failed to create resource violations metric");
}

/// Register every metric with [`REGISTRY`]
///
/// Safe to call more than once; already-registered metrics are skipped.
pub fn init() -> prometheus::Result<()> {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(EXECUTIONS_TOTAL.clone()),
        Box::new(EXECUTION_DURATION_SECONDS.clone()),
        Box::new(ACTIVE_PROCESSES.clone()),
        Box::new(PROCESSES_SPAWNED_TOTAL.clone()),
        Box::new(SPAWN_ERRORS_TOTAL.clone()),
        Box::new(VALIDATION_REJECTIONS_TOTAL.clone()),
        Box::new(CAPACITY_REJECTIONS_TOTAL.clone()),
        Box::new(RESOURCE_VIOLATIONS_TOTAL.clone()),
    ];

    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Record the outcome of one execute() call
pub fn record_execution(outcome: &str, duration_secs: f64) {
    EXECUTIONS_TOTAL.with_label_values(&[outcome]).inc();
    EXECUTION_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration_secs);
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
        assert!(init().is_ok());
        assert!(init().is_ok());
    }

    #[test]
    fn test_record_execution() {
        let _ = init();
        let before = EXECUTIONS_TOTAL.with_label_values(&["test_outcome"]).get();
        record_execution("test_outcome", 0.25);
        assert_eq!(
            EXECUTIONS_TOTAL.with_label_values(&["test_outcome"]).get(),
            before + 1
        );
    }

    #[test]
    fn test_gather_contains_registered_metrics() {
        let _ = init();
        CAPACITY_REJECTIONS_TOTAL.inc();
        VALIDATION_REJECTIONS_TOTAL
            .with_label_values(&["COMMAND_INJECTION"])
            .inc();

        let text = gather_metrics().unwrap();
        assert!(text.contains("capacity_rejections_total"));
        assert!(text.contains("validation_rejections_total"));
    }
}
