use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally. Used by
/// tests that render the scrape endpoint.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

fn register_metrics() {
    // Pre-register counters so they appear even before the first increment.
    for kind in ["trade", "signal"] {
        counter!("copy_events_detected", "kind" => kind).absolute(0);
        counter!("copy_records_created", "kind" => kind).absolute(0);
    }
    counter!("jobs_enqueued").absolute(0);
    counter!("jobs_duplicate").absolute(0);
    counter!("jobs_dead_lettered").absolute(0);
    counter!("records_skipped").absolute(0);
    counter!("orders_settled").absolute(0);
    counter!("redemptions_succeeded").absolute(0);
    counter!("redemptions_failed").absolute(0);

    gauge!("jobs_in_flight").set(0.0);

    // Histogram is lazily created on first record; force creation.
    for kind in ["trade", "signal"] {
        histogram!("monitor_cycle_seconds", "kind" => kind).record(0.0);
    }
}
