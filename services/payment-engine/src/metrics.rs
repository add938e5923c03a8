use lazy_static::lazy_static;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Inbound callbacks
    pub static ref CALLBACKS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("payment_callbacks_total", "Gateway callbacks by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    pub static ref RECONCILE_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("payment_reconcile_duration_seconds", "Time to reconcile one confirmation")
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0])
    ).expect("metric can be created");

    // Ledger writes
    pub static ref PAYMENTS_RECORDED: IntCounterVec = IntCounterVec::new(
        Opts::new("payments_recorded_total", "Payments written to the ledger"),
        &["method", "status"]
    ).expect("metric can be created");

    pub static ref PAYMENTS_ASSIGNED: IntCounterVec = IntCounterVec::new(
        Opts::new("payments_assigned_total", "Manual assignment attempts by result"),
        &["result"]
    ).expect("metric can be created");

    // Outbound gateway calls
    pub static ref GATEWAY_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("gateway_requests_total", "Daraja API calls by operation and result"),
        &["operation", "result"]
    ).expect("metric can be created");
}

/// Register all metrics with the given registry
pub fn register_metrics(registry: &Registry) -> Result<(), prometheus::Error> {
    registry.register(Box::new(CALLBACKS_TOTAL.clone()))?;
    registry.register(Box::new(RECONCILE_DURATION.clone()))?;
    registry.register(Box::new(PAYMENTS_RECORDED.clone()))?;
    registry.register(Box::new(PAYMENTS_ASSIGNED.clone()))?;
    registry.register(Box::new(GATEWAY_REQUESTS.clone()))?;
    Ok(())
}

pub fn record_callback(outcome: &str) {
    CALLBACKS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_payment(method: &str, status: &str) {
    PAYMENTS_RECORDED.with_label_values(&[method, status]).inc();
}

pub fn record_assignment(result: &str) {
    PAYMENTS_ASSIGNED.with_label_values(&[result]).inc();
}

pub fn record_gateway_call(operation: &str, result: &str) {
    GATEWAY_REQUESTS.with_label_values(&[operation, result]).inc();
}

/// Generate metrics output in Prometheus text format
pub fn metrics_handler() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
