use prometheus::{
    exponential_buckets, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

use std::fmt::{self, Debug};

const RESOURCE_TYPE_AND_OPERATION: &[&str] = &["resource_type", "operation"];

/// All metrics of one provider instance. Metric definitions are constant, so registering
/// them can only fail on a programming error.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    request_times: Histogram,
    transport_retries: IntCounter,
    reauth_count: IntCounter,
    waiter_polls: IntCounter,
    operations: IntCounterVec,
    operation_errors: IntCounterVec,
}

impl Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Metrics")
    }
}

impl Default for Metrics {
    fn default() -> Metrics {
        Metrics::new()
    }
}

impl Metrics {
    pub fn new() -> Metrics {
        let registry = Registry::new();

        let request_time_opts = HistogramOpts::new(
            "request_time",
            "Total time from sending a request to the cloud to receiving the response headers",
        )
        .subsystem("client")
        // 5, 10, 20, 40, 80, 160, 320, 640, 1280, 2560, 5120, 10240 ms
        .buckets(exponential_buckets(0.005, 2.0, 12).unwrap());
        let request_times = Histogram::with_opts(request_time_opts).unwrap();
        registry.register(Box::new(request_times.clone())).unwrap();

        let retry_opts = Opts::new(
            "transport_retries",
            "number of requests re-sent after a network level failure",
        )
        .subsystem("client");
        let transport_retries = IntCounter::with_opts(retry_opts).unwrap();
        registry
            .register(Box::new(transport_retries.clone()))
            .unwrap();

        let reauth_opts = Opts::new("reauthentications", "number of token renewals").subsystem("client");
        let reauth_count = IntCounter::with_opts(reauth_opts).unwrap();
        registry.register(Box::new(reauth_count.clone())).unwrap();

        let poll_opts = Opts::new("waiter_polls", "number of refresh calls made by waiters");
        let waiter_polls = IntCounter::with_opts(poll_opts).unwrap();
        registry.register(Box::new(waiter_polls.clone())).unwrap();

        let operation_opts = Opts::new("operations", "lifecycle operations by resource type");
        let operations = IntCounterVec::new(operation_opts, RESOURCE_TYPE_AND_OPERATION).unwrap();
        registry.register(Box::new(operations.clone())).unwrap();

        let error_opts = Opts::new("operation_errors", "failed lifecycle operations by resource type");
        let operation_errors = IntCounterVec::new(error_opts, RESOURCE_TYPE_AND_OPERATION).unwrap();
        registry.register(Box::new(operation_errors.clone())).unwrap();

        Metrics {
            registry,
            request_times,
            transport_retries,
            reauth_count,
            waiter_polls,
            operations,
            operation_errors,
        }
    }

    pub fn client_metrics(&self) -> ClientMetrics {
        ClientMetrics {
            request_times: self.request_times.clone(),
            transport_retries: self.transport_retries.clone(),
            reauth_count: self.reauth_count.clone(),
            waiter_polls: self.waiter_polls.clone(),
        }
    }

    pub fn operation_started(&self, resource_type: &str, operation: &str) {
        self.operations
            .with_label_values(&[resource_type, operation])
            .inc();
    }

    pub fn operation_failed(&self, resource_type: &str, operation: &str) {
        self.operation_errors
            .with_label_values(&[resource_type, operation])
            .inc();
    }

    pub fn encode_as_text(&self) -> Result<Vec<u8>, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::with_capacity(4096);
        encoder.encode(self.registry.gather().as_slice(), &mut buffer)?;
        Ok(buffer)
    }
}

/// The subset of metrics handed to clients, transports and waiters
#[derive(Clone)]
pub struct ClientMetrics {
    request_times: Histogram,
    transport_retries: IntCounter,
    reauth_count: IntCounter,
    waiter_polls: IntCounter,
}

impl Debug for ClientMetrics {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("ClientMetrics")
    }
}

impl Default for ClientMetrics {
    fn default() -> ClientMetrics {
        Metrics::new().client_metrics()
    }
}

impl ClientMetrics {
    pub fn request_started(&self) -> prometheus::HistogramTimer {
        self.request_times.start_timer()
    }

    pub fn retry(&self) {
        self.transport_retries.inc();
    }

    pub fn retry_count(&self) -> u64 {
        self.transport_retries.get() as u64
    }

    pub fn reauthenticated(&self) {
        self.reauth_count.inc();
    }

    pub fn waiter_poll(&self) {
        self.waiter_polls.inc();
    }

    pub fn waiter_poll_count(&self) -> u64 {
        self.waiter_polls.get() as u64
    }

    pub fn reauth_count(&self) -> u64 {
        self.reauth_count.get() as u64
    }
}
