use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub ride_transitions_total: IntCounterVec,
    pub transition_latency_seconds: HistogramVec,
    pub fare_estimates_total: IntCounterVec,
    pub active_rides: IntGauge,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let ride_transitions_total = IntCounterVec::new(
            Opts::new(
                "ride_transitions_total",
                "Ride transitions by kind and outcome",
            ),
            &["transition", "outcome"],
        )
        .expect("valid ride_transitions_total metric");

        let transition_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "transition_latency_seconds",
                "Time from submitting a transition to its confirmation or rejection",
            ),
            &["transition"],
        )
        .expect("valid transition_latency_seconds metric");

        let fare_estimates_total = IntCounterVec::new(
            Opts::new("fare_estimates_total", "Fare estimates by outcome"),
            &["outcome"],
        )
        .expect("valid fare_estimates_total metric");

        let active_rides = IntGauge::new("active_rides", "Rides currently held by this session")
            .expect("valid active_rides metric");

        registry
            .register(Box::new(ride_transitions_total.clone()))
            .expect("register ride_transitions_total");
        registry
            .register(Box::new(transition_latency_seconds.clone()))
            .expect("register transition_latency_seconds");
        registry
            .register(Box::new(fare_estimates_total.clone()))
            .expect("register fare_estimates_total");
        registry
            .register(Box::new(active_rides.clone()))
            .expect("register active_rides");

        Self {
            registry,
            ride_transitions_total,
            transition_latency_seconds,
            fare_estimates_total,
            active_rides,
        }
    }

    pub fn record_transition(&self, transition: &str, outcome: &str) {
        self.ride_transitions_total
            .with_label_values(&[transition, outcome])
            .inc();
    }

    pub fn record_estimate(&self, outcome: &str) {
        self.fare_estimates_total.with_label_values(&[outcome]).inc();
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
