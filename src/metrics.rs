//! Prometheus counters/histograms for the idempotency gate, outbox
//! publisher, and saga orchestrator. One process-wide `Metrics` handle is
//! constructed at startup and cloned into whichever components need to
//! record against it.

use prometheus::{CounterVec, HistogramVec, Opts, Registry};

#[derive(Clone)]
pub struct Metrics {
    pub idempotency_outcomes: CounterVec,
    pub outbox_publish_attempts: CounterVec,
    pub outbox_publish_failures: CounterVec,
    pub outbox_dead_letters: CounterVec,
    pub saga_completions: CounterVec,
    pub saga_compensations: CounterVec,
    pub saga_compensation_failures: CounterVec,
    pub request_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Registers every metric against `registry`. Called once at startup;
    /// panics on duplicate registration, which would indicate a bug rather
    /// than something a caller should recover from.
    pub fn new(registry: &Registry) -> Self {
        let counter = |name: &str, help: &str, labels: &[&str]| -> CounterVec {
            let c = CounterVec::new(Opts::new(name, help), labels)
                .expect("metric options are valid at startup");
            registry.register(Box::new(c.clone())).expect("metric registration is infallible at startup");
            c
        };

        let idempotency_outcomes = counter(
            "fluxpay_idempotency_outcomes_total",
            "Idempotency gate outcomes by kind",
            &["outcome"],
        );
        let outbox_publish_attempts = counter(
            "fluxpay_outbox_publish_attempts_total",
            "Outbox rows dispatched to the broker",
            &["aggregate_type"],
        );
        let outbox_publish_failures = counter(
            "fluxpay_outbox_publish_failures_total",
            "Outbox rows that failed dispatch and were retried",
            &["aggregate_type"],
        );
        let outbox_dead_letters = counter(
            "fluxpay_outbox_dead_letters_total",
            "Outbox rows dead-lettered after exhausting retries",
            &["aggregate_type"],
        );
        let saga_completions = counter(
            "fluxpay_saga_completions_total",
            "Sagas that completed successfully",
            &["saga_type"],
        );
        let saga_compensations = counter(
            "fluxpay_saga_compensations_total",
            "Sagas that rolled back via compensation",
            &["saga_type"],
        );
        let saga_compensation_failures = counter(
            "fluxpay_saga_compensation_failures_total",
            "Sagas whose compensation itself failed, left FAILED for operator intervention",
            &["saga_type"],
        );

        let request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "fluxpay_request_duration_seconds",
                "HTTP request latency by route and status class",
            ),
            &["route", "status_class"],
        )
        .expect("histogram options are valid at startup");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .expect("metric registration is infallible at startup");

        Self {
            idempotency_outcomes,
            outbox_publish_attempts,
            outbox_publish_failures,
            outbox_dead_letters,
            saga_completions,
            saga_compensations,
            saga_compensation_failures,
            request_duration_seconds,
        }
    }
}
