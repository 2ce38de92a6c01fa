// metrics.rs - Prometheus counters for the pipeline
// Numan Thabit 2026
use prometheus::{IntCounter, IntCounterVec, IntGauge, Registry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    pub decode_submitted: IntCounter,
    pub decode_accepted: IntCounter,
    pub decode_drops: IntCounterVec,
    pub fairq_dispatched: IntCounter,
    pub fairq_cancels: IntCounter,
    pub fairq_queue_depth: IntGauge,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new_custom(Some("tunnelport".into()), None)?;

        macro_rules! register_counter {
            ($name:expr, $help:expr) => {{
                let counter = IntCounter::new($name, $help)?;
                registry.register(Box::new(counter.clone()))?;
                counter
            }};
        }

        macro_rules! register_counter_vec {
            ($name:expr, $help:expr, $labels:expr) => {{
                let counter = IntCounterVec::new(prometheus::Opts::new($name, $help), $labels)?;
                registry.register(Box::new(counter.clone()))?;
                counter
            }};
        }

        macro_rules! register_gauge {
            ($name:expr, $help:expr) => {{
                let gauge = IntGauge::new($name, $help)?;
                registry.register(Box::new(gauge.clone()))?;
                gauge
            }};
        }

        let decode_submitted =
            register_counter!("decode_submitted", "Datagrams handed to decode workers");
        let decode_accepted =
            register_counter!("decode_accepted", "Datagrams decoded and forwarded");
        let decode_drops = register_counter_vec!(
            "decode_drops_total",
            "Datagrams dropped during decode, by reason",
            &["reason"]
        );
        let fairq_dispatched =
            register_counter!("fairq_dispatched", "Packets promoted to the sending slot");
        let fairq_cancels =
            register_counter!("fairq_cancels", "Cancel requests forwarded downstream");
        let fairq_queue_depth =
            register_gauge!("fairq_queue_depth", "Flows currently queued in the heap");

        Ok(Self {
            registry,
            decode_submitted,
            decode_accepted,
            decode_drops,
            fairq_dispatched,
            fairq_cancels,
            fairq_queue_depth,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}
