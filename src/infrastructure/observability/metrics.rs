//! Prometheus metrics for the satellite. All metrics carry the `arbsat_`
//! prefix; the registry is text-encoded on demand for push-based export.

use prometheus::{
    CounterVec, Gauge, GaugeVec, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Total portfolio value in USD
    pub portfolio_value_usd: GenericGauge<AtomicF64>,
    /// Per-chain portfolio value in USD
    pub chain_value_usd: GenericGaugeVec<AtomicF64>,
    /// Detector scan latency in seconds
    pub detector_scan_seconds: Histogram,
    /// Opportunities by outcome (detected / validated / executed)
    pub opportunities_total: CounterVec,
    /// Coordinated transactions by kind and terminal state
    pub transactions_total: CounterVec,
    /// Transactions currently in coordinating or executing
    pub active_transactions: GenericGauge<AtomicF64>,
    /// Synchronization round duration in seconds
    pub sync_duration_seconds: Histogram,
    /// Bridge operational status (1 = up)
    pub bridge_operational: GenericGaugeVec<AtomicF64>,
    /// Events published on the satellite bus
    pub events_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let portfolio_value_usd = Gauge::with_opts(Opts::new(
            "arbsat_portfolio_value_usd",
            "Total portfolio value in USD",
        ))?;
        registry.register(Box::new(portfolio_value_usd.clone()))?;

        let chain_value_usd = GaugeVec::new(
            Opts::new("arbsat_chain_value_usd", "Portfolio value per chain in USD"),
            &["chain"],
        )?;
        registry.register(Box::new(chain_value_usd.clone()))?;

        let detector_scan_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "arbsat_detector_scan_seconds",
                "Full-matrix detection scan latency",
            )
            .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 0.2, 0.3, 0.5, 1.0]),
        )?;
        registry.register(Box::new(detector_scan_seconds.clone()))?;

        let opportunities_total = CounterVec::new(
            Opts::new("arbsat_opportunities_total", "Opportunities by stage"),
            &["stage"],
        )?;
        registry.register(Box::new(opportunities_total.clone()))?;

        let transactions_total = CounterVec::new(
            Opts::new(
                "arbsat_transactions_total",
                "Coordinated transactions by kind and terminal state",
            ),
            &["kind", "state"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let active_transactions = Gauge::with_opts(Opts::new(
            "arbsat_active_transactions",
            "Transactions in coordinating or executing",
        ))?;
        registry.register(Box::new(active_transactions.clone()))?;

        let sync_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "arbsat_sync_duration_seconds",
                "Cross-chain sync round duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )?;
        registry.register(Box::new(sync_duration_seconds.clone()))?;

        let bridge_operational = GaugeVec::new(
            Opts::new("arbsat_bridge_operational", "Bridge operational status"),
            &["bridge"],
        )?;
        registry.register(Box::new(bridge_operational.clone()))?;

        let events_total = CounterVec::new(
            Opts::new("arbsat_events_total", "Events published on the bus"),
            &["event"],
        )?;
        registry.register(Box::new(events_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            portfolio_value_usd,
            chain_value_usd,
            detector_scan_seconds,
            opportunities_total,
            transactions_total,
            active_transactions,
            sync_duration_seconds,
            bridge_operational,
            events_total,
        })
    }

    /// Text exposition of the whole registry, for push-based export.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        Ok(encoder.encode_to_string(&self.registry.gather())?)
    }
}
