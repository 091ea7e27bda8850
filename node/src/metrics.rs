//! # Prometheus Metrics
//!
//! Exposes operational metrics for the vault engine. Scraped by Prometheus
//! at the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so they
//! do not collide with any default global registry consumers.
//!
//! Commit-driven metrics are fed by [`BroadcastSink`], which the engine
//! calls once per journal record. Rejections and latencies are recorded by
//! the API handlers, since rejected calls never reach the journal.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use tokio::sync::broadcast;

use warden_protocol::{ErrorCategory, EventKind, EventRecord, EventSink};

/// Holds all Prometheus metric handles for the node.
#[derive(Clone)]
pub struct NodeMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Number of vaults held by the engine.
    pub vaults: IntGauge,
    /// Total number of proposals created.
    pub proposals_created_total: IntCounter,
    /// Total number of accepted approvals.
    pub approvals_total: IntCounter,
    /// Executed proposals, labelled by action kind.
    pub executions_total: IntCounterVec,
    /// Total number of cancelled proposals.
    pub cancellations_total: IntCounter,
    /// Total number of deposits credited.
    pub deposits_total: IntCounter,
    /// Rejected engine calls, labelled by error category.
    pub rejections_total: IntCounterVec,
    /// Sequence number of the latest journal record.
    pub journal_sequence: IntGauge,
    /// Time spent inside `execute`, including the durable commit.
    pub execution_latency_seconds: Histogram,
}

impl NodeMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("warden".into()), None)?;

        let vaults = IntGauge::new("vaults", "Number of vaults held by the engine")?;
        registry.register(Box::new(vaults.clone()))?;

        let proposals_created_total =
            IntCounter::new("proposals_created_total", "Total number of proposals created")?;
        registry.register(Box::new(proposals_created_total.clone()))?;

        let approvals_total =
            IntCounter::new("approvals_total", "Total number of accepted approvals")?;
        registry.register(Box::new(approvals_total.clone()))?;

        let executions_total = IntCounterVec::new(
            Opts::new("executions_total", "Executed proposals by action kind"),
            &["action"],
        )?;
        registry.register(Box::new(executions_total.clone()))?;

        let cancellations_total = IntCounter::new(
            "cancellations_total",
            "Total number of proposals cancelled by their proposer",
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let deposits_total = IntCounter::new("deposits_total", "Total number of deposits")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("rejections_total", "Rejected engine calls by error category"),
            &["category"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let journal_sequence = IntGauge::new(
            "journal_sequence",
            "Sequence number of the latest committed event",
        )?;
        registry.register(Box::new(journal_sequence.clone()))?;

        let execution_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "execution_latency_seconds",
                "Latency of proposal execution including the durable commit",
            )
            .buckets(vec![
                0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
            ]),
        )?;
        registry.register(Box::new(execution_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            vaults,
            proposals_created_total,
            approvals_total,
            executions_total,
            cancellations_total,
            deposits_total,
            rejections_total,
            journal_sequence,
            execution_latency_seconds,
        })
    }

    /// Counts a rejected engine call.
    pub fn record_rejection(&self, category: ErrorCategory) {
        self.rejections_total
            .with_label_values(&[category.as_str()])
            .inc();
    }

    /// Updates the commit-driven metrics for one journal record.
    pub fn record_event(&self, record: &EventRecord) {
        self.journal_sequence.set(record.sequence as i64);
        match &record.kind {
            EventKind::VaultCreated { .. } => self.vaults.inc(),
            EventKind::Deposited { .. } => self.deposits_total.inc(),
            EventKind::ProposalCreated { .. } => self.proposals_created_total.inc(),
            EventKind::ProposalApproved { .. } => self.approvals_total.inc(),
            EventKind::ProposalExecuted { action } => self
                .executions_total
                .with_label_values(&[action.kind().as_str()])
                .inc(),
            EventKind::ProposalCancelled => self.cancellations_total.inc(),
            EventKind::TransferCompleted { .. }
            | EventKind::OwnerAdded { .. }
            | EventKind::OwnerRemoved { .. }
            | EventKind::ThresholdUpdated { .. } => {}
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

/// Shared metrics state passed to axum handlers via extension.
pub type SharedMetrics = Arc<NodeMetrics>;

/// Engine sink that feeds metrics and fans records out to WebSocket
/// subscribers.
///
/// `broadcast::Sender::send` never blocks, so this is safe to run under the
/// engine's journal lock.
pub struct BroadcastSink {
    metrics: SharedMetrics,
    tx: broadcast::Sender<EventRecord>,
}

impl BroadcastSink {
    pub fn new(metrics: SharedMetrics, tx: broadcast::Sender<EventRecord>) -> Self {
        Self { metrics, tx }
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, record: &EventRecord) {
        self.metrics.record_event(record);
        // No subscribers is the common case.
        let _ = self.tx.send(record.clone());
    }
}

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
