//! Prometheus metrics for the ingestion core.
//!
//! Counters and gauges are process-global (registered once via `Lazy`),
//! following the single-registry convention. The JSON statistics endpoint
//! reads values back from the same registry rather than keeping a parallel
//! set of atomics.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, register_int_gauge_vec,
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, TextEncoder,
};
use serde::Serialize;

use crate::parser::RejectReason;
use crate::supervisor::{FailureKind, SupervisorState};
use crate::tick::SubscriberKind;

const LABEL_REASON: &str = "reason";
const LABEL_KIND: &str = "kind";

static FRAMES_READ: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_frames_read_total",
        "Socket reads consumed from the upstream feed"
    )
    .expect("Failed to register frames_read metric")
});

static RECORDS_EMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_records_emitted_total",
        "Complete records emitted by the frame reader"
    )
    .expect("Failed to register records_emitted metric")
});

static PARSE_ACCEPTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_parse_accepted_total",
        "Records parsed into accepted ticks"
    )
    .expect("Failed to register parse_accepted metric")
});

static PARSE_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickfan_parse_rejected_total",
        "Records rejected by the parser, by reason",
        &[LABEL_REASON]
    )
    .expect("Failed to register parse_rejected metric")
});

static BAD_NUMERIC_FIELDS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_bad_numeric_fields_total",
        "Numeric fields that failed to parse and were zeroed on accepted ticks"
    )
    .expect("Failed to register bad_numeric_fields metric")
});

static BUFFER_RESYNCS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_buffer_resyncs_total",
        "Frame buffer overflows resolved by discarding the oldest half"
    )
    .expect("Failed to register buffer_resyncs metric")
});

static RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_reconnects_total",
        "Upstream reconnect attempts after a streaming failure"
    )
    .expect("Failed to register reconnects metric")
});

static UPSTREAM_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickfan_upstream_failures_total",
        "Upstream connection failures, by kind",
        &[LABEL_KIND]
    )
    .expect("Failed to register upstream_failures metric")
});

static DROPPED_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickfan_dropped_ticks_total",
        "Ticks dropped at full subscriber outboxes, by subscriber kind",
        &[LABEL_KIND]
    )
    .expect("Failed to register dropped_ticks metric")
});

static EVICTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "tickfan_evictions_total",
        "Subscribers forcibly cancelled after lagging too long, by kind",
        &[LABEL_KIND]
    )
    .expect("Failed to register evictions metric")
});

static MALFORMED_CLIENT_MESSAGES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "tickfan_malformed_client_messages_total",
        "Unparseable control messages received from WebSocket peers"
    )
    .expect("Failed to register malformed_client_messages metric")
});

static SYMBOLS_KNOWN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("tickfan_symbols_known", "Distinct symbols in the last-value cache")
        .expect("Failed to register symbols_known metric")
});

static SUBSCRIBERS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "tickfan_subscribers",
        "Registered subscribers, by kind",
        &[LABEL_KIND]
    )
    .expect("Failed to register subscribers metric")
});

static LAST_TICK_TIMESTAMP: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tickfan_last_tick_timestamp_seconds",
        "Wall-clock epoch seconds of the most recently accepted tick"
    )
    .expect("Failed to register last_tick_timestamp metric")
});

static SUPERVISOR_STATE: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "tickfan_supervisor_state",
        "Upstream connection state (0=disconnected 1=connecting 2=authenticating 3=streaming 4=backoff)"
    )
    .expect("Failed to register supervisor_state metric")
});

pub fn inc_frames_read() {
    FRAMES_READ.inc();
}

pub fn inc_records_emitted() {
    RECORDS_EMITTED.inc();
}

pub fn inc_parse_accepted() {
    PARSE_ACCEPTED.inc();
}

pub fn inc_parse_rejected(reason: RejectReason) {
    PARSE_REJECTED.with_label_values(&[reason.as_str()]).inc();
}

pub fn parse_rejected_count(reason: RejectReason) -> u64 {
    PARSE_REJECTED.with_label_values(&[reason.as_str()]).get()
}

pub fn add_bad_numeric_fields(count: u64) {
    BAD_NUMERIC_FIELDS.inc_by(count);
}

pub fn inc_buffer_resyncs() {
    BUFFER_RESYNCS.inc();
}

pub fn inc_reconnects() {
    RECONNECTS.inc();
}

pub fn inc_upstream_failure(kind: FailureKind) {
    UPSTREAM_FAILURES.with_label_values(&[kind.as_str()]).inc();
}

pub fn inc_dropped_tick(kind: SubscriberKind) {
    DROPPED_TICKS.with_label_values(&[kind.as_str()]).inc();
}

pub fn inc_eviction(kind: SubscriberKind) {
    EVICTIONS.with_label_values(&[kind.as_str()]).inc();
}

pub fn inc_malformed_client_message() {
    MALFORMED_CLIENT_MESSAGES.inc();
}

pub fn set_symbols_known(count: usize) {
    SYMBOLS_KNOWN.set(count as i64);
}

pub fn inc_subscribers(kind: SubscriberKind) {
    SUBSCRIBERS.with_label_values(&[kind.as_str()]).inc();
}

pub fn dec_subscribers(kind: SubscriberKind) {
    SUBSCRIBERS.with_label_values(&[kind.as_str()]).dec();
}

pub fn subscriber_count(kind: SubscriberKind) -> i64 {
    SUBSCRIBERS.with_label_values(&[kind.as_str()]).get()
}

pub fn set_last_tick_timestamp(epoch_secs: i64) {
    LAST_TICK_TIMESTAMP.set(epoch_secs);
}

pub fn set_supervisor_state(state: SupervisorState) {
    SUPERVISOR_STATE.set(state.code());
}

pub fn supervisor_state() -> SupervisorState {
    SupervisorState::from_code(SUPERVISOR_STATE.get())
}

/// Point-in-time snapshot of the statistics surface, serialised as the
/// body of the JSON stats endpoint.
#[derive(Debug, Serialize)]
pub struct StatsSnapshot {
    pub frames_read: u64,
    pub records_emitted: u64,
    pub parse_accepted: u64,
    pub parse_rejected: BTreeMap<&'static str, u64>,
    pub bad_numeric_fields: u64,
    pub buffer_resyncs: u64,
    pub reconnects: u64,
    pub upstream_failures: BTreeMap<&'static str, u64>,
    pub dropped_ticks: BTreeMap<&'static str, u64>,
    pub evictions: BTreeMap<&'static str, u64>,
    pub malformed_client_messages: u64,
    pub symbols_known: i64,
    pub subscribers: BTreeMap<&'static str, i64>,
    pub last_tick_age_seconds: Option<i64>,
    pub supervisor_state: &'static str,
}

pub fn snapshot() -> StatsSnapshot {
    let mut parse_rejected = BTreeMap::new();
    for reason in RejectReason::ALL {
        parse_rejected.insert(reason.as_str(), parse_rejected_count(*reason));
    }

    let mut upstream_failures = BTreeMap::new();
    for kind in FailureKind::ALL {
        upstream_failures.insert(
            kind.as_str(),
            UPSTREAM_FAILURES.with_label_values(&[kind.as_str()]).get(),
        );
    }

    let mut dropped_ticks = BTreeMap::new();
    let mut evictions = BTreeMap::new();
    let mut subscribers = BTreeMap::new();
    for kind in [SubscriberKind::Local, SubscriberKind::WebSocket] {
        dropped_ticks.insert(
            kind.as_str(),
            DROPPED_TICKS.with_label_values(&[kind.as_str()]).get(),
        );
        evictions.insert(
            kind.as_str(),
            EVICTIONS.with_label_values(&[kind.as_str()]).get(),
        );
        subscribers.insert(kind.as_str(), subscriber_count(kind));
    }

    let last_tick = LAST_TICK_TIMESTAMP.get();
    let last_tick_age_seconds = if last_tick > 0 {
        Some((chrono::Utc::now().timestamp() - last_tick).max(0))
    } else {
        None
    };

    StatsSnapshot {
        frames_read: FRAMES_READ.get(),
        records_emitted: RECORDS_EMITTED.get(),
        parse_accepted: PARSE_ACCEPTED.get(),
        parse_rejected,
        bad_numeric_fields: BAD_NUMERIC_FIELDS.get(),
        buffer_resyncs: BUFFER_RESYNCS.get(),
        reconnects: RECONNECTS.get(),
        upstream_failures,
        dropped_ticks,
        evictions,
        malformed_client_messages: MALFORMED_CLIENT_MESSAGES.get(),
        symbols_known: SYMBOLS_KNOWN.get(),
        subscribers,
        last_tick_age_seconds,
        supervisor_state: supervisor_state().as_str(),
    }
}

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to encode metrics as UTF-8: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_monotonic() {
        let before = FRAMES_READ.get();
        inc_frames_read();
        inc_frames_read();
        assert!(FRAMES_READ.get() >= before + 2);
    }

    #[test]
    fn test_snapshot_carries_all_reject_reasons() {
        inc_parse_rejected(RejectReason::IndexSymbol);
        let snap = snapshot();
        assert!(snap.parse_rejected.contains_key("short_record"));
        assert!(snap.parse_rejected.contains_key("index_symbol"));
        assert!(snap.parse_rejected.contains_key("bad_symbol"));
        assert!(snap.parse_rejected.contains_key("bad_price"));
        assert!(snap.parse_rejected["index_symbol"] >= 1);
    }

    #[test]
    fn test_snapshot_serialises() {
        let snap = snapshot();
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("frames_read").is_some());
        assert!(json.get("supervisor_state").is_some());
    }

    #[test]
    fn test_encode_metrics() {
        inc_records_emitted();
        let output = encode_metrics().unwrap();
        assert!(output.contains("tickfan_records_emitted_total"));
    }

    #[test]
    fn test_last_tick_age_none_before_first_tick() {
        // Gauge defaults to 0 until the first tick is accepted; other tests
        // may have set it already, so only check the derived value's shape.
        let snap = snapshot();
        if LAST_TICK_TIMESTAMP.get() == 0 {
            assert!(snap.last_tick_age_seconds.is_none());
        } else {
            assert!(snap.last_tick_age_seconds.unwrap() >= 0);
        }
    }
}
