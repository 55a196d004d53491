use std::sync::Arc;

use serde::Serialize;

/// One parsed market-data record for one symbol at one instant.
///
/// Ticks are immutable once built; the pipeline hands out `Arc<Tick>`
/// snapshots so readers never observe a partially written value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tick {
    /// Exchange-prefixed instrument identifier, e.g. `SH600000`.
    pub symbol: String,
    /// Human label; may be empty.
    pub name: String,
    pub last_price: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub amount: f64,
    /// Upstream-provided time string, kept opaque for diagnostics.
    pub upstream_time: String,
    /// Process-monotonic sequence assigned at parse time.
    /// This is the ordering authority for last-writer-wins.
    pub ingest_seq: u64,
    /// Wall-clock milliseconds at parse time, for JSON payloads and gauges.
    pub ingest_time_ms: i64,
    /// Original record, kept for audit.
    #[serde(skip)]
    pub raw: String,
}

pub type SharedTick = Arc<Tick>;

/// What kind of party holds a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberKind {
    /// In-process callback/channel consumer.
    Local,
    /// Downstream WebSocket peer.
    WebSocket,
}

impl SubscriberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriberKind::Local => "local",
            SubscriberKind::WebSocket => "websocket",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_serializes_without_raw() {
        let tick = Tick {
            symbol: "SH600000".to_string(),
            name: "PuFa".to_string(),
            last_price: 10.2,
            change_percent: 1.23,
            volume: 1000.0,
            amount: 10200.0,
            upstream_time: "093000".to_string(),
            ingest_seq: 1,
            ingest_time_ms: 1_700_000_000_000,
            raw: "SH600000$...".to_string(),
        };

        let json = serde_json::to_value(&tick).unwrap();
        assert_eq!(json["symbol"], "SH600000");
        assert_eq!(json["last_price"], 10.2);
        assert!(json.get("raw").is_none());
    }

    #[test]
    fn test_subscriber_kind_labels() {
        assert_eq!(SubscriberKind::Local.as_str(), "local");
        assert_eq!(SubscriberKind::WebSocket.as_str(), "websocket");
    }
}
