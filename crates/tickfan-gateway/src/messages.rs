//! Wire messages for the WebSocket surface. Everything is JSON with a
//! `type` tag.

use serde::{Deserialize, Serialize};
use tickfan_core::Tick;

/// Symbol argument that widens a subscription to the whole feed.
pub const ALL_SYMBOLS: &str = "ALL";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum ClientMessage {
    Subscribe { symbol: String },
    Unsubscribe { symbol: String },
    Ping,
    GetStock { symbol: String },
}

/// Server-to-client messages. Live ticks and `get_stock` replies share the
/// `stock_data` shape; a miss carries `data: null`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    StockData {
        symbol: String,
        data: Option<TickData>,
        ingest_time: Option<i64>,
    },
    SubscriptionConfirmed {
        symbol: String,
    },
    UnsubscriptionConfirmed {
        symbol: String,
    },
    Pong {
        server_time: i64,
    },
    Error {
        code: u16,
        message: String,
    },
}

impl ServerMessage {
    pub fn stock_data(symbol: String, tick: Option<&Tick>) -> Self {
        ServerMessage::StockData {
            symbol,
            ingest_time: tick.map(|t| t.ingest_time_ms),
            data: tick.map(TickData::from),
        }
    }
}

/// The client-facing projection of a tick. The raw record never crosses
/// the WebSocket boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TickData {
    pub symbol: String,
    pub name: String,
    pub last_price: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub amount: f64,
    pub upstream_time: String,
    pub ingest_seq: u64,
}

impl From<&Tick> for TickData {
    fn from(tick: &Tick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            name: tick.name.clone(),
            last_price: tick.last_price,
            change_percent: tick.change_percent,
            volume: tick.volume,
            amount: tick.amount,
            upstream_time: tick.upstream_time.clone(),
            ingest_seq: tick.ingest_seq,
        }
    }
}
