//! Positional parser for one `$`-separated feed record.
//!
//! Field positions are observed from the live feed, not documented by the
//! vendor; they live in one named-constant block so a dialect change is a
//! one-line edit. Every conversion is defensive: a malformed field zeroes
//! out or rejects the single record, never the stream.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::tick::Tick;

/// Observed field layout of the upstream record.
pub const IDX_SYMBOL: usize = 0;
pub const IDX_NAME: usize = 1;
pub const IDX_UPSTREAM_TIME: usize = 2;
pub const IDX_LAST_PRICE: usize = 6;
pub const IDX_VOLUME: usize = 7;
pub const IDX_AMOUNT: usize = 8;
/// Observed, not documented; absent trailing fields are tolerated.
pub const IDX_CHANGE_PERCENT: usize = 29;

/// Records with fewer fields than this are not worth attempting.
pub const MIN_FIELDS: usize = 10;

const MIN_SYMBOL_LEN: usize = 6;

/// Why a record was rejected. These are counters, not errors; a rejection
/// never tears down the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ShortRecord,
    IndexSymbol,
    BadSymbol,
    BadPrice,
}

impl RejectReason {
    pub const ALL: &'static [RejectReason] = &[
        RejectReason::ShortRecord,
        RejectReason::IndexSymbol,
        RejectReason::BadSymbol,
        RejectReason::BadPrice,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::ShortRecord => "short_record",
            RejectReason::IndexSymbol => "index_symbol",
            RejectReason::BadSymbol => "bad_symbol",
            RejectReason::BadPrice => "bad_price",
        }
    }
}

/// An accepted tick plus how many of its numeric fields had to be zeroed.
#[derive(Debug, PartialEq)]
pub struct Parsed {
    pub tick: Tick,
    pub bad_numeric_fields: u64,
}

pub struct TickParser {
    /// Exchange-level composites carried on the same feed but excluded from
    /// the cache: SSE/SZSE composites and SZSE 399xxx indices.
    index_prefixes: Vec<String>,
    seq: AtomicU64,
}

pub fn default_index_prefixes() -> Vec<String> {
    vec![
        "SH0000".to_string(),
        "SZ0000".to_string(),
        "SZ399".to_string(),
    ]
}

impl TickParser {
    pub fn new(index_prefixes: Vec<String>) -> Self {
        Self {
            index_prefixes,
            seq: AtomicU64::new(0),
        }
    }

    pub fn parse(&self, record: &str) -> Result<Parsed, RejectReason> {
        let fields: Vec<&str> = record.split('$').collect();
        if fields.len() < MIN_FIELDS {
            return Err(RejectReason::ShortRecord);
        }

        let symbol = fields[IDX_SYMBOL].trim();
        if symbol.is_empty() || symbol.len() < MIN_SYMBOL_LEN {
            return Err(RejectReason::BadSymbol);
        }
        // Index filter runs before any price parsing.
        if self.index_prefixes.iter().any(|p| symbol.starts_with(p.as_str())) {
            return Err(RejectReason::IndexSymbol);
        }

        let last_price = fields
            .get(IDX_LAST_PRICE)
            .and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or(RejectReason::BadPrice)?;

        let mut bad_numeric_fields = 0u64;
        let volume = non_negative_field(&fields, IDX_VOLUME, &mut bad_numeric_fields);
        let amount = non_negative_field(&fields, IDX_AMOUNT, &mut bad_numeric_fields);
        let change_percent = signed_field(&fields, IDX_CHANGE_PERCENT, &mut bad_numeric_fields);

        let tick = Tick {
            symbol: symbol.to_string(),
            name: fields.get(IDX_NAME).map(|s| s.trim()).unwrap_or("").to_string(),
            last_price,
            change_percent,
            volume,
            amount,
            upstream_time: fields
                .get(IDX_UPSTREAM_TIME)
                .map(|s| s.trim())
                .unwrap_or("")
                .to_string(),
            ingest_seq: self.seq.fetch_add(1, Ordering::Relaxed) + 1,
            ingest_time_ms: chrono::Utc::now().timestamp_millis(),
            raw: record.to_string(),
        };

        Ok(Parsed {
            tick,
            bad_numeric_fields,
        })
    }
}

/// Absent fields are 0 without penalty; present-but-unparseable (or
/// negative) fields are 0 and counted.
fn non_negative_field(fields: &[&str], idx: usize, bad: &mut u64) -> f64 {
    let Some(raw) = fields.get(idx).map(|s| s.trim()) else {
        return 0.0;
    };
    if raw.is_empty() {
        return 0.0;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => {
            *bad += 1;
            0.0
        }
    }
}

fn signed_field(fields: &[&str], idx: usize, bad: &mut u64) -> f64 {
    let Some(raw) = fields.get(idx).map(|s| s.trim()) else {
        return 0.0;
    };
    if raw.is_empty() {
        return 0.0;
    }
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => v,
        _ => {
            *bad += 1;
            0.0
        }
    }
}
