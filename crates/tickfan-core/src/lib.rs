//! Quote ingestion and fan-out core for the A-share tick feed.
//!
//! The crate takes one authenticated TCP stream of `$`-delimited records,
//! parses it into ticks, keeps a last-value cache per symbol, and fans
//! ticks out to subscribers behind bounded outboxes. The WebSocket surface
//! lives in `tickfan-gateway`; this crate is everything beneath it.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod parser;
pub mod pipeline;
pub mod router;
pub mod supervisor;
pub mod tick;

pub use cache::{SymbolCache, SymbolEntry};
pub use config::Config;
pub use engine::Engine;
pub use error::FeedError;
pub use router::{CancelReason, DropPolicy, Router, SubscriberHandle, SubscriberId};
pub use tick::{SharedTick, SubscriberKind, Tick};
