//! Ingestion pipeline: raw socket bytes in, routed ticks out.
//!
//! One instance per upstream connection lifetime, driven by the supervisor.
//! The cache and router are shared with the rest of the process; the frame
//! reader and parser are private to the single ingest task.

use std::sync::Arc;

use crate::cache::SymbolCache;
use crate::config::FrameConfig;
use crate::frame::FrameReader;
use crate::metrics;
use crate::parser::TickParser;
use crate::router::Router;

pub struct IngestPipeline {
    reader: FrameReader,
    parser: TickParser,
    cache: Arc<SymbolCache>,
    router: Arc<Router>,
}

impl IngestPipeline {
    pub fn new(frame: &FrameConfig, cache: Arc<SymbolCache>, router: Arc<Router>) -> Self {
        Self {
            reader: FrameReader::new(frame.buffer_cap_bytes, &frame.market_prefixes),
            parser: TickParser::new(frame.index_prefixes.clone()),
            cache,
            router,
        }
    }

    /// Feed one socket read through the pipeline. Returns the number of
    /// complete records the read released, accepted or not.
    pub fn push_bytes(&mut self, data: &[u8]) -> usize {
        metrics::inc_frames_read();
        let records = self.reader.push_bytes(data);
        let count = records.len();
        for record in records {
            metrics::inc_records_emitted();
            self.ingest_record(&record);
        }
        count
    }

    /// Parse, cache and publish one record. Rejections are counted and
    /// logged at debug; they never propagate.
    pub fn ingest_record(&self, record: &str) {
        match self.parser.parse(record) {
            Ok(parsed) => {
                metrics::inc_parse_accepted();
                if parsed.bad_numeric_fields > 0 {
                    metrics::add_bad_numeric_fields(parsed.bad_numeric_fields);
                }
                let tick = Arc::new(parsed.tick);
                metrics::set_last_tick_timestamp(tick.ingest_time_ms / 1000);
                if self.cache.apply(Arc::clone(&tick)) {
                    metrics::set_symbols_known(self.cache.len());
                }
                self.router.publish(&tick);
            }
            Err(reason) => {
                metrics::inc_parse_rejected(reason);
                tracing::debug!(reason = reason.as_str(), "record rejected");
            }
        }
    }
}
