//! Frame reader for the upstream `$`-delimited tick stream.
//!
//! The feed concatenates records with no terminator; the only recoverable
//! boundary is the start of the next record, which always begins with a
//! market prefix, six digits and a `$` (e.g. `SH600000$`). The reader keeps
//! a rolling byte buffer and emits the span between consecutive anchors.

use crate::metrics;

/// A record must be followed by the next record's anchor before it is
/// emitted, so a partially received trailing record is never truncated.
pub struct FrameReader {
    buf: Vec<u8>,
    cap: usize,
    prefixes: Vec<Vec<u8>>,
    resyncs: u64,
}

const SYMBOL_DIGITS: usize = 6;

impl FrameReader {
    pub fn new(cap: usize, prefixes: &[String]) -> Self {
        Self {
            buf: Vec::new(),
            cap,
            prefixes: prefixes.iter().map(|p| p.as_bytes().to_vec()).collect(),
            resyncs: 0,
        }
    }

    /// Append one socket read and return every complete record now available.
    ///
    /// Decoding is lossy UTF-8; the upstream occasionally emits non-UTF bytes.
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(data);

        let mut records = Vec::new();
        loop {
            let Some(first) = self.find_anchor(0) else {
                // Nothing recognisable in the whole buffer. One read can
                // exceed the cap by more than double, so keep halving.
                while self.buf.len() > self.cap {
                    self.resync();
                }
                break;
            };
            if first > 0 {
                // Garbage (or a torn record from a resync) before the first
                // anchor; it can never become parseable.
                self.buf.drain(..first);
            }
            match self.find_anchor(1) {
                Some(next) => {
                    let record = String::from_utf8_lossy(&self.buf[..next]).into_owned();
                    self.buf.drain(..next);
                    records.push(record);
                }
                None => {
                    if self.buf.len() > self.cap {
                        self.resync();
                        continue;
                    }
                    break;
                }
            }
        }
        records
    }

    /// Number of times the buffer cap forced a discard.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    pub fn buffered_len(&self) -> usize {
        self.buf.len()
    }

    /// Scan for a record anchor (`<prefix><6 digits>$`) starting at `from`.
    fn find_anchor(&self, from: usize) -> Option<usize> {
        let buf = &self.buf;
        for i in from..buf.len() {
            for prefix in &self.prefixes {
                let sym_end = i + prefix.len() + SYMBOL_DIGITS;
                if sym_end >= buf.len() {
                    continue;
                }
                if !buf[i..].starts_with(prefix) {
                    continue;
                }
                if buf[i + prefix.len()..sym_end].iter().all(u8::is_ascii_digit)
                    && buf[sym_end] == b'$'
                {
                    return Some(i);
                }
            }
        }
        None
    }

    /// Buffer exceeded the cap without yielding a record: drop the oldest
    /// half and count the loss. Data loss is acknowledged, never silent.
    fn resync(&mut self) {
        let drop = self.buf.len() / 2;
        self.buf.drain(..drop);
        self.resyncs += 1;
        metrics::inc_buffer_resyncs();
        tracing::warn!(
            dropped_bytes = drop,
            buffered = self.buf.len(),
            "frame buffer overflow, discarded oldest half"
        );
    }
}
