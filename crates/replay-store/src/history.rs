//! Lazy NDJSON history reader
//!
//! [`History`] yields one [`HistoryEntry`] per parseable line. Lines that are
//! not a JSON object are skipped and counted; blank lines are ignored. The
//! reader never returns an error to its consumer.

use serde_json::Value;
use std::io::BufRead;

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// One parsed history line
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    /// 1-based line number in the history file
    pub line: usize,
    /// The full artifact as written
    pub artifact: Value,
}

/// Fully drained history
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistorySnapshot {
    /// Parsed records in file order
    pub entries: Vec<HistoryEntry>,
    /// Lines that failed to parse
    pub skipped: usize,
}

/// Lazy sequence of history records
///
/// The skipped-line count grows as iteration proceeds; read it after the
/// iterator is exhausted, or use [`History::read_all`].
pub struct History {
    reader: Option<Box<dyn BufRead + Send>>,
    label: String,
    line: usize,
    skipped: usize,
    buf: Vec<u8>,
}

impl History {
    /// History over any line source
    pub fn from_reader<R>(label: impl Into<String>, reader: R) -> Self
    where
        R: BufRead + Send + 'static,
    {
        Self {
            reader: Some(Box::new(reader)),
            label: label.into(),
            line: 0,
            skipped: 0,
            buf: Vec::new(),
        }
    }

    /// History with no records
    #[must_use]
    pub fn empty(label: impl Into<String>) -> Self {
        Self {
            reader: None,
            label: label.into(),
            line: 0,
            skipped: 0,
            buf: Vec::new(),
        }
    }

    /// Lines skipped so far
    #[inline]
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Drain into records plus skip count
    #[must_use]
    pub fn read_all(mut self) -> HistorySnapshot {
        let entries: Vec<HistoryEntry> = self.by_ref().collect();
        HistorySnapshot {
            entries,
            skipped: self.skipped,
        }
    }

    fn skip(&mut self, reason: &str) {
        self.skipped += 1;
        tracing::warn!(
            history = %self.label,
            line = self.line,
            "skipping history line: {reason}"
        );
    }
}

impl Iterator for History {
    type Item = HistoryEntry;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let reader = self.reader.as_mut()?;
            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.reader = None;
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    self.line += 1;
                    self.reader = None;
                    self.skip(&format!("read failed: {e}"));
                    return None;
                }
            }
            self.line += 1;

            let mut bytes = self.buf.as_slice();
            if self.line == 1 {
                bytes = bytes.strip_prefix(BOM).unwrap_or(bytes);
            }
            let Ok(text) = std::str::from_utf8(bytes) else {
                self.skip("invalid utf-8");
                continue;
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(text) {
                Ok(artifact @ Value::Object(_)) => {
                    return Some(HistoryEntry {
                        line: self.line,
                        artifact,
                    });
                }
                Ok(_) => self.skip("not a JSON object"),
                Err(e) => self.skip(&e.to_string()),
            }
        }
    }
}

impl std::fmt::Debug for History {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("History")
            .field("label", &self.label)
            .field("line", &self.line)
            .field("skipped", &self.skipped)
            .field("exhausted", &self.reader.is_none())
            .finish()
    }
}
