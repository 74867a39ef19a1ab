//! Newline-delimited JSON input.
//!
//! Each non-blank line is one record:
//!
//! ```json
//! {"topic": "orders", "partition": 2, "offset": 17, "key": "customer-9", "value": "..."}
//! ```
//!
//! Only `value` (UTF-8 text) or `value_base64` (raw bytes) is required.
//! `topic` defaults to the source name given on the command line, `partition`
//! to 0, and `offset` to the next offset of that topic partition. Lines that
//! do not parse are logged and skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use serde::Deserialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::Mutex;

use pubsub_sink::{RecordSourceFn, Result as SinkResult, SinkError, SinkRecord};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputLine {
    topic: Option<String>,
    #[serde(default)]
    partition: u32,
    offset: Option<u64>,
    #[serde(default)]
    timestamp: u64,
    key: Option<String>,
    value: Option<String>,
    value_base64: Option<String>,
}

/// Counters reported once the input is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputStats {
    pub records: u64,
    pub skipped: u64,
}

/// How long a partly filled batch waits for more input.
pub const DEFAULT_LINGER: Duration = Duration::from_millis(100);

/// Reads records from a line-oriented reader in batches.
///
/// Records read so far are kept in the source, not in the pending call, so a
/// `next_batch` future dropped mid-read loses nothing.
pub struct LineSource<R> {
    lines: Lines<R>,
    source_topic: String,
    linger: Duration,
    next_offsets: HashMap<(String, u32), u64>,
    line_no: u64,
    stats: InputStats,
    batch: Vec<SinkRecord>,
    exhausted: bool,
    unreported: Option<std::io::Error>,
    read_error: Option<String>,
}

impl<R: AsyncBufRead + Unpin> LineSource<R> {
    pub fn new(reader: R, source_topic: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            source_topic: source_topic.into(),
            linger: DEFAULT_LINGER,
            next_offsets: HashMap::new(),
            line_no: 0,
            stats: InputStats::default(),
            batch: Vec::new(),
            exhausted: false,
            unreported: None,
            read_error: None,
        }
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn stats(&self) -> InputStats {
        self.stats
    }

    /// Description of the I/O error that ended the input early, if any.
    pub fn read_error(&self) -> Option<&str> {
        self.read_error.as_deref()
    }

    /// Read up to `max` records. `Ok(None)` once the input is exhausted.
    ///
    /// Waits as long as needed for the first record, then at most the linger
    /// time for each further one, so a slow writer still sees its records
    /// published. A read error ends the input: records read before it are
    /// returned first, then the error once as `IoError`.
    pub async fn next_batch(&mut self, max: usize) -> SinkResult<Option<Vec<SinkRecord>>> {
        if self.batch.is_empty() {
            if let Some(e) = self.unreported.take() {
                return Err(SinkError::IoError(e));
            }
        }

        while !self.exhausted && self.batch.len() < max {
            let read = if self.batch.is_empty() {
                self.lines.next_line().await
            } else {
                match tokio::time::timeout(self.linger, self.lines.next_line()).await {
                    Ok(read) => read,
                    Err(_) => break,
                }
            };

            let line = match read {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.exhausted = true;
                    break;
                }
                Err(e) => {
                    tracing::error!(line = self.line_no + 1, error = %e, "Failed to read input");
                    self.read_error = Some(e.to_string());
                    self.exhausted = true;
                    if self.batch.is_empty() {
                        return Err(SinkError::IoError(e));
                    }
                    self.unreported = Some(e);
                    break;
                }
            };
            self.line_no += 1;

            if line.trim().is_empty() {
                continue;
            }
            match self.parse(&line) {
                Ok(record) => {
                    self.stats.records += 1;
                    self.batch.push(record);
                }
                Err(e) => {
                    self.stats.skipped += 1;
                    tracing::warn!(line = self.line_no, error = %e, "Skipping invalid input line");
                }
            }
        }

        if self.batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.batch)))
        }
    }

    fn parse(&mut self, line: &str) -> Result<SinkRecord> {
        let input: InputLine = serde_json::from_str(line).context("invalid JSON record")?;

        let value = match (input.value, input.value_base64) {
            (Some(text), None) => Bytes::from(text),
            (None, Some(encoded)) => Bytes::from(
                STANDARD
                    .decode(encoded.as_bytes())
                    .context("invalid value_base64")?,
            ),
            (Some(_), Some(_)) => bail!("both value and value_base64 are set"),
            (None, None) => bail!("record has no value"),
        };

        let topic = input.topic.unwrap_or_else(|| self.source_topic.clone());
        let next = self
            .next_offsets
            .entry((topic.clone(), input.partition))
            .or_insert(0);
        let offset = input.offset.unwrap_or(*next);
        *next = offset
            .checked_add(1)
            .ok_or_else(|| anyhow!("offset {} out of range", offset))?;

        let mut record = SinkRecord::new(topic, input.partition, offset, value);
        record.timestamp = input.timestamp;
        if let Some(key) = input.key {
            record = record.with_key(key);
        }
        Ok(record)
    }
}

impl<R: AsyncBufRead + Unpin + Send + 'static> LineSource<R> {
    /// Share the source and expose it as a runtime record source.
    pub fn into_record_source(self, batch_size: usize) -> (Arc<Mutex<Self>>, RecordSourceFn) {
        let shared = Arc::new(Mutex::new(self));
        let source = shared.clone();
        let record_source: RecordSourceFn = Box::new(move || {
            let source = source.clone();
            Box::pin(async move { source.lock().await.next_batch(batch_size).await })
        });
        (shared, record_source)
    }
}
