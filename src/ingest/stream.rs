use flate2::read::GzDecoder;
use std::io::{Cursor, Read};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::constants::ROW_YIELD_INTERVAL;
use crate::error::{Result, SiftError};
use crate::ingest::source::InputSource;
use crate::record::{Header, Row};

#[derive(Debug, Clone)]
pub struct RowBatch {
    pub source_name: String,
    /// Position of the first row within its source (0-based, data rows only).
    pub first_row: usize,
    pub rows: Vec<Row>,
    /// How much of the source has been parsed when this batch was cut.
    pub consumed_fraction: f64,
}

impl RowBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn header(&self) -> Option<Arc<Header>> {
        self.rows.first().map(|row| Arc::clone(row.header()))
    }
}

/// Lazy, finite, non-restartable sequence of row batches from one source.
///
/// A blocking parser task fills a bounded queue; when `max_pending` batches
/// are waiting the parser stalls until the consumer pulls.
pub struct BatchStream {
    source_name: String,
    rx: mpsc::Receiver<Result<RowBatch>>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl BatchStream {
    pub fn open(source: &dyn InputSource, batch_size: usize, max_pending: usize) -> Result<Self> {
        let source_name = source.name().to_string();
        let reader = source
            .open()
            .map_err(|e| SiftError::source_read(&source_name, e))?;
        let compressed = source.is_compressed();
        let size_hint = source.size();

        let (tx, rx) = mpsc::channel(max_pending.max(1));
        let name = source_name.clone();
        let batch_size = batch_size.max(1);
        let producer = tokio::task::spawn_blocking(move || {
            produce_batches(name, reader, compressed, size_hint, batch_size, tx);
        });

        Ok(Self {
            source_name,
            rx,
            producer: Some(producer),
            finished: false,
        })
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Next batch, a parse failure, or `None` once the source is exhausted.
    /// Nothing more is yielded after an error.
    pub async fn next_batch(&mut self) -> Option<Result<RowBatch>> {
        if self.finished {
            return None;
        }
        match self.rx.recv().await {
            Some(Ok(batch)) => Some(Ok(batch)),
            Some(Err(e)) => {
                self.finish();
                Some(Err(e))
            }
            None => {
                self.finish();
                None
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.rx.close();
        self.producer.take();
    }
}

impl Drop for BatchStream {
    fn drop(&mut self) {
        // Closing the receiver makes the parser stop at its next check.
        self.rx.close();
    }
}

fn produce_batches(
    source_name: String,
    reader: Box<dyn Read + Send>,
    compressed: bool,
    size_hint: u64,
    batch_size: usize,
    tx: mpsc::Sender<Result<RowBatch>>,
) {
    let (text, total_bytes): (Box<dyn Read + Send>, u64) = if compressed {
        let mut decoded = Vec::new();
        if let Err(e) = GzDecoder::new(reader).read_to_end(&mut decoded) {
            let _ = tx.blocking_send(Err(SiftError::source_read(&source_name, e)));
            return;
        }
        let len = decoded.len() as u64;
        debug!("📦 Decompressed {} to {} bytes", source_name, len);
        (Box::new(Cursor::new(decoded)), len)
    } else {
        (reader, size_hint)
    };

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text);

    let header = match csv_reader.headers() {
        Ok(names) => Arc::new(Header::new(
            names.iter().map(|n| n.trim_start_matches('\u{feff}').to_string()).collect(),
        )),
        Err(e) => {
            let _ = tx.blocking_send(Err(SiftError::source_read(&source_name, e)));
            return;
        }
    };

    let fraction = |reader: &csv::Reader<Box<dyn Read + Send>>| -> f64 {
        if total_bytes == 0 {
            return 1.0;
        }
        (reader.position().byte() as f64 / total_bytes as f64).min(1.0)
    };

    let mut record = csv::StringRecord::new();
    let mut rows = Vec::with_capacity(batch_size);
    let mut first_row = 0usize;
    let mut rows_read = 0usize;

    loop {
        match csv_reader.read_record(&mut record) {
            Ok(true) => {
                rows.push(Row::new(
                    Arc::clone(&header),
                    record.iter().map(str::to_string).collect(),
                ));
                rows_read += 1;

                if rows.len() >= batch_size {
                    let batch = RowBatch {
                        source_name: source_name.clone(),
                        first_row,
                        rows: std::mem::replace(&mut rows, Vec::with_capacity(batch_size)),
                        consumed_fraction: fraction(&csv_reader),
                    };
                    first_row = rows_read;
                    if tx.blocking_send(Ok(batch)).is_err() {
                        return;
                    }
                }

                if rows_read % ROW_YIELD_INTERVAL == 0 && tx.is_closed() {
                    debug!("Consumer of {} went away at row {}", source_name, rows_read);
                    return;
                }
            }
            Ok(false) => break,
            Err(e) => {
                let _ = tx.blocking_send(Err(SiftError::source_read(&source_name, e)));
                return;
            }
        }
    }

    if !rows.is_empty() {
        let batch = RowBatch {
            source_name: source_name.clone(),
            first_row,
            rows,
            consumed_fraction: 1.0,
        };
        let _ = tx.blocking_send(Ok(batch));
    }

    debug!("✅ {} parsed: {} rows", source_name, rows_read);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::source::MemorySource;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Reader that records how many bytes the parser has pulled.
    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        read: Arc<AtomicU64>,
    }

    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read.fetch_add(n as u64, Ordering::SeqCst);
            Ok(n)
        }
    }

    struct CountingSource {
        data: Vec<u8>,
        read: Arc<AtomicU64>,
    }

    impl InputSource for CountingSource {
        fn name(&self) -> &str {
            "counted.csv"
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn open(&self) -> std::io::Result<Box<dyn Read + Send>> {
            Ok(Box::new(CountingReader {
                inner: Cursor::new(self.data.clone()),
                read: Arc::clone(&self.read),
            }))
        }
    }

    fn csv_with_rows(count: usize) -> String {
        let mut text = String::from("email,first_name,last_name\n");
        for i in 0..count {
            text.push_str(&format!("user{}@x.com,First{},Last{}\n", i, i, i));
        }
        text
    }

    async fn collect(stream: &mut BatchStream) -> Vec<RowBatch> {
        let mut batches = Vec::new();
        while let Some(batch) = stream.next_batch().await {
            batches.push(batch.unwrap());
        }
        batches
    }

    #[tokio::test]
    async fn test_batches_near_configured_size() {
        let source = MemorySource::new("people.csv", csv_with_rows(25));
        let mut stream = BatchStream::open(&source, 10, 2).unwrap();
        let batches = collect(&mut stream).await;

        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(batches[1].first_row, 10);
        assert_eq!(batches[2].first_row, 20);
        assert_eq!(batches[2].consumed_fraction, 1.0);
        assert!(batches[0].consumed_fraction <= batches[1].consumed_fraction);
        assert_eq!(batches[0].rows[0].get("email"), Some("user0@x.com"));

        // Non-restartable.
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_parser_stalls_when_queue_is_full() {
        let read = Arc::new(AtomicU64::new(0));
        let source = CountingSource {
            data: csv_with_rows(20_000).into_bytes(),
            read: Arc::clone(&read),
        };
        let total = source.size();
        let mut stream = BatchStream::open(&source, 10, 1).unwrap();

        // Give the parser time to run ahead if it could.
        tokio::time::sleep(Duration::from_millis(100)).await;
        let stalled_at = read.load(Ordering::SeqCst);
        assert!(stalled_at < total / 4, "parser read {} of {} bytes", stalled_at, total);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(read.load(Ordering::SeqCst), stalled_at);

        let first = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first.first_row, 0);
        assert!(first.consumed_fraction < 0.25);

        let mut rows = first.len();
        while let Some(batch) = stream.next_batch().await {
            rows += batch.unwrap().len();
        }
        assert_eq!(rows, 20_000);
        assert_eq!(read.load(Ordering::SeqCst), total);
    }

    #[tokio::test]
    async fn test_empty_and_header_only_sources() {
        for content in ["", "email,first_name,last_name\n"] {
            let source = MemorySource::new("empty.csv", content);
            let mut stream = BatchStream::open(&source, 10, 2).unwrap();
            assert!(stream.next_batch().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_gzip_source_is_decompressed() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(csv_with_rows(3).as_bytes()).unwrap();
        let source = MemorySource::new("people.csv.GZ", encoder.finish().unwrap());
        assert!(source.is_compressed());

        let mut stream = BatchStream::open(&source, 100, 2).unwrap();
        let batches = collect(&mut stream).await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].rows[2].get("last_name"), Some("Last2"));
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_source_error() {
        let source = MemorySource::new("broken.csv.gz", b"definitely not gzip".to_vec());
        let mut stream = BatchStream::open(&source, 10, 2).unwrap();
        match stream.next_batch().await {
            Some(Err(SiftError::SourceRead { source_name, .. })) => {
                assert_eq!(source_name, "broken.csv.gz");
            }
            other => panic!("expected source error, got {:?}", other.map(|r| r.map(|b| b.len()))),
        }
        assert!(stream.next_batch().await.is_none());
    }

    #[tokio::test]
    async fn test_parse_failure_after_valid_batches() {
        let mut data = csv_with_rows(4).into_bytes();
        data.extend_from_slice(b"bad\xff\xfe@x.com,A,B\n");
        let source = MemorySource::new("mixed.csv", data);
        let mut stream = BatchStream::open(&source, 2, 4).unwrap();

        let first = stream.next_batch().await.unwrap().unwrap();
        let second = stream.next_batch().await.unwrap().unwrap();
        assert_eq!(first.len() + second.len(), 4);
        assert!(matches!(stream.next_batch().await, Some(Err(SiftError::SourceRead { .. }))));
        assert!(stream.next_batch().await.is_none());
        // Earlier batches stay usable.
        assert_eq!(first.rows[0].get("first_name"), Some("First0"));
    }
}
