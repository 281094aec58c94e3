//! Record extraction: turns one RIF file into a lazy stream of typed records.
//!
//! The stream is single-pass. A row that cannot be parsed yields an error for
//! that record and the stream moves on; a bad row inside a claim fails the
//! whole claim. An I/O failure yields one structural error and ends the stream.

use crate::metrics::MetricsSink;
use crate::model::{RifFileEvent, RifRecordEvent};
use crate::object_store::{ObjectBody, ObjectStore, ObjectStoreError};
use crate::schema::{schema_for, ColumnIndex, FieldError, RecordSchema, Row};
use csv_async::{AsyncReaderBuilder, ByteRecord, ByteRecordsIntoStream, StringRecord};
use futures::stream::{self, BoxStream, StreamExt};
use metrics::Counter;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

const FIELD_DELIMITER: u8 = b'|';

/// A file could not be opened for extraction at all
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Failed to open {key}")]
    Open {
        key: String,
        #[source]
        source: ObjectStoreError,
    },

    #[error("Unreadable header in {file}: {message}")]
    Header { file: String, message: String },

    #[error("{file} is missing required columns: {}", .missing.join(", "))]
    MissingColumns {
        file: String,
        missing: Vec<&'static str>,
    },
}

/// A record within a file could not be produced
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("{file}:{line}: {source}")]
    Field {
        file: String,
        line: u64,
        source: FieldError,
    },

    #[error("{file}:{line}: malformed row: {message}")]
    MalformedRow {
        file: String,
        line: u64,
        message: String,
    },

    #[error("{file}: unreadable after line {line}: {message}")]
    Structural {
        file: String,
        line: u64,
        message: String,
    },
}

impl RecordError {
    pub fn file_name(&self) -> &str {
        match self {
            RecordError::Field { file, .. }
            | RecordError::MalformedRow { file, .. }
            | RecordError::Structural { file, .. } => file,
        }
    }

    pub fn line(&self) -> u64 {
        match self {
            RecordError::Field { line, .. }
            | RecordError::MalformedRow { line, .. }
            | RecordError::Structural { line, .. } => *line,
        }
    }

    /// Whether the rest of the file was abandoned
    pub fn is_structural(&self) -> bool {
        matches!(self, RecordError::Structural { .. })
    }
}

/// The record stream of one file
pub struct RifFileRecords {
    pub file: Arc<RifFileEvent>,
    pub records: BoxStream<'static, Result<RifRecordEvent, RecordError>>,
}

impl fmt::Debug for RifFileRecords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RifFileRecords")
            .field("file", &self.file)
            .finish_non_exhaustive()
    }
}

/// Opens RIF files and produces their record streams
#[derive(Clone)]
pub struct RifFilesProcessor {
    store: Arc<dyn ObjectStore>,
    metrics: MetricsSink,
}

impl RifFilesProcessor {
    pub fn new(store: Arc<dyn ObjectStore>, metrics: MetricsSink) -> Self {
        Self { store, metrics }
    }

    /// Open the file behind `file` and return its records as a lazy stream
    #[instrument(skip(self, file), fields(key = %file.key, file_type = %file.file_type))]
    pub async fn produce_records(
        &self,
        file: Arc<RifFileEvent>,
    ) -> Result<RifFileRecords, ExtractError> {
        let body = self
            .store
            .get_object(&file.key)
            .await
            .map_err(|source| ExtractError::Open {
                key: file.key.clone(),
                source,
            })?;

        self.produce_records_from(file, body).await
    }

    /// Parse an already opened body
    pub async fn produce_records_from(
        &self,
        file: Arc<RifFileEvent>,
        body: ObjectBody,
    ) -> Result<RifFileRecords, ExtractError> {
        // Row width is checked per row so a short row still reports its claim
        let mut reader = AsyncReaderBuilder::new()
            .delimiter(FIELD_DELIMITER)
            .has_headers(true)
            .flexible(true)
            .create_reader(body);

        let header = reader
            .headers()
            .await
            .map_err(|e| ExtractError::Header {
                file: file.file_name.clone(),
                message: e.to_string(),
            })?
            .clone();

        let schema = schema_for(file.file_type);
        let columns = schema
            .index_columns(&header)
            .map_err(|missing| ExtractError::MissingColumns {
                file: file.file_name.clone(),
                missing,
            })?;

        debug!(
            file = %file.file_name,
            columns = header.len(),
            "Opened RIF file"
        );

        let file_type = file.file_type.as_str();
        let cursor = RecordCursor {
            rows: reader.into_byte_records(),
            schema,
            width: header.len(),
            columns,
            records_read: self
                .metrics
                .counter("rif.extract.records_read", &[("file_type", file_type)]),
            parse_failures: self
                .metrics
                .counter("rif.extract.parse_failures", &[("file_type", file_type)]),
            file: file.clone(),
            open: None,
            group: Vec::new(),
            poisoned: None,
            ready: VecDeque::new(),
            last_line: 1,
            finished: false,
        };

        let records = stream::unfold(cursor, |mut cursor| async move {
            cursor.next_record().await.map(|item| (item, cursor))
        })
        .boxed();

        Ok(RifFileRecords { file, records })
    }
}

/// Pull-based state behind a file's record stream
struct RecordCursor {
    rows: ByteRecordsIntoStream<'static, ObjectBody>,
    schema: &'static RecordSchema,
    width: usize,
    columns: ColumnIndex,
    file: Arc<RifFileEvent>,
    records_read: Counter,
    parse_failures: Counter,
    /// Grouping value and first line of the record being assembled
    open: Option<(String, u64)>,
    group: Vec<StringRecord>,
    /// First bad row of the open record; the whole record fails with it
    poisoned: Option<RecordError>,
    ready: VecDeque<Result<RifRecordEvent, RecordError>>,
    last_line: u64,
    finished: bool,
}

impl RecordCursor {
    async fn next_record(&mut self) -> Option<Result<RifRecordEvent, RecordError>> {
        loop {
            if let Some(item) = self.ready.pop_front() {
                return Some(item);
            }
            if self.finished {
                return None;
            }

            match self.rows.next().await {
                Some(Ok(row)) => {
                    let line = row
                        .position()
                        .map(|p| p.line())
                        .unwrap_or(self.last_line + 1);
                    self.last_line = line;
                    self.accept_row(line, row);
                }
                Some(Err(e)) if matches!(e.kind(), csv_async::ErrorKind::Io(_)) => {
                    self.abandon_group();
                    warn!(file = %self.file.file_name, error = %e, "RIF file became unreadable");
                    let error = RecordError::Structural {
                        file: self.file.file_name.clone(),
                        line: self.last_line,
                        message: e.to_string(),
                    };
                    self.push_failure(error);
                    self.finished = true;
                }
                Some(Err(e)) => {
                    self.flush_group();
                    self.last_line += 1;
                    let error = self.malformed(self.last_line, e.to_string());
                    self.push_failure(error);
                }
                None => {
                    self.flush_group();
                    self.finished = true;
                }
            }
        }
    }

    fn accept_row(&mut self, line: u64, row: ByteRecord) {
        let key = self
            .schema
            .group_by
            .map(|column| group_value(&row, &self.columns, column));

        let continues = matches!(
            (&self.open, &key),
            (Some((open, _)), Some(key)) if open == key
        );
        if !continues {
            self.flush_group();
            self.open = Some((key.clone().unwrap_or_default(), line));
        }

        match self.decode(line, row) {
            Ok(record) => self.group.push(record),
            Err(error) => {
                if self.poisoned.is_none() {
                    self.poisoned = Some(error);
                } else {
                    debug!(error = %error, "Further bad row in a failed record");
                }
            }
        }

        if key.is_none() {
            self.flush_group();
        }
    }

    fn decode(&self, line: u64, row: ByteRecord) -> Result<StringRecord, RecordError> {
        if row.len() != self.width {
            let message = format!("expected {} fields, found {}", self.width, row.len());
            return Err(self.malformed(line, message));
        }
        StringRecord::from_byte_record(row).map_err(|e| self.malformed(line, e.to_string()))
    }

    fn malformed(&self, line: u64, message: String) -> RecordError {
        RecordError::MalformedRow {
            file: self.file.file_name.clone(),
            line,
            message,
        }
    }

    fn flush_group(&mut self) {
        let Some((_, line)) = self.open.take() else {
            return;
        };
        let group = std::mem::take(&mut self.group);

        if let Some(error) = self.poisoned.take() {
            self.push_failure(error);
            return;
        }
        if group.is_empty() {
            return;
        }

        let result = {
            let rows: Vec<Row<'_>> = group
                .iter()
                .map(|record| Row::new(record, &self.columns))
                .collect();
            self.schema.assemble(&rows)
        };

        self.file.metrics().record_read();
        self.records_read.increment(1);
        match result {
            Ok(record) => {
                self.ready.push_back(Ok(RifRecordEvent {
                    file: self.file.clone(),
                    line,
                    record,
                }));
            }
            Err(source) => {
                let error = RecordError::Field {
                    file: self.file.file_name.clone(),
                    line,
                    source,
                };
                self.push_failure(error);
            }
        }
    }

    /// Drop a record cut short by an unreadable stream
    fn abandon_group(&mut self) {
        self.open = None;
        self.group.clear();
        if let Some(error) = self.poisoned.take() {
            self.push_failure(error);
        }
    }

    fn push_failure(&mut self, error: RecordError) {
        debug!(error = %error, "Failed to parse RIF record");
        self.file.metrics().parse_failed();
        self.parse_failures.increment(1);
        self.ready.push_back(Err(error));
    }
}

fn group_value(row: &ByteRecord, columns: &ColumnIndex, column: &str) -> String {
    columns
        .position(column)
        .and_then(|i| row.get(i))
        .map(|value| String::from_utf8_lossy(value).trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RifFileType;
    use crate::object_store::InMemoryObjectStore;
    use crate::records::RifRecord;
    use chrono::Utc;
    use std::io::Cursor;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::{AsyncRead, ReadBuf};

    fn file_event(file_type: RifFileType, name: &str) -> Arc<RifFileEvent> {
        Arc::new(RifFileEvent::new(
            format!("Pending/2017-03-01T12:30:00Z/0/{name}"),
            name,
            file_type,
            Utc::now(),
            0,
        ))
    }

    fn processor() -> RifFilesProcessor {
        RifFilesProcessor::new(Arc::new(InMemoryObjectStore::new()), MetricsSink::noop())
    }

    async fn parse(
        file: Arc<RifFileEvent>,
        content: &str,
    ) -> Vec<Result<RifRecordEvent, RecordError>> {
        parse_body(file, Box::pin(Cursor::new(content.as_bytes().to_vec()))).await
    }

    async fn parse_body(
        file: Arc<RifFileEvent>,
        body: ObjectBody,
    ) -> Vec<Result<RifRecordEvent, RecordError>> {
        let records = processor()
            .produce_records_from(file, body)
            .await
            .unwrap();
        records.records.collect().await
    }

    const PDE_HEADER: &str =
        "PDE_ID|BENE_ID|SRVC_DT|PROD_SRVC_ID|QTY_DSPNSD_NUM|DAYS_SUPLY_NUM|TOT_RX_CST_AMT\n";

    #[tokio::test]
    async fn test_records_carry_provenance() {
        let file = file_event(RifFileType::Pde, "pde.rif");
        let content = format!(
            "{PDE_HEADER}89|567834|12-MAY-2015|500904610|60|30|362.84\n90|567834|13-MAY-2015|500904610|30|15|181.42\n"
        );

        let results = parse(file.clone(), &content).await;
        assert_eq!(results.len(), 2);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.line, 2);
        assert_eq!(first.file.file_name, "pde.rif");
        assert_eq!(first.record.identity_key(), "89");
        assert_eq!(results[1].as_ref().unwrap().line, 3);

        assert_eq!(file.metrics().records_read(), 2);
        assert_eq!(file.metrics().parse_failures(), 0);
    }

    #[tokio::test]
    async fn test_bad_record_does_not_stop_the_stream() {
        let file = file_event(RifFileType::Pde, "pde.rif");
        let content = format!(
            "{PDE_HEADER}89|567834|not-a-date|500904610|60|30|362.84\n90|567834|only|three\n91|567834|13-MAY-2015|500904610|30|15|181.42\n"
        );

        let results = parse(file.clone(), &content).await;
        assert_eq!(results.len(), 3);

        let field_error = results[0].as_ref().unwrap_err();
        assert!(matches!(field_error, RecordError::Field { line: 2, .. }));
        assert!(!field_error.is_structural());

        let row_error = results[1].as_ref().unwrap_err();
        assert!(matches!(row_error, RecordError::MalformedRow { line: 3, .. }));

        assert_eq!(results[2].as_ref().unwrap().record.identity_key(), "91");
        assert_eq!(file.metrics().parse_failures(), 2);
    }

    #[tokio::test]
    async fn test_claim_rows_grouped_by_claim_id() {
        let file = file_event(RifFileType::Carrier, "carrier.rif");
        let content = "\
CLM_ID|BENE_ID|CLM_FROM_DT|CLM_THRU_DT|CARR_CLM_PMT_AMT|PRNCPAL_DGNS_CD|LINE_NUM|HCPCS_CD|LINE_NCH_PMT_AMT
9991|567834|23-JUL-1999|27-JUL-1999|199.99|A25|1|92999|123.45
9991|567834|23-JUL-1999|27-JUL-1999|199.99|A25|2||76.54
9992|567834|01-AUG-1999|02-AUG-1999|50.00|B17|1|99213|50.00
";

        let results = parse(file.clone(), content).await;
        assert_eq!(results.len(), 2);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.line, 2);
        let RifRecord::Carrier(claim) = &first.record else {
            panic!("expected a carrier claim");
        };
        assert_eq!(claim.lines.len(), 2);

        let second = results[1].as_ref().unwrap();
        assert_eq!(second.line, 4);
        assert_eq!(second.record.identity_key(), "9992");
        assert_eq!(file.metrics().records_read(), 2);
    }

    #[tokio::test]
    async fn test_bad_claim_line_fails_whole_claim_only() {
        let file = file_event(RifFileType::Carrier, "carrier.rif");
        let content = "\
CLM_ID|BENE_ID|CLM_FROM_DT|CLM_THRU_DT|CARR_CLM_PMT_AMT|PRNCPAL_DGNS_CD|LINE_NUM|HCPCS_CD|LINE_NCH_PMT_AMT
9991|567834|23-JUL-1999|27-JUL-1999|199.99|A25|1|92999|123.45
9991|567834|23-JUL-1999|27-JUL-1999|199.99|A25|two||76.54
9992|567834|01-AUG-1999|02-AUG-1999|50.00|B17|1|99213|50.00
";

        let results = parse(file, content).await;
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            RecordError::Field { line: 2, .. }
        ));
        assert_eq!(results[1].as_ref().unwrap().record.identity_key(), "9992");
    }

    #[tokio::test]
    async fn test_short_claim_line_fails_whole_claim() {
        let file = file_event(RifFileType::Carrier, "carrier.rif");
        let content = "\
CLM_ID|BENE_ID|CLM_FROM_DT|CLM_THRU_DT|CARR_CLM_PMT_AMT|PRNCPAL_DGNS_CD|LINE_NUM|HCPCS_CD|LINE_NCH_PMT_AMT
9991|567834|23-JUL-1999|27-JUL-1999|199.99|A25|1|92999|123.45
9991|567834|23-JUL-1999
9991|567834|23-JUL-1999|27-JUL-1999|199.99|A25|3|92999|10.00
9992|567834|01-AUG-1999|02-AUG-1999|50.00|B17|1|99213|50.00
";

        let results = parse(file.clone(), content).await;
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0].as_ref().unwrap_err(),
            RecordError::MalformedRow { line: 3, .. }
        ));
        assert_eq!(results[1].as_ref().unwrap().record.identity_key(), "9992");
        assert_eq!(file.metrics().parse_failures(), 1);
    }

    /// Serves `data`, then fails every further read
    struct FailingBody {
        data: Cursor<Vec<u8>>,
    }

    impl AsyncRead for FailingBody {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            if self.data.position() < self.data.get_ref().len() as u64 {
                Pin::new(&mut self.data).poll_read(cx, buf)
            } else {
                Poll::Ready(Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset",
                )))
            }
        }
    }

    #[tokio::test]
    async fn test_read_failure_ends_stream_with_one_error() {
        let file = file_event(RifFileType::Pde, "pde.rif");
        let content = format!(
            "{PDE_HEADER}89|567834|12-MAY-2015|500904610|60|30|362.84\n90|567834|13-MAY-2015|500904610|30|15|181.42\n91|5678"
        );
        let body: ObjectBody = Box::pin(FailingBody {
            data: Cursor::new(content.into_bytes()),
        });

        let results = parse_body(file.clone(), body).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().record.identity_key(), "89");
        assert_eq!(results[1].as_ref().unwrap().record.identity_key(), "90");

        let error = results[2].as_ref().unwrap_err();
        assert!(error.is_structural());
        assert_eq!(error.line(), 3);
        assert_eq!(file.metrics().parse_failures(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8_fails_only_that_row() {
        let file = file_event(RifFileType::Pde, "pde.rif");
        let mut content = PDE_HEADER.as_bytes().to_vec();
        content.extend_from_slice(b"89|567834|12-MAY-2015|500904610|60|30|362.84\n");
        content.extend_from_slice(b"90|567834|13-MAY-2015|\xff\xfe|30|15|181.42\n");
        content.extend_from_slice(b"91|567834|14-MAY-2015|500904610|30|15|181.42\n");

        let results = parse_body(file, Box::pin(Cursor::new(content))).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        let error = results[1].as_ref().unwrap_err();
        assert!(matches!(error, RecordError::MalformedRow { line: 3, .. }));
        assert!(!error.is_structural());
        assert_eq!(results[2].as_ref().unwrap().record.identity_key(), "91");
    }

    #[tokio::test]
    async fn test_missing_columns_rejects_file() {
        let body: ObjectBody = Box::pin(Cursor::new(b"PDE_ID|BENE_ID\n1|2\n".to_vec()));
        let result = processor()
            .produce_records_from(file_event(RifFileType::Pde, "pde.rif"), body)
            .await;

        match result {
            Err(ExtractError::MissingColumns { missing, .. }) => {
                assert!(missing.contains(&"SRVC_DT"));
            }
            other => panic!("expected MissingColumns, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_missing_object_is_an_open_error() {
        let result = processor()
            .produce_records(file_event(RifFileType::Pde, "absent.rif"))
            .await;
        assert!(matches!(result, Err(ExtractError::Open { .. })));
    }

    #[tokio::test]
    async fn test_produce_records_reads_from_store() {
        let store = Arc::new(InMemoryObjectStore::new());
        let file = file_event(RifFileType::Pde, "pde.rif");
        store
            .put_object(
                &file.key,
                format!("{PDE_HEADER}89|567834|12-MAY-2015|500904610|60|30|362.84\n").into_bytes(),
            )
            .await
            .unwrap();

        let processor = RifFilesProcessor::new(store, MetricsSink::noop());
        let records = processor.produce_records(file).await.unwrap();
        let results: Vec<_> = records.records.collect().await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }
}
