use std::sync::Arc;

use async_trait::async_trait;
use csv::{ByteRecord, Position, ReaderBuilder, StringRecord};
use tokio::{fs::File, io};
use tracing::{debug, trace, warn};

use super::record_framer::RecordFramer;
use crate::backends::{CommonSourceConfig, MalformedPolicy, Source};
use crate::common::{Batch, SourceId};
use crate::error::AggregateError;
use crate::progress::ProgressMetrics;

/// 📂 CsvSource — reads one CSV file, `chunk_size` records at a time, and nothing more.
///
/// Think of it like a very diligent intern who reads a massive CSV, never complains,
/// and only stops when (a) the file ends or (b) the batch is full. It holds exactly one
/// file handle, and lets go of it on EOF, on error, or the moment you call `close`.
///
/// 🧠 Knowledge graph:
/// - the header is the first non-blank record, read lazily on the first `next_batch`
///   (so a broken header surfaces as `MalformedRecord` at first-chunk time, not at open)
/// - `page` and `starts` are reused across batches: their capacity tracks the largest
///   chunk seen, never the file
/// - line numbers are physical lines, header = line 1
pub struct CsvSource {
    source_id: SourceId,
    reader: Option<io::BufReader<File>>,
    config: CommonSourceConfig,
    delimiter: u8,
    framer: RecordFramer,
    header: Option<Arc<StringRecord>>,
    /// 📍 the physical line the next frame starts on
    next_line: u64,
    records_read: u64,
    skipped: u64,
    page: Vec<u8>,
    /// 📐 (offset in page, physical line) for each framed record in the page
    starts: Vec<(usize, u64)>,
    // -- 📊 only when asked for; a progress bar in a unit test is a cry for help
    progress: Option<ProgressMetrics>,
}

// 🐛 page/starts/progress are excluded on purpose: nobody debugging a source wants
// a megabyte of raw CSV bytes in their terminal.
impl std::fmt::Debug for CsvSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvSource")
            .field("source_id", &self.source_id)
            .field("open", &self.reader.is_some())
            .field("next_line", &self.next_line)
            .field("records_read", &self.records_read)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl CsvSource {
    /// 🚀 Opens the file and wraps it in a BufReader. Reads nothing yet.
    ///
    /// If the file doesn't exist: 💀 `SourceNotFound`, tagged with the path we knocked on.
    pub async fn open(source_id: SourceId, config: CommonSourceConfig) -> Result<Self, AggregateError> {
        config.validate()?;
        let delimiter = config.delimiter_byte()?;

        let file_handle = File::open(source_id.as_path())
            .await
            .map_err(|cause| AggregateError::SourceNotFound {
                source_id: source_id.clone(),
                cause,
            })?;

        // 📏 file size only feeds the progress bar; unknown (0) is fine
        let progress = if config.progress {
            let file_size = file_handle.metadata().await.map(|m| m.len()).unwrap_or(0);
            Some(ProgressMetrics::new(source_id.to_string(), file_size))
        } else {
            None
        };

        debug!("📂 opened '{}' for chunked reading", source_id);

        Ok(Self {
            source_id,
            reader: Some(io::BufReader::new(file_handle)),
            config,
            delimiter,
            framer: RecordFramer::new(delimiter),
            header: None,
            next_line: 1,
            records_read: 0,
            skipped: 0,
            page: Vec::new(),
            starts: Vec::new(),
            progress,
        })
    }

    /// 🔓 Is a file handle currently held?
    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    fn io_error(&self, cause: std::io::Error) -> AggregateError {
        AggregateError::Io {
            source_id: self.source_id.clone(),
            cause,
        }
    }

    /// 🗑️ Drop the handle. Idempotent.
    fn release(&mut self) {
        if self.reader.take().is_some() {
            debug!(
                "🚪 released '{}' after {} records ({} skipped)",
                self.source_id, self.records_read, self.skipped
            );
        }
        if let Some(progress) = &self.progress {
            progress.finish();
        }
    }

    /// 🧹 Fail or skip, depending on the policy. Skips are counted and logged, never silent.
    fn reject(&mut self, line: u64, reason: impl Into<String>) -> Result<(), AggregateError> {
        let reason = reason.into();
        match self.config.malformed {
            MalformedPolicy::Fail => Err(AggregateError::malformed(&self.source_id, line, reason)),
            MalformedPolicy::Skip => {
                self.skipped += 1;
                warn!(
                    "🧹 skipping malformed record in '{}' at line {}: {}",
                    self.source_id, line, reason
                );
                Ok(())
            }
        }
    }

    /// 🎩 Read and parse the header. `None` if the file has no records at all.
    async fn read_header(&mut self) -> Result<Option<Arc<StringRecord>>, AggregateError> {
        let framer = self.framer;
        let mut raw = Vec::new();
        let (line, frame) = loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            let framed = framer.next_record(reader, &mut raw).await;
            let frame = match framed {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(None),
                Err(cause) => return Err(self.io_error(cause)),
            };
            let line = self.next_line;
            self.next_line += frame.lines;
            if !frame.blank {
                break (line, frame);
            }
        };

        if frame.unterminated {
            return Err(AggregateError::malformed(
                &self.source_id,
                line,
                "header has an unterminated quoted field",
            ));
        }

        let mut parser = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(raw.as_slice());
        let mut header = StringRecord::new();
        match parser.read_record(&mut header) {
            Ok(true) => {}
            Ok(false) => {
                return Err(AggregateError::malformed(&self.source_id, line, "header row is empty"));
            }
            Err(e) => {
                return Err(AggregateError::malformed(
                    &self.source_id,
                    line,
                    format!("header row could not be parsed: {e}"),
                ));
            }
        }
        if header.iter().all(str::is_empty) {
            return Err(AggregateError::malformed(
                &self.source_id,
                line,
                "header row has no column names",
            ));
        }

        trace!("🎩 '{}' header: {:?}", self.source_id, header);
        let header = Arc::new(header);
        self.header = Some(header.clone());
        Ok(Some(header))
    }

    /// 📄 Fill the page with up to `chunk_size` framed records. Returns (bytes, eof, unterminated line).
    async fn fill_page(&mut self) -> Result<(usize, bool, Option<u64>), AggregateError> {
        self.page.clear();
        self.starts.clear();

        let framer = self.framer;
        let mut total_bytes = 0usize;
        let mut eof = false;
        let mut unterminated = None;

        while self.starts.len() < self.config.chunk_size {
            let Some(reader) = self.reader.as_mut() else {
                eof = true;
                break;
            };
            let record_start = self.page.len();
            let framed = framer.next_record(reader, &mut self.page).await;
            let frame = match framed {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    eof = true;
                    break;
                }
                Err(cause) => return Err(self.io_error(cause)),
            };

            let line = self.next_line;
            self.next_line += frame.lines;
            total_bytes += frame.bytes;

            if frame.blank {
                continue;
            }
            if frame.unterminated {
                // 💀 only possible at EOF; the dangling bytes never reach the parser
                self.page.truncate(record_start);
                unterminated = Some(line);
                eof = true;
                break;
            }
            self.starts.push((record_start, line));
        }

        Ok((total_bytes, eof, unterminated))
    }

    /// 🧾 Parse the current page into records, checking each against the header's width.
    fn parse_page(&mut self, header_len: usize) -> Result<Vec<StringRecord>, AggregateError> {
        let page = std::mem::take(&mut self.page);
        let starts = std::mem::take(&mut self.starts);
        let parsed = self.parse_records(&page, &starts, header_len);
        self.page = page;
        self.starts = starts;
        parsed
    }

    fn parse_records(
        &mut self,
        page: &[u8],
        starts: &[(usize, u64)],
        header_len: usize,
    ) -> Result<Vec<StringRecord>, AggregateError> {
        let mut parser = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .delimiter(self.delimiter)
            .from_reader(page);
        let mut records = Vec::with_capacity(starts.len());
        let mut byte_record = ByteRecord::new();
        let last_line = starts.last().map(|(_, line)| *line).unwrap_or(self.next_line);

        loop {
            match parser.read_byte_record(&mut byte_record) {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => {
                    return Err(AggregateError::malformed(&self.source_id, last_line, e.to_string()));
                }
            }

            // -- the parser may report a record as starting on the terminator of the previous one
            let mut at = byte_record.position().map(|p| p.byte() as usize).unwrap_or(0);
            while at < page.len() && (page[at] == b'\n' || page[at] == b'\r') {
                at += 1;
            }

            let line = match starts.binary_search_by_key(&at, |(offset, _)| *offset) {
                Ok(index) => starts[index].1,
                Err(index) => {
                    // a record the framer never saw: a bare carriage return split the line
                    let line = starts[index.saturating_sub(1)].1;
                    self.reject(line, "bare carriage return inside a record")?;
                    continue;
                }
            };

            if byte_record.len() != header_len {
                self.reject(
                    line,
                    format!("expected {} fields, found {}", header_len, byte_record.len()),
                )?;
                continue;
            }

            match StringRecord::from_byte_record(byte_record.clone()) {
                Ok(mut record) => {
                    self.records_read += 1;
                    let mut position = Position::new();
                    position.set_line(line).set_record(self.records_read);
                    record.set_position(Some(position));
                    records.push(record);
                }
                Err(_) => self.reject(line, "record is not valid UTF-8")?,
            }
        }

        Ok(records)
    }

    async fn read_batch(&mut self) -> Result<Option<Batch>, AggregateError> {
        let header = match &self.header {
            Some(header) => header.clone(),
            None => match self.read_header().await? {
                Some(header) => header,
                None => return Ok(None),
            },
        };

        loop {
            if self.reader.is_none() {
                return Ok(None);
            }

            let (bytes, eof, unterminated) = self.fill_page().await?;
            let records = self.parse_page(header.len())?;
            if let Some(line) = unterminated {
                self.reject(line, "unterminated quoted field at end of file")?;
            }
            if eof {
                // 🏁 the handle goes as soon as we know there's nothing left behind it
                self.release();
            }

            if let Some(progress) = self.progress.as_mut() {
                progress.update(bytes as u64, records.len() as u64);
            }

            if records.is_empty() {
                if eof {
                    return Ok(None);
                }
                // -- every record in this page was skipped; go fetch another page
                continue;
            }

            let first_line = records[0].position().map(|p| p.line()).unwrap_or(self.next_line);
            trace!(
                "📖 '{}': {} records from line {} ({} bytes)",
                self.source_id,
                records.len(),
                first_line,
                bytes
            );
            return Ok(Some(Batch::new(
                self.source_id.clone(),
                header,
                records,
                first_line,
                bytes,
            )));
        }
    }
}

#[async_trait]
impl Source for CsvSource {
    /// 📄 Next chunk of records, `None` at EOF. Any error releases the handle before returning.
    async fn next_batch(&mut self) -> Result<Option<Batch>, AggregateError> {
        let outcome = self.read_batch().await;
        if !matches!(outcome, Ok(Some(_))) {
            self.release();
        }
        outcome
    }

    async fn close(&mut self) -> Result<(), AggregateError> {
        self.release();
        Ok(())
    }

    fn skipped_malformed(&self) -> u64 {
        self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("💀 temp dir said no");
        file.write_all(contents.as_bytes())
            .expect("💀 could not write fixture");
        file
    }

    fn config(chunk_size: usize) -> CommonSourceConfig {
        CommonSourceConfig {
            chunk_size,
            ..CommonSourceConfig::default()
        }
    }

    async fn open(file: &NamedTempFile, config: CommonSourceConfig) -> CsvSource {
        let source_id = SourceId::from(file.path().to_string_lossy().to_string());
        CsvSource::open(source_id, config)
            .await
            .expect("💀 fixture should open")
    }

    async fn drain(source: &mut CsvSource) -> Result<Vec<Batch>, AggregateError> {
        let mut batches = Vec::new();
        while let Some(batch) = source.next_batch().await? {
            batches.push(batch);
        }
        Ok(batches)
    }

    fn flatten(batches: &[Batch]) -> Vec<Vec<String>> {
        batches
            .iter()
            .flat_map(|b| b.records().iter())
            .map(|r| r.iter().map(str::to_string).collect())
            .collect()
    }

    #[tokio::test]
    async fn the_one_where_seven_rows_become_three_three_one() {
        let file = write_csv("n\n1\n2\n3\n4\n5\n6\n7\n");
        let mut source = open(&file, config(3)).await;
        let batches = drain(&mut source).await.expect("💀 clean file");
        let sizes: Vec<usize> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(batches[0].first_line(), 2);
        assert_eq!(batches[1].first_line(), 5);
        assert_eq!(batches[0].bytes(), "1\n2\n3\n".len());
        assert_eq!(batches[2].header().get(0), Some("n"));
        assert!(!source.is_open(), "EOF should have released the handle");
    }

    #[tokio::test]
    async fn the_one_where_batches_concatenate_back_into_the_file() {
        let file = write_csv(
            "id,note,amount\r\n1,\"multi\nline\",10\r\n\r\n2,\"comma, inside\",20\r\n3,\"\"\"quoted\"\"\",30",
        );
        for chunk_size in [1, 2, 1_000_000] {
            let mut source = open(&file, config(chunk_size)).await;
            let batches = drain(&mut source).await.expect("💀 valid quoting");
            assert_eq!(
                flatten(&batches),
                vec![
                    vec!["1", "multi\nline", "10"],
                    vec!["2", "comma, inside", "20"],
                    vec!["3", "\"quoted\"", "30"],
                ],
                "chunk_size {chunk_size} changed the records"
            );
        }
    }

    #[tokio::test]
    async fn the_one_where_line_numbers_survive_multiline_fields() {
        let file = write_csv("id,note\n1,\"a\nb\nc\"\n2,x,extra\n");
        let mut source = open(&file, config(10)).await;
        match drain(&mut source).await {
            Err(AggregateError::MalformedRecord { line, reason, .. }) => {
                assert_eq!(line, 5);
                assert!(reason.contains("expected 2 fields, found 3"));
            }
            other => panic!("💀 expected MalformedRecord, got {other:?}"),
        }
        assert!(!source.is_open(), "errors must release the handle");
    }

    #[tokio::test]
    async fn the_one_where_lenient_mode_skips_and_counts() {
        let file = write_csv("a,b\n1,2\n3\n4,5\n6,7,8\n9,10\n");
        let lenient = CommonSourceConfig {
            chunk_size: 2,
            malformed: MalformedPolicy::Skip,
            ..CommonSourceConfig::default()
        };
        let mut source = open(&file, lenient).await;
        let batches = drain(&mut source).await.expect("💀 lenient mode should not fail");
        assert_eq!(
            flatten(&batches),
            vec![vec!["1", "2"], vec!["4", "5"], vec!["9", "10"]]
        );
        assert_eq!(source.skipped_malformed(), 2);
    }

    #[tokio::test]
    async fn the_one_where_an_empty_file_has_nothing_to_say() {
        let file = write_csv("");
        let mut source = open(&file, config(5)).await;
        assert!(source.next_batch().await.expect("💀 empty is fine").is_none());

        let header_only = write_csv("sl,gwp\n");
        let mut source = open(&header_only, config(5)).await;
        assert!(source.next_batch().await.expect("💀 header only is fine").is_none());
    }

    #[tokio::test]
    async fn the_one_where_close_lets_go_immediately() {
        let file = write_csv("n\n1\n2\n3\n");
        let mut source = open(&file, config(1)).await;
        assert!(source.next_batch().await.expect("💀 first batch").is_some());
        assert!(source.is_open());
        source.close().await.expect("💀 close never fails");
        assert!(!source.is_open());
        assert!(source.next_batch().await.expect("💀 closed is exhausted").is_none());
    }

    #[tokio::test]
    async fn the_one_where_an_unclosed_quote_is_malformed_at_the_end() {
        let file = write_csv("a,b\n1,2\n3,\"never closed\n");
        let mut source = open(&file, config(10)).await;
        assert!(matches!(
            drain(&mut source).await,
            Err(AggregateError::MalformedRecord { line: 3, .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_semicolons_rule_the_land() {
        let file = write_csv("a;b\n1;2\n");
        let semis = CommonSourceConfig {
            delimiter: ';',
            ..config(10)
        };
        let mut source = open(&file, semis).await;
        let batches = drain(&mut source).await.expect("💀 semicolons are valid");
        assert_eq!(flatten(&batches), vec![vec!["1", "2"]]);
    }

    #[tokio::test]
    async fn the_one_where_a_nameless_header_is_rejected() {
        let file = write_csv(",\n1,2\n");
        let mut source = open(&file, config(10)).await;
        assert!(matches!(
            source.next_batch().await,
            Err(AggregateError::MalformedRecord { line: 1, .. })
        ));
    }

    #[tokio::test]
    async fn the_one_where_a_twenty_seven_inch_screen_is_a_normal_row() {
        let contents = "item,size\nscreen,27\"\nmouse,1\nkeyboard,2\n";
        let expected = vec![vec!["screen", "27\""], vec!["mouse", "1"], vec!["keyboard", "2"]];

        let file = write_csv(contents);
        let mut strict = open(&file, config(10)).await;
        let batches = drain(&mut strict).await.expect("💀 an inch mark is not malformed");
        assert_eq!(flatten(&batches), expected);
        assert_eq!(batches[0].first_line(), 2);

        let lenient = CommonSourceConfig {
            malformed: MalformedPolicy::Skip,
            ..config(10)
        };
        let mut skipping = open(&file, lenient).await;
        let batches = drain(&mut skipping).await.expect("💀 lenient mode should not fail");
        assert_eq!(flatten(&batches), expected);
        assert_eq!(skipping.skipped_malformed(), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_bad_row_only_costs_itself() {
        // -- line 3 is one field short; the inch marks around it must not drag neighbours along
        let file = write_csv("item,size\nscreen,27\"\ncable\ntv,55\"\nmouse,1\n");
        let lenient = CommonSourceConfig {
            malformed: MalformedPolicy::Skip,
            ..config(2)
        };
        let mut source = open(&file, lenient).await;
        let batches = drain(&mut source).await.expect("💀 lenient mode should not fail");
        assert_eq!(
            flatten(&batches),
            vec![vec!["screen", "27\""], vec!["tv", "55\""], vec!["mouse", "1"]]
        );
        assert_eq!(source.skipped_malformed(), 1);

        let mut strict = open(&file, config(2)).await;
        assert!(matches!(
            drain(&mut strict).await,
            Err(AggregateError::MalformedRecord { line: 3, .. })
        ));
    }
}
