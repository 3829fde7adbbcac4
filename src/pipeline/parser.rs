//! Line-delimited Spark event log parser.
//!
//! Classifies every line by its `Event` field and keeps only task-end and
//! stage-completed events. The kind-specific payload is decoded later by
//! the extractor (in parallel); here each line is only read far enough to
//! learn its kind and top-level `Stage ID`.
//!
//! Lines that are not valid JSON are skipped and logged, never fatal.

use std::borrow::Cow;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;
use rayon::prelude::*;
use serde::Deserialize;

use super::codec::{self, Codec};
use crate::discovery::EventLogFile;
use crate::error::{LineParseError, Origin, PipelineError, Result};
use crate::error_tracker::SkippedLineTracker;

/// Threshold for switching from buffered read to mmap (1 MB).
const MMAP_THRESHOLD: u64 = 1_048_576;

pub const TASK_END: &str = "SparkListenerTaskEnd";
pub const STAGE_COMPLETED: &str = "SparkListenerStageCompleted";

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct TaskEndEvent {
    pub origin: Origin,
    /// Top-level `Stage ID`, used to partition extraction.
    pub stage_id: Option<i64>,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageCompletedEvent {
    pub origin: Origin,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawEvent {
    TaskEnd(TaskEndEvent),
    StageCompleted(StageCompletedEvent),
    Unknown,
}

/// Everything retained from one or more event log files.
#[derive(Debug, Default)]
pub struct ParsedLog {
    pub task_events: Vec<TaskEndEvent>,
    pub stage_events: Vec<StageCompletedEvent>,
    pub lines_total: u64,
    pub lines_skipped: u64,
    pub events_ignored: u64,
    pub bytes_read: u64,
    /// Rolling-log files that could not be read and were left out.
    pub files_failed: usize,
}

impl ParsedLog {
    fn merge(&mut self, other: ParsedLog) {
        self.task_events.extend(other.task_events);
        self.stage_events.extend(other.stage_events);
        self.lines_total += other.lines_total;
        self.lines_skipped += other.lines_skipped;
        self.events_ignored += other.events_ignored;
        self.bytes_read += other.bytes_read;
        self.files_failed += other.files_failed;
    }

    /// Fail with `EmptyOrInvalidLog` unless both event kinds are present.
    pub fn ensure_usable(self, source_label: &str) -> Result<Self> {
        if self.task_events.is_empty() || self.stage_events.is_empty() {
            return Err(PipelineError::EmptyOrInvalidLog {
                source_label: source_label.to_string(),
                task_events: self.task_events.len(),
                stage_events: self.stage_events.len(),
            });
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Envelope: just enough of a line to classify it
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "Event", borrow, default)]
    event: Option<Cow<'a, str>>,
    #[serde(rename = "Stage ID", default)]
    stage_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Classify a single (trimmed, non-empty) line.
pub fn classify_line(line: &str, origin: Origin) -> std::result::Result<RawEvent, LineParseError> {
    let envelope: Envelope = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(e) => {
            return Err(LineParseError {
                origin,
                message: e.to_string(),
            })
        }
    };

    let event = match envelope.event.as_deref() {
        Some(TASK_END) => RawEvent::TaskEnd(TaskEndEvent {
            origin,
            stage_id: envelope.stage_id,
            raw: line.to_string(),
        }),
        Some(STAGE_COMPLETED) => RawEvent::StageCompleted(StageCompletedEvent {
            origin,
            raw: line.to_string(),
        }),
        _ => RawEvent::Unknown,
    };
    Ok(event)
}

/// Parse an in-memory sequence of lines (1-based numbering).
pub fn parse_lines<'a, I>(lines: I, source_label: &str, tracker: &SkippedLineTracker) -> Result<ParsedLog>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut collector = LineCollector::new(source_label, tracker, None);
    for (idx, line) in lines.into_iter().enumerate() {
        collector.push(idx as u64 + 1, line.as_bytes());
    }
    collector.finish().ensure_usable(source_label)
}

/// Parse every file of an event log on the pool and merge the results.
///
/// In a rolling log a file that fails with an I/O error (a truncated or
/// corrupt compressed part) is logged and left out; the other files still
/// count. A lone file has nothing to fall back on, so its error is returned.
pub fn parse_event_log(
    files: &[EventLogFile],
    source_label: &str,
    pool: &rayon::ThreadPool,
    tracker: &SkippedLineTracker,
) -> Result<ParsedLog> {
    let per_file: Vec<Result<ParsedLog>> =
        pool.install(|| files.par_iter().map(|f| parse_event_file(f, tracker)).collect());

    // Merge in file order so event order within the log is preserved.
    let mut merged = ParsedLog::default();
    for (file, parsed) in files.iter().zip(per_file) {
        match parsed {
            Ok(log) => merged.merge(log),
            Err(PipelineError::Io(e)) if files.len() > 1 => {
                tracing::warn!(file = %file.path.display(), error = %e, "Skipping unreadable event log file");
                merged.files_failed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        lines = merged.lines_total,
        task_events = merged.task_events.len(),
        stage_events = merged.stage_events.len(),
        skipped = merged.lines_skipped,
        files_failed = merged.files_failed,
        "Parsed Spark event log"
    );

    merged.ensure_usable(source_label)
}

/// Parse a single event log file, choosing the read strategy by codec and size.
pub fn parse_event_file(file: &EventLogFile, tracker: &SkippedLineTracker) -> Result<ParsedLog> {
    let label = file.path.display().to_string();

    if file.codec.is_compressed() {
        let reader = codec::open_reader(&file.path, file.codec)?;
        return parse_reader(reader, &label, tracker, None);
    }

    if file.size > MMAP_THRESHOLD {
        parse_mmap(&file.path, &label, tracker)
    } else {
        let reader = codec::open_reader(&file.path, Codec::Plain)?;
        parse_reader(reader, &label, tracker, Some(file.size))
    }
}

/// Parse from any buffered reader. Lines are split on `\n` as raw bytes so
/// that invalid UTF-8 only costs the offending line.
pub fn parse_reader<R: BufRead>(
    mut reader: R,
    source_label: &str,
    tracker: &SkippedLineTracker,
    total_bytes: Option<u64>,
) -> Result<ParsedLog> {
    let mut collector = LineCollector::new(source_label, tracker, total_bytes);
    let mut buf = Vec::with_capacity(8 * 1024);
    let mut line_no: u64 = 0;

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        line_no += 1;
        collector.push(line_no, &buf);
    }

    Ok(collector.finish())
}

// ---------------------------------------------------------------------------
// mmap-based parser (large files)
// ---------------------------------------------------------------------------

fn parse_mmap(path: &Path, source_label: &str, tracker: &SkippedLineTracker) -> Result<ParsedLog> {
    let file = File::open(path)?;

    // The log is a finished batch artifact; it is not expected to change underneath us.
    let mmap = unsafe { Mmap::map(&file) }?;
    let data: &[u8] = &mmap;

    let mut collector = LineCollector::new(source_label, tracker, Some(data.len() as u64));
    let mut pos: usize = 0;
    let mut line_no: u64 = 0;

    while pos < data.len() {
        let line_end = match data[pos..].iter().position(|&b| b == b'\n') {
            Some(nl) => pos + nl,
            // Last line without trailing newline is still a complete record in batch mode
            None => data.len(),
        };
        line_no += 1;
        collector.push(line_no, &data[pos..line_end]);
        pos = line_end + 1;
    }

    Ok(collector.finish())
}

// ---------------------------------------------------------------------------
// Shared line handling
// ---------------------------------------------------------------------------

/// Progress is reported at these fractions of the input.
const PROGRESS_MARKS: [f64; 3] = [0.25, 0.5, 0.75];

struct LineCollector<'t> {
    file: Arc<str>,
    tracker: &'t SkippedLineTracker,
    log: ParsedLog,
    total_bytes: Option<u64>,
    next_mark: usize,
}

impl<'t> LineCollector<'t> {
    fn new(source_label: &str, tracker: &'t SkippedLineTracker, total_bytes: Option<u64>) -> Self {
        Self {
            file: Arc::from(source_label),
            tracker,
            log: ParsedLog::default(),
            total_bytes,
            next_mark: 0,
        }
    }

    fn push(&mut self, line_no: u64, bytes: &[u8]) {
        self.log.lines_total += 1;
        self.log.bytes_read += bytes.len() as u64;
        self.report_progress();

        let trimmed = trim_bytes(bytes);
        if trimmed.is_empty() {
            return;
        }

        let origin = Origin {
            file: Arc::clone(&self.file),
            line: line_no,
        };

        let text = match std::str::from_utf8(trimmed) {
            Ok(t) => t,
            Err(e) => {
                self.skip(LineParseError {
                    origin,
                    message: format!("invalid UTF-8: {}", e),
                });
                return;
            }
        };

        match classify_line(text, origin) {
            Ok(RawEvent::TaskEnd(ev)) => self.log.task_events.push(ev),
            Ok(RawEvent::StageCompleted(ev)) => self.log.stage_events.push(ev),
            Ok(RawEvent::Unknown) => self.log.events_ignored += 1,
            Err(e) => self.skip(e),
        }
    }

    fn skip(&mut self, err: LineParseError) {
        self.log.lines_skipped += 1;
        self.tracker.record(&err);
    }

    fn report_progress(&mut self) {
        let total = match self.total_bytes {
            Some(t) if t > 0 => t,
            _ => return,
        };
        if self.next_mark >= PROGRESS_MARKS.len() {
            return;
        }
        let fraction = self.log.bytes_read as f64 / total as f64;
        if fraction > PROGRESS_MARKS[self.next_mark] {
            tracing::info!("Parsing {}: {:.0}%", self.file, fraction * 100.0);
            self.next_mark += 1;
        }
    }

    fn finish(self) -> ParsedLog {
        tracing::debug!(
            file = %self.file,
            lines = self.log.lines_total,
            skipped = self.log.lines_skipped,
            "Finished parsing file"
        );
        self.log
    }
}

// ---------------------------------------------------------------------------
// Byte utilities
// ---------------------------------------------------------------------------

fn trim_bytes(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| !b.is_ascii_whitespace()).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|&b| !b.is_ascii_whitespace()).map_or(start, |p| p + 1);
    &bytes[start..end]
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
