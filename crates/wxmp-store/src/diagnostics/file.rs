use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;

use super::{DiagnosticEntry, DiagnosticSink, parse_id};
use crate::Result;

/// Every block starts with this prefix; a block ends where the next one starts.
const DELIMITER: &str = "============ [";

fn start_marker(tag: &str) -> String {
    format!("{}{}] entry start ============", DELIMITER, tag)
}

/// Diagnostic entries in `<dir>/<YYYYMM>/<DD>.log` flat files.
///
/// Lookup scans the day file for the entry's start marker and reads up to the
/// next block, so cost grows with the number of entries written that day.
#[derive(Debug)]
pub struct FileDiagnosticLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileDiagnosticLog {
    /// Open the log directory, removing day files older than `retention_days`.
    pub fn new(dir: impl Into<PathBuf>, retention_days: u32) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        cleanup_old_files(&dir, retention_days)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the log.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.dir
            .join(date.format("%Y%m").to_string())
            .join(format!("{}.log", date.format("%d")))
    }
}

impl DiagnosticSink for FileDiagnosticLog {
    fn append(&self, entry: &DiagnosticEntry) -> Result<()> {
        let (date, tag) = parse_id(&entry.id)?;
        let path = self.day_file(date);

        let mut block = String::new();
        block.push_str(&start_marker(tag));
        block.push('\n');
        block.push_str(&format!("[ time ] {}\n", entry.recorded_at.to_rfc3339()));
        block.push_str(&format!("[ name ] {}\n", entry.name));
        block.push_str(&format!(
            "[ data ] {}\n",
            serde_json::to_string_pretty(&entry.data)?
        ));

        let _guard = self.write_lock.lock();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(block.as_bytes())?;
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<DiagnosticEntry>> {
        let (date, tag) = parse_id(id)?;
        let path = self.day_file(date);
        if !path.is_file() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let marker = start_marker(tag);
        let Some(start) = find_line_start(&content, &marker) else {
            return Ok(None);
        };
        let rest = &content[start + marker.len()..];
        let block = match find_line_start(rest, DELIMITER) {
            Some(end) => &rest[..end],
            None => rest,
        };

        Ok(Some(parse_block(id, block)?))
    }
}

/// Offset of the first occurrence of `needle` at the beginning of a line.
///
/// Pretty-printed JSON escapes newlines inside strings, so payload text can
/// never begin a line with a marker.
fn find_line_start(haystack: &str, needle: &str) -> Option<usize> {
    if haystack.starts_with(needle) {
        return Some(0);
    }
    haystack
        .match_indices(needle)
        .map(|(at, _)| at)
        .find(|&at| haystack[..at].ends_with('\n'))
}

/// Parse the lines following a start marker back into an entry.
fn parse_block(id: &str, block: &str) -> Result<DiagnosticEntry> {
    let mut recorded_at = DateTime::<Utc>::default();
    let mut name = String::new();
    let mut data = serde_json::Value::Null;

    let mut lines = block.lines();
    while let Some(line) = lines.next() {
        if let Some(time) = line.strip_prefix("[ time ] ") {
            if let Ok(dt) = DateTime::parse_from_rfc3339(time.trim()) {
                recorded_at = dt.with_timezone(&Utc);
            }
        } else if let Some(n) = line.strip_prefix("[ name ] ") {
            name = n.to_string();
        } else if let Some(first) = line.strip_prefix("[ data ] ") {
            // Pretty-printed JSON runs to the end of the block.
            let mut text = first.to_string();
            for more in lines.by_ref() {
                text.push('\n');
                text.push_str(more);
            }
            data = serde_json::from_str(text.trim())?;
        }
    }

    Ok(DiagnosticEntry {
        id: id.to_string(),
        recorded_at,
        name,
        data,
    })
}

/// Delete day files older than `retention_days`, and month directories left empty.
fn cleanup_old_files(dir: &Path, retention_days: u32) -> std::io::Result<()> {
    let cutoff = Utc::now().date_naive() - chrono::Duration::days(i64::from(retention_days));

    for month in fs::read_dir(dir)? {
        let month = month?;
        if !month.file_type()?.is_dir() {
            continue;
        }
        let month_name = month.file_name().to_string_lossy().to_string();

        for day in fs::read_dir(month.path())? {
            let day = day?;
            let day_name = day.file_name().to_string_lossy().to_string();
            let Some(dd) = day_name.strip_suffix(".log") else {
                continue;
            };

            if let Ok(date) = NaiveDate::parse_from_str(&format!("{}{}", month_name, dd), "%Y%m%d")
                && date < cutoff
            {
                fs::remove_file(day.path())?;
                tracing::info!(file = %day.path().display(), "removed expired diagnostic log");
            }
        }

        if fs::read_dir(month.path())?.next().is_none() {
            fs::remove_dir(month.path())?;
        }
    }

    Ok(())
}
