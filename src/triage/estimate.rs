//! Expected document counts.
//!
//! Every line of a discovered log is assumed to become one document. This is an upper bound the
//! shipper may not meet: multi-line records get merged, so the estimate is only compared with the
//! backend count, never used to decide anything.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

#[derive(Error, Debug)]
#[error("Unable to count lines in {}: {source}", .path.display())]
pub struct EstimateError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

pub type EstimateResult<T> = Result<T, EstimateError>;

/// Counts lines the way a line-oriented reader sees them: every `\n` ends a line, and trailing
/// bytes without a final newline form one more line.
pub fn count_reader<R: BufRead>(mut reader: R) -> io::Result<u64> {
    let mut lines = 0u64;
    let mut last_byte = None;

    loop {
        let buffer = reader.fill_buf()?;
        if buffer.is_empty() {
            break;
        }
        lines += buffer.iter().filter(|&&b| b == b'\n').count() as u64;
        last_byte = buffer.last().copied();
        let consumed = buffer.len();
        reader.consume(consumed);
    }

    if matches!(last_byte, Some(b) if b != b'\n') {
        lines += 1;
    }
    Ok(lines)
}

pub fn count_lines(path: &Path) -> EstimateResult<u64> {
    let to_err = |source| EstimateError {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(to_err)?;
    count_reader(BufReader::with_capacity(64 * 1024, file)).map_err(to_err)
}

/// Sums the line counts of a file group, logging each file's share.
pub fn count_group(files: &[PathBuf]) -> EstimateResult<u64> {
    let mut total = 0u64;
    for file in files {
        let count = count_lines(file)?;
        info!(
            "Total lines in {}: {}",
            file.file_name().unwrap_or_default().to_string_lossy(),
            count
        );
        total += count;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::write;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn test_count_reader_edge_cases() {
        assert_eq!(count_reader(Cursor::new(b"")).unwrap(), 0);
        assert_eq!(count_reader(Cursor::new(b"\n")).unwrap(), 1);
        assert_eq!(count_reader(Cursor::new(b"a\nb\nc\n")).unwrap(), 3);
        assert_eq!(count_reader(Cursor::new(b"a\nb\nc")).unwrap(), 3);
        assert_eq!(count_reader(Cursor::new(b"\n\n")).unwrap(), 2);
    }

    #[test]
    fn test_count_reader_across_buffer_boundaries() {
        let content = "line\n".repeat(10_000);
        let reader = BufReader::with_capacity(7, Cursor::new(content.into_bytes()));
        assert_eq!(count_reader(reader).unwrap(), 10_000);
    }

    #[test]
    fn test_count_group_sums_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("syslog");
        let b = dir.path().join("syslog.1");
        write(&a, "1\n2\n3\n").unwrap();
        write(&b, "4\n5\n").unwrap();

        assert_eq!(count_group(&[a, b]).unwrap(), 5);
        assert_eq!(count_group(&[]).unwrap(), 0);
    }

    #[test]
    fn test_missing_file_reports_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("gone.log");
        let err = count_lines(&missing).unwrap_err();
        assert_eq!(err.path, missing);
    }
}
