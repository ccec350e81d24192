//! Version file serialization
//!
//! A version file is line-oriented text:
//!
//! ```text
//! hoard.data.version/v1                        <- format tag
//! path  type  size  permissions  ...           <- column header
//! a.txt file  3     420          ...           <- one row per entry
//! ```
//!
//! Columns appear in a fixed order and blank cells denote absent values.
//! Readers reject unknown format tags before touching the body, and report
//! the first malformed cell with its line number. Writers validate every
//! entry up front so a half-written index can never pass through.
//!
//! The plaintext form here is what lands in the working tree's local
//! versions directory; the repository copy additionally goes through gzip
//! and the archive's encoder program.

use crate::error::{HoardError, Result};
use crate::snapshot::entry::{EntryType, IndexEntry};
use crate::tsv;
use std::io::{BufRead, Write};

/// Format tag carried on the first line of every version file
pub const FORMAT_TAG: &str = "hoard.data.version/v1";

/// Family prefix shared by all format tags
const FORMAT_FAMILY: &str = "hoard.data.version/";

/// Column names in on-disk order
pub const COLUMNS: [&str; 8] = [
    "path",
    "type",
    "size",
    "permissions",
    "modified-at",
    "content-id",
    "coded-id",
    "target",
];

/// Serialize an index to a writer, validating entries first
pub fn write_index<W: Write>(mut out: W, entries: &[IndexEntry]) -> Result<()> {
    for entry in entries {
        entry.validate()?;
    }
    writeln!(out, "{}", FORMAT_TAG)?;
    writeln!(out, "{}", COLUMNS.join("\t"))?;
    for entry in entries {
        writeln!(
            out,
            "{}",
            tsv::join_row(&[
                entry.path.clone(),
                entry.kind.as_str().to_string(),
                tsv::fmt_u64(entry.size),
                tsv::fmt_u16(entry.permissions),
                tsv::fmt_instant_opt(entry.modified_at),
                tsv::fmt_multihash(entry.content_id.as_ref()),
                tsv::fmt_multihash(entry.coded_id.as_ref()),
                entry.target.clone().unwrap_or_default(),
            ])
        )?;
    }
    out.flush()?;
    Ok(())
}

/// Parse a version file, checking the format tag and every typed cell
pub fn read_index<R: BufRead>(reader: R) -> Result<Vec<IndexEntry>> {
    let mut lines = reader.lines();

    let tag = match lines.next() {
        Some(line) => line?,
        None => return Err(HoardError::UnsupportedFormat("empty file".into())),
    };
    if tag != FORMAT_TAG {
        // Report just the version component when the family matches
        let label = tag
            .strip_prefix(FORMAT_FAMILY)
            .map(str::to_string)
            .unwrap_or(tag);
        return Err(HoardError::UnsupportedFormat(label));
    }

    // Header row names the columns; order is fixed so it is only consumed
    match lines.next() {
        Some(line) => {
            line?;
        }
        None => {
            return Err(HoardError::MalformedRow {
                line: 2,
                reason: "missing column header".into(),
            })
        }
    }

    let mut entries = Vec::new();
    for (idx, line) in lines.enumerate() {
        let line = line?;
        let line_no = idx + 3;
        if line.is_empty() {
            continue;
        }
        let cells = tsv::split_row(&line);
        if cells.len() != COLUMNS.len() {
            return Err(HoardError::MalformedRow {
                line: line_no,
                reason: format!("expected {} columns, found {}", COLUMNS.len(), cells.len()),
            });
        }

        let path = tsv::required(cells.first().copied(), line_no, "path")?.to_string();
        let kind_cell = tsv::required(cells.get(1).copied(), line_no, "type")?;
        let kind = EntryType::parse(kind_cell).ok_or_else(|| HoardError::MalformedRow {
            line: line_no,
            reason: format!("unknown entry type {:?}", kind_cell),
        })?;

        let size = match tsv::optional(cells.get(2).copied()) {
            Some(cell) => Some(tsv::parse_u64(cell, line_no, "size")?),
            None => None,
        };
        let permissions = match tsv::optional(cells.get(3).copied()) {
            Some(cell) => Some(tsv::parse_u16(cell, line_no, "permissions")?),
            None => None,
        };
        let modified_at = match tsv::optional(cells.get(4).copied()) {
            Some(cell) => Some(tsv::parse_instant(cell, line_no, "modified-at")?),
            None => None,
        };
        let content_id = match tsv::optional(cells.get(5).copied()) {
            Some(cell) => Some(tsv::parse_multihash(cell, line_no, "content-id")?),
            None => None,
        };
        let coded_id = match tsv::optional(cells.get(6).copied()) {
            Some(cell) => Some(tsv::parse_multihash(cell, line_no, "coded-id")?),
            None => None,
        };
        let target = tsv::optional(cells.get(7).copied()).map(str::to_string);

        let entry = IndexEntry {
            path,
            kind,
            size,
            permissions,
            modified_at,
            content_id,
            coded_id,
            target,
        };
        entry.validate().map_err(|e| HoardError::MalformedRow {
            line: line_no,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multihash::Multihash;
    use std::time::{Duration, UNIX_EPOCH};

    fn sample_index() -> Vec<IndexEntry> {
        let content = Multihash::of_bytes(b"hi\n");
        let coded = Multihash::of_bytes(b"encoded");
        vec![
            IndexEntry {
                path: "docs".into(),
                kind: EntryType::Directory,
                size: None,
                permissions: Some(0o755),
                modified_at: Some(UNIX_EPOCH + Duration::new(1_600_000_000, 0)),
                content_id: None,
                coded_id: None,
                target: None,
            },
            IndexEntry {
                path: "docs/hello.txt".into(),
                kind: EntryType::File,
                size: Some(3),
                permissions: Some(0o644),
                modified_at: Some(UNIX_EPOCH + Duration::new(1_600_000_100, 123_456_789)),
                content_id: Some(content),
                coded_id: Some(coded),
                target: None,
            },
            IndexEntry {
                path: "link".into(),
                kind: EntryType::Symlink,
                size: None,
                permissions: Some(0o777),
                modified_at: Some(UNIX_EPOCH + Duration::new(1_600_000_200, 0)),
                content_id: None,
                coded_id: None,
                target: Some("docs/hello.txt".into()),
            },
        ]
    }

    #[test]
    fn test_roundtrip() {
        let index = sample_index();
        let mut buf = Vec::new();
        write_index(&mut buf, &index).unwrap();

        let parsed = read_index(&buf[..]).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_serialization_is_deterministic() {
        let index = sample_index();
        let mut a = Vec::new();
        let mut b = Vec::new();
        write_index(&mut a, &index).unwrap();
        write_index(&mut b, &index).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_unknown_format_version() {
        let text = "hoard.data.version/v2\npath\ttype\n";
        match read_index(text.as_bytes()) {
            Err(HoardError::UnsupportedFormat(tag)) => assert_eq!(tag, "v2"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_foreign_format_tag() {
        let text = "something else entirely\n";
        match read_index(text.as_bytes()) {
            Err(HoardError::UnsupportedFormat(tag)) => {
                assert_eq!(tag, "something else entirely")
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_malformed_cell_reports_line() {
        let mut buf = Vec::new();
        write_index(&mut buf, &sample_index()).unwrap();
        let mut text = String::from_utf8(buf).unwrap();
        // Corrupt the size cell of the second data row (line 4)
        text = text.replace("\t3\t", "\tthree\t");

        match read_index(text.as_bytes()) {
            Err(HoardError::MalformedRow { line, reason }) => {
                assert_eq!(line, 4);
                assert!(reason.contains("size"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_required_column() {
        let text = format!(
            "{}\n{}\n\tfile\t1\t420\t2021-01-01T00:00:00.000000000Z\t\t\t\n",
            FORMAT_TAG,
            COLUMNS.join("\t")
        );
        assert!(matches!(
            read_index(text.as_bytes()),
            Err(HoardError::MalformedRow { line: 3, .. })
        ));
    }

    #[test]
    fn test_write_refuses_invalid_entries() {
        let mut bad = sample_index();
        bad[1].size = None;
        let mut buf = Vec::new();
        assert!(matches!(
            write_index(&mut buf, &bad),
            Err(HoardError::InvalidIndex(_))
        ));
    }
}
