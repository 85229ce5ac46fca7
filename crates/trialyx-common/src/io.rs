//! JSONL flat-file helpers.
//!
//! All pipeline artifacts are line-delimited JSON or JSON arrays on disk.
//! Writes are either whole-file (rebuild) or append-only (streaming); a
//! record is only appended after the work that produced it has succeeded,
//! so a killed run never leaves a half-written logical record behind.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde_json::Value;

use crate::error::Result;

/// Create a directory (and parents) if missing.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    Ok(())
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Read every non-blank line of a JSONL file. A missing file is an empty
/// dataset, not an error.
pub fn read_jsonl(path: &Path) -> Result<Vec<Value>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(line)?);
    }
    Ok(rows)
}

/// Append a single row, creating the file and parent directories on first use.
pub fn append_jsonl(path: &Path, row: &Value) -> Result<()> {
    ensure_parent(path)?;
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(row)?)?;
    Ok(())
}

/// Rewrite a JSONL file from scratch.
pub fn write_jsonl<'a, I>(path: &Path, rows: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Value>,
{
    ensure_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        writeln!(writer, "{}", serde_json::to_string(row)?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Derive a pretty-printed JSON array file from a JSONL file.
/// Returns the number of rows written.
pub fn write_json_array_from_jsonl(jsonl_path: &Path, json_path: &Path) -> Result<usize> {
    ensure_parent(json_path)?;
    let mut writer = BufWriter::new(File::create(json_path)?);
    writer.write_all(b"[\n")?;
    let mut n = 0;
    for row in read_jsonl(jsonl_path)? {
        if n > 0 {
            writer.write_all(b",\n")?;
        }
        writer.write_all(serde_json::to_string(&row)?.as_bytes())?;
        n += 1;
    }
    writer.write_all(b"\n]\n")?;
    writer.flush()?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rows = read_jsonl(&dir.path().join("absent.jsonl")).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_append_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sub").join("rows.jsonl");
        append_jsonl(&path, &json!({"cid": 1})).unwrap();
        append_jsonl(&path, &json!({"cid": 2})).unwrap();

        let rows = read_jsonl(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["cid"], 2);
    }

    #[test]
    fn test_json_array_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let jsonl = dir.path().join("rows.jsonl");
        let json = dir.path().join("rows.json");
        write_jsonl(&jsonl, [&json!({"id": "a"}), &json!({"id": "b"})]).unwrap();

        let n = write_json_array_from_jsonl(&jsonl, &json).unwrap();
        assert_eq!(n, 2);

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_blank_lines_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.jsonl");
        std::fs::write(&path, "{\"cid\":1}\n\n{\"cid\":2}\n   \n").unwrap();
        assert_eq!(read_jsonl(&path).unwrap().len(), 2);
    }
}
