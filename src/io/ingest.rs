//! Directory ingest.
//!
//! Every stage reads a directory of files keyed by the first integer in their
//! name: raw sweeps `<field>.txt`, or per-frequency tables `<frequency>.csv`.
//!
//! Rules:
//! - a file without an integer in its name is a malformed record
//! - two files with the same key are a malformed record
//! - files are returned in ascending key order

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Curve, FieldDomainRecord, Sweep};
use crate::error::AppError;
use crate::io::table::{CsvTable, read_whitespace_table};

/// First run of ASCII digits in `name`.
pub fn parse_numeric_key(name: &str) -> Option<i64> {
    let start = name.find(|c: char| c.is_ascii_digit())?;
    let digits: String = name[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Files in `dir` with extension `ext` (case-insensitive), sorted by key.
pub fn list_keyed_files(dir: &Path, ext: &str) -> Result<Vec<(i64, PathBuf)>, AppError> {
    let entries = fs::read_dir(dir).map_err(|e| {
        AppError::missing_input(format!("Cannot read input directory '{}': {e}", dir.display()))
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::io(dir, "list", e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext));
        if !matches_ext {
            continue;
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let key = parse_numeric_key(&name).ok_or_else(|| {
            AppError::malformed(format!("File name '{name}' contains no integer key."))
        })?;
        files.push((key, path));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
    if let Some(w) = files.windows(2).find(|w| w[0].0 == w[1].0) {
        return Err(AppError::malformed(format!(
            "Files '{}' and '{}' share the key {}.",
            w[0].1.display(),
            w[1].1.display(),
            w[0].0
        )));
    }
    if files.is_empty() {
        return Err(AppError::missing_input(format!(
            "No .{ext} files found in '{}'.",
            dir.display()
        )));
    }
    Ok(files)
}

/// The stem read as a number when it is one (e.g. `-100` or `4500000000.0`),
/// otherwise the integer key.
fn stem_value(path: &Path, key: i64) -> f64 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(key as f64)
}

/// Load raw sweeps (column 0 frequency in Hz, column 1 S21).
pub fn load_sweeps(dir: &Path, ext: &str) -> Result<Vec<Sweep>, AppError> {
    let files = list_keyed_files(dir, ext)?;
    let mut sweeps = Vec::with_capacity(files.len());
    for (key, path) in files {
        let rows = read_whitespace_table(&path, 2)?;
        let curve = Curve::from_pairs(rows.iter().map(|r| (r[0], r[1])).collect());
        sweeps.push(Sweep {
            key,
            field_oe: stem_value(&path, key),
            curve,
        });
    }
    log::info!("Loaded {} sweeps from '{}'", sweeps.len(), dir.display());
    Ok(sweeps)
}

/// Load per-frequency tables written by an earlier stage.
pub fn load_record_dir(
    dir: &Path,
    x_column: &str,
    y_column: &str,
) -> Result<Vec<FieldDomainRecord>, AppError> {
    let files = list_keyed_files(dir, "csv")?;
    let mut records = Vec::with_capacity(files.len());
    for (key, path) in files {
        let table = CsvTable::read(&path)?;
        let x = table.numeric_column(x_column)?;
        let y = table.numeric_column(y_column)?;
        records.push(FieldDomainRecord {
            key,
            frequency_hz: stem_value(&path, key),
            curve: Curve::from_pairs(x.into_iter().zip(y).collect()),
        });
    }
    log::info!("Loaded {} tables from '{}'", records.len(), dir.display());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_integer_is_the_key() {
        assert_eq!(parse_numeric_key("100.txt"), Some(100));
        assert_eq!(parse_numeric_key("sweep_250Oe_2.txt"), Some(250));
        assert_eq!(parse_numeric_key("4000000000.0.csv"), Some(4_000_000_000));
        assert_eq!(parse_numeric_key("notes.txt"), None);
    }

    #[test]
    fn listing_sorts_numerically_and_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["1000.txt", "50.txt", "200.txt", "readme.md"] {
            fs::write(dir.path().join(name), "1 2\n").unwrap();
        }
        let keys: Vec<i64> = list_keyed_files(dir.path(), "txt")
            .unwrap()
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![50, 200, 1000]);

        fs::write(dir.path().join("background.txt"), "1 2\n").unwrap();
        assert_eq!(list_keyed_files(dir.path(), "txt").unwrap_err().exit_code(), 4);
    }

    #[test]
    fn duplicate_keys_are_malformed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("100.txt"), "1 2\n").unwrap();
        fs::write(dir.path().join("100_repeat.txt"), "1 2\n").unwrap();
        assert_eq!(list_keyed_files(dir.path(), "txt").unwrap_err().exit_code(), 4);
    }

    #[test]
    fn empty_or_missing_directory_is_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(list_keyed_files(dir.path(), "txt").unwrap_err().exit_code(), 3);
        let gone = dir.path().join("nope");
        assert_eq!(list_keyed_files(&gone, "txt").unwrap_err().exit_code(), 3);
    }

    #[test]
    fn sweeps_carry_field_from_file_name() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("250.txt"), "# f s\n2e9 0.2\n1e9 0.1\n").unwrap();
        let sweeps = load_sweeps(dir.path(), "txt").unwrap();
        assert_eq!(sweeps.len(), 1);
        assert_eq!(sweeps[0].field_oe, 250.0);
        assert_eq!(sweeps[0].curve.x, vec![1e9, 2e9]);
    }
}
