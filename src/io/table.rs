//! Rectangular numeric tables on disk.
//!
//! Two input flavours:
//! - whitespace-delimited raw sweeps (`#` comments and blank lines skipped)
//! - CSV with a header row, columns looked up by (normalised) name
//!
//! Every CSV this crate writes goes through `write_csv_atomic`: rows go to a
//! temporary file in the destination directory which then replaces the
//! target, so readers never observe a half-written table.

use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;

use csv::StringRecord;
use tempfile::NamedTempFile;

use crate::error::AppError;

/// A CSV file loaded into memory.
#[derive(Debug, Clone)]
pub struct CsvTable {
    header_map: HashMap<String, usize>,
    rows: Vec<StringRecord>,
    source: String,
}

impl CsvTable {
    pub fn read(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path).map_err(|e| AppError::io(path, "open", e))?;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| {
                AppError::malformed(format!(
                    "Failed to read CSV headers of '{}': {e}",
                    path.display()
                ))
            })?
            .clone();

        let mut rows = Vec::new();
        for (idx, result) in reader.records().enumerate() {
            let record = result.map_err(|e| {
                AppError::malformed(format!("'{}' line {}: {e}", path.display(), idx + 2))
            })?;
            rows.push(record);
        }

        Ok(Self {
            header_map: build_header_map(&headers),
            rows,
            source: path.display().to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.header_map.contains_key(&normalize_header_name(name))
    }

    fn column_index(&self, name: &str) -> Result<usize, AppError> {
        self.header_map
            .get(&normalize_header_name(name))
            .copied()
            .ok_or_else(|| {
                AppError::malformed(format!("'{}' has no `{name}` column.", self.source))
            })
    }

    pub fn text_column(&self, name: &str) -> Result<Vec<String>, AppError> {
        let idx = self.column_index(name)?;
        Ok(self
            .rows
            .iter()
            .map(|r| r.get(idx).unwrap_or_default().to_string())
            .collect())
    }

    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>, AppError> {
        let idx = self.column_index(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let raw = r.get(idx).unwrap_or_default();
                raw.parse::<f64>().map_err(|_| {
                    AppError::malformed(format!(
                        "'{}' line {}: `{name}` value `{raw}` is not a number.",
                        self.source,
                        i + 2
                    ))
                })
            })
            .collect()
    }

    /// Numeric column where empty cells are `None`.
    pub fn optional_numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>, AppError> {
        let idx = self.column_index(name)?;
        self.rows
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let raw = r.get(idx).unwrap_or_default();
                if raw.is_empty() {
                    return Ok(None);
                }
                raw.parse::<f64>().map(Some).map_err(|_| {
                    AppError::malformed(format!(
                        "'{}' line {}: `{name}` value `{raw}` is not a number.",
                        self.source,
                        i + 2
                    ))
                })
            })
            .collect()
    }
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports may prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

/// Rows of a whitespace-delimited numeric file.
///
/// Lines that are blank or start with `#` are skipped. Every remaining line
/// must have at least `min_columns` numeric fields.
pub fn read_whitespace_table(path: &Path, min_columns: usize) -> Result<Vec<Vec<f64>>, AppError> {
    let text = fs::read_to_string(path).map_err(|e| AppError::io(path, "read", e))?;
    let mut rows = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let row = line
            .split_whitespace()
            .map(|tok| tok.parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| {
                AppError::malformed(format!("'{}' line {}: {e}", path.display(), idx + 1))
            })?;
        if row.len() < min_columns {
            return Err(AppError::malformed(format!(
                "'{}' line {}: expected at least {min_columns} columns, found {}.",
                path.display(),
                idx + 1,
                row.len()
            )));
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Write a CSV table, replacing `path` atomically.
pub fn write_csv_atomic<I>(path: &Path, headers: &[&str], rows: I) -> Result<(), AppError>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| AppError::io(dir, "create directory", e))?;

    let mut tmp =
        NamedTempFile::new_in(dir).map_err(|e| AppError::io(dir, "create temporary file in", e))?;
    {
        let mut writer = csv::Writer::from_writer(tmp.as_file_mut());
        writer
            .write_record(headers)
            .map_err(|e| AppError::io(path, "write", e))?;
        for row in rows {
            writer
                .write_record(&row)
                .map_err(|e| AppError::io(path, "write", e))?;
        }
        writer.flush().map_err(|e| AppError::io(path, "write", e))?;
    }
    tmp.persist(path).map_err(|e| AppError::io(path, "replace", e.error))?;
    Ok(())
}

/// Cell text for an optional number; unknown values stay empty.
pub fn optional_cell(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn whitespace_table_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("100.txt");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "# freq s21").unwrap();
        writeln!(f, "1e9   0.5").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "2e9\t0.25").unwrap();
        drop(f);

        let rows = read_whitespace_table(&path, 2).unwrap();
        assert_eq!(rows, vec![vec![1e9, 0.5], vec![2e9, 0.25]]);
    }

    #[test]
    fn whitespace_table_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.txt");
        fs::write(&path, "1e9 abc\n").unwrap();
        let err = read_whitespace_table(&path, 2).unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn csv_columns_by_name_with_bom() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "\u{feff}Frequency (Hz), LW ,alpha\n4e9,40,\n5e9,41,0.01\n").unwrap();

        let table = CsvTable::read(&path).unwrap();
        assert_eq!(table.numeric_column("Frequency (Hz)").unwrap(), vec![4e9, 5e9]);
        assert_eq!(table.numeric_column("lw").unwrap(), vec![40.0, 41.0]);
        assert_eq!(
            table.optional_numeric_column("alpha").unwrap(),
            vec![None, Some(0.01)]
        );
        assert_eq!(table.numeric_column("R2").unwrap_err().exit_code(), 4);
    }

    #[test]
    fn atomic_write_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        fs::write(&path, "old\n").unwrap();
        write_csv_atomic(
            &path,
            &["a", "b"],
            vec![vec!["1".to_string(), optional_cell(None)]],
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a,b\n1,\n");
    }
}
