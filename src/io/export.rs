//! Stage hand-off tables.
//!
//! File names and column headers are fixed so that each stage can be run as a
//! separate command against the directory an earlier stage wrote.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::domain::{
    AsymptoticPoint, FieldDomainRecord, MaterialKey, MaterialParameters, ResonanceRecord,
};
use crate::error::AppError;
use crate::io::table::{CsvTable, optional_cell, write_csv_atomic};
use crate::signal::frequency_key;

pub const FIELD_DOMAIN_COLUMNS: [&str; 2] = ["mag_field(oe)", "s21"];
pub const DERIVATIVE_COLUMNS: [&str; 2] = ["Magnetic Field", "dS21/dH"];

pub const RESONANCE_TABLE: &str = "field domain parameters.csv";
pub const MATERIAL_TABLE: &str = "material parameter.csv";
pub const ASYMPTOTIC_TABLE: &str = "asymptotic g-factor.csv";

/// One `<frequency>.csv` per record. Tables left in `dir` by an earlier run
/// are removed first so later stages only see this run's frequencies.
pub fn write_record_dir(
    dir: &Path,
    records: &[FieldDomainRecord],
    columns: [&str; 2],
) -> Result<(), AppError> {
    let removed = clear_tables(dir)?;
    if removed > 0 {
        log::debug!("Removed {removed} old tables from '{}'", dir.display());
    }
    for record in records {
        let path = dir.join(format!("{}.csv", record.key));
        let rows = record
            .curve
            .points()
            .map(|(x, y)| vec![x.to_string(), y.to_string()]);
        write_csv_atomic(&path, &columns, rows)?;
    }
    log::info!("Wrote {} tables to '{}'", records.len(), dir.display());
    Ok(())
}

/// Delete every `*.csv` file directly in `dir`. A missing directory is empty.
fn clear_tables(dir: &Path) -> Result<usize, AppError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(AppError::io(dir, "list", e)),
    };
    let mut removed = 0;
    for entry in entries {
        let path = entry.map_err(|e| AppError::io(dir, "list", e))?.path();
        let is_table = path.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_table {
            fs::remove_file(&path).map_err(|e| AppError::io(&path, "remove", e))?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// `Frequency (Hz), A, LW, H_res, [alpha,] R2`.
///
/// The `alpha` column is written only when some record has one.
pub fn write_resonance_table(path: &Path, records: &[ResonanceRecord]) -> Result<(), AppError> {
    let with_alpha = records.iter().any(|r| r.alpha.is_some());
    let mut headers = vec!["Frequency (Hz)", "A", "LW", "H_res"];
    if with_alpha {
        headers.push("alpha");
    }
    headers.push("R2");

    let rows = records.iter().map(|r| {
        let mut row = vec![
            r.frequency_hz.to_string(),
            r.a.to_string(),
            r.lw.to_string(),
            r.h_res.to_string(),
        ];
        if with_alpha {
            row.push(optional_cell(r.alpha));
        }
        row.push(r.r2.to_string());
        row
    });
    write_csv_atomic(path, &headers, rows)
}

/// Read the aggregate resonance table. Standard errors are not persisted and
/// come back as `None`.
pub fn read_resonance_table(path: &Path) -> Result<Vec<ResonanceRecord>, AppError> {
    if !path.exists() {
        return Err(AppError::missing_input(format!(
            "'{}' not found; run a resonance fit stage first.",
            path.display()
        )));
    }
    let table = CsvTable::read(path)?;
    let freq = table.numeric_column("Frequency (Hz)")?;
    let a = table.numeric_column("A")?;
    let lw = table.numeric_column("LW")?;
    let h_res = table.numeric_column("H_res")?;
    let r2 = table.numeric_column("R2")?;
    let alpha = if table.has_column("alpha") {
        table.optional_numeric_column("alpha")?
    } else {
        vec![None; table.len()]
    };

    let mut records: Vec<ResonanceRecord> = (0..table.len())
        .map(|i| ResonanceRecord {
            key: frequency_key(freq[i]),
            frequency_hz: freq[i],
            a: a[i],
            lw: lw[i],
            h_res: h_res[i],
            alpha: alpha[i],
            r2: r2[i],
            a_err: None,
            lw_err: None,
            h_res_err: None,
        })
        .collect();
    records.sort_by_key(|r| r.key);
    Ok(records)
}

/// `Parameter, Value` rows in schema order.
pub fn write_material_table(path: &Path, material: &MaterialParameters) -> Result<(), AppError> {
    let rows = material
        .iter()
        .map(|(k, v)| vec![k.column_name().to_string(), v.to_string()]);
    write_csv_atomic(path, &["Parameter", "Value"], rows)
}

pub fn read_material_table(path: &Path) -> Result<MaterialParameters, AppError> {
    let table = CsvTable::read(path)?;
    let names = table.text_column("Parameter")?;
    let values = table.text_column("Value")?;

    let mut material = MaterialParameters::new();
    for (name, value) in names.iter().zip(&values) {
        let key = MaterialKey::from_column_name(name).ok_or_else(|| {
            AppError::malformed(format!(
                "'{}': unknown material parameter `{name}`.",
                path.display()
            ))
        })?;
        if key.is_text() {
            material.set_text(key, value.clone());
        } else {
            let v = value.parse::<f64>().map_err(|_| {
                AppError::malformed(format!(
                    "'{}': `{name}` value `{value}` is not a number.",
                    path.display()
                ))
            })?;
            material.set_number(key, v);
        }
    }
    Ok(material)
}

/// Upsert `updates` into the material table at `path` (created if absent).
///
/// Rows named in `stale` are dropped from the existing table first; they were
/// derived from values `updates` replaces.
pub fn update_material_table(
    path: &Path,
    updates: &MaterialParameters,
    stale: &[MaterialKey],
) -> Result<MaterialParameters, AppError> {
    let mut material = if path.exists() {
        read_material_table(path)?
    } else {
        MaterialParameters::new()
    };
    for key in stale {
        material.remove(*key);
    }
    material.merge(updates);
    write_material_table(path, &material)?;
    Ok(material)
}

pub fn write_asymptotic_table(path: &Path, points: &[AsymptoticPoint]) -> Result<(), AppError> {
    let headers = [
        "Cutoff Frequency (Hz)",
        "Points",
        "gamma (GHz/T)",
        "gamma error",
        "g-factor",
        "g-factor error",
        "R2",
    ];
    let rows = points.iter().map(|p| {
        vec![
            p.cutoff_frequency_hz.to_string(),
            p.n_points.to_string(),
            p.gamma.to_string(),
            optional_cell(p.gamma_stderr),
            p.g_factor.to_string(),
            optional_cell(p.g_factor_stderr),
            p.r2.to_string(),
        ]
    });
    write_csv_atomic(path, &headers, rows)
}
