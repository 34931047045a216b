//! Read/write fit-curve JSON files.
//!
//! A curve file is what a renderer needs to draw a stage's figures without
//! refitting: for each fit, the fitted data points and the model evaluated on
//! a dense grid, plus R².

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::FitCurve;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveFile {
    pub tool: String,
    pub stage: String,
    pub generated: DateTime<Utc>,
    pub curves: Vec<FitCurve>,
}

impl CurveFile {
    pub fn new(stage: &str, curves: Vec<FitCurve>) -> Self {
        Self {
            tool: "fmr".to_string(),
            stage: stage.to_string(),
            generated: Utc::now(),
            curves,
        }
    }
}

pub fn write_curve_json(path: &Path, file: &CurveFile) -> Result<(), AppError> {
    let out = File::create(path).map_err(|e| AppError::io(path, "create", e))?;
    serde_json::to_writer_pretty(BufWriter::new(out), file)
        .map_err(|e| AppError::io(path, "write", e))?;
    Ok(())
}

pub fn read_curve_json(path: &Path) -> Result<CurveFile, AppError> {
    let file = File::open(path).map_err(|e| AppError::io(path, "open", e))?;
    serde_json::from_reader(file)
        .map_err(|e| AppError::malformed(format!("Invalid curve JSON '{}': {e}", path.display())))
}
