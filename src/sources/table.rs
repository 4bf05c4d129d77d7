// ==============================================================================
// table.rs - Generic Tabular Source Reader
// ==============================================================================
// Description: Low-level CSV reader producing header + string rows; all
//              source loaders build on this
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use csv::ReaderBuilder;
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while loading a tabular source. All of these are
/// structural failures that abort the run; the message names the file.
#[derive(Error, Debug)]
pub enum SourceLoadError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed table in {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },

    #[error("required column '{column}' not found in {path}")]
    MissingColumn { path: String, column: String },

    #[error("{path} is empty or contains no data rows")]
    EmptyFile { path: String },
}

/// One fully-read tabular file. The file handle is released before this is
/// returned; reconciliation never touches the filesystem.
#[derive(Debug, Clone)]
pub struct RawTable {
    pub path: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Read an entire CSV file into memory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SourceLoadError> {
        let path_str = path.as_ref().display().to_string();

        let file = std::fs::File::open(path.as_ref()).map_err(|source| SourceLoadError::Io {
            path: path_str.clone(),
            source,
        })?;

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);

        let headers = reader
            .headers()
            .map_err(|source| SourceLoadError::Csv {
                path: path_str.clone(),
                source,
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect::<Vec<_>>();

        let mut rows = Vec::new();
        for result in reader.records() {
            let record = result.map_err(|source| SourceLoadError::Csv {
                path: path_str.clone(),
                source,
            })?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        if rows.is_empty() {
            return Err(SourceLoadError::EmptyFile { path: path_str });
        }

        Ok(Self {
            path: path_str,
            headers,
            rows,
        })
    }

    /// Index of a named column, or a MissingColumn error naming this file
    pub fn column_index(&self, column: &str) -> Result<usize, SourceLoadError> {
        self.headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| SourceLoadError::MissingColumn {
                path: self.path.clone(),
                column: column.to_string(),
            })
    }

    /// Cell accessor tolerant of short rows
    pub fn cell<'a>(&'a self, row: &'a [String], idx: usize) -> &'a str {
        row.get(idx).map(String::as_str).unwrap_or("")
    }
}

/// Parse a measurement cell. Blank and non-numeric entries become missing,
/// never zero.
pub fn parse_measurement(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() => Some(v),
        _ => None,
    }
}
