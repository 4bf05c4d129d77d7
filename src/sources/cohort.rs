// ==============================================================================
// cohort.rs - Cohort Source Loaders
// ==============================================================================
// Description: Extracts RawRecords from the metabolite, metadata and master
//              tables using the configured key -> column mapping
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use crate::config::SourceColumns;
use crate::models::{RawRecord, SourceTag};
use crate::sources::table::{parse_measurement, RawTable, SourceLoadError};
use std::path::Path;
use tracing::debug;

/// The loaded metabolite source: analyte column order plus one record per row
#[derive(Debug, Clone)]
pub struct MetaboliteTable {
    /// Analyte names in file column order; this order is the column identity
    /// of every downstream matrix
    pub analytes: Vec<String>,
    pub records: Vec<RawRecord>,
    /// Measurement cells that were present but not numeric (coerced to
    /// missing), for the summary report
    pub non_numeric_cells: usize,
}

/// Load the metabolite measurement table. Every column other than the mapped
/// subject-id (and phenotype, if configured) column is an analyte.
pub fn load_metabolite(
    path: impl AsRef<Path>,
    columns: &SourceColumns,
) -> Result<MetaboliteTable, SourceLoadError> {
    let table = RawTable::load(path)?;
    let id_idx = table.column_index(&columns.subject_id)?;
    let pheno_idx = match &columns.phenotype {
        Some(name) => Some(table.column_index(name)?),
        None => None,
    };

    let analyte_cols: Vec<(usize, String)> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != id_idx && Some(*i) != pheno_idx)
        .map(|(i, name)| (i, name.clone()))
        .collect();

    let mut records = Vec::with_capacity(table.rows.len());
    let mut non_numeric_cells = 0usize;

    for row in &table.rows {
        let raw_id = table.cell(row, id_idx).to_string();
        let raw_phenotype = pheno_idx.map(|i| table.cell(row, i).trim().to_string());

        let mut values = Vec::with_capacity(analyte_cols.len());
        for (idx, name) in &analyte_cols {
            let cell = table.cell(row, *idx);
            let parsed = parse_measurement(cell);
            if parsed.is_none() && !cell.trim().is_empty() {
                non_numeric_cells += 1;
            }
            values.push((name.clone(), parsed));
        }

        records.push(RawRecord {
            source: SourceTag::Metabolite,
            raw_id,
            raw_phenotype: raw_phenotype.filter(|p| !p.is_empty()),
            values,
        });
    }

    debug!(
        "Loaded {} metabolite rows, {} analyte columns ({} non-numeric cells coerced to missing)",
        records.len(),
        analyte_cols.len(),
        non_numeric_cells
    );

    Ok(MetaboliteTable {
        analytes: analyte_cols.into_iter().map(|(_, n)| n).collect(),
        records,
        non_numeric_cells,
    })
}

/// Load a subject-bearing table that carries no measurements (the metadata
/// and master sources): subject id plus an optional phenotype label.
pub fn load_subject_table(
    path: impl AsRef<Path>,
    columns: &SourceColumns,
    source: SourceTag,
) -> Result<Vec<RawRecord>, SourceLoadError> {
    let table = RawTable::load(path)?;
    let id_idx = table.column_index(&columns.subject_id)?;
    let pheno_idx = match &columns.phenotype {
        Some(name) => Some(table.column_index(name)?),
        None => None,
    };

    let records: Vec<RawRecord> = table
        .rows
        .iter()
        .map(|row| {
            let raw_phenotype = pheno_idx
                .map(|i| table.cell(row, i).trim().to_string())
                .filter(|p| !p.is_empty());
            RawRecord {
                source,
                raw_id: table.cell(row, id_idx).to_string(),
                raw_phenotype,
                values: Vec::new(),
            }
        })
        .collect();

    debug!("Loaded {} rows from {} source", records.len(), source.as_str());

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn metabolite_columns() -> SourceColumns {
        SourceColumns {
            subject_id: "SUBJECTID".to_string(),
            phenotype: None,
        }
    }

    #[test]
    fn test_metabolite_analytes_in_column_order() {
        let file = write_file("SUBJECTID,ala,gly,ser\np1,1.0,2.0,3.0\np2,4.0,5.0,6.0\n");
        let table = load_metabolite(file.path(), &metabolite_columns()).unwrap();

        assert_eq!(table.analytes, vec!["ala", "gly", "ser"]);
        assert_eq!(table.records.len(), 2);
        assert_eq!(table.records[0].raw_id, "p1");
        assert_eq!(table.records[0].values[1], ("gly".to_string(), Some(2.0)));
    }

    #[test]
    fn test_non_numeric_cells_become_missing() {
        let file = write_file("SUBJECTID,ala,gly\np1,n.d.,2.0\np2,,5.0\n");
        let table = load_metabolite(file.path(), &metabolite_columns()).unwrap();

        // "n.d." is coerced and counted; the blank cell is missing but not a coercion
        assert_eq!(table.records[0].values[0].1, None);
        assert_eq!(table.records[1].values[0].1, None);
        assert_eq!(table.non_numeric_cells, 1);
    }

    #[test]
    fn test_subject_id_column_comes_from_config() {
        let file = write_file("patient,ala\np1,1.0\n");
        let columns = SourceColumns {
            subject_id: "patient".to_string(),
            phenotype: None,
        };
        let table = load_metabolite(file.path(), &columns).unwrap();
        assert_eq!(table.records[0].raw_id, "p1");

        // The default mapping does not match this file
        let result = load_metabolite(file.path(), &metabolite_columns());
        assert!(matches!(result, Err(SourceLoadError::MissingColumn { .. })));
    }

    #[test]
    fn test_subject_table_carries_phenotype() {
        let file = write_file("SUBJECTID,Subject Diagnosis\np1, Kwashiorkor \np2,\n");
        let columns = SourceColumns {
            subject_id: "SUBJECTID".to_string(),
            phenotype: Some("Subject Diagnosis".to_string()),
        };
        let records = load_subject_table(file.path(), &columns, SourceTag::Metadata).unwrap();

        assert_eq!(records[0].raw_phenotype.as_deref(), Some("Kwashiorkor"));
        assert_eq!(records[1].raw_phenotype, None);
        assert_eq!(records[0].source, SourceTag::Metadata);
    }
}
