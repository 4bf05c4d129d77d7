// ==============================================================================
// qc.rs - QC Replicate Source Loader
// ==============================================================================
// Description: Loads the optional QC table of repeated measurements, grouped
//              by the configured replicate-group key
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use crate::config::QcColumns;
use crate::sources::table::{parse_measurement, RawTable, SourceLoadError};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Repeated measurements for one replicate-group key: analyte -> values.
/// Blank and non-numeric cells are simply absent; they are not replicates.
#[derive(Debug, Clone)]
pub struct QcReplicateGroup {
    pub group: String,
    pub values: BTreeMap<String, Vec<f64>>,
}

/// All QC replicate groups, in group-key order
#[derive(Debug, Clone, Default)]
pub struct QcData {
    pub groups: Vec<QcReplicateGroup>,
}

impl QcData {
    /// Replicate value sets for one analyte, one per group that measured it
    pub fn replicates_for(&self, analyte: &str) -> Vec<(&str, &[f64])> {
        self.groups
            .iter()
            .filter_map(|g| {
                g.values
                    .get(analyte)
                    .map(|v| (g.group.as_str(), v.as_slice()))
            })
            .collect()
    }
}

/// Load the QC replicate table. Every column other than the replicate-group
/// key is an analyte.
pub fn load_qc(path: impl AsRef<Path>, columns: &QcColumns) -> Result<QcData, SourceLoadError> {
    let table = RawTable::load(path)?;
    let group_idx = table.column_index(&columns.replicate_group)?;

    let analyte_cols: Vec<(usize, String)> = table
        .headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != group_idx)
        .map(|(i, name)| (i, name.clone()))
        .collect();

    let mut groups: BTreeMap<String, BTreeMap<String, Vec<f64>>> = BTreeMap::new();
    for row in &table.rows {
        let group_key = table.cell(row, group_idx).trim().to_string();
        let group = groups.entry(group_key).or_default();
        for (idx, name) in &analyte_cols {
            if let Some(value) = parse_measurement(table.cell(row, *idx)) {
                group.entry(name.clone()).or_default().push(value);
            }
        }
    }

    debug!(
        "Loaded QC table: {} replicate groups over {} analyte columns",
        groups.len(),
        analyte_cols.len()
    );

    Ok(QcData {
        groups: groups
            .into_iter()
            .map(|(group, values)| QcReplicateGroup { group, values })
            .collect(),
    })
}
