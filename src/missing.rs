// ==============================================================================
// missing.rs - Missing-Value & Outlier Policy
// ==============================================================================
// Description: Per-cell keep/impute/exclude decisions producing the cleaned
//              matrix from the QC-filtered observations
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use crate::audit::{AuditLog, DecisionAction, DecisionStage};
use crate::config::{ImputeMethod, PipelineConfig};
use crate::models::{CleanedMatrix, Phenotype};
use tracing::info;

/// Counters carried into the summary report
#[derive(Debug, Default, Clone, Copy)]
pub struct PolicyCounts {
    pub outlier_corrections: usize,
    pub imputations: usize,
    pub excluded_subjects: usize,
    pub excluded_analytes: usize,
}

/// Apply the missing-value and outlier policy. `rows[i][j]` holds the
/// observed value for subject `i`, analyte `j` (already restricted to
/// QC-retained analytes). Returns the immutable cleaned matrix.
pub fn apply(
    subjects: &[(String, Phenotype)],
    analytes: &[String],
    mut rows: Vec<Vec<Option<f64>>>,
    config: &PipelineConfig,
    audit: &mut AuditLog,
) -> (CleanedMatrix, PolicyCounts) {
    let mut counts = PolicyCounts::default();

    // 1. Plausibility pass: values outside the analyte-local band become
    //    missing; the original value travels with the later impute entry.
    let mut originals: Vec<Vec<Option<f64>>> = vec![vec![None; analytes.len()]; subjects.len()];
    for j in 0..analytes.len() {
        let observed: Vec<f64> = rows.iter().filter_map(|r| r[j]).collect();
        if let Some((lo, hi)) = plausibility_band(&observed, config.outlier_sd) {
            for (i, row) in rows.iter_mut().enumerate() {
                if let Some(v) = row[j] {
                    if v < lo || v > hi {
                        originals[i][j] = Some(v);
                        row[j] = None;
                        counts.outlier_corrections += 1;
                    }
                }
            }
        }
    }

    // 2. Subjects missing too much of the retained panel are excluded whole
    let mut keep_row = vec![true; subjects.len()];
    if !analytes.is_empty() {
        for (i, row) in rows.iter().enumerate() {
            let missing = row.iter().filter(|c| c.is_none()).count();
            let fraction = missing as f64 / analytes.len() as f64;
            if fraction > config.max_missing_fraction {
                keep_row[i] = false;
                counts.excluded_subjects += 1;
                audit.record(
                    DecisionStage::MissingPolicy,
                    DecisionAction::ExcludeSubject,
                    Some(&subjects[i].0),
                    None,
                    format!(
                        "excess-missing: {:.0}% of retained analytes missing (limit {:.0}%)",
                        fraction * 100.0,
                        config.max_missing_fraction * 100.0
                    ),
                );
            }
        }
    }

    // 3. Per-analyte imputation statistic over the surviving rows. An
    //    analyte nothing observed escalates to exclusion.
    let mut keep_col = vec![true; analytes.len()];
    let mut statistics = vec![0.0f64; analytes.len()];
    for (j, name) in analytes.iter().enumerate() {
        let observed: Vec<f64> = rows
            .iter()
            .enumerate()
            .filter(|(i, _)| keep_row[*i])
            .filter_map(|(_, r)| r[j])
            .collect();
        match impute_statistic(&observed, config.impute_method) {
            Some(stat) => statistics[j] = stat,
            None => {
                keep_col[j] = false;
                counts.excluded_analytes += 1;
                audit.record(
                    DecisionStage::MissingPolicy,
                    DecisionAction::ExcludeAnalyte,
                    None,
                    Some(name),
                    "no observed values to impute from",
                );
            }
        }
    }

    // 4. Fill and log every imputation individually
    let mut out_subjects = Vec::new();
    let mut out_phenotypes = Vec::new();
    let mut out_rows = Vec::new();
    for (i, row) in rows.iter().enumerate() {
        if !keep_row[i] {
            continue;
        }
        let (subject_key, phenotype) = &subjects[i];
        let mut out_row = Vec::with_capacity(analytes.len());
        for (j, name) in analytes.iter().enumerate() {
            if !keep_col[j] {
                continue;
            }
            match row[j] {
                Some(v) => out_row.push(v),
                None => {
                    let stat = statistics[j];
                    counts.imputations += 1;
                    let reason = match originals[i][j] {
                        Some(orig) => format!(
                            "implausible value {} replaced; imputed {} {}",
                            orig,
                            config.impute_method.as_str(),
                            stat
                        ),
                        None => format!("imputed {} {}", config.impute_method.as_str(), stat),
                    };
                    audit.record(
                        DecisionStage::MissingPolicy,
                        DecisionAction::Impute,
                        Some(subject_key),
                        Some(name),
                        reason,
                    );
                    out_row.push(stat);
                }
            }
        }
        out_subjects.push(subject_key.clone());
        out_phenotypes.push(*phenotype);
        out_rows.push(out_row);
    }

    let out_analytes: Vec<String> = analytes
        .iter()
        .zip(&keep_col)
        .filter(|(_, keep)| **keep)
        .map(|(n, _)| n.clone())
        .collect();

    info!(
        "Missing-value policy: {} subjects excluded, {} imputations, {} implausible values corrected",
        counts.excluded_subjects, counts.imputations, counts.outlier_corrections
    );

    (
        CleanedMatrix {
            subjects: out_subjects,
            phenotypes: out_phenotypes,
            analytes: out_analytes,
            rows: out_rows,
        },
        counts,
    )
}

/// Analyte-local plausibility band: median +/- k * sample sd. None when the
/// band is undefined (fewer than two observed values, or zero spread).
fn plausibility_band(observed: &[f64], k: f64) -> Option<(f64, f64)> {
    if observed.len() < 2 {
        return None;
    }
    let med = median(observed);
    let n = observed.len() as f64;
    let mean = observed.iter().sum::<f64>() / n;
    let variance = observed.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = variance.sqrt();
    if sd == 0.0 {
        return None;
    }
    Some((med - k * sd, med + k * sd))
}

/// The configured analyte-local statistic; None when nothing was observed
fn impute_statistic(observed: &[f64], method: ImputeMethod) -> Option<f64> {
    if observed.is_empty() {
        return None;
    }
    Some(match method {
        ImputeMethod::Median => median(observed),
        ImputeMethod::Mean => observed.iter().sum::<f64>() / observed.len() as f64,
        ImputeMethod::HalfMin => {
            observed.iter().copied().fold(f64::INFINITY, f64::min) / 2.0
        }
    })
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
