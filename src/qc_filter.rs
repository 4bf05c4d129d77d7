// ==============================================================================
// qc_filter.rs - Analyte Reliability Filtering
// ==============================================================================
// Description: Computes per-analyte RSD across QC replicates and applies the
//              configured retention threshold plus structural filters
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use crate::audit::{AuditLog, DecisionAction, DecisionStage};
use crate::config::PipelineConfig;
use crate::models::{AnalytePanel, AnalyteQc};
use crate::sources::qc::QcData;
use tracing::info;

/// Relative standard deviation as a percentage: sample sd / mean * 100.
/// Undefined for fewer than two replicates or a zero mean.
pub fn rsd(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return None;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() / mean * 100.0)
}

/// Worst (largest) defined RSD across an analyte's replicate groups
fn analyte_rsd(qc: &QcData, analyte: &str) -> Option<f64> {
    qc.replicates_for(analyte)
        .iter()
        .filter_map(|(_, values)| rsd(values))
        .fold(None, |acc, r| Some(acc.map_or(r, |a: f64| a.max(r))))
}

/// Apply the QC filter. `columns[i]` holds the observed (pre-imputation)
/// cohort values for `analytes[i]`; the structural filters run on those.
/// Every retention and exclusion is logged.
pub fn apply(
    analytes: &[String],
    columns: &[Vec<Option<f64>>],
    qc: Option<&QcData>,
    config: &PipelineConfig,
    audit: &mut AuditLog,
) -> AnalytePanel {
    let mut panel = AnalytePanel::default();

    for (i, name) in analytes.iter().enumerate() {
        let rsd_value = qc.and_then(|data| analyte_rsd(data, name));

        let retained = match rsd_value {
            Some(r) if r >= config.rsd_threshold => {
                audit.record(
                    DecisionStage::QcFilter,
                    DecisionAction::ExcludeAnalyte,
                    None,
                    Some(name),
                    format!(
                        "rsd {:.1}% >= threshold {:.1}%",
                        r, config.rsd_threshold
                    ),
                );
                false
            }
            Some(r) => {
                audit.record(
                    DecisionStage::QcFilter,
                    DecisionAction::RetainAnalyte,
                    None,
                    Some(name),
                    format!("rsd {:.1}% < threshold {:.1}%", r, config.rsd_threshold),
                );
                true
            }
            None => {
                // Absence of QC information is never "passed QC"
                audit.record(
                    DecisionStage::QcFilter,
                    DecisionAction::RetainAnalyte,
                    None,
                    Some(name),
                    "no-qc-data",
                );
                true
            }
        };

        let retained = retained && structural_pass(name, &columns[i], config, audit);

        panel.analytes.push(AnalyteQc {
            name: name.clone(),
            rsd: rsd_value,
            retained,
        });
    }

    let kept = panel.analytes.iter().filter(|a| a.retained).count();
    info!(
        "QC filter retained {}/{} analytes (rsd threshold {:.1}%)",
        kept,
        panel.analytes.len(),
        config.rsd_threshold
    );

    panel
}

/// Structural filters on the cohort column itself: constant columns, high
/// missing/zero rates, low IQR, near-baseline means. Each is optional.
fn structural_pass(
    name: &str,
    column: &[Option<f64>],
    config: &PipelineConfig,
    audit: &mut AuditLog,
) -> bool {
    let filters = &config.filters;
    let total = column.len();
    if total == 0 {
        return true;
    }
    let observed: Vec<f64> = column.iter().flatten().copied().collect();

    let mut exclude = |audit: &mut AuditLog, reason: String| {
        audit.record(
            DecisionStage::QcFilter,
            DecisionAction::ExcludeAnalyte,
            None,
            Some(name),
            reason,
        );
        false
    };

    if filters.drop_constant && !observed.is_empty() {
        let first = observed[0];
        if observed.iter().all(|v| *v == first) {
            return exclude(audit, format!("constant column (all observed values {first})"));
        }
    }

    if let Some(max_rate) = filters.max_missing_rate {
        let rate = (total - observed.len()) as f64 / total as f64;
        if rate > max_rate {
            return exclude(
                audit,
                format!("missing rate {:.2} > {:.2}", rate, max_rate),
            );
        }
    }

    if let Some(max_rate) = filters.max_zero_rate {
        let zeros = observed.iter().filter(|v| **v == 0.0).count();
        let rate = zeros as f64 / total as f64;
        if rate > max_rate {
            return exclude(audit, format!("zero rate {:.2} > {:.2}", rate, max_rate));
        }
    }

    if let Some(min_iqr) = filters.min_iqr {
        if !observed.is_empty() {
            let iqr = interquartile_range(&observed);
            if iqr < min_iqr {
                return exclude(audit, format!("iqr {:.4} < {:.4}", iqr, min_iqr));
            }
        }
    }

    if let Some(min_baseline) = filters.min_baseline {
        if !observed.is_empty() {
            let mean = observed.iter().sum::<f64>() / observed.len() as f64;
            if mean < min_baseline {
                return exclude(
                    audit,
                    format!("mean {:.4} below baseline {:.4}", mean, min_baseline),
                );
            }
        }
    }

    true
}

/// Q3 - Q1 with linear interpolation between order statistics
fn interquartile_range(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    quantile(&sorted, 0.75) - quantile(&sorted, 0.25)
}

fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = pos - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
