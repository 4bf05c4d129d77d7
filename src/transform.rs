// ==============================================================================
// transform.rs - Ranked and Normalized Views
// ==============================================================================
// Description: Column-wise rank and log/z-score transforms of the cleaned
//              matrix, preserving row and column identity exactly
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================
// Two parallel views exist because downstream statistics assume either
// normality (normalized view) or only monotonic relationships (ranked view);
// deriving both from one audited cleaning step keeps the analyses aligned.
// ==============================================================================

use crate::models::{CleanedMatrix, MatrixView};
use tracing::debug;

/// Within-column ranks, 1-based, ties broken by average rank
pub fn ranked_view(matrix: &CleanedMatrix) -> MatrixView {
    let mut rows = matrix.rows.clone();
    for j in 0..matrix.analytes.len() {
        let column: Vec<f64> = matrix.rows.iter().map(|r| r[j]).collect();
        let ranks = average_ranks(&column);
        for (i, rank) in ranks.into_iter().enumerate() {
            rows[i][j] = rank;
        }
    }

    MatrixView {
        name: "ranked".to_string(),
        subjects: matrix.subjects.clone(),
        analytes: matrix.analytes.clone(),
        rows,
    }
}

/// Per-column standardized scores: natural-log transform when the column is
/// badly skewed, then zero-mean/unit-variance scaling. A constant column
/// scales to all zeros.
pub fn normalized_view(matrix: &CleanedMatrix, skew_threshold: f64) -> MatrixView {
    let mut rows = matrix.rows.clone();
    for (j, name) in matrix.analytes.iter().enumerate() {
        let mut column: Vec<f64> = matrix.rows.iter().map(|r| r[j]).collect();

        if skewness(&column).abs() > skew_threshold {
            debug!("Log-transforming skewed column '{name}'");
            log_transform(&mut column);
        }
        z_score(&mut column);

        for (i, v) in column.into_iter().enumerate() {
            rows[i][j] = v;
        }
    }

    MatrixView {
        name: "normalized".to_string(),
        subjects: matrix.subjects.clone(),
        analytes: matrix.analytes.clone(),
        rows,
    }
}

/// Average ranks (1-based). Ties receive the mean of the ranks they span.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        values[a]
            .partial_cmp(&values[b])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut ranks = vec![0.0; n];
    let mut i = 0;
    while i < n {
        let mut j = i;
        while j + 1 < n && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        // Positions i..=j hold a tie group spanning ranks i+1..=j+1
        let rank = (i + 1 + j + 1) as f64 / 2.0;
        for k in i..=j {
            ranks[order[k]] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Natural log, shifted to keep arguments positive when the column contains
/// non-positive values
fn log_transform(column: &mut [f64]) {
    let min = column.iter().copied().fold(f64::INFINITY, f64::min);
    let shift = if min <= 0.0 { -min + 1.0 } else { 0.0 };
    for v in column.iter_mut() {
        *v = (*v + shift).ln();
    }
}

fn z_score(column: &mut [f64]) {
    let n = column.len() as f64;
    if n < 2.0 {
        for v in column.iter_mut() {
            *v = 0.0;
        }
        return;
    }
    let mean = column.iter().sum::<f64>() / n;
    let variance = column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = variance.sqrt();
    for v in column.iter_mut() {
        *v = if sd > 0.0 { (*v - mean) / sd } else { 0.0 };
    }
}

/// Adjusted sample skewness (g1 with the small-sample correction); 0 for
/// degenerate columns
pub fn skewness(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if n < 3.0 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let sd = variance.sqrt();
    if sd == 0.0 {
        return 0.0;
    }
    let m3 = values.iter().map(|v| ((v - mean) / sd).powi(3)).sum::<f64>();
    n / ((n - 1.0) * (n - 2.0)) * m3
}
