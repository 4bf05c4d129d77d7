// ==============================================================================
// models.rs - Harmonization Data Model
// ==============================================================================
// Description: Data structures shared across the harmonization pipeline stages
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which input source a raw row came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTag {
    /// Metabolite measurement table (one row per subject, analyte columns)
    Metabolite,
    /// Metadata/phenotype table
    Metadata,
    /// Master cross-reference table
    Master,
    /// QC replicate table
    Qc,
}

impl SourceTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceTag::Metabolite => "metabolite",
            SourceTag::Metadata => "metadata",
            SourceTag::Master => "master",
            SourceTag::Qc => "qc",
        }
    }
}

/// One row from one source, exactly as loaded. Never mutated after load.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// Source this row came from
    pub source: SourceTag,
    /// Subject identifier as written in the file (casing, whitespace,
    /// leading zeros and suffixes preserved)
    pub raw_id: String,
    /// Free-text phenotype/diagnosis label, if the source carries one
    pub raw_phenotype: Option<String>,
    /// Analyte name -> measured value; None for blank or non-numeric cells
    pub values: Vec<(String, Option<f64>)>,
}

/// Canonical phenotype vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phenotype {
    Control,
    Kwashiorkor,
    Marasmus,
    Other,
    /// No phenotype information, or sources disagree
    Unresolved,
}

impl Phenotype {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phenotype::Control => "control",
            Phenotype::Kwashiorkor => "kwashiorkor",
            Phenotype::Marasmus => "marasmus",
            Phenotype::Other => "other",
            Phenotype::Unresolved => "unresolved",
        }
    }

    /// Combined severe-acute-malnutrition comparison class
    pub fn is_sam(&self) -> bool {
        matches!(self, Phenotype::Kwashiorkor | Phenotype::Marasmus)
    }
}

/// The reconciled identity of one research subject across all sources
#[derive(Debug, Clone)]
pub struct CanonicalSubject {
    /// Stable unique key (the normalized comparison key)
    pub subject_key: String,
    /// Raw id that merged into this subject, at most one per source
    pub contributing_ids: BTreeMap<SourceTag, String>,
    /// Fixed once harmonization completes
    pub phenotype: Phenotype,
}

/// QC verdict for a single analyte
#[derive(Debug, Clone)]
pub struct AnalyteQc {
    pub name: String,
    /// Relative standard deviation across QC replicates, as a percentage.
    /// None when the analyte has no QC replicate group (or the RSD is
    /// undefined for it).
    pub rsd: Option<f64>,
    pub retained: bool,
}

/// The set of analytes observed across all sources with their QC verdicts
#[derive(Debug, Clone, Default)]
pub struct AnalytePanel {
    pub analytes: Vec<AnalyteQc>,
}

impl AnalytePanel {
    pub fn retained_names(&self) -> Vec<String> {
        self.analytes
            .iter()
            .filter(|a| a.retained)
            .map(|a| a.name.clone())
            .collect()
    }
}

/// The cleaned subject x analyte matrix. Produced once, immutable; the sole
/// input to the transformation engine.
#[derive(Debug, Clone)]
pub struct CleanedMatrix {
    /// Subject keys, row order fixed at first sight in the metabolite source
    pub subjects: Vec<String>,
    /// Phenotype per row, same order as `subjects`
    pub phenotypes: Vec<Phenotype>,
    /// Analyte names, column order fixed by the metabolite source header
    pub analytes: Vec<String>,
    /// Row-major cells, all missing values resolved
    pub rows: Vec<Vec<f64>>,
}

/// A transformed view of the cleaned matrix. Row and column identity is
/// always exactly that of the matrix it was derived from.
#[derive(Debug, Clone)]
pub struct MatrixView {
    pub name: String,
    pub subjects: Vec<String>,
    pub analytes: Vec<String>,
    pub rows: Vec<Vec<f64>>,
}
