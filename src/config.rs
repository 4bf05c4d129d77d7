// ==============================================================================
// config.rs - Pipeline Configuration
// ==============================================================================
// Description: Column mappings, thresholds and the phenotype synonym table,
//              loaded from a JSON file with documented defaults
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while loading or validating configuration. Configuration
/// problems are structural failures: the run halts before any stage executes.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Column names for one subject-bearing source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceColumns {
    /// Name of the subject-identifier column
    pub subject_id: String,
    /// Name of the phenotype/diagnosis column, if the source carries one
    #[serde(default)]
    pub phenotype: Option<String>,
}

/// Column names for the QC replicate source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QcColumns {
    /// Name of the replicate-group key column; every other column is treated
    /// as an analyte measurement
    pub replicate_group: String,
}

/// Key -> column mapping for every input source. Exact column names live
/// here, never in the loaders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMap {
    pub metabolite: SourceColumns,
    pub metadata: SourceColumns,
    pub master: SourceColumns,
    pub qc: QcColumns,
}

impl Default for ColumnMap {
    fn default() -> Self {
        Self {
            metabolite: SourceColumns {
                subject_id: "SUBJECTID".to_string(),
                phenotype: None,
            },
            metadata: SourceColumns {
                subject_id: "SUBJECTID".to_string(),
                phenotype: Some("Subject Diagnosis".to_string()),
            },
            master: SourceColumns {
                subject_id: "ID".to_string(),
                phenotype: Some("Subject Diagnosis".to_string()),
            },
            qc: QcColumns {
                replicate_group: "QC_GROUP".to_string(),
            },
        }
    }
}

/// Deterministic analyte-local statistic used to fill missing cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImputeMethod {
    /// Median of the observed values for the analyte
    Median,
    /// Mean of the observed values for the analyte
    Mean,
    /// Half the minimum observed value for the analyte
    HalfMin,
}

impl ImputeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImputeMethod::Median => "median",
            ImputeMethod::Mean => "mean",
            ImputeMethod::HalfMin => "half-min",
        }
    }
}

/// Optional structural analyte filters applied after the RSD filter. Each
/// threshold is a fraction of rows (or an absolute statistic for iqr and
/// baseline); None disables the filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralFilters {
    /// Drop analytes whose observed values are all identical
    #[serde(default = "default_true")]
    pub drop_constant: bool,
    /// Drop analytes missing in more than this fraction of subjects
    #[serde(default = "default_missing_rate")]
    pub max_missing_rate: Option<f64>,
    /// Drop analytes that are zero in more than this fraction of subjects
    #[serde(default = "default_zero_rate")]
    pub max_zero_rate: Option<f64>,
    /// Drop analytes with interquartile range below this value
    #[serde(default)]
    pub min_iqr: Option<f64>,
    /// Drop analytes whose mean sits below this baseline/detection limit
    #[serde(default)]
    pub min_baseline: Option<f64>,
}

impl Default for StructuralFilters {
    fn default() -> Self {
        Self {
            drop_constant: true,
            max_missing_rate: default_missing_rate(),
            max_zero_rate: default_zero_rate(),
            min_iqr: None,
            min_baseline: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_missing_rate() -> Option<f64> {
    Some(0.5)
}

fn default_zero_rate() -> Option<f64> {
    Some(0.25)
}

fn default_rsd_threshold() -> f64 {
    // LC-MS cut-off; GC panels typically run at 30.0
    20.0
}

fn default_max_missing_fraction() -> f64 {
    0.5
}

fn default_outlier_sd() -> f64 {
    5.0
}

fn default_skew_threshold() -> f64 {
    2.0
}

fn default_impute_method() -> ImputeMethod {
    ImputeMethod::Median
}

/// Full pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub columns: ColumnMap,

    /// Raw phenotype label -> canonical label ("control", "kwashiorkor",
    /// "marasmus", "other"). Lookup keys are case-folded and trimmed before
    /// matching.
    pub synonyms: BTreeMap<String, String>,

    /// Analytes with QC RSD at or above this percentage are excluded
    pub rsd_threshold: f64,

    /// Subjects missing more than this fraction of retained analytes are
    /// excluded entirely
    pub max_missing_fraction: f64,

    /// Plausibility band half-width: values outside analyte median +/- k*sd
    /// are treated as missing and imputed
    pub outlier_sd: f64,

    /// Columns with |sample skewness| above this are log-transformed before
    /// z-scoring in the normalized view
    pub skew_threshold: f64,

    pub impute_method: ImputeMethod,

    pub filters: StructuralFilters,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            columns: ColumnMap::default(),
            synonyms: default_synonyms(),
            rsd_threshold: default_rsd_threshold(),
            max_missing_fraction: default_max_missing_fraction(),
            outlier_sd: default_outlier_sd(),
            skew_threshold: default_skew_threshold(),
            impute_method: default_impute_method(),
            filters: StructuralFilters::default(),
        }
    }
}

fn default_synonyms() -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    map.insert("control".to_string(), "control".to_string());
    map.insert("kwashiorkor".to_string(), "kwashiorkor".to_string());
    map.insert("marasmus".to_string(), "marasmus".to_string());
    // Mixed presentations fold into kwashiorkor, as the source cohort did
    map.insert("marasmic kwashiorkor".to_string(), "kwashiorkor".to_string());
    map.insert("marasmus kwashiorkor".to_string(), "kwashiorkor".to_string());
    map.insert("mam".to_string(), "other".to_string());
    map.insert("moderate acute malnutrition".to_string(), "other".to_string());
    // "SAM" cannot distinguish kwashiorkor from marasmus; it lands in
    // `other` and the combined class is recovered via Phenotype::is_sam
    map.insert("sam".to_string(), "other".to_string());
    map.insert("severe acute malnutrition".to_string(), "other".to_string());
    map
}

impl PipelineConfig {
    /// Load configuration from a JSON file. Missing keys fall back to the
    /// documented defaults; an unreadable or unparsable file is fatal.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.rsd_threshold > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "rsd_threshold must be positive, got {}",
                self.rsd_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.max_missing_fraction) {
            return Err(ConfigError::Invalid(format!(
                "max_missing_fraction must be in [0, 1], got {}",
                self.max_missing_fraction
            )));
        }
        if !(self.outlier_sd > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "outlier_sd must be positive, got {}",
                self.outlier_sd
            )));
        }
        if let Some(rate) = self.filters.max_missing_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "filters.max_missing_rate must be in [0, 1], got {rate}"
                )));
            }
        }
        if let Some(rate) = self.filters.max_zero_rate {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "filters.max_zero_rate must be in [0, 1], got {rate}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.rsd_threshold, 20.0);
        assert_eq!(config.max_missing_fraction, 0.5);
        assert_eq!(config.impute_method, ImputeMethod::Median);
        assert_eq!(
            config.synonyms.get("marasmic kwashiorkor").map(String::as_str),
            Some("kwashiorkor")
        );
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rsd_threshold": 30.0}}"#).unwrap();
        file.flush().unwrap();

        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rsd_threshold, 30.0);
        // Untouched keys keep their defaults
        assert_eq!(config.max_missing_fraction, 0.5);
        assert_eq!(config.columns.master.subject_id, "ID");
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{"rsd_threshold": -5.0}}"#).unwrap();
        file.flush().unwrap();

        let result = PipelineConfig::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let result = PipelineConfig::from_file("/nonexistent/config.json");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_impute_method_kebab_case() {
        let method: ImputeMethod = serde_json::from_str(r#""half-min""#).unwrap();
        assert_eq!(method, ImputeMethod::HalfMin);
    }
}
