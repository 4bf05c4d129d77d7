// ==============================================================================
// pipeline.rs - Harmonization Pipeline Orchestration
// ==============================================================================
// Description: Sequences the loader, reconciler, harmonizer, QC filter,
//              missing-value policy and transformation stages
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================
// Strictly sequential, single-threaded: each stage fully consumes its
// predecessor's output. A fatal error anywhere aborts the run before any
// export is written.
// ==============================================================================

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::info;

use crate::audit::AuditLog;
use crate::config::PipelineConfig;
use crate::models::{Phenotype, RawRecord, SourceTag};
use crate::phenotype::{Harmonizer, PhenotypeOpinions};
use crate::reconciler::{self, normalize_id};
use crate::sources::{self, MetaboliteTable, QcData};
use crate::{export, missing, qc_filter, transform};

/// Input file locations plus the export directory
#[derive(Debug, Clone)]
pub struct PipelineInputs {
    pub metabolite: PathBuf,
    pub metadata: PathBuf,
    pub master: PathBuf,
    pub qc: Option<PathBuf>,
    pub out_dir: PathBuf,
}

/// Per-stage counts for the plain-text summary report
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub metabolite_rows: usize,
    pub metadata_rows: usize,
    pub master_rows: usize,
    pub qc_groups: usize,
    pub non_numeric_cells: usize,

    pub subjects_reconciled: usize,
    pub subjects_excluded_reconcile: usize,
    pub subjects_flagged_ambiguous: usize,

    pub analytes_total: usize,
    pub analytes_retained_qc: usize,

    pub subjects_excluded_missing: usize,
    pub analytes_excluded_missing: usize,
    pub imputations: usize,
    pub outlier_corrections: usize,

    pub final_subjects: usize,
    pub final_analytes: usize,
}

impl RunSummary {
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("Harmonization pipeline summary\n");
        out.push_str("==============================\n\n");
        out.push_str("Load\n");
        out.push_str(&format!("  metabolite rows: {}\n", self.metabolite_rows));
        out.push_str(&format!("  metadata rows: {}\n", self.metadata_rows));
        out.push_str(&format!("  master rows: {}\n", self.master_rows));
        out.push_str(&format!("  qc replicate groups: {}\n", self.qc_groups));
        out.push_str(&format!(
            "  non-numeric measurement cells coerced to missing: {}\n",
            self.non_numeric_cells
        ));
        out.push_str("\nReconcile\n");
        out.push_str(&format!("  canonical subjects: {}\n", self.subjects_reconciled));
        out.push_str(&format!(
            "  subjects excluded: {}\n",
            self.subjects_excluded_reconcile
        ));
        out.push_str(&format!(
            "  ambiguous identifiers/phenotypes flagged: {}\n",
            self.subjects_flagged_ambiguous
        ));
        out.push_str("\nQC filter\n");
        out.push_str(&format!("  analytes observed: {}\n", self.analytes_total));
        out.push_str(&format!("  analytes retained: {}\n", self.analytes_retained_qc));
        out.push_str(&format!(
            "  analytes excluded: {}\n",
            self.analytes_total - self.analytes_retained_qc
        ));
        out.push_str("\nMissing-value policy\n");
        out.push_str(&format!(
            "  subjects excluded (excess-missing): {}\n",
            self.subjects_excluded_missing
        ));
        out.push_str(&format!(
            "  analytes excluded (nothing to impute from): {}\n",
            self.analytes_excluded_missing
        ));
        out.push_str(&format!("  values imputed: {}\n", self.imputations));
        out.push_str(&format!(
            "  implausible values corrected: {}\n",
            self.outlier_corrections
        ));
        out.push_str("\nFinal exports\n");
        out.push_str(&format!("  subjects: {}\n", self.final_subjects));
        out.push_str(&format!("  analytes: {}\n", self.final_analytes));
        out
    }
}

pub struct HarmonizationPipeline {
    config: PipelineConfig,
    inputs: PipelineInputs,
}

impl HarmonizationPipeline {
    pub fn new(config: PipelineConfig, inputs: PipelineInputs) -> Self {
        Self { config, inputs }
    }

    /// Run the full pipeline and write all artifacts. Given identical inputs
    /// and configuration, every export is byte-identical across reruns apart
    /// from audit timestamps.
    pub fn run(&self) -> Result<RunSummary> {
        let mut audit = AuditLog::new();
        let mut summary = RunSummary::default();

        // 1. Load all sources; handles are released before reconciliation
        info!("Loading sources");
        let (metabolite, metadata, master, qc) = self.load_sources()?;
        summary.metabolite_rows = metabolite.records.len();
        summary.metadata_rows = metadata.len();
        summary.master_rows = master.len();
        summary.qc_groups = qc.as_ref().map(|q| q.groups.len()).unwrap_or(0);
        summary.non_numeric_cells = metabolite.non_numeric_cells;

        // 2. Reconcile identifiers into the canonical registry
        info!("Reconciling subject identifiers");
        let (mut registry, metabolite_by_key) =
            reconciler::reconcile(&metabolite.records, &metadata, &master, &mut audit);
        summary.subjects_reconciled = registry.subjects.len();
        summary.subjects_excluded_reconcile =
            audit.count_action(crate::audit::DecisionAction::ExcludeSubject);

        // 3. Harmonize phenotypes; fixed from here on
        info!("Harmonizing phenotype labels");
        let opinions = collect_opinions(&metadata, &master);
        let harmonizer = Harmonizer::new(&self.config.synonyms);
        harmonizer.harmonize(&mut registry.subjects, &opinions, &mut audit);

        // 4. Assemble the subject x analyte observation matrix
        let analytes = &metabolite.analytes;
        let observations = assemble_observations(&registry.subjects, analytes, &metabolite_by_key);
        summary.analytes_total = analytes.len();

        // 5. QC filter on replicate RSD plus structural filters
        info!("Applying QC filter");
        let columns = transpose(&observations, analytes.len());
        let panel = qc_filter::apply(analytes, &columns, qc.as_ref(), &self.config, &mut audit);
        summary.analytes_retained_qc = panel.analytes.iter().filter(|a| a.retained).count();

        let retained: Vec<usize> = panel
            .analytes
            .iter()
            .enumerate()
            .filter(|(_, a)| a.retained)
            .map(|(i, _)| i)
            .collect();
        let retained_names: Vec<String> = panel.retained_names();
        let retained_rows: Vec<Vec<Option<f64>>> = observations
            .iter()
            .map(|row| retained.iter().map(|&j| row[j]).collect())
            .collect();

        // 6. Missing-value and outlier policy -> cleaned matrix
        info!("Applying missing-value policy");
        let subject_keys: Vec<(String, Phenotype)> = registry
            .subjects
            .iter()
            .map(|s| (s.subject_key.clone(), s.phenotype))
            .collect();
        let (cleaned, counts) = missing::apply(
            &subject_keys,
            &retained_names,
            retained_rows,
            &self.config,
            &mut audit,
        );
        summary.subjects_excluded_missing = counts.excluded_subjects;
        summary.analytes_excluded_missing = counts.excluded_analytes;
        summary.imputations = counts.imputations;
        summary.outlier_corrections = counts.outlier_corrections;
        summary.final_subjects = cleaned.subjects.len();
        summary.final_analytes = cleaned.analytes.len();

        // 7. Transformed views, shape-locked to the cleaned matrix
        info!("Producing ranked and normalized views");
        let ranked = transform::ranked_view(&cleaned);
        let normalized = transform::normalized_view(&cleaned, self.config.skew_threshold);

        summary.subjects_flagged_ambiguous =
            audit.count_action(crate::audit::DecisionAction::FlagAmbiguous);

        // 8. Export everything; nothing was written before this point
        info!("Exporting artifacts to {}", self.inputs.out_dir.display());
        export::export_all(
            &self.inputs.out_dir,
            &cleaned,
            &ranked,
            &normalized,
            &panel,
            &summary,
            &audit,
        )?;

        Ok(summary)
    }

    fn load_sources(
        &self,
    ) -> Result<(
        MetaboliteTable,
        Vec<RawRecord>,
        Vec<RawRecord>,
        Option<QcData>,
    )> {
        let columns = &self.config.columns;

        let metabolite = sources::load_metabolite(&self.inputs.metabolite, &columns.metabolite)
            .context("loading metabolite source")?;
        let metadata = sources::load_subject_table(
            &self.inputs.metadata,
            &columns.metadata,
            SourceTag::Metadata,
        )
        .context("loading metadata source")?;
        let master =
            sources::load_subject_table(&self.inputs.master, &columns.master, SourceTag::Master)
                .context("loading master source")?;

        let qc = match &self.inputs.qc {
            Some(path) => {
                Some(sources::load_qc(path, &columns.qc).context("loading qc source")?)
            }
            None => None,
        };

        Ok((metabolite, metadata, master, qc))
    }
}

/// Raw phenotype labels per comparison key, first row wins per source to
/// mirror the reconciler's deduplication
fn collect_opinions(metadata: &[RawRecord], master: &[RawRecord]) -> PhenotypeOpinions {
    let mut opinions = PhenotypeOpinions::new();
    let mut seen: BTreeMap<(SourceTag, String), ()> = BTreeMap::new();

    for record in metadata.iter().chain(master.iter()) {
        let key = normalize_id(&record.raw_id);
        if seen.insert((record.source, key.clone()), ()).is_some() {
            continue;
        }
        if let Some(label) = &record.raw_phenotype {
            opinions
                .entry(key)
                .or_default()
                .push((record.source, label.clone()));
        }
    }
    opinions
}

/// One observation row per canonical subject, in registry order. Subjects
/// without a metabolite contribution get an all-missing row; the
/// missing-value policy decides their fate.
fn assemble_observations(
    subjects: &[crate::models::CanonicalSubject],
    analytes: &[String],
    metabolite_by_key: &BTreeMap<String, &RawRecord>,
) -> Vec<Vec<Option<f64>>> {
    subjects
        .iter()
        .map(|subject| match metabolite_by_key.get(&subject.subject_key) {
            Some(record) => record.values.iter().map(|(_, v)| *v).collect(),
            None => vec![None; analytes.len()],
        })
        .collect()
}

fn transpose(rows: &[Vec<Option<f64>>], width: usize) -> Vec<Vec<Option<f64>>> {
    (0..width)
        .map(|j| rows.iter().map(|row| row[j]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// A small but complete cohort: four subjects present in all three
    /// subject-bearing sources, one metabolite-only row, one metadata-only
    /// row, and a QC pool whose gly replicates fail the RSD threshold.
    fn write_cohort(dir: &TempDir) -> PipelineInputs {
        fs::write(
            dir.path().join("metabolite.csv"),
            "SUBJECTID,ala,gly,ser\n\
             P-001,1.0,5.0,2.0\n\
             P-002,2.0,6.0,2.0\n\
             P-003,3.0,7.0,4.0\n\
             P-004,4.0,8.0,4.0\n\
             P-005,9.0,9.0,9.0\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("metadata.csv"),
            "SUBJECTID,Subject Diagnosis\n\
             p001,Control\n\
             p002,Kwashiorkor\n\
             p003,Marasmus\n\
             p004,control\n\
             p006,Control\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("master.csv"),
            "ID,Subject Diagnosis\n\
             P001,Control\n\
             P002,kwashiorkor\n\
             P003,Marasmus\n\
             P004,Control\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("qc.csv"),
            "QC_GROUP,ala,gly,ser\n\
             pool,10,10,100\n\
             pool,10.2,10.5,101\n\
             pool,9.9,15,99\n",
        )
        .unwrap();

        PipelineInputs {
            metabolite: dir.path().join("metabolite.csv"),
            metadata: dir.path().join("metadata.csv"),
            master: dir.path().join("master.csv"),
            qc: Some(dir.path().join("qc.csv")),
            out_dir: dir.path().join("processed"),
        }
    }

    #[test]
    fn test_end_to_end_run() {
        let dir = TempDir::new().unwrap();
        let inputs = write_cohort(&dir);
        let out_dir = inputs.out_dir.clone();
        let pipeline = HarmonizationPipeline::new(PipelineConfig::default(), inputs);

        let summary = pipeline.run().unwrap();

        // P-005 has no metadata match; p006 carries no measurements and is
        // dropped by the missing-value policy
        assert_eq!(summary.subjects_reconciled, 5);
        assert_eq!(summary.final_subjects, 4);
        // gly replicates [10, 10.5, 15] sit at ~23.2% RSD, over the 20% cut
        assert_eq!(summary.analytes_total, 3);
        assert_eq!(summary.analytes_retained_qc, 2);
        assert_eq!(summary.final_analytes, 2);

        for file in [
            export::CLEANED_FILE,
            export::RANKED_FILE,
            export::NORMALIZED_FILE,
            export::RSD_FILE,
            export::SUMMARY_FILE,
            export::AUDIT_FILE,
        ] {
            assert!(out_dir.join(file).exists(), "missing artifact {file}");
        }

        let cleaned = fs::read_to_string(out_dir.join(export::CLEANED_FILE)).unwrap();
        let lines: Vec<&str> = cleaned.lines().collect();
        assert_eq!(lines[0], "subject_key,phenotype,ala,ser");
        assert_eq!(lines[1], "p1,control,1,2");
        assert_eq!(lines[2], "p2,kwashiorkor,2,2");
        assert_eq!(lines.len(), 5);

        let rsd = fs::read_to_string(out_dir.join(export::RSD_FILE)).unwrap();
        assert!(rsd.lines().any(|l| l.starts_with("gly,23.2") && l.ends_with("false")));

        let audit_text = fs::read_to_string(out_dir.join(export::AUDIT_FILE)).unwrap();
        assert!(audit_text.contains("no-metadata-match"));
        assert!(audit_text.contains("excess-missing"));

        let report = fs::read_to_string(out_dir.join(export::SUMMARY_FILE)).unwrap();
        assert!(report.contains("analytes retained: 2"));
    }

    #[test]
    fn test_views_share_cleaned_shape() {
        let dir = TempDir::new().unwrap();
        let inputs = write_cohort(&dir);
        let out_dir = inputs.out_dir.clone();
        let pipeline = HarmonizationPipeline::new(PipelineConfig::default(), inputs);
        pipeline.run().unwrap();

        let cleaned = fs::read_to_string(out_dir.join(export::CLEANED_FILE)).unwrap();
        let header = cleaned.lines().next().unwrap().to_string();
        let rows = cleaned.lines().count();

        for file in [export::RANKED_FILE, export::NORMALIZED_FILE] {
            let view = fs::read_to_string(out_dir.join(file)).unwrap();
            assert_eq!(view.lines().next().unwrap(), header);
            assert_eq!(view.lines().count(), rows);
            // Subject keys line up row for row
            for (a, b) in cleaned.lines().zip(view.lines()).skip(1) {
                assert_eq!(a.split(',').next(), b.split(',').next());
            }
        }
    }

    #[test]
    fn test_rerun_is_byte_identical_apart_from_timestamps() {
        let dir = TempDir::new().unwrap();
        let inputs = write_cohort(&dir);

        let first = dir.path().join("run1");
        let second = dir.path().join("run2");
        for out_dir in [&first, &second] {
            let mut inputs = inputs.clone();
            inputs.out_dir = out_dir.clone();
            HarmonizationPipeline::new(PipelineConfig::default(), inputs)
                .run()
                .unwrap();
        }

        for file in [
            export::CLEANED_FILE,
            export::RANKED_FILE,
            export::NORMALIZED_FILE,
            export::RSD_FILE,
            export::SUMMARY_FILE,
        ] {
            let a = fs::read(first.join(file)).unwrap();
            let b = fs::read(second.join(file)).unwrap();
            assert_eq!(a, b, "{file} differs between identical reruns");
        }

        // The audit log matches once the timestamp column is dropped
        let strip = |text: String| -> Vec<String> {
            text.lines()
                .map(|l| l.rsplitn(2, ',').nth(1).unwrap_or(l).to_string())
                .collect()
        };
        let a = strip(fs::read_to_string(first.join(export::AUDIT_FILE)).unwrap());
        let b = strip(fs::read_to_string(second.join(export::AUDIT_FILE)).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_missing_input_file_is_fatal_and_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut inputs = write_cohort(&dir);
        inputs.metabolite = dir.path().join("does_not_exist.csv");
        let out_dir = inputs.out_dir.clone();

        let result = HarmonizationPipeline::new(PipelineConfig::default(), inputs).run();

        assert!(result.is_err());
        assert!(!out_dir.exists());
    }

    #[test]
    fn test_collect_opinions_first_row_wins() {
        let records = vec![
            RawRecord {
                source: SourceTag::Metadata,
                raw_id: "P-001".to_string(),
                raw_phenotype: Some("control".to_string()),
                values: Vec::new(),
            },
            RawRecord {
                source: SourceTag::Metadata,
                raw_id: "p001".to_string(),
                raw_phenotype: Some("marasmus".to_string()),
                values: Vec::new(),
            },
        ];

        let opinions = collect_opinions(&records, &[]);
        assert_eq!(opinions["p1"].len(), 1);
        assert_eq!(opinions["p1"][0].1, "control");
    }

    #[test]
    fn test_transpose_shape() {
        let rows = vec![
            vec![Some(1.0), None],
            vec![Some(3.0), Some(4.0)],
        ];
        let cols = transpose(&rows, 2);
        assert_eq!(cols, vec![vec![Some(1.0), Some(3.0)], vec![None, Some(4.0)]]);
    }

    #[test]
    fn test_summary_render_contains_stage_counts() {
        let summary = RunSummary {
            metabolite_rows: 10,
            subjects_reconciled: 8,
            analytes_total: 5,
            analytes_retained_qc: 4,
            final_subjects: 7,
            final_analytes: 4,
            ..Default::default()
        };
        let text = summary.render();
        assert!(text.contains("metabolite rows: 10"));
        assert!(text.contains("canonical subjects: 8"));
        assert!(text.contains("analytes retained: 4"));
        assert!(text.contains("subjects: 7"));
    }
}
