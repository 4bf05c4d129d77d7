// ==============================================================================
// export.rs - Pipeline Artifact Export
// ==============================================================================
// Description: Writes the cleaned/ranked/normalized matrices, RSD summary,
//              stage-count report and audit log as CSV/text artifacts
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================
// Every artifact is written to a .tmp sibling and renamed into place, so a
// crash mid-write never leaves a partial file that looks complete.
// ==============================================================================

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::audit::AuditLog;
use crate::models::{AnalytePanel, CleanedMatrix, MatrixView};
use crate::pipeline::RunSummary;

pub const CLEANED_FILE: &str = "cleaned_data.csv";
pub const RANKED_FILE: &str = "ranked_data.csv";
pub const NORMALIZED_FILE: &str = "normalized_data.csv";
pub const RSD_FILE: &str = "rsd_summary.csv";
pub const SUMMARY_FILE: &str = "summary.txt";
pub const AUDIT_FILE: &str = "audit_log.csv";

/// Write all pipeline artifacts into `out_dir`
pub fn export_all(
    out_dir: &Path,
    cleaned: &CleanedMatrix,
    ranked: &MatrixView,
    normalized: &MatrixView,
    panel: &AnalytePanel,
    summary: &RunSummary,
    audit: &AuditLog,
) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed to create output directory {}", out_dir.display()))?;

    write_matrix(&out_dir.join(CLEANED_FILE), cleaned, &cleaned.rows)?;
    write_matrix(&out_dir.join(RANKED_FILE), cleaned, &ranked.rows)?;
    write_matrix(&out_dir.join(NORMALIZED_FILE), cleaned, &normalized.rows)?;
    write_rsd_summary(&out_dir.join(RSD_FILE), panel)?;

    write_atomic(&out_dir.join(SUMMARY_FILE), |file| {
        use std::io::Write;
        file.write_all(summary.render().as_bytes())?;
        Ok(())
    })?;

    write_atomic(&out_dir.join(AUDIT_FILE), |file| {
        audit.write_csv(file)?;
        Ok(())
    })?;

    info!(
        "Exported {} subjects x {} analytes plus reports to {}",
        cleaned.subjects.len(),
        cleaned.analytes.len(),
        out_dir.display()
    );
    Ok(())
}

/// One row per subject: subject key, phenotype, then analyte columns. The
/// cleaned matrix supplies the row/column identity for every view.
fn write_matrix(path: &Path, identity: &CleanedMatrix, rows: &[Vec<f64>]) -> Result<()> {
    write_atomic(path, |file| {
        let mut w = csv::Writer::from_writer(file);

        let mut header = vec!["subject_key".to_string(), "phenotype".to_string()];
        header.extend(identity.analytes.iter().cloned());
        w.write_record(&header)?;

        for (i, row) in rows.iter().enumerate() {
            let mut record = vec![
                identity.subjects[i].clone(),
                identity.phenotypes[i].as_str().to_string(),
            ];
            record.extend(row.iter().map(|v| v.to_string()));
            w.write_record(&record)?;
        }
        w.flush()?;
        Ok(())
    })
}

/// Analytes sorted ascending by RSD (no-QC analytes last), with the retain
/// verdict alongside
fn write_rsd_summary(path: &Path, panel: &AnalytePanel) -> Result<()> {
    let mut entries: Vec<_> = panel.analytes.iter().collect();
    entries.sort_by(|a, b| match (a.rsd, b.rsd) {
        (Some(x), Some(y)) => x
            .partial_cmp(&y)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name)),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.name.cmp(&b.name),
    });

    write_atomic(path, |file| {
        let mut w = csv::Writer::from_writer(file);
        w.write_record(["analyte", "rsd", "retained"])?;
        for entry in entries {
            w.write_record([
                entry.name.as_str(),
                &entry.rsd.map(|r| format!("{r:.2}")).unwrap_or_default(),
                if entry.retained { "true" } else { "false" },
            ])?;
        }
        w.flush()?;
        Ok(())
    })
}

/// Write through a .tmp sibling and rename into place on success
fn write_atomic<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let result = (|| {
        let mut file = File::create(&tmp_path)
            .with_context(|| format!("failed to create {}", tmp_path.display()))?;
        write(&mut file)?;
        file.sync_all()
            .with_context(|| format!("failed to sync {}", tmp_path.display()))?;
        Ok(())
    })();

    match result {
        Ok(()) => std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to finalize {}", path.display())),
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalyteQc, Phenotype};
    use tempfile::TempDir;

    fn small_matrix() -> CleanedMatrix {
        CleanedMatrix {
            subjects: vec!["p1".to_string(), "p2".to_string()],
            phenotypes: vec![Phenotype::Control, Phenotype::Kwashiorkor],
            analytes: vec!["ala".to_string(), "gly".to_string()],
            rows: vec![vec![1.0, 2.0], vec![3.0, 4.0]],
        }
    }

    #[test]
    fn test_matrix_export_layout() {
        let dir = TempDir::new().unwrap();
        let matrix = small_matrix();
        let path = dir.path().join("cleaned_data.csv");

        write_matrix(&path, &matrix, &matrix.rows).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next().unwrap(), "subject_key,phenotype,ala,gly");
        assert_eq!(lines.next().unwrap(), "p1,control,1,2");
        assert_eq!(lines.next().unwrap(), "p2,kwashiorkor,3,4");
    }

    #[test]
    fn test_rsd_summary_sorted_ascending_with_no_qc_last() {
        let dir = TempDir::new().unwrap();
        let panel = AnalytePanel {
            analytes: vec![
                AnalyteQc { name: "gly".into(), rsd: Some(23.2), retained: false },
                AnalyteQc { name: "ala".into(), rsd: Some(4.1), retained: true },
                AnalyteQc { name: "ser".into(), rsd: None, retained: true },
            ],
        };
        let path = dir.path().join("rsd_summary.csv");

        write_rsd_summary(&path, &panel).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "analyte,rsd,retained");
        assert_eq!(lines[1], "ala,4.10,true");
        assert_eq!(lines[2], "gly,23.20,false");
        assert_eq!(lines[3], "ser,,true");
    }

    #[test]
    fn test_atomic_write_leaves_no_tmp_on_success() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        write_atomic(&path, |file| {
            use std::io::Write;
            file.write_all(b"data\n")?;
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("out.csv.tmp").exists());
    }

    #[test]
    fn test_atomic_write_removes_tmp_on_failure() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");

        let result = write_atomic(&path, |_| anyhow::bail!("boom"));

        assert!(result.is_err());
        assert!(!path.exists());
        assert!(!dir.path().join("out.csv.tmp").exists());
    }
}
