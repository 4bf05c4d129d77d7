// ==============================================================================
// phenotype.rs - Phenotype Harmonization
// ==============================================================================
// Description: Maps raw phenotype/diagnosis labels onto the fixed controlled
//              vocabulary via a configurable synonym table
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use crate::audit::{AuditLog, DecisionAction, DecisionStage};
use crate::models::{CanonicalSubject, Phenotype, SourceTag};
use std::collections::BTreeMap;
use tracing::info;

/// Raw phenotype opinions per subject key, gathered from every
/// phenotype-bearing source that contributed to the subject
pub type PhenotypeOpinions = BTreeMap<String, Vec<(SourceTag, String)>>;

pub struct Harmonizer {
    /// Normalized raw label -> canonical label name
    synonyms: BTreeMap<String, String>,
}

impl Harmonizer {
    pub fn new(synonyms: &BTreeMap<String, String>) -> Self {
        let synonyms = synonyms
            .iter()
            .map(|(k, v)| (normalize_label(k), v.trim().to_lowercase()))
            .collect();
        Self { synonyms }
    }

    /// Map one raw label through the synonym table. None means the label is
    /// not in the vocabulary at all.
    pub fn map_label(&self, raw: &str) -> Option<Phenotype> {
        let canonical = self.synonyms.get(&normalize_label(raw))?;
        match canonical.as_str() {
            "control" => Some(Phenotype::Control),
            "kwashiorkor" => Some(Phenotype::Kwashiorkor),
            "marasmus" => Some(Phenotype::Marasmus),
            "other" => Some(Phenotype::Other),
            _ => None,
        }
    }

    /// Assign exactly one canonical phenotype to every subject. Phenotypes
    /// are fixed after this runs.
    pub fn harmonize(
        &self,
        subjects: &mut [CanonicalSubject],
        opinions: &PhenotypeOpinions,
        audit: &mut AuditLog,
    ) {
        let mut ambiguous = 0usize;
        for subject in subjects.iter_mut() {
            subject.phenotype = self.resolve_subject(subject, opinions, audit);
            if subject.phenotype == Phenotype::Unresolved
                && opinions.contains_key(&subject.subject_key)
            {
                ambiguous += 1;
            }
        }
        info!(
            "Harmonized phenotypes for {} subjects ({} ambiguous)",
            subjects.len(),
            ambiguous
        );
    }

    fn resolve_subject(
        &self,
        subject: &CanonicalSubject,
        opinions: &PhenotypeOpinions,
        audit: &mut AuditLog,
    ) -> Phenotype {
        let labels = match opinions.get(&subject.subject_key) {
            Some(labels) if !labels.is_empty() => labels,
            // No phenotype information anywhere: the subject stays
            // unresolved without being an error
            _ => return Phenotype::Unresolved,
        };

        let mut mapped: Vec<(SourceTag, Phenotype)> = Vec::with_capacity(labels.len());
        for (source, raw) in labels {
            let phenotype = match self.map_label(raw) {
                Some(p) => p,
                None => {
                    audit.record(
                        DecisionStage::Harmonize,
                        DecisionAction::FlagAmbiguous,
                        Some(&subject.subject_key),
                        None,
                        format!(
                            "unrecognized phenotype label '{}' from {} source mapped to other",
                            raw.trim(),
                            source.as_str()
                        ),
                    );
                    Phenotype::Other
                }
            };
            mapped.push((*source, phenotype));
        }

        let first = mapped[0].1;
        if mapped.iter().all(|(_, p)| *p == first) {
            return first;
        }

        // Sources genuinely disagree after normalization: keep the subject in
        // the cleaned export but out of phenotype-stratified analyses
        let detail: Vec<String> = mapped
            .iter()
            .map(|(s, p)| format!("{}={}", s.as_str(), p.as_str()))
            .collect();
        audit.record(
            DecisionStage::Harmonize,
            DecisionAction::FlagAmbiguous,
            Some(&subject.subject_key),
            None,
            format!("sources disagree on phenotype: {}", detail.join(", ")),
        );
        Phenotype::Unresolved
    }
}

fn normalize_label(raw: &str) -> String {
    raw.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    fn harmonizer() -> Harmonizer {
        Harmonizer::new(&PipelineConfig::default().synonyms)
    }

    fn subject(key: &str) -> CanonicalSubject {
        CanonicalSubject {
            subject_key: key.to_string(),
            contributing_ids: BTreeMap::new(),
            phenotype: Phenotype::Unresolved,
        }
    }

    #[test]
    fn test_synonym_mapping() {
        let h = harmonizer();
        assert_eq!(h.map_label("Control"), Some(Phenotype::Control));
        assert_eq!(h.map_label(" MARASMUS "), Some(Phenotype::Marasmus));
        assert_eq!(h.map_label("Marasmic Kwashiorkor"), Some(Phenotype::Kwashiorkor));
        assert_eq!(h.map_label("MAM"), Some(Phenotype::Other));
        assert_eq!(h.map_label("sepsis"), None);
    }

    #[test]
    fn test_agreeing_sources_resolve() {
        let h = harmonizer();
        let mut subjects = vec![subject("p1")];
        let mut opinions = PhenotypeOpinions::new();
        opinions.insert(
            "p1".to_string(),
            vec![
                (SourceTag::Metadata, "Kwashiorkor".to_string()),
                (SourceTag::Master, "kwashiorkor".to_string()),
            ],
        );
        let mut audit = AuditLog::new();

        h.harmonize(&mut subjects, &opinions, &mut audit);

        assert_eq!(subjects[0].phenotype, Phenotype::Kwashiorkor);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_disagreeing_sources_flagged_unresolved() {
        let h = harmonizer();
        let mut subjects = vec![subject("p1")];
        let mut opinions = PhenotypeOpinions::new();
        opinions.insert(
            "p1".to_string(),
            vec![
                (SourceTag::Metadata, "marasmus".to_string()),
                (SourceTag::Master, "kwashiorkor".to_string()),
            ],
        );
        let mut audit = AuditLog::new();

        h.harmonize(&mut subjects, &opinions, &mut audit);

        assert_eq!(subjects[0].phenotype, Phenotype::Unresolved);
        let entry = &audit.entries()[0];
        assert_eq!(entry.action, DecisionAction::FlagAmbiguous);
        assert!(entry.reason.contains("sources disagree"));
    }

    #[test]
    fn test_unrecognized_label_maps_to_other_and_logs() {
        let h = harmonizer();
        let mut subjects = vec![subject("p1")];
        let mut opinions = PhenotypeOpinions::new();
        opinions.insert(
            "p1".to_string(),
            vec![(SourceTag::Metadata, "stunting".to_string())],
        );
        let mut audit = AuditLog::new();

        h.harmonize(&mut subjects, &opinions, &mut audit);

        assert_eq!(subjects[0].phenotype, Phenotype::Other);
        assert_eq!(audit.len(), 1);
        assert!(audit.entries()[0].reason.contains("unrecognized phenotype label 'stunting'"));
    }

    #[test]
    fn test_no_phenotype_info_stays_unresolved_silently() {
        let h = harmonizer();
        let mut subjects = vec![subject("p1")];
        let opinions = PhenotypeOpinions::new();
        let mut audit = AuditLog::new();

        h.harmonize(&mut subjects, &opinions, &mut audit);

        assert_eq!(subjects[0].phenotype, Phenotype::Unresolved);
        assert!(audit.is_empty());
    }

    #[test]
    fn test_mixed_presentation_folds_before_comparison() {
        // "marasmic kwashiorkor" vs "kwashiorkor" agree after normalization
        let h = harmonizer();
        let mut subjects = vec![subject("p1")];
        let mut opinions = PhenotypeOpinions::new();
        opinions.insert(
            "p1".to_string(),
            vec![
                (SourceTag::Metadata, "marasmic kwashiorkor".to_string()),
                (SourceTag::Master, "Kwashiorkor".to_string()),
            ],
        );
        let mut audit = AuditLog::new();

        h.harmonize(&mut subjects, &opinions, &mut audit);

        assert_eq!(subjects[0].phenotype, Phenotype::Kwashiorkor);
        assert!(audit.is_empty());
    }
}
