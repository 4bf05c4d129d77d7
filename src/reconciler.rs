// ==============================================================================
// reconciler.rs - Identifier Reconciliation
// ==============================================================================
// Description: Builds the canonical subject registry by matching raw subject
//              identifiers across sources on normalized comparison keys
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================
// Matching is strictly normalized-key equality. There is no fuzzy or
// edit-distance matching: a silent merge of two distinct subjects is the
// worst failure this pipeline can make, so near-matches are flagged for
// manual review instead.
// ==============================================================================

use crate::audit::{AuditLog, DecisionAction, DecisionStage};
use crate::models::{CanonicalSubject, Phenotype, RawRecord, SourceTag};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// How a raw identifier relates to the registry. The matching rule is kept
/// separate from the merge mechanics so it can be tested on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResolution {
    /// Matched across the measurement and metadata sources
    Merge,
    /// Present in metadata only; kept as a singleton subject
    Singleton,
    /// Cannot be used downstream (e.g. measurements without metadata)
    Exclude,
    /// Duplicate or conflicting; surfaced for manual review
    FlagAmbiguous,
}

/// The reconciled registry: canonical subjects in stable row order plus the
/// mapping from every raw id to its subject key.
#[derive(Debug, Default)]
pub struct Registry {
    pub subjects: Vec<CanonicalSubject>,
    /// (source, raw id as written) -> subject_key
    pub id_map: BTreeMap<(SourceTag, String), String>,
}

/// Normalize a raw identifier to its comparison key: trim, case-fold, strip
/// punctuation, and drop leading zeros from each digit run, so that
/// `" P-001 "` and `"p001"` both become `"p1"`.
pub fn normalize_id(raw: &str) -> String {
    let folded: String = raw
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();

    let mut out = String::with_capacity(folded.len());
    let mut digit_run = String::new();
    for c in folded.chars() {
        if c.is_ascii_digit() {
            digit_run.push(c);
        } else {
            flush_digit_run(&mut out, &mut digit_run);
            out.push(c);
        }
    }
    flush_digit_run(&mut out, &mut digit_run);
    out
}

fn flush_digit_run(out: &mut String, run: &mut String) {
    if run.is_empty() {
        return;
    }
    let stripped = run.trim_start_matches('0');
    // An all-zero run is still an identifier digit
    out.push_str(if stripped.is_empty() { "0" } else { stripped });
    run.clear();
}

/// Decide what to do with a repeated comparison key within one source:
/// identical rows are plain duplicates, conflicting rows are ambiguous.
pub fn resolve_duplicate(existing: &RawRecord, incoming: &RawRecord) -> MatchResolution {
    if existing == incoming {
        MatchResolution::Exclude
    } else {
        MatchResolution::FlagAmbiguous
    }
}

/// Cross-source matching rule for one comparison key
pub fn resolve_cross_source(in_metabolite: bool, in_metadata: bool) -> MatchResolution {
    match (in_metabolite, in_metadata) {
        (true, true) => MatchResolution::Merge,
        // Measurements without metadata cannot be phenotyped downstream
        (true, false) => MatchResolution::Exclude,
        (false, true) => MatchResolution::Singleton,
        (false, false) => MatchResolution::Exclude,
    }
}

/// Build the canonical subject registry from the three subject-bearing
/// sources. Row order is first-seen order in the metabolite source, with
/// metadata-only singletons appended.
pub fn reconcile<'a>(
    metabolite: &'a [RawRecord],
    metadata: &'a [RawRecord],
    master: &'a [RawRecord],
    audit: &mut AuditLog,
) -> (Registry, BTreeMap<String, &'a RawRecord>) {
    let metabolite_by_key = dedupe_source(metabolite, audit);
    let metadata_by_key = dedupe_source(metadata, audit);
    let master_by_key = dedupe_source(master, audit);

    let mut registry = Registry::default();

    // Metabolite rows drive the matrix row order
    for record in metabolite {
        let key = normalize_id(&record.raw_id);
        // Skip rows dropped by within-source deduplication
        if !std::ptr::eq(metabolite_by_key[&key], record) {
            continue;
        }

        match resolve_cross_source(true, metadata_by_key.contains_key(&key)) {
            MatchResolution::Merge => {
                let meta_record = metadata_by_key[&key];
                let mut contributing_ids = BTreeMap::new();
                contributing_ids.insert(SourceTag::Metabolite, record.raw_id.trim().to_string());
                contributing_ids.insert(SourceTag::Metadata, meta_record.raw_id.trim().to_string());
                if let Some(master_record) = master_by_key.get(&key) {
                    contributing_ids
                        .insert(SourceTag::Master, master_record.raw_id.trim().to_string());
                }

                audit.record(
                    DecisionStage::Reconcile,
                    DecisionAction::Merge,
                    Some(&key),
                    None,
                    format!(
                        "raw ids {:?} share comparison key '{}'",
                        contributing_ids.values().collect::<Vec<_>>(),
                        key
                    ),
                );

                for (source, raw) in &contributing_ids {
                    registry.id_map.insert((*source, raw.clone()), key.clone());
                }
                registry.subjects.push(CanonicalSubject {
                    subject_key: key,
                    contributing_ids,
                    phenotype: Phenotype::Unresolved,
                });
            }
            _ => {
                audit.record(
                    DecisionStage::Reconcile,
                    DecisionAction::ExcludeSubject,
                    Some(&key),
                    None,
                    format!("no-metadata-match: metabolite id '{}'", record.raw_id.trim()),
                );
            }
        }
    }

    // Metadata-only ids become singleton subjects. They carry no
    // measurements, so the missing-value policy decides whether they survive.
    for record in metadata {
        let key = normalize_id(&record.raw_id);
        if !std::ptr::eq(metadata_by_key[&key], record) {
            continue;
        }
        if registry.subjects.iter().any(|s| s.subject_key == key) {
            continue;
        }

        let mut contributing_ids = BTreeMap::new();
        contributing_ids.insert(SourceTag::Metadata, record.raw_id.trim().to_string());
        if let Some(master_record) = master_by_key.get(&key) {
            contributing_ids.insert(SourceTag::Master, master_record.raw_id.trim().to_string());
        }
        for (source, raw) in &contributing_ids {
            registry.id_map.insert((*source, raw.clone()), key.clone());
        }
        registry.subjects.push(CanonicalSubject {
            subject_key: key,
            contributing_ids,
            phenotype: Phenotype::Unresolved,
        });
    }

    info!(
        "Reconciled {} canonical subjects from {} metabolite / {} metadata / {} master rows",
        registry.subjects.len(),
        metabolite.len(),
        metadata.len(),
        master.len()
    );

    (registry, metabolite_by_key)
}

/// First-wins deduplication by comparison key within one source. Later rows
/// with an already-seen key are dropped and logged: identical rows as plain
/// duplicate exclusions, conflicting rows as ambiguous.
fn dedupe_source<'a>(
    records: &'a [RawRecord],
    audit: &mut AuditLog,
) -> BTreeMap<String, &'a RawRecord> {
    let mut by_key: BTreeMap<String, &RawRecord> = BTreeMap::new();
    for record in records {
        let key = normalize_id(&record.raw_id);
        match by_key.get(&key) {
            None => {
                by_key.insert(key, record);
            }
            Some(existing) => {
                let (action, detail) = match resolve_duplicate(existing, record) {
                    MatchResolution::FlagAmbiguous => {
                        (DecisionAction::FlagAmbiguous, "conflicting rows")
                    }
                    _ => (DecisionAction::ExcludeSubject, "identical rows"),
                };
                debug!(
                    "Duplicate key '{}' in {} source ({})",
                    key,
                    record.source.as_str(),
                    detail
                );
                audit.record(
                    DecisionStage::Reconcile,
                    action,
                    Some(&key),
                    None,
                    format!(
                        "duplicate identifier '{}' in {} source ({}); first row kept",
                        record.raw_id.trim(),
                        record.source.as_str(),
                        detail
                    ),
                );
            }
        }
    }
    by_key
}
