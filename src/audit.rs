// ==============================================================================
// audit.rs - Audit Logging for Harmonization Decisions
// ==============================================================================
// Description: Append-only decision trail for every merge, exclusion and
//              imputation made by the pipeline
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Pipeline stage a decision belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionStage {
    Load,
    Reconcile,
    Harmonize,
    QcFilter,
    MissingPolicy,
    Transform,
}

impl DecisionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStage::Load => "load",
            DecisionStage::Reconcile => "reconcile",
            DecisionStage::Harmonize => "harmonize",
            DecisionStage::QcFilter => "qc-filter",
            DecisionStage::MissingPolicy => "missing-policy",
            DecisionStage::Transform => "transform",
        }
    }
}

/// What was decided
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DecisionAction {
    Merge,
    ExcludeSubject,
    ExcludeAnalyte,
    RetainAnalyte,
    Impute,
    FlagAmbiguous,
}

impl DecisionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionAction::Merge => "merge",
            DecisionAction::ExcludeSubject => "exclude-subject",
            DecisionAction::ExcludeAnalyte => "exclude-analyte",
            DecisionAction::RetainAnalyte => "retain-analyte",
            DecisionAction::Impute => "impute",
            DecisionAction::FlagAmbiguous => "flag-ambiguous",
        }
    }
}

/// One immutable audit entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleaningDecision {
    /// Position in the log. Entries are sequence-numbered rather than given
    /// random ids so reruns on identical inputs produce identical logs apart
    /// from timestamps.
    pub seq: u64,
    pub stage: DecisionStage,
    pub subject_key: Option<String>,
    pub analyte: Option<String>,
    pub action: DecisionAction,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only ordered decision log. Stages only get to append; nothing is
/// ever rewritten or reordered.
#[derive(Debug, Default)]
pub struct AuditLog {
    entries: Vec<CleaningDecision>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        stage: DecisionStage,
        action: DecisionAction,
        subject_key: Option<&str>,
        analyte: Option<&str>,
        reason: impl Into<String>,
    ) {
        let seq = self.entries.len() as u64;
        self.entries.push(CleaningDecision {
            seq,
            stage,
            subject_key: subject_key.map(str::to_string),
            analyte: analyte.map(str::to_string),
            action,
            reason: reason.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn entries(&self) -> &[CleaningDecision] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Count of entries with a given action, for summary reporting
    pub fn count_action(&self, action: DecisionAction) -> usize {
        self.entries.iter().filter(|e| e.action == action).count()
    }

    /// Write the full ordered log as CSV
    pub fn write_csv(&self, writer: impl Write) -> Result<(), csv::Error> {
        let mut w = csv::Writer::from_writer(writer);
        w.write_record(["seq", "stage", "subject_key", "analyte", "action", "reason", "timestamp"])?;
        for e in &self.entries {
            w.write_record([
                e.seq.to_string().as_str(),
                e.stage.as_str(),
                e.subject_key.as_deref().unwrap_or(""),
                e.analyte.as_deref().unwrap_or(""),
                e.action.as_str(),
                e.reason.as_str(),
                e.timestamp.to_rfc3339().as_str(),
            ])?;
        }
        w.flush()?;
        Ok(())
    }
}
