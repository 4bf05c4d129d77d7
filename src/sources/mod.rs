// ==============================================================================
// mod.rs - Source Loaders
// ==============================================================================
// Description: Per-source loaders turning raw tabular files into record sets
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

pub mod cohort;
pub mod qc;
pub mod table;

pub use cohort::{load_metabolite, load_subject_table, MetaboliteTable};
pub use qc::{load_qc, QcData, QcReplicateGroup};
pub use table::{RawTable, SourceLoadError};
