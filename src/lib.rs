// ==============================================================================
// lib.rs - Cohort Harmonizer Library
// ==============================================================================
// Description: Library interface for cohort harmonization pipeline modules
// Author: Matt Barham
// Created: 2026-02-03
// Modified: 2026-08-26
// Version: 1.0.0
// ==============================================================================

pub mod audit;
pub mod config;
pub mod export;
pub mod missing;
pub mod models;
pub mod phenotype;
pub mod pipeline;
pub mod qc_filter;
pub mod reconciler;
pub mod sources;
pub mod transform;
