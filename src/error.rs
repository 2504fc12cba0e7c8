// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Fatal errors of a post run. Anything in here aborts the run; degraded
//! conditions (missing copy sources, failing shell commands) are only logged.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum PostRunError {
    #[error("invalid step: {step}. Valid steps: {valid}")]
    InvalidStep { step: String, valid: String },

    #[error("ERROR: {path:?} does not match expected file name pattern")]
    FileNameMismatch { path: PathBuf },

    #[error("ERROR: no sample sheet entry {index} for {path:?} ({count} samples in sheet)")]
    MissingSampleSheetEntry {
        index: usize,
        count: usize,
        path: PathBuf,
    },

    #[error(
        "ERROR: {path:?} names sample {found}, but sample sheet entry {index} is {expected}"
    )]
    SampleSheetMismatch {
        index: usize,
        expected: String,
        found: String,
        path: PathBuf,
    },

    #[error("ERROR: invalid barcode for sample {sample}: {barcode:?}")]
    InvalidBarcode { sample: String, barcode: String },

    #[error("ERROR: problem with input at line {line}: {header:?}")]
    InvalidFastqHeader { line: usize, header: String },

    #[error(
        "ERROR: sample names/lanes not matching {group} - {path:?}: \
         {found_sample} (lane {found_lane}) vs {expected_sample} (lane {expected_lane})"
    )]
    GroupCollision {
        group: String,
        path: PathBuf,
        expected_sample: String,
        expected_lane: usize,
        found_sample: String,
        found_lane: usize,
    },

    #[error("ERROR: no {kind} files found in {dir:?}")]
    NoInputFiles { kind: &'static str, dir: PathBuf },

    #[error("ERROR: invalid lane number {lane}")]
    InvalidLane { lane: usize },

    #[error("ERROR: no flowcell directory found for {flowcell_id} (search path: {pattern})")]
    NoFlowcellDir { flowcell_id: String, pattern: String },

    #[error("ERROR: {count} flowcell directories found for {flowcell_id} (search path: {pattern})")]
    MultipleFlowcellDirs {
        flowcell_id: String,
        pattern: String,
        count: usize,
    },

    #[error("ERROR: no Aligned project dir found for {flowcell_id}")]
    NoAlignedProjectDir { flowcell_id: String },

    #[error("ERROR: no Sample_* directories found in: {dirs}")]
    NoAlignedSamples { dirs: String },

    #[error("ERROR: {count} external data files found matching {pattern}")]
    MultipleExternalDataFiles { pattern: String, count: usize },
}
