// Copyright (c) 2018 10x Genomics, Inc. All rights reserved.

//! Post-run processing of Illumina flowcells.
//! Major functionality includes:
//! * Parse CASAVA / bcl2fastq per-tile FASTQ and export file names into
//!   structured records
//! * Group per-tile files into one logical file per (lane, read, barcode),
//!   concatenate them in tile order and strip reads that failed the
//!   sequencer's pass-filter
//! * Split lanes that use lab-defined ("custom") barcodes into per-barcode files
//! * Distribute finished files and QC artifacts to project directories,
//!   copying each destination exactly once
//! * Drive all of the above as a selectable list of post-run steps with a
//!   transcript of every command that was (or, in dry-run mode, would have been) run

pub mod combine;
pub mod config;
pub mod custom_barcode;
pub mod distribute;
pub mod error;
pub mod external;
pub mod filenames;
pub mod flowcell;
pub mod group;
pub mod notify;
pub mod paths;
pub mod post_run;
pub mod report;
pub mod sample_sheet;
pub mod shell;
mod utils;

pub use crate::config::Config;
pub use crate::distribute::DistributionTarget;
pub use crate::error::PostRunError;
pub use crate::filenames::FileRecord;
pub use crate::flowcell::FlowcellRecord;
pub use crate::group::{FileGroup, GroupOptions};
pub use crate::post_run::{PostRunOptions, PostRunner, Step};

/// Barcode label CASAVA uses for reads that could not be assigned to a sample.
pub const UNDETERMINED: &str = "Undetermined";

/// Barcode label for lanes that are not multiplexed.
pub const NO_INDEX: &str = "NoIndex";

/// Number of physical lanes on a flowcell.
pub const NUM_LANES: usize = 8;
